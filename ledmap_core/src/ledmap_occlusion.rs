//! The "FACING" Engine - Occlusion Analysis
//!
//! Decides, per camera and LED, whether the LED sits on the cone face turned
//! toward the camera (near root) or away from it (far root).
//!
//! # Why a sequence
//!
//! A single detection cannot tell front from back. The LED string however
//! winds around the tree, so consecutive indices sweep in and out of a
//! camera's view in long runs. Per camera we read the detection confidence
//! in LED order (0 where the camera saw nothing) and segment it with a
//! hysteresis threshold:
//!
//! ```text
//! confidence
//!   1.0 ┤ ████        ███████              ████
//!  0.55 ┤─────────────────────────────────────────  exit hidden (upper)
//!  0.35 ┤─────────────────────────────────────────  enter hidden (lower)
//!   0.0 ┤     ▁▁▁▁▁▁▁        ▁▁▁▁▁▁▁▁▁▁▁▁▁
//!         front  back    front    back       front
//! ```
//!
//! A state flips only after `min_run_length` consecutive samples beyond the
//! opposite bound; the flip is back-dated to the first sample of that run.
//!
//! # Score
//!
//! Within each segment a per-sample hiddenness
//! `1 - clamp((c - lower) / (upper - lower))` is smoothed by a centered moving
//! average that never crosses segment borders, then mapped into the segment's
//! half of [0, 1]:
//!
//! - front: `[0, 0.5 - margin]`
//! - back:  `[0.5 + margin, 1]`
//!
//! so the near/far decision (`score >= 0.5`) always agrees with the segment.

use std::collections::BTreeMap;

use ledmap_env::CameraId;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::observation::Observation;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcclusionConfig {
    /// Confidence below which a run counts toward entering "hidden"
    pub hidden_enter_below: f64,

    /// Confidence above which a run counts toward leaving "hidden"
    pub hidden_exit_above: f64,

    /// Consecutive samples required to flip state
    pub min_run_length: usize,

    /// Moving-average window (samples) inside a segment
    pub smoothing_window: usize,

    /// Gap kept between the front and back score ranges and 0.5
    pub decision_margin: f64,
}

impl Default for OcclusionConfig {
    fn default() -> Self {
        Self {
            hidden_enter_below: 0.35,
            hidden_exit_above: 0.55,
            min_run_length: 3,
            smoothing_window: 5,
            decision_margin: 0.02,
        }
    }
}

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    Front,
    Back,
}

/// A run of LED indices `[start, end)` sharing one facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start: usize,
    pub end: usize,
    pub facing: Facing,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Occlusion analysis of one camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraOcclusion {
    pub camera_id: CameraId,
    pub segments: Vec<Segment>,

    /// Occlusion score per LED index, [0, 1]
    pub scores: Vec<f64>,
}

/// Occlusion scores for every camera of a session.
#[derive(Debug, Clone, Default)]
pub struct OcclusionMap {
    cameras: BTreeMap<CameraId, CameraOcclusion>,
}

impl OcclusionMap {
    /// Occlusion score of `led` for `camera`; 0 (front) when unknown.
    pub fn score(&self, camera: CameraId, led: usize) -> f64 {
        self.cameras
            .get(&camera)
            .and_then(|c| c.scores.get(led))
            .copied()
            .unwrap_or(0.0)
    }

    /// Whether the far root should be used for `led` seen by `camera`.
    pub fn is_back_facing(&self, camera: CameraId, led: usize) -> bool {
        self.score(camera, led) >= 0.5
    }

    pub fn camera(&self, camera: CameraId) -> Option<&CameraOcclusion> {
        self.cameras.get(&camera)
    }

    pub fn cameras(&self) -> impl Iterator<Item = &CameraOcclusion> {
        self.cameras.values()
    }
}

// ============================================================================
// ANALYZER
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct OcclusionAnalyzer {
    config: OcclusionConfig,
}

impl OcclusionAnalyzer {
    pub fn new(config: OcclusionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OcclusionConfig {
        &self.config
    }

    /// Split a confidence sequence into front/back segments.
    pub fn segment(&self, sequence: &[f64]) -> Vec<Segment> {
        if sequence.is_empty() {
            return Vec::new();
        }
        let min_run = self.config.min_run_length.max(1);
        let mut boundaries = vec![(0usize, Facing::Front)];
        let mut state = Facing::Front;
        let mut run = 0usize;

        for (i, &c) in sequence.iter().enumerate() {
            let pushes = match state {
                Facing::Front => c < self.config.hidden_enter_below,
                Facing::Back => c > self.config.hidden_exit_above,
            };
            run = if pushes { run + 1 } else { 0 };
            if run >= min_run {
                state = match state {
                    Facing::Front => Facing::Back,
                    Facing::Back => Facing::Front,
                };
                let start = i + 1 - run;
                // A flip at the very start replaces the initial assumption
                match boundaries.last_mut() {
                    Some(last) if last.0 == start => last.1 = state,
                    _ => boundaries.push((start, state)),
                }
                run = 0;
            }
        }

        boundaries
            .iter()
            .enumerate()
            .map(|(k, &(start, facing))| Segment {
                start,
                end: boundaries.get(k + 1).map_or(sequence.len(), |b| b.0),
                facing,
            })
            .collect()
    }

    /// Hiddenness of a single confidence sample, [0, 1].
    pub fn hiddenness(&self, confidence: f64) -> f64 {
        let lower = self.config.hidden_enter_below;
        let span = (self.config.hidden_exit_above - lower).max(f64::EPSILON);
        1.0 - ((confidence - lower) / span).clamp(0.0, 1.0)
    }

    /// Segment a sequence and derive the per-index occlusion score.
    pub fn score_sequence(&self, sequence: &[f64]) -> (Vec<Segment>, Vec<f64>) {
        let segments = self.segment(sequence);
        let margin = self.config.decision_margin.clamp(0.0, 0.5);
        let half = self.config.smoothing_window / 2;
        let mut scores = vec![0.0; sequence.len()];

        for seg in &segments {
            let hidden: Vec<f64> = sequence[seg.start..seg.end].iter().map(|&c| self.hiddenness(c)).collect();
            for k in 0..hidden.len() {
                let lo = k.saturating_sub(half);
                let hi = (k + half + 1).min(hidden.len());
                let s = hidden[lo..hi].iter().sum::<f64>() / (hi - lo) as f64;
                scores[seg.start + k] = match seg.facing {
                    Facing::Front => (0.5 - margin) * s,
                    Facing::Back => 0.5 + margin + (0.5 - margin) * s,
                };
            }
        }
        (segments, scores)
    }

    /// Confidence sequence of one camera, indexed by LED (0 where unseen).
    pub fn confidence_sequence<'a>(&self, led_count: usize, observations: impl IntoIterator<Item = &'a Observation>) -> Vec<f64> {
        let mut sequence = vec![0.0; led_count];
        for obs in observations {
            if let Some(slot) = sequence.get_mut(obs.led_index()) {
                *slot = obs.detection_confidence;
            }
        }
        sequence
    }

    /// Analyze every camera independently (in parallel).
    pub fn analyze(&self, led_count: usize, cameras: &[CameraId], observations: &[Observation]) -> OcclusionMap {
        let mut per_camera: BTreeMap<CameraId, Vec<&Observation>> = cameras.iter().map(|&id| (id, Vec::new())).collect();
        for obs in observations {
            per_camera.entry(obs.detection.camera_id).or_default().push(obs);
        }

        let analyzed: Vec<CameraOcclusion> = per_camera
            .into_par_iter()
            .map(|(camera_id, obs)| {
                let sequence = self.confidence_sequence(led_count, obs);
                let (segments, scores) = self.score_sequence(&sequence);
                debug!(
                    "{}: {} occlusion segments ({} back-facing)",
                    camera_id,
                    segments.len(),
                    segments.iter().filter(|s| s.facing == Facing::Back).count()
                );
                CameraOcclusion {
                    camera_id,
                    segments,
                    scores,
                }
            })
            .collect();

        OcclusionMap {
            cameras: analyzed.into_iter().map(|c| (c.camera_id, c)).collect(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ledmap_env::Detection;

    fn pattern(spec: &[(f64, usize)]) -> Vec<f64> {
        spec.iter().flat_map(|&(v, n)| std::iter::repeat(v).take(n)).collect()
    }

    #[test]
    fn test_clean_alternation() {
        let seq = pattern(&[(0.9, 6), (0.0, 5), (0.9, 4)]);
        let segs = OcclusionAnalyzer::default().segment(&seq);
        assert_eq!(
            segs,
            vec![
                Segment { start: 0, end: 6, facing: Facing::Front },
                Segment { start: 6, end: 11, facing: Facing::Back },
                Segment { start: 11, end: 15, facing: Facing::Front },
            ]
        );
    }

    #[test]
    fn test_single_sample_dips_are_ignored() {
        let seq = pattern(&[(0.9, 4), (0.1, 1), (0.9, 2), (0.0, 2), (0.9, 4)]);
        let segs = OcclusionAnalyzer::default().segment(&seq);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].facing, Facing::Front);
    }

    #[test]
    fn test_middle_band_holds_state() {
        // 0.45 neither enters nor leaves "hidden"
        let seq = pattern(&[(0.0, 4), (0.45, 6), (0.9, 3)]);
        let segs = OcclusionAnalyzer::default().segment(&seq);
        assert_eq!(segs[0], Segment { start: 0, end: 10, facing: Facing::Back });
        assert_eq!(segs[1], Segment { start: 10, end: 13, facing: Facing::Front });
    }

    #[test]
    fn test_scores_follow_segments() {
        let analyzer = OcclusionAnalyzer::default();
        let seq = pattern(&[(0.95, 8), (0.0, 8), (0.95, 8)]);
        let (_, scores) = analyzer.score_sequence(&seq);
        for (i, s) in scores.iter().enumerate() {
            assert!((0.0..=1.0).contains(s));
            assert_eq!(*s >= 0.5, (8..16).contains(&i), "index {}", i);
        }
        assert!(scores[3] < 0.05);
        assert!(scores[12] > 0.95);
    }

    #[test]
    fn test_analyze_fills_missing_with_zero() {
        let analyzer = OcclusionAnalyzer::default();
        let cam = CameraId(1);
        let observations: Vec<Observation> = (0..10)
            .filter(|i| !(4..8).contains(i))
            .map(|i| {
                let d = Detection::new(cam, i, 10.0, 10.0, 200.0, 20.0).unwrap();
                Observation::new(d, 0.9, 1.0, 0.0).unwrap()
            })
            .collect();
        let map = analyzer.analyze(10, &[cam, CameraId(2)], &observations);
        assert!(map.is_back_facing(cam, 5));
        assert!(!map.is_back_facing(cam, 1));
        assert_eq!(map.camera(CameraId(2)).unwrap().segments[0].facing, Facing::Back);
        assert_eq!(map.score(CameraId(9), 3), 0.0);
    }
}
