//! Reflection Filter
//!
//! A lit LED produces a bright spot at its true image location. A specular
//! reflection off an ornament produces a spot that stays put while different
//! LEDs are lit, so it recurs across many captures from the same camera.
//!
//! For each camera, detections are visited in LED order and join the nearest
//! cluster whose running centroid lies within `cluster_radius_px`, or seed a
//! new one. Membership is measured against the centre and never against
//! another member, so a line of neighbouring LEDs cannot chain into one
//! cluster. A cluster triggered by `k` distinct LED indices scores
//! `min(1, k / cluster_size_normalizer)` for every member; detections outside
//! multi-LED clusters score 0.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ledmap_env::{CameraId, Detection};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionConfig {
    /// Pixel distance under which two detections belong to one cluster
    pub cluster_radius_px: f64,

    /// Distinct-LED count at which a cluster scores 1.0
    pub cluster_size_normalizer: f64,

    /// Score above which an observation is only used when it is the sole view
    pub max_reflection_score: f64,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            cluster_radius_px: 20.0,
            cluster_size_normalizer: 10.0,
            max_reflection_score: 0.5,
        }
    }
}

// ============================================================================
// RESULTS
// ============================================================================

/// A stable bright spot shared by several LED captures of one camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionCluster {
    pub camera_id: CameraId,

    /// Mean pixel position of the members
    pub centroid: [f64; 2],

    /// Distinct LED indices whose captures landed in the cluster (sorted)
    pub led_indices: Vec<usize>,

    pub score: f64,
}

/// Reflection scores for a whole detection set.
#[derive(Debug, Clone, Default)]
pub struct ReflectionScores {
    scores: HashMap<(CameraId, usize), f64>,
    clusters: Vec<ReflectionCluster>,
    max_score: f64,
}

impl ReflectionScores {
    /// Score of the detection of `led` in `camera` (0 when unknown).
    pub fn score(&self, camera: CameraId, led: usize) -> f64 {
        self.scores.get(&(camera, led)).copied().unwrap_or(0.0)
    }

    /// Whether the detection scores above the configured maximum.
    pub fn is_suspect(&self, camera: CameraId, led: usize) -> bool {
        self.score(camera, led) > self.max_score
    }

    /// Multi-LED clusters, ordered by camera then seeding order.
    pub fn clusters(&self) -> &[ReflectionCluster] {
        &self.clusters
    }
}

// ============================================================================
// SPOTS
// ============================================================================

/// A cluster under construction: member positions in the input slice.
struct Spot {
    sum: [f64; 2],
    members: Vec<usize>,
}

impl Spot {
    fn seed(index: usize, detection: &Detection) -> Self {
        Self {
            sum: detection.pixel(),
            members: vec![index],
        }
    }

    fn centroid(&self) -> [f64; 2] {
        let n = self.members.len() as f64;
        [self.sum[0] / n, self.sum[1] / n]
    }

    fn distance(&self, detection: &Detection) -> f64 {
        let [cx, cy] = self.centroid();
        (detection.pixel_x - cx).hypot(detection.pixel_y - cy)
    }

    fn push(&mut self, index: usize, detection: &Detection) {
        self.sum[0] += detection.pixel_x;
        self.sum[1] += detection.pixel_y;
        self.members.push(index);
    }
}

// ============================================================================
// FILTER
// ============================================================================

/// Clusters spatially stable detections per camera.
#[derive(Debug, Clone, Default)]
pub struct ReflectionFilter {
    config: ReflectionConfig,
}

impl ReflectionFilter {
    pub fn new(config: ReflectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReflectionConfig {
        &self.config
    }

    /// Score every detection of a single camera.
    ///
    /// Returns one score per input detection (same order) plus the multi-LED
    /// clusters found.
    pub fn score_camera(&self, camera_id: CameraId, detections: &[&Detection]) -> (Vec<f64>, Vec<ReflectionCluster>) {
        let radius = self.config.cluster_radius_px;
        let mut spots: Vec<Spot> = Vec::new();
        for (i, d) in detections.iter().enumerate() {
            let nearest = spots
                .iter()
                .enumerate()
                .map(|(k, spot)| (k, spot.distance(d)))
                .filter(|&(_, dist)| dist <= radius)
                .min_by(|a, b| a.1.total_cmp(&b.1));
            match nearest {
                Some((k, _)) => spots[k].push(i, d),
                None => spots.push(Spot::seed(i, d)),
            }
        }

        let mut scores = vec![0.0; detections.len()];
        let mut clusters = Vec::new();
        for spot in &spots {
            let leds: BTreeSet<usize> = spot.members.iter().map(|&i| detections[i].led_index).collect();
            if leds.len() < 2 {
                continue;
            }
            let score = self.cluster_score(leds.len());
            for &i in &spot.members {
                scores[i] = score;
            }
            clusters.push(ReflectionCluster {
                camera_id,
                centroid: spot.centroid(),
                led_indices: leds.into_iter().collect(),
                score,
            });
        }

        (scores, clusters)
    }

    /// Score for a cluster triggered by `distinct_leds` LED indices.
    pub fn cluster_score(&self, distinct_leds: usize) -> f64 {
        if distinct_leds < 2 {
            return 0.0;
        }
        let normalizer = self.config.cluster_size_normalizer.max(f64::MIN_POSITIVE);
        (distinct_leds as f64 / normalizer).min(1.0)
    }

    /// Score the full detection set; cameras are processed in parallel.
    pub fn score_all(&self, detections: &[Detection]) -> ReflectionScores {
        let mut by_camera: BTreeMap<CameraId, Vec<&Detection>> = BTreeMap::new();
        for d in detections {
            by_camera.entry(d.camera_id).or_default().push(d);
        }

        let per_camera: Vec<(CameraId, Vec<&Detection>, Vec<f64>, Vec<ReflectionCluster>)> = by_camera
            .into_par_iter()
            .map(|(camera_id, dets)| {
                let (scores, clusters) = self.score_camera(camera_id, &dets);
                (camera_id, dets, scores, clusters)
            })
            .collect();

        let mut result = ReflectionScores {
            max_score: self.config.max_reflection_score,
            ..ReflectionScores::default()
        };
        for (camera_id, dets, scores, mut clusters) in per_camera {
            if !clusters.is_empty() {
                debug!("{}: {} reflection clusters", camera_id, clusters.len());
            }
            for (d, s) in dets.iter().zip(scores) {
                result.scores.insert((camera_id, d.led_index), s);
            }
            result.clusters.append(&mut clusters);
        }
        result
    }
}

// ============================================================================
// TESTS
// ============================================================================
