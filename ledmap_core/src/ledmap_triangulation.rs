//! The "BEST VIEW" Engine - Triangulation
//!
//! Turns scored observations into observed 3-D positions.
//!
//! For each LED with at least one observation:
//!
//! 1. Drop views whose reflection score exceeds the maximum, unless that
//!    would leave nothing (then keep them and flag the LED).
//! 2. Pick the single view with the largest `combined_weight`. Ties go to
//!    the lowest camera id.
//! 3. Intersect that camera's pixel ray with the cone and take the near root
//!    when the LED faces the camera, the far root otherwise.
//!
//! Views are never averaged: two cameras looking at opposite faces of the
//! cone would average to a point on neither.

use std::collections::BTreeMap;

use ledmap_env::CameraId;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::diagnostics::Diagnostic;
use crate::ledmap_cone::ConeParameters;
use crate::ledmap_occlusion::OcclusionMap;
use crate::ledmap_ray::{intersect, IntersectConfig, IntersectError, Ray};
use crate::observation::Observation;
use crate::position::LedPosition;
use crate::session::CaptureSession;

/// Which view was chosen for an LED and how its root was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewSelection {
    pub led_index: usize,
    pub camera_id: CameraId,
    pub combined_weight: f64,
    pub occlusion_score: f64,
    pub used_far_root: bool,
}

/// Observed positions plus what was learned along the way.
#[derive(Debug, Clone, Default)]
pub struct TriangulationOutput {
    pub positions: BTreeMap<usize, LedPosition>,
    pub selections: BTreeMap<usize, ViewSelection>,
    pub diagnostics: Vec<Diagnostic>,
}

enum LedOutcome {
    Observed {
        position: LedPosition,
        selection: ViewSelection,
        ambiguity: Option<Diagnostic>,
    },
    Degenerate {
        diagnostics: Vec<Diagnostic>,
    },
}

#[derive(Debug, Clone)]
pub struct TriangulationEngine {
    intersection: IntersectConfig,
    max_reflection_score: f64,
}

impl Default for TriangulationEngine {
    fn default() -> Self {
        Self::new(IntersectConfig::default(), 0.5)
    }
}

impl TriangulationEngine {
    pub fn new(intersection: IntersectConfig, max_reflection_score: f64) -> Self {
        Self {
            intersection,
            max_reflection_score,
        }
    }

    /// Choose the best view among one LED's observations.
    ///
    /// `observations` may come in any order; ties on `combined_weight` are
    /// broken by ascending camera id. The flag is true when every view was
    /// above the reflection limit.
    pub fn select_best<'a>(&self, observations: &[&'a Observation]) -> Option<(&'a Observation, bool)> {
        let mut ordered: Vec<&Observation> = observations.to_vec();
        ordered.sort_by_key(|o| o.detection.camera_id);

        let clean: Vec<&Observation> = ordered
            .iter()
            .copied()
            .filter(|o| o.reflection_score <= self.max_reflection_score)
            .collect();
        let (pool, ambiguous) = if clean.is_empty() { (ordered, true) } else { (clean, false) };

        let mut best: Option<&Observation> = None;
        for obs in pool {
            if best.map_or(true, |b| obs.combined_weight > b.combined_weight) {
                best = Some(obs);
            }
        }
        best.map(|b| (b, ambiguous))
    }

    /// Triangulate every observed LED (in parallel across LEDs).
    pub fn triangulate(
        &self,
        session: &CaptureSession,
        cone: &ConeParameters,
        observations: &[Observation],
        occlusion: &OcclusionMap,
    ) -> TriangulationOutput {
        let mut by_led: BTreeMap<usize, Vec<&Observation>> = BTreeMap::new();
        for obs in observations {
            by_led.entry(obs.led_index()).or_default().push(obs);
        }
        let groups: Vec<(usize, Vec<&Observation>)> = by_led.into_iter().collect();

        let outcomes: Vec<(usize, Option<LedOutcome>)> = groups
            .par_iter()
            .map(|(led, obs)| (*led, self.triangulate_led(session, cone, obs, occlusion)))
            .collect();

        let mut out = TriangulationOutput::default();
        for (led, outcome) in outcomes {
            match outcome {
                Some(LedOutcome::Observed {
                    position,
                    selection,
                    ambiguity,
                }) => {
                    debug!(
                        "LED {}: {} w={:.3} occlusion={:.2} -> angle {:.1}° h={:.3}",
                        led, selection.camera_id, selection.combined_weight, selection.occlusion_score, position.angle, position.height
                    );
                    if let Some(diag) = ambiguity {
                        warn!("{}", diag);
                        out.diagnostics.push(diag);
                    }
                    out.positions.insert(led, position);
                    out.selections.insert(led, selection);
                }
                Some(LedOutcome::Degenerate { diagnostics }) => {
                    for diag in diagnostics {
                        warn!("{}", diag);
                        out.diagnostics.push(diag);
                    }
                }
                None => {}
            }
        }
        out
    }

    fn triangulate_led(
        &self,
        session: &CaptureSession,
        cone: &ConeParameters,
        observations: &[&Observation],
        occlusion: &OcclusionMap,
    ) -> Option<LedOutcome> {
        let (best, ambiguous) = self.select_best(observations)?;
        let led_index = best.led_index();
        let camera_id = best.detection.camera_id;

        let ambiguity = ambiguous.then_some(Diagnostic::ReflectionAmbiguity {
            led_index,
            camera_id,
            reflection_score: best.reflection_score,
        });

        let hit = session
            .camera(camera_id)
            .ok_or(IntersectError::DegenerateRay)
            .and_then(|camera| {
                let ray = Ray::new(camera.position(), camera.pixel_ray(best.detection.pixel_x, best.detection.pixel_y))?;
                intersect(&ray, cone, &self.intersection)
            });

        let intersection = match hit {
            Ok(ix) => ix,
            Err(_) => {
                let mut diagnostics = vec![Diagnostic::GeometryDegenerate { led_index, camera_id }];
                diagnostics.extend(ambiguity);
                return Some(LedOutcome::Degenerate { diagnostics });
            }
        };

        let occlusion_score = occlusion.score(camera_id, led_index);
        let back_facing = occlusion_score >= 0.5;
        let root = intersection.resolve(back_facing);
        let used_far_root = back_facing && intersection.far.is_some();

        Some(LedOutcome::Observed {
            position: LedPosition {
                led_index,
                x: root.point[0],
                y: root.point[1],
                z: root.point[2],
                height: root.height,
                angle: root.angle,
                radius: root.radius,
                confidence: best.combined_weight,
                predicted: false,
                num_observations: observations.len(),
            },
            selection: ViewSelection {
                led_index,
                camera_id,
                combined_weight: best.combined_weight,
                occlusion_score,
                used_far_root,
            },
            ambiguity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledmap_occlusion::OcclusionAnalyzer;
    use approx::assert_relative_eq;
    use ledmap_env::{Camera, Detection};
    use nalgebra::Vector3;

    fn obs(cam: u32, dc: f64, ac: f64, rs: f64) -> Observation {
        let d = Detection::new(CameraId(cam), 7, 320.0, 240.0, 200.0, 20.0).unwrap();
        Observation::new(d, dc, ac, rs).unwrap()
    }

    fn engine() -> TriangulationEngine {
        TriangulationEngine::new(IntersectConfig::default(), 0.5)
    }

    #[test]
    fn test_selects_max_combined_weight() {
        let a = obs(0, 0.95, 0.30, 0.0);
        let b = obs(1, 0.90, 0.92, 0.0);
        let c = obs(2, 0.87, 0.65, 0.0);
        let (best, ambiguous) = engine().select_best(&[&c, &a, &b]).unwrap();
        assert_eq!(best.detection.camera_id, CameraId(1));
        assert!(!ambiguous);
    }

    #[test]
    fn test_tie_goes_to_lowest_camera() {
        let a = obs(5, 0.8, 0.8, 0.0);
        let b = obs(3, 0.8, 0.8, 0.0);
        let (best, _) = engine().select_best(&[&a, &b]).unwrap();
        assert_eq!(best.detection.camera_id, CameraId(3));
    }

    #[test]
    fn test_reflections_excluded_when_alternative_exists() {
        let strong_reflection = obs(0, 1.0, 1.0, 0.6);
        let weak_clean = obs(1, 0.5, 0.5, 0.0);
        let (best, ambiguous) = engine().select_best(&[&strong_reflection, &weak_clean]).unwrap();
        assert_eq!(best.detection.camera_id, CameraId(1));
        assert!(!ambiguous);

        let (only, ambiguous) = engine().select_best(&[&strong_reflection]).unwrap();
        assert_eq!(only.detection.camera_id, CameraId(0));
        assert!(ambiguous);
    }

    #[test]
    fn test_occlusion_score_selects_root() {
        let cone = ConeParameters::new([0.0, 0.0], 0.5, 0.05, 2.0).unwrap();
        let cam = Camera::looking_at(
            CameraId(0),
            Vector3::new(3.0, 0.0, 1.0),
            Vector3::new(0.0, 0.0, 1.0),
            60.0,
            640,
            480,
        )
        .unwrap();
        let session = CaptureSession::builder(10).camera(cam.clone()).build().unwrap();

        // Center pixel: near root on the +X face, far root on the -X face.
        // LEDs 5-9 are dim in camera 0, so they fall in a back segment.
        let observations: Vec<Observation> = (0..10)
            .map(|led| {
                let d = Detection::new(CameraId(0), led, 320.0, 240.0, 200.0, 20.0).unwrap();
                let dc = if led < 5 { 0.9 } else { 0.1 };
                Observation::new(d, dc, 1.0, 0.0).unwrap()
            })
            .collect();
        let occlusion = OcclusionAnalyzer::default().analyze(10, &[CameraId(0)], &observations);
        let out = engine().triangulate(&session, &cone, &observations, &occlusion);

        let front = out.positions[&2];
        assert_relative_eq!(front.x, cone.radius_at(0.5), epsilon = 1e-6);
        assert_relative_eq!(front.angle, 0.0, epsilon = 1e-6);
        assert!(!out.selections[&2].used_far_root);
        assert_eq!(front.num_observations, 1);

        let back = out.positions[&7];
        assert_relative_eq!(back.x, -cone.radius_at(0.5), epsilon = 1e-6);
        assert_relative_eq!(back.angle, 180.0, epsilon = 1e-6);
        assert!(out.selections[&7].used_far_root);
        assert!(out.selections[&7].occlusion_score >= 0.5);
    }

    #[test]
    fn test_missing_cone_is_degenerate() {
        let cone = ConeParameters::new([0.0, 0.0], 0.5, 0.05, 2.0).unwrap();
        let cam = Camera::looking_at(
            CameraId(0),
            Vector3::new(3.0, 0.0, 1.0),
            Vector3::new(0.0, 0.0, 1.0),
            60.0,
            640,
            480,
        )
        .unwrap();
        let session = CaptureSession::builder(10).camera(cam).build().unwrap();
        // Top-left corner looks far off to the side and upward
        let d = Detection::new(CameraId(0), 3, 0.0, 0.0, 200.0, 20.0).unwrap();
        let o = Observation::new(d, 0.9, 0.5, 0.0).unwrap();
        let out = engine().triangulate(&session, &cone, &[o], &OcclusionMap::default());
        assert!(out.positions.is_empty());
        assert_eq!(
            out.diagnostics,
            vec![Diagnostic::GeometryDegenerate { led_index: 3, camera_id: CameraId(0) }]
        );
    }
}
