//! Observations: detections augmented with their derived scores.
//!
//! Always recomputed from the source detection, its camera and the global
//! detection set; never persisted on their own.

use ledmap_env::{Detection, InputError};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::confidence::{score_detection, ConfidenceConfig};
use crate::diagnostics::Diagnostic;
use crate::reflection::ReflectionScores;
use crate::session::CaptureSession;

/// A detection with its confidence and reflection scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub detection: Detection,

    /// Likelihood the blob is a recurring reflection, [0, 1]
    pub reflection_score: f64,

    /// Cosine viewing-angle confidence, [min_confidence, 1]
    pub angular_confidence: f64,

    /// Brightness/size/edge confidence, [0, 1]
    pub detection_confidence: f64,

    /// `detection × angular × (1 - reflection)`; selects the best view
    pub combined_weight: f64,
}

impl Observation {
    /// Build an observation from already computed scores.
    ///
    /// Every score must be finite and inside [0, 1].
    pub fn new(
        detection: Detection,
        detection_confidence: f64,
        angular_confidence: f64,
        reflection_score: f64,
    ) -> Result<Self, InputError> {
        let detection_confidence = InputError::in_range("detection_confidence", detection_confidence, 0.0, 1.0)?;
        let angular_confidence = InputError::in_range("angular_confidence", angular_confidence, 0.0, 1.0)?;
        let reflection_score = InputError::in_range("reflection_score", reflection_score, 0.0, 1.0)?;

        Ok(Self {
            detection,
            reflection_score,
            angular_confidence,
            detection_confidence,
            combined_weight: detection_confidence * angular_confidence * (1.0 - reflection_score),
        })
    }

    #[inline]
    pub fn led_index(&self) -> usize {
        self.detection.led_index
    }
}

/// Score every detection of a session, in session order.
///
/// A detection whose scores cannot form a valid observation is dropped,
/// logged, and returned as a [`Diagnostic::RejectedDetection`].
pub fn build_observations(
    session: &CaptureSession,
    reflections: &ReflectionScores,
    config: &ConfidenceConfig,
) -> (Vec<Observation>, Vec<Diagnostic>) {
    let scored: Vec<Result<Observation, Diagnostic>> = session
        .detections()
        .par_iter()
        .map(|d| {
            let reject = |reason: String| Diagnostic::RejectedDetection {
                camera_id: d.camera_id,
                led_index: d.led_index,
                reason,
            };
            let camera = session.camera(d.camera_id).ok_or_else(|| reject("unknown camera".into()))?;
            let scores = score_detection(d, camera, config);
            Observation::new(
                *d,
                scores.detection_confidence,
                scores.angular_confidence,
                reflections.score(d.camera_id, d.led_index),
            )
            .map_err(|e| reject(e.to_string()))
        })
        .collect();

    let mut observations = Vec::with_capacity(scored.len());
    let mut rejected = Vec::new();
    for result in scored {
        match result {
            Ok(obs) => observations.push(obs),
            Err(diag) => {
                warn!("{}", diag);
                rejected.push(diag);
            }
        }
    }
    (observations, rejected)
}
