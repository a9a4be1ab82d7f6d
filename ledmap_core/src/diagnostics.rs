//! Recoverable conditions recorded during a reconstruction.
//!
//! None of these abort the run; they lower confidence or push LEDs to the gap
//! filler, and every one is also logged at `warn` level where it is raised.

use std::fmt;

use ledmap_env::CameraId;
use serde::{Deserialize, Serialize};

use crate::ledmap_cone::ConeError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Best view's ray misses the cone; LED demoted to unobserved.
    GeometryDegenerate { led_index: usize, camera_id: CameraId },

    /// No detection and no bounding neighbour to interpolate from.
    InsufficientData { led_index: usize },

    /// Only view of an LED looks like a reflection; kept at low confidence.
    ReflectionAmbiguity {
        led_index: usize,
        camera_id: CameraId,
        reflection_score: f64,
    },

    /// A preferred cone source failed and a fallback was used.
    ConeFallback { reason: String },

    /// Position lies off the fitted surface by more than the tolerance.
    ConeDeviation { led_index: usize, deviation: f64 },

    /// Camera record dropped while assembling the session.
    RejectedCamera { camera_id: CameraId, reason: String },

    /// Detection record dropped while assembling or scoring the session.
    RejectedDetection {
        camera_id: CameraId,
        led_index: usize,
        reason: String,
    },

    /// All-on photograph dropped while assembling the session.
    RejectedPhoto { camera_id: CameraId, reason: String },
}

impl Diagnostic {
    pub fn cone_fallback(err: &ConeError) -> Self {
        Diagnostic::ConeFallback { reason: err.to_string() }
    }

    /// LED the diagnostic concerns, if any.
    pub fn led_index(&self) -> Option<usize> {
        match self {
            Diagnostic::GeometryDegenerate { led_index, .. }
            | Diagnostic::InsufficientData { led_index }
            | Diagnostic::ReflectionAmbiguity { led_index, .. }
            | Diagnostic::ConeDeviation { led_index, .. }
            | Diagnostic::RejectedDetection { led_index, .. } => Some(*led_index),
            Diagnostic::ConeFallback { .. } | Diagnostic::RejectedCamera { .. } | Diagnostic::RejectedPhoto { .. } => None,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::GeometryDegenerate { led_index, camera_id } => {
                write!(f, "LED {}: ray from {} does not intersect the cone", led_index, camera_id)
            }
            Diagnostic::InsufficientData { led_index } => {
                write!(f, "LED {}: no observation and no neighbour to interpolate from", led_index)
            }
            Diagnostic::ReflectionAmbiguity {
                led_index,
                camera_id,
                reflection_score,
            } => write!(
                f,
                "LED {}: only view ({}) has reflection score {:.2}",
                led_index, camera_id, reflection_score
            ),
            Diagnostic::ConeFallback { reason } => write!(f, "cone fallback: {}", reason),
            Diagnostic::ConeDeviation { led_index, deviation } => {
                write!(f, "LED {}: {:.3} m off the cone surface", led_index, deviation)
            }
            Diagnostic::RejectedCamera { camera_id, reason } => write!(f, "{} dropped: {}", camera_id, reason),
            Diagnostic::RejectedDetection {
                camera_id,
                led_index,
                reason,
            } => write!(f, "LED {}: detection from {} dropped: {}", led_index, camera_id, reason),
            Diagnostic::RejectedPhoto { camera_id, reason } => {
                write!(f, "all-on photo of {} dropped: {}", camera_id, reason)
            }
        }
    }
}
