//! Final per-LED output record.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::ledmap_cone::ConeParameters;

/// Reconstructed position of one LED.
///
/// Observed positions come from triangulation; predicted ones from gap
/// filling (`predicted = true`, `num_observations = 0`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedPosition {
    pub led_index: usize,
    pub x: f64,
    pub y: f64,
    pub z: f64,

    /// Normalized height, [0, 1]
    pub height: f64,

    /// Degrees, [0, 360)
    pub angle: f64,

    /// Distance from the cone axis (meters)
    pub radius: f64,

    pub confidence: f64,
    pub predicted: bool,
    pub num_observations: usize,
}

impl LedPosition {
    /// Predicted position at the given cone-space coordinates.
    pub fn predicted(cone: &ConeParameters, led_index: usize, height: f64, angle: f64, radius: f64, confidence: f64) -> Self {
        let p = cone.from_cone_space(height, angle, radius);
        Self {
            led_index,
            x: p.x,
            y: p.y,
            z: p.z,
            height,
            angle,
            radius,
            confidence,
            predicted: true,
            num_observations: 0,
        }
    }

    pub fn point(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }
}
