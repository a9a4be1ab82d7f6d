//! Ground-truth comparison for synthetic or surveyed trees.

use std::collections::BTreeMap;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::angle::shortest_arc;
use crate::ledmap_cone::ConeParameters;
use crate::position::LedPosition;

/// Error statistics for one class of positions.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub count: usize,

    /// RMS Euclidean position error (m)
    pub rms: f64,

    /// Largest Euclidean position error (m)
    pub max: f64,

    /// Mean absolute azimuth error around the cone axis (degrees)
    pub mean_angle_error: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub observed: ErrorSummary,
    pub predicted: ErrorSummary,
    pub overall: ErrorSummary,

    /// Truth LEDs with no reconstructed position
    pub missing: usize,
}

#[derive(Default)]
struct Accumulator {
    count: usize,
    sq_sum: f64,
    max: f64,
    angle_sum: f64,
}

impl Accumulator {
    fn add(&mut self, error: f64, angle_error: f64) {
        self.count += 1;
        self.sq_sum += error * error;
        self.max = self.max.max(error);
        self.angle_sum += angle_error;
    }

    fn summary(&self) -> ErrorSummary {
        if self.count == 0 {
            return ErrorSummary::default();
        }
        let n = self.count as f64;
        ErrorSummary {
            count: self.count,
            rms: (self.sq_sum / n).sqrt(),
            max: self.max,
            mean_angle_error: self.angle_sum / n,
        }
    }
}

/// Compare reconstructed positions with known LED locations.
///
/// Azimuth errors are measured around the axis of `cone`.
pub fn validate(positions: &[LedPosition], truth: &BTreeMap<usize, Vector3<f64>>, cone: &ConeParameters) -> ValidationReport {
    let mut observed = Accumulator::default();
    let mut predicted = Accumulator::default();
    let mut overall = Accumulator::default();
    let mut matched = 0usize;

    for p in positions {
        let Some(t) = truth.get(&p.led_index) else {
            continue;
        };
        matched += 1;
        let error = (p.point() - t).norm();
        let truth_angle = cone.to_cone_space(t).angle;
        let angle_error = shortest_arc(truth_angle, p.angle).abs();

        overall.add(error, angle_error);
        if p.predicted {
            predicted.add(error, angle_error);
        } else {
            observed.add(error, angle_error);
        }
    }

    ValidationReport {
        observed: observed.summary(),
        predicted: predicted.summary(),
        overall: overall.summary(),
        missing: truth.len().saturating_sub(matched),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_validate_splits_classes() {
        let cone = ConeParameters::new([0.0, 0.0], 0.5, 0.05, 2.0).unwrap();
        let truth: BTreeMap<usize, Vector3<f64>> =
            (0..3).map(|i| (i, cone.surface_point(0.2 * i as f64, 90.0 * i as f64))).collect();

        let exact = |i: usize, predicted: bool, dz: f64| {
            let t = truth[&i];
            let c = cone.to_cone_space(&t);
            LedPosition {
                led_index: i,
                x: t.x,
                y: t.y,
                z: t.z + dz,
                height: c.height,
                angle: c.angle,
                radius: c.radius,
                confidence: 0.5,
                predicted,
                num_observations: 0,
            }
        };
        let positions = vec![exact(0, false, 0.0), exact(1, true, 0.1)];
        let report = validate(&positions, &truth, &cone);

        assert_eq!(report.observed.count, 1);
        assert_relative_eq!(report.observed.rms, 0.0);
        assert_relative_eq!(report.predicted.max, 0.1, epsilon = 1e-12);
        assert_relative_eq!(report.overall.rms, (0.01f64 / 2.0).sqrt(), epsilon = 1e-12);
        assert_eq!(report.missing, 1);
        assert!(report.predicted.mean_angle_error < 1e-9);
    }
}
