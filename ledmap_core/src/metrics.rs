//! Summary statistics and surface-consistency checks for a position set.

use serde::{Deserialize, Serialize};

use crate::diagnostics::Diagnostic;
use crate::ledmap_cone::ConeParameters;
use crate::position::LedPosition;

/// Confidence above which an observed LED counts as high-confidence.
pub const HIGH_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

impl Summary {
    pub fn of(values: impl IntoIterator<Item = f64>) -> Option<Self> {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for v in values {
            count += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }
        (count > 0).then(|| Summary {
            mean: sum / count as f64,
            min,
            max,
        })
    }
}

/// `[min, max]` of each coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpatialRanges {
    pub x: [f64; 2],
    pub y: [f64; 2],
    pub z: [f64; 2],
    pub height: [f64; 2],
    pub angle: [f64; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionStats {
    pub total_leds: usize,
    pub observed: usize,
    pub predicted: usize,
    pub unresolved: usize,
    pub observed_fraction: f64,
    pub predicted_fraction: f64,
    pub high_confidence_observed: usize,
    pub confidence: Option<Summary>,
    pub ranges: Option<SpatialRanges>,
}

impl ReconstructionStats {
    pub fn compute(positions: &[LedPosition], total_leds: usize) -> Self {
        let observed = positions.iter().filter(|p| !p.predicted).count();
        let predicted = positions.len() - observed;
        let denom = total_leds.max(1) as f64;

        let range = |f: fn(&LedPosition) -> f64| {
            Summary::of(positions.iter().map(f)).map(|s| [s.min, s.max])
        };
        let ranges = match (range(|p| p.x), range(|p| p.y), range(|p| p.z), range(|p| p.height), range(|p| p.angle)) {
            (Some(x), Some(y), Some(z), Some(height), Some(angle)) => Some(SpatialRanges { x, y, z, height, angle }),
            _ => None,
        };

        Self {
            total_leds,
            observed,
            predicted,
            unresolved: total_leds.saturating_sub(positions.len()),
            observed_fraction: observed as f64 / denom,
            predicted_fraction: predicted as f64 / denom,
            high_confidence_observed: positions
                .iter()
                .filter(|p| !p.predicted && p.confidence > HIGH_CONFIDENCE)
                .count(),
            confidence: Summary::of(positions.iter().map(|p| p.confidence)),
            ranges,
        }
    }
}

/// Flag positions whose radius strays from `r(h)` by more than `tolerance` (m).
pub fn cone_deviations(cone: &ConeParameters, positions: &[LedPosition], tolerance: f64) -> Vec<Diagnostic> {
    positions
        .iter()
        .filter_map(|p| {
            let deviation = cone.radius_deviation(p.height, p.radius);
            (deviation > tolerance).then_some(Diagnostic::ConeDeviation {
                led_index: p.led_index,
                deviation,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pos(led: usize, confidence: f64, predicted: bool, radius: f64) -> LedPosition {
        LedPosition {
            led_index: led,
            x: led as f64,
            y: -(led as f64),
            z: 0.1 * led as f64,
            height: 0.05 * led as f64,
            angle: 30.0 * led as f64,
            radius,
            confidence,
            predicted,
            num_observations: if predicted { 0 } else { 2 },
        }
    }

    #[test]
    fn test_stats() {
        let positions = vec![pos(0, 0.9, false, 0.5), pos(1, 0.6, false, 0.5), pos(2, 0.3, true, 0.5)];
        let stats = ReconstructionStats::compute(&positions, 4);
        assert_eq!(stats.observed, 2);
        assert_eq!(stats.predicted, 1);
        assert_eq!(stats.unresolved, 1);
        assert_eq!(stats.high_confidence_observed, 1);
        assert_relative_eq!(stats.observed_fraction, 0.5);
        let c = stats.confidence.unwrap();
        assert_relative_eq!(c.mean, 0.6, epsilon = 1e-12);
        assert_relative_eq!(c.min, 0.3);
        let r = stats.ranges.unwrap();
        assert_eq!(r.angle, [0.0, 60.0]);
    }

    #[test]
    fn test_empty_stats() {
        let stats = ReconstructionStats::compute(&[], 3);
        assert!(stats.confidence.is_none());
        assert!(stats.ranges.is_none());
        assert_eq!(stats.unresolved, 3);
    }

    #[test]
    fn test_cone_deviation_flagged() {
        let cone = ConeParameters::new([0.0, 0.0], 0.5, 0.1, 2.0).unwrap();
        let on = pos(0, 0.9, false, 0.5);
        let off = pos(2, 0.9, false, 0.2);
        let diags = cone_deviations(&cone, &[on, off], 0.05);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].led_index(), Some(2));
    }
}
