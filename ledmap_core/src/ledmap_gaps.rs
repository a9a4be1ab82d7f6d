//! The "GAP" Engine - Interpolation and Extrapolation Along the String
//!
//! Every LED without an observed position gets a predicted one:
//!
//! - **Bounded gaps** (observed LEDs on both sides, modulo `N` when the
//!   string wraps) interpolate height and radius linearly and the angle
//!   along the shortest circular arc, so a gap across the 0°/360° seam stays
//!   on the seam side of the tree.
//! - **Boundary runs** (no observed LED on one side) extrapolate from the
//!   nearest observed LED with a constant per-index angular step: the median
//!   observed step, or `360° / N` signed by the observed winding direction
//!   when too few steps exist.
//!
//! LEDs that cannot be grounded at all (no observed LED anywhere, or a single
//! one with no winding to extrapolate along) are reported as unresolved.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::angle::{lerp_shortest, median, normalize_degrees, shortest_arc};
use crate::diagnostics::Diagnostic;
use crate::ledmap_cone::ConeParameters;
use crate::position::LedPosition;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GapConfig {
    /// Whether LED `N-1` is physically adjacent to LED `0`
    pub wraps: bool,

    /// Predicted confidence = scale × weakest anchoring confidence
    pub predicted_confidence_scale: f64,

    /// Observed steps needed before the median is trusted
    pub min_deltas_for_median: usize,
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            wraps: false,
            predicted_confidence_scale: 0.5,
            min_deltas_for_median: 3,
        }
    }
}

/// Per-index winding estimated from the observed positions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Winding {
    /// Degrees per LED index (sign = winding direction)
    pub angle_step: f64,

    /// Normalized height per LED index
    pub height_step: f64,

    /// Whether the median was used rather than the `360° / N` fallback
    pub from_median: bool,
}

/// Predicted positions and the LEDs that could not be placed.
#[derive(Debug, Clone, Default)]
pub struct GapFillOutput {
    pub positions: Vec<LedPosition>,
    pub unresolved: Vec<usize>,
    pub diagnostics: Vec<Diagnostic>,
    pub interpolated: usize,
    pub extrapolated: usize,
}

enum Fill {
    Interpolated(LedPosition),
    Extrapolated(LedPosition),
    Unresolved(usize),
}

#[derive(Debug, Clone, Default)]
pub struct GapFiller {
    config: GapConfig,
}

impl GapFiller {
    pub fn new(config: GapConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GapConfig {
        &self.config
    }

    /// Estimate the winding from consecutive observed LEDs.
    ///
    /// Returns `None` with fewer than two observed LEDs.
    pub fn winding(&self, observed: &BTreeMap<usize, LedPosition>, led_count: usize) -> Option<Winding> {
        let anchors: Vec<&LedPosition> = observed.values().collect();
        if anchors.len() < 2 {
            return None;
        }

        let mut angle_deltas = Vec::with_capacity(anchors.len());
        let mut height_deltas = Vec::with_capacity(anchors.len());
        for pair in anchors.windows(2) {
            let span = (pair[1].led_index - pair[0].led_index) as f64;
            angle_deltas.push(shortest_arc(pair[0].angle, pair[1].angle) / span);
            height_deltas.push((pair[1].height - pair[0].height) / span);
        }

        let height_step = median(&height_deltas).unwrap_or(0.0);
        let enough = angle_deltas.len() >= self.config.min_deltas_for_median;
        match median(&angle_deltas) {
            Some(m) if enough && m.abs() > 1e-9 => Some(Winding {
                angle_step: m,
                height_step,
                from_median: true,
            }),
            _ => {
                let direction = if angle_deltas.iter().sum::<f64>() < 0.0 { -1.0 } else { 1.0 };
                Some(Winding {
                    angle_step: direction * 360.0 / led_count.max(1) as f64,
                    height_step,
                    from_median: false,
                })
            }
        }
    }

    /// Interpolate between two observed LEDs at fraction `t` along the gap.
    pub fn interpolate(
        &self,
        cone: &ConeParameters,
        led_index: usize,
        before: &LedPosition,
        after: &LedPosition,
        t: f64,
    ) -> LedPosition {
        let height = before.height + (after.height - before.height) * t;
        let radius = before.radius + (after.radius - before.radius) * t;
        let angle = lerp_shortest(before.angle, after.angle, t);
        let confidence = self.config.predicted_confidence_scale * before.confidence.min(after.confidence);
        LedPosition::predicted(cone, led_index, height, angle, radius, confidence)
    }

    /// Extrapolate `offset` indices away from an observed anchor.
    pub fn extrapolate(&self, cone: &ConeParameters, led_index: usize, anchor: &LedPosition, offset: f64, winding: &Winding) -> LedPosition {
        let angle = normalize_degrees(anchor.angle + winding.angle_step * offset);
        let height = (anchor.height + winding.height_step * offset).clamp(0.0, 1.0);
        let confidence = self.config.predicted_confidence_scale * anchor.confidence;
        LedPosition::predicted(cone, led_index, height, angle, cone.radius_at(height), confidence)
    }

    /// Fill every LED in `0..led_count` that has no observed position.
    pub fn fill(&self, cone: &ConeParameters, led_count: usize, observed: &BTreeMap<usize, LedPosition>) -> GapFillOutput {
        let missing: Vec<usize> = (0..led_count).filter(|i| !observed.contains_key(i)).collect();
        if missing.is_empty() {
            return GapFillOutput::default();
        }

        let winding = self.winding(observed, led_count);
        if let Some(w) = &winding {
            debug!(
                "Winding: {:.2}°/LED ({}), {:.4} height/LED",
                w.angle_step,
                if w.from_median { "median" } else { "fallback" },
                w.height_step
            );
        }

        let first = observed.values().next();
        let last = observed.values().next_back();

        let fills: Vec<Fill> = missing
            .par_iter()
            .map(|&i| {
                let before = observed.range(..i).next_back().map(|(_, p)| p);
                let after = observed.range(i + 1..).next().map(|(_, p)| p);
                match (before, after, first, last) {
                    (Some(b), Some(a), _, _) => {
                        let t = (i - b.led_index) as f64 / (a.led_index - b.led_index) as f64;
                        Fill::Interpolated(self.interpolate(cone, i, b, a, t))
                    }
                    // Wrapped gap across the end of the string
                    (b, a, Some(f), Some(l)) if self.config.wraps && f.led_index != l.led_index => {
                        let span = (f.led_index + led_count - l.led_index) as f64;
                        let offset = match (b, a) {
                            (Some(_), None) => (i - l.led_index) as f64,
                            _ => (i + led_count - l.led_index) as f64,
                        };
                        Fill::Interpolated(self.interpolate(cone, i, l, f, offset / span))
                    }
                    (Some(b), None, _, _) => match &winding {
                        Some(w) => Fill::Extrapolated(self.extrapolate(cone, i, b, (i - b.led_index) as f64, w)),
                        None => Fill::Unresolved(i),
                    },
                    (None, Some(a), _, _) => match &winding {
                        Some(w) => Fill::Extrapolated(self.extrapolate(cone, i, a, -((a.led_index - i) as f64), w)),
                        None => Fill::Unresolved(i),
                    },
                    _ => Fill::Unresolved(i),
                }
            })
            .collect();

        let mut out = GapFillOutput::default();
        for fill in fills {
            match fill {
                Fill::Interpolated(p) => {
                    out.interpolated += 1;
                    out.positions.push(p);
                }
                Fill::Extrapolated(p) => {
                    out.extrapolated += 1;
                    out.positions.push(p);
                }
                Fill::Unresolved(i) => {
                    out.unresolved.push(i);
                    out.diagnostics.push(Diagnostic::InsufficientData { led_index: i });
                }
            }
        }
        if !out.unresolved.is_empty() {
            warn!("{} LEDs could not be placed (insufficient data)", out.unresolved.len());
        }
        out
    }
}
