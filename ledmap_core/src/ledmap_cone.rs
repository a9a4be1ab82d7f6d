//! The "CONE" Model - Conical Surface Parameters and Cone Space
//!
//! The tree is modelled as an upright truncated cone standing on the Z = 0
//! plane. Its axis passes through `center` and the radius shrinks linearly
//! with normalized height:
//!
//! ```text
//! r(h) = r_bottom - (r_bottom - r_top) * h,   h = z / height ∈ [0, 1]
//! ```
//!
//! Cone space is `(height, angle, radius)`: normalized height, azimuth in
//! degrees `[0, 360)` measured counter-clockwise from +X around the axis, and
//! radial distance from the axis in meters.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::angle::normalize_degrees;

// ============================================================================
// ERRORS
// ============================================================================

/// Cone estimation failure (`ConeEstimationFailure`).
///
/// Never tolerated silently: the caller must fall back to another estimation
/// path or to manually supplied parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConeError {
    #[error("Cone estimation failed: no contour found in {0} (scene too dark)")]
    NoContour(String),

    #[error("Cone estimation failed: {source_name} is overexposed ({fill_fraction:.2} of frame lit)")]
    Overexposed { source_name: String, fill_fraction: f64 },

    #[error("Cone estimation failed: {found} usable points, need {required}")]
    InsufficientPoints { found: usize, required: usize },

    #[error("Cone estimation failed: invalid geometry r_bottom={r_bottom:.3} r_top={r_top:.3} height={height:.3}")]
    InvalidGeometry { r_bottom: f64, r_top: f64, height: f64 },

    #[error("Cone estimation failed: degenerate width profile ({0})")]
    DegenerateProfile(String),

    #[error("Cone estimation failed: no estimation source available")]
    NoSources,
}

// ============================================================================
// CONE PARAMETERS
// ============================================================================

/// External override record: `{centerX, centerY, rBottom, rTop, height}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConeOverride {
    pub center_x: f64,
    pub center_y: f64,
    pub r_bottom: f64,
    pub r_top: f64,
    pub height: f64,
}

/// Validated cone geometry.
///
/// Invariant: `r_bottom > r_top >= 0` and `height > 0`. Immutable once
/// built; re-estimation produces a new value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ConeOverride", into = "ConeOverride")]
pub struct ConeParameters {
    center: [f64; 2],
    r_bottom: f64,
    r_top: f64,
    height: f64,
}

impl TryFrom<ConeOverride> for ConeParameters {
    type Error = ConeError;

    fn try_from(o: ConeOverride) -> Result<Self, Self::Error> {
        Self::new([o.center_x, o.center_y], o.r_bottom, o.r_top, o.height)
    }
}

impl From<ConeParameters> for ConeOverride {
    fn from(c: ConeParameters) -> Self {
        Self {
            center_x: c.center[0],
            center_y: c.center[1],
            r_bottom: c.r_bottom,
            r_top: c.r_top,
            height: c.height,
        }
    }
}

/// A point expressed in cone space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConePoint {
    /// Normalized height, 0 at the base and 1 at the top
    pub height: f64,

    /// Azimuth in degrees, `[0, 360)`
    pub angle: f64,

    /// Distance from the cone axis (meters)
    pub radius: f64,
}

impl ConeParameters {
    /// Create validated cone parameters.
    pub fn new(center: [f64; 2], r_bottom: f64, r_top: f64, height: f64) -> Result<Self, ConeError> {
        let finite = center.iter().chain([r_bottom, r_top, height].iter()).all(|v| v.is_finite());
        if !finite || !(r_bottom > r_top) || r_top < 0.0 || !(height > 0.0) {
            return Err(ConeError::InvalidGeometry { r_bottom, r_top, height });
        }
        Ok(Self {
            center,
            r_bottom,
            r_top,
            height,
        })
    }

    pub fn center(&self) -> [f64; 2] {
        self.center
    }

    pub fn r_bottom(&self) -> f64 {
        self.r_bottom
    }

    pub fn r_top(&self) -> f64 {
        self.r_top
    }

    /// Height in meters.
    pub fn height(&self) -> f64 {
        self.height
    }

    /// Radius at normalized height `h`.
    #[inline]
    pub fn radius_at(&self, h: f64) -> f64 {
        self.r_bottom - (self.r_bottom - self.r_top) * h
    }

    /// Radius lost per meter of height.
    #[inline]
    pub fn slope(&self) -> f64 {
        (self.r_bottom - self.r_top) / self.height
    }

    /// Horizontal offset of `point` from the axis.
    #[inline]
    pub fn axis_offset(&self, point: &Vector3<f64>) -> (f64, f64) {
        (point.x - self.center[0], point.y - self.center[1])
    }

    /// Convert a world point to cone space (height is not clamped).
    pub fn to_cone_space(&self, point: &Vector3<f64>) -> ConePoint {
        let (dx, dy) = self.axis_offset(point);
        ConePoint {
            height: point.z / self.height,
            angle: normalize_degrees(dy.atan2(dx).to_degrees()),
            radius: (dx * dx + dy * dy).sqrt(),
        }
    }

    /// Convert cone-space coordinates back to a world point.
    pub fn from_cone_space(&self, height: f64, angle_deg: f64, radius: f64) -> Vector3<f64> {
        let theta = angle_deg.to_radians();
        Vector3::new(
            self.center[0] + radius * theta.cos(),
            self.center[1] + radius * theta.sin(),
            height * self.height,
        )
    }

    /// World point on the surface at normalized height `h` and azimuth.
    pub fn surface_point(&self, h: f64, angle_deg: f64) -> Vector3<f64> {
        self.from_cone_space(h, angle_deg, self.radius_at(h))
    }

    /// Absolute deviation of `radius` from the fitted surface at `h` (meters).
    pub fn radius_deviation(&self, h: f64, radius: f64) -> f64 {
        (radius - self.radius_at(h)).abs()
    }

    /// Outward unit surface normal at a world point on the surface.
    pub fn surface_normal(&self, point: &Vector3<f64>) -> Vector3<f64> {
        let (dx, dy) = self.axis_offset(point);
        let rho = (dx * dx + dy * dy).sqrt().max(1e-12);
        // Gradient of sqrt(x²+y²) - r(z): radial outward plus upward lean of slope
        Vector3::new(dx / rho, dy / rho, self.slope()).normalize()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tree() -> ConeParameters {
        ConeParameters::new([0.0, 0.0], 0.5, 0.05, 2.0).unwrap()
    }

    #[test]
    fn test_rejects_inverted_cone() {
        assert!(ConeParameters::new([0.0, 0.0], 0.2, 0.3, 2.0).is_err());
        assert!(ConeParameters::new([0.0, 0.0], 0.3, 0.3, 2.0).is_err());
        assert!(ConeParameters::new([0.0, 0.0], 0.5, -0.1, 2.0).is_err());
        assert!(ConeParameters::new([0.0, 0.0], 0.5, 0.1, 0.0).is_err());
        assert!(ConeParameters::new([f64::NAN, 0.0], 0.5, 0.1, 1.0).is_err());
    }

    #[test]
    fn test_radius_profile() {
        let cone = tree();
        assert_relative_eq!(cone.radius_at(0.0), 0.5);
        assert_relative_eq!(cone.radius_at(1.0), 0.05);
        assert_relative_eq!(cone.radius_at(0.5), 0.275);
    }

    #[test]
    fn test_cone_space_round_trip() {
        let cone = ConeParameters::new([0.2, -0.1], 0.5, 0.05, 2.0).unwrap();
        let p = cone.surface_point(0.3, 250.0);
        let c = cone.to_cone_space(&p);
        assert_relative_eq!(c.height, 0.3, epsilon = 1e-12);
        assert_relative_eq!(c.angle, 250.0, epsilon = 1e-9);
        assert_relative_eq!(c.radius, cone.radius_at(0.3), epsilon = 1e-12);
        assert!(cone.radius_deviation(c.height, c.radius) < 1e-12);
    }

    #[test]
    fn test_override_deserialize_validates() {
        let good = r#"{"centerX":0.0,"centerY":0.0,"rBottom":0.5,"rTop":0.05,"height":2.0}"#;
        let cone: ConeParameters = serde_json::from_str(good).unwrap();
        assert_relative_eq!(cone.height(), 2.0);

        let bad = r#"{"centerX":0.0,"centerY":0.0,"rBottom":0.1,"rTop":0.5,"height":2.0}"#;
        assert!(serde_json::from_str::<ConeParameters>(bad).is_err());
    }

    #[test]
    fn test_surface_normal_points_outward() {
        let cone = tree();
        let p = cone.surface_point(0.5, 90.0);
        let n = cone.surface_normal(&p);
        assert!(n.y > 0.9);
        assert!(n.z > 0.0);
    }
}
