//! The "RAY" Engine - Ray–Cone Intersection
//!
//! A camera ray generally crosses the conical surface twice: once on the
//! front face (near root) and once on the back face (far root). This module
//! solves the ray/cone quadratic and returns both roots in world and cone
//! space; choosing between them is the occlusion analyzer's job.
//!
//! With `o` the ray origin relative to the axis, `d` the unit direction and
//! `k = (r_bottom - r_top) / height`:
//!
//! ```text
//! (ox + t dx)² + (oy + t dy)² = (r_bottom - k (oz + t dz))²
//! A t² + B t + C = 0
//! A = dx² + dy² - k² dz²
//! B = 2 (ox dx + oy dy + w k dz),   w = r_bottom - k oz
//! C = ox² + oy² - w²
//! ```
//!
//! Only roots with `t > 0`, on the upper nappe (radius ≥ 0) and inside the
//! frustum height (within tolerance) are kept.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledmap_cone::ConeParameters;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Numerical guards for the intersector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntersectConfig {
    /// Threshold below which coefficients and distances count as zero
    pub epsilon: f64,

    /// Normalized-height slack outside [0, 1] before a root is rejected
    pub height_tolerance: f64,
}

impl Default for IntersectConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-9,
            height_tolerance: 0.02,
        }
    }
}

// ============================================================================
// TYPES
// ============================================================================

/// Geometry failures (`GeometryDegenerateError`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IntersectError {
    #[error("Ray does not intersect the cone surface ahead of its origin")]
    NoIntersection,

    #[error("Ray direction is degenerate")]
    DegenerateRay,
}

/// A half-line from a camera center toward a detected pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    origin: Vector3<f64>,
    direction: Vector3<f64>,
}

impl Ray {
    /// Build a ray; `direction` is normalized and must be non-zero.
    pub fn new(origin: Vector3<f64>, direction: Vector3<f64>) -> Result<Self, IntersectError> {
        let direction = direction.try_normalize(1e-12).ok_or(IntersectError::DegenerateRay)?;
        if !origin.iter().all(|v| v.is_finite()) {
            return Err(IntersectError::DegenerateRay);
        }
        Ok(Self { origin, direction })
    }

    pub fn origin(&self) -> Vector3<f64> {
        self.origin
    }

    pub fn direction(&self) -> Vector3<f64> {
        self.direction
    }

    #[inline]
    pub fn at(&self, t: f64) -> Vector3<f64> {
        self.origin + self.direction * t
    }
}

/// One root of the ray/cone equation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConeHit {
    /// Distance along the ray (meters)
    pub distance: f64,

    /// World position of the hit
    pub point: [f64; 3],

    /// Normalized height, clamped to [0, 1]
    pub height: f64,

    /// Azimuth in degrees, [0, 360)
    pub angle: f64,

    /// Distance from the cone axis (meters)
    pub radius: f64,
}

/// The near/far root pair for one ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConeIntersection {
    /// Root closest to the camera (front surface)
    pub near: ConeHit,

    /// Root farthest from the camera (back surface); `None` when the ray
    /// crosses the surface only once inside the frustum
    pub far: Option<ConeHit>,
}

impl ConeIntersection {
    /// Pick the far root for back-facing LEDs, the near root otherwise.
    ///
    /// Falls back to the near root when only one root exists.
    pub fn resolve(&self, back_facing: bool) -> &ConeHit {
        match (back_facing, &self.far) {
            (true, Some(far)) => far,
            _ => &self.near,
        }
    }
}

// ============================================================================
// INTERSECTION
// ============================================================================

/// Intersect a ray with the cone surface.
pub fn intersect(
    ray: &Ray,
    cone: &ConeParameters,
    config: &IntersectConfig,
) -> Result<ConeIntersection, IntersectError> {
    let eps = config.epsilon;
    let o = ray.origin();
    let d = ray.direction();
    let (ox, oy) = cone.axis_offset(&o);
    let k = cone.slope();

    let horizontal = d.x * d.x + d.y * d.y;
    let mut roots: Vec<f64> = Vec::with_capacity(2);

    if horizontal < eps {
        // Parallel to the axis: fixed radial distance, one crossing at r(z) = rho
        if d.z.abs() < eps {
            return Err(IntersectError::DegenerateRay);
        }
        let rho = (ox * ox + oy * oy).sqrt();
        let z_hit = (cone.r_bottom() - rho) / k;
        roots.push((z_hit - o.z) / d.z);
    } else {
        let w = cone.r_bottom() - k * o.z;
        let a = horizontal - k * k * d.z * d.z;
        let b = 2.0 * (ox * d.x + oy * d.y + w * k * d.z);
        let c = ox * ox + oy * oy - w * w;

        if a.abs() < eps {
            // Parallel to a generator line: the quadratic collapses to linear
            if b.abs() < eps {
                return Err(IntersectError::NoIntersection);
            }
            roots.push(-c / b);
        } else {
            let mut disc = b * b - 4.0 * a * c;
            if disc < 0.0 {
                // Grazing rays within round-off of tangency keep a single root
                if disc > -eps * (b * b).max(1.0) {
                    disc = 0.0;
                } else {
                    return Err(IntersectError::NoIntersection);
                }
            }
            let sqrt_disc = disc.sqrt();
            let q = -0.5 * (b + b.signum() * sqrt_disc);
            let t1 = q / a;
            roots.push(t1);
            if q.abs() > eps {
                let t2 = c / q;
                if (t2 - t1).abs() > eps {
                    roots.push(t2);
                }
            }
        }
    }

    let mut hits: Vec<ConeHit> = roots
        .into_iter()
        .filter_map(|t| valid_hit(ray, cone, config, t))
        .collect();
    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));

    let mut iter = hits.into_iter();
    let near = iter.next().ok_or(IntersectError::NoIntersection)?;
    Ok(ConeIntersection {
        near,
        far: iter.next(),
    })
}

/// Convert a root into a hit if it lies ahead of the camera on the frustum.
fn valid_hit(ray: &Ray, cone: &ConeParameters, config: &IntersectConfig, t: f64) -> Option<ConeHit> {
    if !t.is_finite() || t <= config.epsilon {
        return None;
    }
    let point = ray.at(t);

    // Upper nappe only: the mirrored cone above the apex has negative r(z)
    if cone.r_bottom() - cone.slope() * point.z < -config.epsilon {
        return None;
    }

    let local = cone.to_cone_space(&point);
    let tol = config.height_tolerance;
    if local.height < -tol || local.height > 1.0 + tol {
        return None;
    }

    Some(ConeHit {
        distance: t,
        point: point.into(),
        height: local.height.clamp(0.0, 1.0),
        angle: local.angle,
        radius: local.radius,
    })
}

// ============================================================================
// TESTS
// ============================================================================
