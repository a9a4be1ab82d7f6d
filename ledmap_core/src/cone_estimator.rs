//! The "SHAPE" Engine - Cone Estimation
//!
//! Produces the [`ConeParameters`] every later stage projects onto.
//!
//! # Sources, in order of preference
//!
//! 1. A manual override carried by the session.
//! 2. **Silhouettes**: each all-on photograph is binarized, cleaned, reduced
//!    to its largest component and sliced into height bands. Band edges are
//!    back-projected onto the vertical plane through the world origin facing
//!    the camera, giving a metric width-vs-height profile. A least-squares
//!    line `r = a + b·h` per camera is then averaged across cameras.
//! 3. **Sparse points**: LEDs seen by at least two cameras are triangulated
//!    by ray convergence and a cone is fitted by Gauss-Newton over
//!    `(cx, cy, a, b)` minimizing radial residuals.
//!
//! A fit that is not strictly tapering, or whose top radius is negative
//! beyond `apex_tolerance`, is rejected rather than clamped into shape.

use std::collections::BTreeMap;

use image::GrayImage;
use ledmap_env::{Camera, CameraId};
use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ledmap_cone::{ConeError, ConeParameters};
use crate::reflection::ReflectionScores;
use crate::session::CaptureSession;
use crate::silhouette::{binarize, clean_mask, largest_component, width_profile, ProfileBand};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConeEstimatorConfig {
    /// Gray level above which a pixel belongs to the lit region
    pub brightness_threshold: u8,

    /// Structuring-element radius for closing/opening (pixels)
    pub morphology_radius: u8,

    /// Smallest acceptable silhouette (pixels)
    pub min_component_area: usize,

    /// Silhouette area / frame area above which the photo counts as overexposed
    pub max_fill_fraction: f64,

    /// Number of height bands in the width profile
    pub height_bands: usize,

    /// Negative top radius (m) still clamped to zero
    pub apex_tolerance: f64,

    /// RMS ray distance (m) above which a triangulated LED is discarded
    pub max_ray_residual: f64,

    /// Triangulated LEDs required for the sparse fit
    pub min_sparse_points: usize,
}

impl Default for ConeEstimatorConfig {
    fn default() -> Self {
        Self {
            brightness_threshold: 128,
            morphology_radius: 1,
            min_component_area: 200,
            max_fill_fraction: 0.9,
            height_bands: 20,
            apex_tolerance: 0.02,
            max_ray_residual: 0.15,
            min_sparse_points: 6,
        }
    }
}

// ============================================================================
// RESULTS
// ============================================================================

/// Where the cone in use came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConeSource {
    Manual,
    Silhouette { cameras: usize },
    SparsePoints { points: usize },
}

/// Estimated cone plus provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct ConeEstimate {
    pub cone: ConeParameters,
    pub source: ConeSource,

    /// Failures of preferred paths that forced a fallback
    pub fallbacks: Vec<ConeError>,
}

/// Per-camera silhouette fit, in world units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SilhouetteFit {
    pub camera_id: CameraId,

    /// Horizontal centroid offset along the camera's right vector (m)
    pub lateral_offset: f64,

    /// Camera right vector projected to the ground plane
    pub lateral_axis: [f64; 2],

    pub r_bottom: f64,
    pub r_top: f64,
    pub height: f64,

    /// RMS residual of the width line fit (m)
    pub residual: f64,
}

/// Line `y = a + b·x` fitted by ordinary least squares.
///
/// Returns `(a, b, rms)` or `None` when fewer than two distinct `x` exist.
pub fn fit_line(xs: &[f64], ys: &[f64]) -> Option<(f64, f64, f64)> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let nf = n as f64;
    let mx = xs[..n].iter().sum::<f64>() / nf;
    let my = ys[..n].iter().sum::<f64>() / nf;
    let (mut sxx, mut sxy) = (0.0, 0.0);
    for i in 0..n {
        sxx += (xs[i] - mx) * (xs[i] - mx);
        sxy += (xs[i] - mx) * (ys[i] - my);
    }
    if sxx < 1e-12 {
        return None;
    }
    let b = sxy / sxx;
    let a = my - b * mx;
    let sse: f64 = (0..n).map(|i| (ys[i] - a - b * xs[i]).powi(2)).sum();
    Some((a, b, (sse / nf).sqrt()))
}

/// Least-squares point closest to a bundle of rays.
///
/// Returns the point and the RMS perpendicular distance to the rays.
pub fn converge_rays(rays: &[(Vector3<f64>, Vector3<f64>)]) -> Option<(Vector3<f64>, f64)> {
    if rays.len() < 2 {
        return None;
    }
    let mut a = Matrix3::zeros();
    let mut b = Vector3::zeros();
    for (origin, dir) in rays {
        let d = dir.try_normalize(1e-12)?;
        let proj = Matrix3::identity() - d * d.transpose();
        a += proj;
        b += proj * origin;
    }
    let point = a.try_inverse()? * b;

    let sq: f64 = rays
        .iter()
        .map(|(o, d)| {
            let d = d.normalize();
            let v = point - o;
            (v - d * v.dot(&d)).norm_squared()
        })
        .sum();
    Some((point, (sq / rays.len() as f64).sqrt()))
}

// ============================================================================
// ESTIMATOR
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ConeEstimator {
    config: ConeEstimatorConfig,
}

impl ConeEstimator {
    pub fn new(config: ConeEstimatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConeEstimatorConfig {
        &self.config
    }

    /// Pick the best available cone for a session.
    pub fn estimate(&self, session: &CaptureSession, reflections: &ReflectionScores) -> Result<ConeEstimate, ConeError> {
        if let Some(cone) = session.cone_override() {
            info!("Using manual cone override");
            return Ok(ConeEstimate {
                cone: *cone,
                source: ConeSource::Manual,
                fallbacks: Vec::new(),
            });
        }

        let mut fallbacks = Vec::new();

        if !session.all_on_photos().is_empty() {
            let views: Vec<(&Camera, &GrayImage)> = session
                .all_on_photos()
                .iter()
                .filter_map(|(id, photo)| session.camera(*id).map(|cam| (cam, photo)))
                .collect();
            match self.from_silhouettes(&views) {
                Ok((cone, used)) => {
                    info!(
                        "Cone from {} silhouettes: r_bottom={:.3} r_top={:.3} height={:.3}",
                        used,
                        cone.r_bottom(),
                        cone.r_top(),
                        cone.height()
                    );
                    return Ok(ConeEstimate {
                        cone,
                        source: ConeSource::Silhouette { cameras: used },
                        fallbacks,
                    });
                }
                Err(e) => {
                    warn!("Silhouette cone estimation failed, falling back to sparse points: {}", e);
                    fallbacks.push(e);
                }
            }
        }

        let points = self.triangulate_candidates(session, reflections);
        let cone = self.from_sparse_points(&points)?;
        info!(
            "Cone from {} sparse points: r_bottom={:.3} r_top={:.3} height={:.3}",
            points.len(),
            cone.r_bottom(),
            cone.r_top(),
            cone.height()
        );
        Ok(ConeEstimate {
            cone,
            source: ConeSource::SparsePoints { points: points.len() },
            fallbacks,
        })
    }

    // ------------------------------------------------------------------------
    // Path (a): silhouettes
    // ------------------------------------------------------------------------

    /// Fit one camera's all-on photograph.
    pub fn fit_silhouette(&self, camera: &Camera, photo: &GrayImage) -> Result<SilhouetteFit, ConeError> {
        let name = camera.id().to_string();
        let (w, h) = camera.image_size();
        if photo.width() != w || photo.height() != h {
            return Err(ConeError::DegenerateProfile(format!(
                "{} photo is {}x{}, calibration says {}x{}",
                name,
                photo.width(),
                photo.height(),
                w,
                h
            )));
        }

        let mask = clean_mask(
            &binarize(photo, self.config.brightness_threshold),
            self.config.morphology_radius,
        );
        let component = largest_component(&mask).ok_or_else(|| ConeError::NoContour(name.clone()))?;
        if component.area < self.config.min_component_area {
            return Err(ConeError::NoContour(name));
        }

        let fill_fraction = component.area as f64 / (w as f64 * h as f64);
        if fill_fraction > self.config.max_fill_fraction {
            return Err(ConeError::Overexposed {
                source_name: name,
                fill_fraction,
            });
        }

        let bands = width_profile(&component, self.config.height_bands);
        self.fit_profile(camera, &bands, component.top_row as f64, component.bottom_row as f64 + 1.0)
    }

    /// Turn a pixel width profile into a metric line fit.
    fn fit_profile(&self, camera: &Camera, bands: &[ProfileBand], top_row: f64, bottom_row: f64) -> Result<SilhouetteFit, ConeError> {
        let name = camera.id().to_string();
        let plane = AxisPlane::facing(camera).ok_or_else(|| ConeError::DegenerateProfile(format!("{} faces straight down", name)))?;

        let mid_col = bands.iter().map(|b| b.center()).sum::<f64>() / bands.len().max(1) as f64;
        let top = plane
            .back_project(camera, mid_col, top_row)
            .ok_or_else(|| ConeError::DegenerateProfile(format!("{} top row misses the axis plane", name)))?;
        let height = top.z;
        if !(height > 0.0) {
            return Err(ConeError::InvalidGeometry {
                r_bottom: f64::NAN,
                r_top: f64::NAN,
                height,
            });
        }
        debug!("{}: silhouette rows {:.0}..{:.0}, height {:.3} m", name, top_row, bottom_row, height);

        let mut hs = Vec::with_capacity(bands.len());
        let mut rs = Vec::with_capacity(bands.len());
        let mut lateral = Vec::with_capacity(bands.len());
        for band in bands {
            let (Some(left), Some(right)) = (
                plane.back_project(camera, band.left, band.row),
                plane.back_project(camera, band.right, band.row),
            ) else {
                continue;
            };
            let mid = (left + right) / 2.0;
            // Rows below the floor trace the base outline, not the flank
            if mid.z < 0.0 || mid.z > height {
                continue;
            }
            hs.push(mid.z / height);
            rs.push((right - left).norm() / 2.0);
            lateral.push(plane.lateral(&mid));
        }

        let (a, b, residual) = fit_line(&hs, &rs)
            .ok_or_else(|| ConeError::DegenerateProfile(format!("{} has {} usable bands", name, hs.len())))?;
        let (r_bottom, r_top) = self.clamp_apex(a, a + b, height)?;

        Ok(SilhouetteFit {
            camera_id: camera.id(),
            lateral_offset: lateral.iter().sum::<f64>() / lateral.len() as f64,
            lateral_axis: [plane.lateral_axis.x, plane.lateral_axis.y],
            r_bottom,
            r_top,
            height,
            residual,
        })
    }

    /// Average per-camera fits into one cone.
    ///
    /// Radii and height are plain means. The centre solves the per-camera
    /// lateral offsets jointly; a single camera constrains only its own
    /// lateral axis.
    pub fn from_silhouettes(&self, views: &[(&Camera, &GrayImage)]) -> Result<(ConeParameters, usize), ConeError> {
        if views.is_empty() {
            return Err(ConeError::NoSources);
        }

        let mut fits = Vec::new();
        let mut first_error = None;
        for (camera, photo) in views {
            match self.fit_silhouette(camera, photo) {
                Ok(fit) => {
                    debug!(
                        "{}: r_bottom={:.3} r_top={:.3} height={:.3} rms={:.4}",
                        fit.camera_id, fit.r_bottom, fit.r_top, fit.height, fit.residual
                    );
                    fits.push(fit);
                }
                Err(e) => {
                    warn!("{}: silhouette rejected: {}", camera.id(), e);
                    first_error.get_or_insert(e);
                }
            }
        }
        if fits.is_empty() {
            return Err(first_error.unwrap_or(ConeError::NoSources));
        }

        let n = fits.len() as f64;
        let r_bottom = fits.iter().map(|f| f.r_bottom).sum::<f64>() / n;
        let r_top = fits.iter().map(|f| f.r_top).sum::<f64>() / n;
        let height = fits.iter().map(|f| f.height).sum::<f64>() / n;
        let center = solve_center(&fits);

        Ok((ConeParameters::new(center, r_bottom, r_top, height)?, fits.len()))
    }

    // ------------------------------------------------------------------------
    // Path (b): sparse triangulated points
    // ------------------------------------------------------------------------

    /// Triangulate every LED seen by at least two low-reflection views.
    pub fn triangulate_candidates(&self, session: &CaptureSession, reflections: &ReflectionScores) -> Vec<Vector3<f64>> {
        let mut points = Vec::new();
        let by_led: BTreeMap<usize, _> = session.detections_by_led();
        for (led, dets) in by_led {
            let rays: Vec<(Vector3<f64>, Vector3<f64>)> = dets
                .iter()
                .filter(|d| !reflections.is_suspect(d.camera_id, d.led_index))
                .filter_map(|d| {
                    let cam = session.camera(d.camera_id)?;
                    Some((cam.position(), cam.pixel_ray(d.pixel_x, d.pixel_y)))
                })
                .collect();
            let Some((point, residual)) = converge_rays(&rays) else {
                continue;
            };
            if residual > self.config.max_ray_residual {
                debug!("LED {}: ray residual {:.3} m, discarded", led, residual);
                continue;
            }
            points.push(point);
        }
        points
    }

    /// Fit a cone to scattered surface points.
    pub fn from_sparse_points(&self, points: &[Vector3<f64>]) -> Result<ConeParameters, ConeError> {
        let required = self.config.min_sparse_points.max(4);
        if points.len() < required {
            return Err(ConeError::InsufficientPoints {
                found: points.len(),
                required,
            });
        }

        let height = points.iter().map(|p| p.z).fold(f64::NEG_INFINITY, f64::max);
        if !(height > 0.0) {
            return Err(ConeError::InvalidGeometry {
                r_bottom: f64::NAN,
                r_top: f64::NAN,
                height,
            });
        }

        // Initial guess: centroid axis, then a line through the radial spread
        let n = points.len() as f64;
        let mut cx = points.iter().map(|p| p.x).sum::<f64>() / n;
        let mut cy = points.iter().map(|p| p.y).sum::<f64>() / n;
        let hs: Vec<f64> = points.iter().map(|p| p.z / height).collect();
        let rs: Vec<f64> = points.iter().map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt()).collect();
        let (mut a, mut b, _) = fit_line(&hs, &rs)
            .ok_or_else(|| ConeError::DegenerateProfile("all sparse points share one height".to_string()))?;

        for _ in 0..20 {
            let mut jtj = Matrix4::zeros();
            let mut jtr = Vector4::zeros();
            for (p, &h) in points.iter().zip(&hs) {
                let (dx, dy) = (p.x - cx, p.y - cy);
                let rho = (dx * dx + dy * dy).sqrt().max(1e-9);
                let residual = rho - a - b * h;
                let j = Vector4::new(-dx / rho, -dy / rho, -1.0, -h);
                jtj += j * j.transpose();
                jtr += j * residual;
            }
            let Some(inv) = jtj.try_inverse() else {
                break;
            };
            let step = -(inv * jtr);
            cx += step[0];
            cy += step[1];
            a += step[2];
            b += step[3];
            if step.norm() < 1e-10 {
                break;
            }
        }

        let (r_bottom, r_top) = self.clamp_apex(a, a + b, height)?;
        ConeParameters::new([cx, cy], r_bottom, r_top, height)
    }

    /// Accept a slightly negative top radius as an apex, reject anything else.
    fn clamp_apex(&self, r_bottom: f64, r_top: f64, height: f64) -> Result<(f64, f64), ConeError> {
        let invalid = ConeError::InvalidGeometry { r_bottom, r_top, height };
        if !(r_bottom > r_top) || !(r_bottom > 0.0) {
            return Err(invalid);
        }
        if r_top < 0.0 {
            if r_top >= -self.config.apex_tolerance {
                return Ok((r_bottom, 0.0));
            }
            return Err(invalid);
        }
        Ok((r_bottom, r_top))
    }
}

// ============================================================================
// GEOMETRY HELPERS
// ============================================================================

/// Vertical plane through the world origin whose normal is the camera's
/// horizontal viewing direction.
struct AxisPlane {
    normal: Vector3<f64>,
    lateral_axis: Vector3<f64>,
}

impl AxisPlane {
    fn facing(camera: &Camera) -> Option<Self> {
        let f = camera.forward();
        let normal = Vector3::new(f.x, f.y, 0.0).try_normalize(1e-9)?;
        let r = camera.right();
        let lateral_axis = Vector3::new(r.x, r.y, 0.0).try_normalize(1e-9)?;
        Some(Self { normal, lateral_axis })
    }

    fn back_project(&self, camera: &Camera, px: f64, py: f64) -> Option<Vector3<f64>> {
        let origin = camera.position();
        let dir = camera.pixel_ray(px, py);
        let denom = dir.dot(&self.normal);
        if denom.abs() < 1e-9 {
            return None;
        }
        let t = -origin.dot(&self.normal) / denom;
        (t > 0.0).then(|| origin + dir * t)
    }

    fn lateral(&self, point: &Vector3<f64>) -> f64 {
        point.dot(&self.lateral_axis)
    }
}

/// Solve `Σ uᵢuᵢᵀ c = Σ uᵢ sᵢ` for the axis centre.
fn solve_center(fits: &[SilhouetteFit]) -> [f64; 2] {
    let (mut a11, mut a12, mut a22, mut b1, mut b2) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for f in fits {
        let [ux, uy] = f.lateral_axis;
        a11 += ux * ux;
        a12 += ux * uy;
        a22 += uy * uy;
        b1 += ux * f.lateral_offset;
        b2 += uy * f.lateral_offset;
    }
    let det = a11 * a22 - a12 * a12;
    if det.abs() > 1e-6 {
        [(a22 * b1 - a12 * b2) / det, (a11 * b2 - a12 * b1) / det]
    } else {
        // Parallel viewpoints: only the lateral components are observable
        let n = fits.len().max(1) as f64;
        let (sx, sy) = fits.iter().fold((0.0, 0.0), |(sx, sy), f| {
            (sx + f.lateral_axis[0] * f.lateral_offset, sy + f.lateral_axis[1] * f.lateral_offset)
        });
        [sx / n, sy / n]
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledmap_ray::{intersect, IntersectConfig, Ray};
    use approx::assert_relative_eq;
    use image::Luma;

    fn tree() -> ConeParameters {
        ConeParameters::new([0.0, 0.0], 0.5, 0.05, 2.0).unwrap()
    }

    fn ring_camera(id: u32, angle_deg: f64) -> Camera {
        let a = angle_deg.to_radians();
        Camera::looking_at(
            CameraId(id),
            Vector3::new(4.0 * a.cos(), 4.0 * a.sin(), 1.0),
            Vector3::new(0.0, 0.0, 1.0),
            60.0,
            320,
            240,
        )
        .unwrap()
    }

    /// Render the cone as a solid bright silhouette.
    fn render(camera: &Camera, cone: &ConeParameters) -> GrayImage {
        let (w, h) = camera.image_size();
        GrayImage::from_fn(w, h, |x, y| {
            let dir = camera.pixel_ray(x as f64 + 0.5, y as f64 + 0.5);
            let Ok(ray) = Ray::new(camera.position(), dir) else {
                return Luma([0]);
            };
            match intersect(&ray, cone, &IntersectConfig { epsilon: 1e-9, height_tolerance: 0.0 }) {
                Ok(_) => Luma([230]),
                Err(_) => Luma([10]),
            }
        })
    }

    #[test]
    fn test_silhouette_recovers_cone() {
        let truth = tree();
        let cameras: Vec<Camera> = (0..3).map(|i| ring_camera(i, i as f64 * 120.0)).collect();
        let photos: Vec<GrayImage> = cameras.iter().map(|c| render(c, &truth)).collect();
        let views: Vec<(&Camera, &GrayImage)> = cameras.iter().zip(&photos).collect();

        let (cone, used) = ConeEstimator::default().from_silhouettes(&views).unwrap();
        assert_eq!(used, 3);
        assert_relative_eq!(cone.height(), 2.0, epsilon = 0.1);
        assert_relative_eq!(cone.r_bottom(), 0.5, epsilon = 0.08);
        assert!(cone.r_top() < 0.15);
        assert!(cone.center()[0].abs() < 0.05 && cone.center()[1].abs() < 0.05);
    }

    #[test]
    fn test_dark_photo_has_no_contour() {
        let cam = ring_camera(0, 0.0);
        let dark = GrayImage::from_fn(320, 240, |_, _| Luma([5]));
        let err = ConeEstimator::default().fit_silhouette(&cam, &dark).unwrap_err();
        assert!(matches!(err, ConeError::NoContour(_)));
    }

    #[test]
    fn test_blown_out_photo_is_overexposed() {
        let cam = ring_camera(0, 0.0);
        let white = GrayImage::from_fn(320, 240, |_, _| Luma([255]));
        let err = ConeEstimator::default().fit_silhouette(&cam, &white).unwrap_err();
        assert!(matches!(err, ConeError::Overexposed { .. }));
    }

    #[test]
    fn test_sparse_fit_recovers_offset_cone() {
        let truth = ConeParameters::new([0.2, -0.1], 0.6, 0.1, 1.8).unwrap();
        let points: Vec<Vector3<f64>> = (0..60)
            .map(|i| {
                let h = i as f64 / 59.0;
                truth.surface_point(h, i as f64 * 37.0)
            })
            .collect();
        let cone = ConeEstimator::default().from_sparse_points(&points).unwrap();
        assert_relative_eq!(cone.center()[0], 0.2, epsilon = 1e-3);
        assert_relative_eq!(cone.center()[1], -0.1, epsilon = 1e-3);
        assert_relative_eq!(cone.r_bottom(), 0.6, epsilon = 1e-3);
        assert_relative_eq!(cone.r_top(), 0.1, epsilon = 1e-3);
        assert_relative_eq!(cone.height(), 1.8, epsilon = 1e-9);
    }

    #[test]
    fn test_sparse_fit_needs_points() {
        let err = ConeEstimator::default().from_sparse_points(&[Vector3::new(0.1, 0.0, 1.0)]).unwrap_err();
        assert!(matches!(err, ConeError::InsufficientPoints { found: 1, .. }));
    }

    #[test]
    fn test_inverted_fit_rejected() {
        // Radius grows with height
        let points: Vec<Vector3<f64>> = (0..20)
            .map(|i| {
                let z = 0.1 * (i + 1) as f64;
                let a = (i as f64 * 50.0).to_radians();
                let r = 0.1 + 0.2 * z;
                Vector3::new(r * a.cos(), r * a.sin(), z)
            })
            .collect();
        let err = ConeEstimator::default().from_sparse_points(&points).unwrap_err();
        assert!(matches!(err, ConeError::InvalidGeometry { .. }));
    }

    #[test]
    fn test_apex_tolerance() {
        let est = ConeEstimator::default();
        assert_eq!(est.clamp_apex(0.5, -0.01, 2.0).unwrap(), (0.5, 0.0));
        assert!(est.clamp_apex(0.5, -0.1, 2.0).is_err());
    }

    #[test]
    fn test_converge_rays() {
        let target = Vector3::new(0.3, 0.2, 1.1);
        let rays: Vec<(Vector3<f64>, Vector3<f64>)> = [Vector3::new(4.0, 0.0, 1.0), Vector3::new(0.0, 4.0, 1.5)]
            .into_iter()
            .map(|o| (o, target - o))
            .collect();
        let (p, residual) = converge_rays(&rays).unwrap();
        assert_relative_eq!(p, target, epsilon = 1e-9);
        assert!(residual < 1e-9);
    }
}
