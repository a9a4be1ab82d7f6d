//! Camera pose and pinhole intrinsics.
//!
//! A `Camera` is fixed at calibration time and never mutated during a
//! reconstruction. It maps between pixel coordinates and world rays.
//!
//! # Coordinate conventions
//!
//! - **World**: right-handed, meters, +Z up. The tree stands on the Z = 0 plane.
//! - **Pixel**: origin at the top-left corner, +X right, +Y down.
//!
//! ```text
//! pixel → subtract principal point → divide by f → camera ray → rotate into world
//! ```

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::InputError;
use crate::types::CameraId;

/// Horizontal field of view assumed when calibration does not provide one.
pub const DEFAULT_FOV_DEGREES: f64 = 60.0;

/// External calibration record for one capture position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraCalibration {
    pub camera_id: CameraId,

    /// Optical center in world coordinates [x, y, z] (meters)
    pub position: [f64; 3],

    /// World point the optical axis passes through
    pub look_at: [f64; 3],

    /// Horizontal field of view (degrees)
    #[serde(default = "default_fov")]
    pub fov_degrees: f64,

    /// Image width in pixels
    pub image_width: u32,

    /// Image height in pixels
    pub image_height: u32,
}

fn default_fov() -> f64 {
    DEFAULT_FOV_DEGREES
}

/// Calibrated pinhole camera with a precomputed world-frame basis.
#[derive(Debug, Clone)]
pub struct Camera {
    calibration: CameraCalibration,

    position: Vector3<f64>,

    /// Unit optical axis
    forward: Vector3<f64>,

    /// Unit image +X direction in world
    right: Vector3<f64>,

    /// Unit image -Y direction in world
    up: Vector3<f64>,

    /// Focal length in pixels: `f = (width/2) / tan(fov/2)`
    focal_length_px: f64,
}

impl Camera {
    /// Build a camera from its calibration record.
    ///
    /// Fails when the field of view is outside (0, 180) degrees, the image is
    /// empty, or the optical axis is vertical (no unique image orientation).
    pub fn from_calibration(calibration: CameraCalibration) -> Result<Self, InputError> {
        InputError::in_range("fov_degrees", calibration.fov_degrees, 1e-3, 179.0)?;
        if calibration.image_width == 0 || calibration.image_height == 0 {
            return Err(InputError::DegeneratePose(format!(
                "{} has empty image {}x{}",
                calibration.camera_id, calibration.image_width, calibration.image_height
            )));
        }
        for (field, v) in [("position", calibration.position), ("look_at", calibration.look_at)] {
            for c in v {
                InputError::finite(field, c)?;
            }
        }

        let position = Vector3::from(calibration.position);
        let target = Vector3::from(calibration.look_at);
        let forward = (target - position)
            .try_normalize(1e-12)
            .ok_or_else(|| InputError::DegeneratePose(format!("{} looks at itself", calibration.camera_id)))?;

        let world_up = Vector3::z();
        let right = forward
            .cross(&world_up)
            .try_normalize(1e-9)
            .ok_or_else(|| InputError::DegeneratePose(format!("{} optical axis is vertical", calibration.camera_id)))?;
        let up = right.cross(&forward);

        let half_fov = calibration.fov_degrees.to_radians() / 2.0;
        let focal_length_px = (calibration.image_width as f64 / 2.0) / half_fov.tan();

        Ok(Self {
            calibration,
            position,
            forward,
            right,
            up,
            focal_length_px,
        })
    }

    /// Convenience constructor for a camera looking at `look_at`.
    pub fn looking_at(
        camera_id: CameraId,
        position: Vector3<f64>,
        look_at: Vector3<f64>,
        fov_degrees: f64,
        image_width: u32,
        image_height: u32,
    ) -> Result<Self, InputError> {
        Self::from_calibration(CameraCalibration {
            camera_id,
            position: position.into(),
            look_at: look_at.into(),
            fov_degrees,
            image_width,
            image_height,
        })
    }

    pub fn id(&self) -> CameraId {
        self.calibration.camera_id
    }

    pub fn calibration(&self) -> &CameraCalibration {
        &self.calibration
    }

    pub fn position(&self) -> Vector3<f64> {
        self.position
    }

    pub fn forward(&self) -> Vector3<f64> {
        self.forward
    }

    /// Unit world direction of the image +X axis.
    pub fn right(&self) -> Vector3<f64> {
        self.right
    }

    pub fn fov_degrees(&self) -> f64 {
        self.calibration.fov_degrees
    }

    pub fn focal_length_px(&self) -> f64 {
        self.focal_length_px
    }

    pub fn image_size(&self) -> (u32, u32) {
        (self.calibration.image_width, self.calibration.image_height)
    }

    /// Optical center in pixel coordinates.
    pub fn image_center(&self) -> [f64; 2] {
        [
            self.calibration.image_width as f64 / 2.0,
            self.calibration.image_height as f64 / 2.0,
        ]
    }

    /// Distance from the optical center to the farthest image corner (pixels).
    pub fn max_radial_distance(&self) -> f64 {
        let [cx, cy] = self.image_center();
        (cx * cx + cy * cy).sqrt()
    }

    /// Unit world-space direction of the ray through a pixel.
    pub fn pixel_ray(&self, pixel_x: f64, pixel_y: f64) -> Vector3<f64> {
        let [cx, cy] = self.image_center();
        let xn = (pixel_x - cx) / self.focal_length_px;
        let yn = (pixel_y - cy) / self.focal_length_px;
        (self.forward + self.right * xn - self.up * yn).normalize()
    }

    /// Project a world point into pixel coordinates.
    ///
    /// Returns `None` for points at or behind the camera plane. The result may
    /// fall outside the image bounds; use [`Camera::contains_pixel`] to check.
    pub fn project(&self, point: &Vector3<f64>) -> Option<[f64; 2]> {
        let v = point - self.position;
        let depth = v.dot(&self.forward);
        if depth <= 1e-9 {
            return None;
        }
        let [cx, cy] = self.image_center();
        Some([
            cx + self.focal_length_px * v.dot(&self.right) / depth,
            cy - self.focal_length_px * v.dot(&self.up) / depth,
        ])
    }

    /// Whether a pixel lies inside the image.
    pub fn contains_pixel(&self, pixel: [f64; 2]) -> bool {
        let (w, h) = self.image_size();
        pixel[0] >= 0.0 && pixel[1] >= 0.0 && pixel[0] < w as f64 && pixel[1] < h as f64
    }

    /// Size of one pixel, in meters, on a fronto-parallel plane at `depth`.
    pub fn meters_per_pixel(&self, depth: f64) -> f64 {
        depth / self.focal_length_px
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn front_camera() -> Camera {
        Camera::looking_at(
            CameraId(0),
            Vector3::new(0.0, -4.0, 1.0),
            Vector3::new(0.0, 0.0, 1.0),
            60.0,
            640,
            480,
        )
        .unwrap()
    }

    #[test]
    fn test_center_pixel_ray_is_optical_axis() {
        let cam = front_camera();
        let ray = cam.pixel_ray(320.0, 240.0);
        assert_relative_eq!(ray, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_project_inverts_pixel_ray() {
        let cam = front_camera();
        let point = Vector3::new(0.3, 0.5, 1.4);
        let pixel = cam.project(&point).unwrap();
        let ray = cam.pixel_ray(pixel[0], pixel[1]);
        let expected = (point - cam.position()).normalize();
        assert_relative_eq!(ray, expected, epsilon = 1e-9);
    }

    #[test]
    fn test_image_axes() {
        let cam = front_camera();
        // World +X is image right, world +Z is image up (smaller y)
        let p = cam.project(&Vector3::new(0.5, 0.0, 1.5)).unwrap();
        assert!(p[0] > 320.0);
        assert!(p[1] < 240.0);
    }

    #[test]
    fn test_point_behind_camera() {
        let cam = front_camera();
        assert!(cam.project(&Vector3::new(0.0, -6.0, 1.0)).is_none());
    }

    #[test]
    fn test_vertical_axis_rejected() {
        let err = Camera::looking_at(
            CameraId(1),
            Vector3::new(0.0, 0.0, 5.0),
            Vector3::new(0.0, 0.0, 0.0),
            60.0,
            640,
            480,
        );
        assert!(matches!(err, Err(InputError::DegeneratePose(_))));
    }

    #[test]
    fn test_max_radial_distance() {
        let cam = front_camera();
        assert_relative_eq!(cam.max_radial_distance(), 400.0, epsilon = 1e-12);
    }
}
