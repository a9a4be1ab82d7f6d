//! LED Mapper Capture Environment
//!
//! Records handed to the reconstruction engine by the (external) capture and
//! image-processing steps:
//! - **Cameras**: calibrated pose + pinhole intrinsics, one per capture position
//! - **Detections**: one blob per (camera, LED) photograph
//! - **Photographs**: the optional all-lights-on reference shot per camera
//!
//! Every record is validated at construction and immutable afterwards.
//!
//! # Example
//!
//! ```
//! use ledmap_env::{Camera, CameraId, Detection};
//! use nalgebra::Vector3;
//!
//! let cam = Camera::looking_at(
//!     CameraId(0),
//!     Vector3::new(0.0, -3.0, 1.0),
//!     Vector3::new(0.0, 0.0, 1.0),
//!     60.0,
//!     1280,
//!     720,
//! )?;
//! let det = Detection::new(cam.id(), 17, 640.0, 360.0, 210.0, 24.0)?;
//! let ray = cam.pixel_ray(det.pixel_x, det.pixel_y);
//! assert!((ray.norm() - 1.0).abs() < 1e-12);
//! # Ok::<(), ledmap_env::InputError>(())
//! ```

mod camera;
mod error;
mod photo;
mod types;

pub use camera::{Camera, CameraCalibration, DEFAULT_FOV_DEGREES};
pub use error::InputError;
pub use image::GrayImage;
pub use photo::gray_image;
pub use types::{CameraId, Detection, MAX_BRIGHTNESS};
