//! Common record types for the capture environment.

use serde::{Deserialize, Serialize};

use crate::error::InputError;

/// Identifier of one capture position.
///
/// Ordering is meaningful: ties between equally good views are broken by
/// ascending `CameraId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CameraId(pub u32);

impl CameraId {
    /// Returns the raw index.
    pub fn index(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for CameraId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cam{}", self.0)
    }
}

/// Largest brightness value a detection may report (8-bit sensor scale).
pub const MAX_BRIGHTNESS: f64 = 255.0;

/// One blob extracted from a single-LED photograph.
///
/// Produced by the external image-processing step and immutable afterwards.
/// Pixel coordinates use the image convention: origin top-left, +x right,
/// +y down.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Camera that took the photograph
    pub camera_id: CameraId,

    /// Sequence position of the lit LED
    pub led_index: usize,

    /// Blob centroid, x (pixels)
    pub pixel_x: f64,

    /// Blob centroid, y (pixels)
    pub pixel_y: f64,

    /// Peak brightness on the 0-255 scale
    pub brightness: f64,

    /// Blob area in square pixels
    pub blob_area: f64,
}

impl Detection {
    /// Create a validated detection.
    ///
    /// Rejects non-finite coordinates, brightness outside `[0, 255]` and
    /// negative blob areas.
    pub fn new(
        camera_id: CameraId,
        led_index: usize,
        pixel_x: f64,
        pixel_y: f64,
        brightness: f64,
        blob_area: f64,
    ) -> Result<Self, InputError> {
        let pixel_x = InputError::finite("pixel_x", pixel_x)?;
        let pixel_y = InputError::finite("pixel_y", pixel_y)?;
        let brightness = InputError::in_range("brightness", brightness, 0.0, MAX_BRIGHTNESS)?;
        let blob_area = InputError::finite("blob_area", blob_area)?;
        if blob_area < 0.0 {
            return Err(InputError::NegativeArea(blob_area));
        }

        Ok(Self {
            camera_id,
            led_index,
            pixel_x,
            pixel_y,
            brightness,
            blob_area,
        })
    }

    /// Pixel centroid as `[x, y]`.
    #[inline]
    pub fn pixel(&self) -> [f64; 2] {
        [self.pixel_x, self.pixel_y]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_detection() {
        let d = Detection::new(CameraId(1), 42, 320.0, 240.0, 200.0, 25.0).unwrap();
        assert_eq!(d.led_index, 42);
        assert_eq!(d.camera_id, CameraId(1));
    }

    #[test]
    fn test_rejects_negative_area() {
        let err = Detection::new(CameraId(0), 0, 1.0, 1.0, 100.0, -3.0).unwrap_err();
        assert_eq!(err, InputError::NegativeArea(-3.0));
    }

    #[test]
    fn test_rejects_bad_brightness_and_nan() {
        assert!(Detection::new(CameraId(0), 0, 1.0, 1.0, 300.0, 3.0).is_err());
        assert!(Detection::new(CameraId(0), 0, f64::NAN, 1.0, 100.0, 3.0).is_err());
    }

    #[test]
    fn test_camera_id_ordering() {
        let mut ids = vec![CameraId(3), CameraId(1), CameraId(2)];
        ids.sort();
        assert_eq!(ids, vec![CameraId(1), CameraId(2), CameraId(3)]);
        assert_eq!(CameraId(7).to_string(), "cam7");
    }
}
