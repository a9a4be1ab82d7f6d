//! All-lights-on reference photographs.
//!
//! Photographs are plain `image` grayscale buffers; this module only adds the
//! size check applied to raw buffers handed over by the capture step.

use image::GrayImage;

use crate::error::InputError;

/// Wrap a row-major 8-bit buffer as a photograph.
///
/// The buffer length must equal `width * height` exactly.
pub fn gray_image(width: u32, height: u32, data: Vec<u8>) -> Result<GrayImage, InputError> {
    let expected = width as usize * height as usize;
    let actual = data.len();
    if actual != expected {
        return Err(InputError::ImageSize { expected, actual });
    }
    GrayImage::from_raw(width, height, data).ok_or(InputError::ImageSize { expected, actual })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_mismatch() {
        let err = gray_image(4, 4, vec![0; 10]).unwrap_err();
        assert_eq!(err, InputError::ImageSize { expected: 16, actual: 10 });
        assert!(gray_image(4, 4, vec![0; 20]).is_err());
    }

    #[test]
    fn test_row_major_layout() {
        let img = gray_image(3, 2, (0..6).collect()).unwrap();
        assert_eq!(img.get_pixel(2, 1)[0], 5);
        assert_eq!(img.get_pixel(0, 1)[0], 3);
        assert!(img.get_pixel_checked(3, 0).is_none());
    }
}
