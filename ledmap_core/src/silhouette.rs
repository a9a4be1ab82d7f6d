//! Silhouette extraction from an all-lights-on photograph.
//!
//! ```text
//! gray image → threshold → close (join lights) → open (drop specks)
//!            → largest 8-connected component → banded width profile
//! ```

use image::{GrayImage, Luma};
use imageproc::contrast::{threshold, ThresholdType};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};
use imageproc::region_labelling::{connected_components, Connectivity};

/// Foreground mask of a photograph: 255 where a pixel is brighter than
/// `level`, 0 elsewhere.
pub fn binarize(photo: &GrayImage, level: u8) -> GrayImage {
    threshold(photo, level, ThresholdType::Binary)
}

/// Close (bridge neighbouring lights) then open (drop specks) with a square
/// window of the given radius.
pub fn clean_mask(mask: &GrayImage, radius: u8) -> GrayImage {
    if radius == 0 {
        return mask.clone();
    }
    open(&close(mask, Norm::LInf, radius), Norm::LInf, radius)
}

/// Number of foreground pixels in a mask.
pub fn foreground_count(mask: &GrayImage) -> usize {
    mask.pixels().filter(|p| p[0] > 0).count()
}

/// Per-row horizontal extent of a connected component.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub area: usize,

    /// First row containing foreground
    pub top_row: u32,

    /// Last row containing foreground
    pub bottom_row: u32,

    /// `(min_x, max_x)` for each row from `top_row` to `bottom_row`
    pub row_extents: Vec<Option<(u32, u32)>>,
}

/// Largest 8-connected foreground component, or `None` for an empty mask.
///
/// Equal areas go to the component found first in row-major order.
pub fn largest_component(mask: &GrayImage) -> Option<Component> {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));

    let mut areas: Vec<usize> = Vec::new();
    for p in labels.pixels() {
        let label = p[0] as usize;
        if label == 0 {
            continue;
        }
        if areas.len() <= label {
            areas.resize(label + 1, 0);
        }
        areas[label] += 1;
    }
    let (label, area) = areas
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, a)| a > 0)
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))?;

    let mut top = u32::MAX;
    let mut bottom = 0u32;
    let mut extents: Vec<Option<(u32, u32)>> = vec![None; mask.height() as usize];
    for (x, y, p) in labels.enumerate_pixels() {
        if p[0] as usize != label {
            continue;
        }
        top = top.min(y);
        bottom = bottom.max(y);
        let e = &mut extents[y as usize];
        *e = Some(match *e {
            Some((lo, hi)) => (lo.min(x), hi.max(x)),
            None => (x, x),
        });
    }

    Some(Component {
        area,
        top_row: top,
        bottom_row: bottom,
        row_extents: extents[top as usize..=bottom as usize].to_vec(),
    })
}

/// One horizontal slice of the silhouette.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileBand {
    /// Representative row (pixels)
    pub row: f64,

    /// Mean left edge of the band's rows
    pub left: f64,

    /// Mean right edge (exclusive) of the band's rows
    pub right: f64,
}

impl ProfileBand {
    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn center(&self) -> f64 {
        (self.left + self.right) / 2.0
    }
}

/// Slice a component into `bands` equal-height bands (top to bottom).
///
/// Edges are averaged over the band's rows so the width belongs to the
/// band's middle row. Bands with no foreground rows are skipped.
pub fn width_profile(component: &Component, bands: usize) -> Vec<ProfileBand> {
    let rows = component.row_extents.len();
    if rows == 0 || bands == 0 {
        return Vec::new();
    }
    let bands = bands.min(rows);
    let mut profile = Vec::with_capacity(bands);

    for b in 0..bands {
        let start = b * rows / bands;
        let end = ((b + 1) * rows / bands).max(start + 1);
        let mut count = 0usize;
        let mut left_sum = 0.0;
        let mut right_sum = 0.0;
        let mut row_sum = 0.0;
        for (offset, extent) in component.row_extents[start..end].iter().enumerate() {
            if let Some((lo, hi)) = extent {
                count += 1;
                left_sum += *lo as f64;
                right_sum += *hi as f64 + 1.0;
                row_sum += (start + offset) as f64;
            }
        }
        if count == 0 {
            continue;
        }
        let n = count as f64;
        profile.push(ProfileBand {
            row: component.top_row as f64 + row_sum / n,
            left: left_sum / n,
            right: right_sum / n,
        });
    }
    profile
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(on: bool) -> Luma<u8> {
        Luma([if on { 220 } else { 0 }])
    }

    /// Upright triangle with its apex at row 10 and base at row 89.
    fn triangle_image() -> GrayImage {
        GrayImage::from_fn(100, 100, |x, y| {
            if y < 10 || y >= 90 {
                return lit(false);
            }
            let half = (y - 10) as f64 / 2.0;
            lit(((x as f64) - 50.0).abs() <= half)
        })
    }

    #[test]
    fn test_largest_component_picks_triangle() {
        let mut img = triangle_image();
        // A small separate blob
        img.put_pixel(5, 5, Luma([255]));
        let comp = largest_component(&binarize(&img, 128)).unwrap();
        assert_eq!(comp.top_row, 10);
        assert_eq!(comp.bottom_row, 89);
    }

    #[test]
    fn test_width_profile_widens_downward() {
        let comp = largest_component(&binarize(&triangle_image(), 128)).unwrap();
        let profile = width_profile(&comp, 8);
        assert_eq!(profile.len(), 8);
        for pair in profile.windows(2) {
            assert!(pair[1].width() > pair[0].width());
            assert!((pair[1].center() - 50.5).abs() < 1.0);
        }
    }

    #[test]
    fn test_cleaning_removes_specks_and_bridges_gaps() {
        let speck = GrayImage::from_fn(20, 20, |x, y| lit(x == 10 && y == 10));
        assert_eq!(foreground_count(&clean_mask(&binarize(&speck, 128), 1)), 0);

        // 3x3 lights one pixel apart along a row
        let dotted = GrayImage::from_fn(20, 5, |x, y| lit((1..=3).contains(&y) && x % 4 != 3));
        let mask = binarize(&dotted, 128);
        let single = largest_component(&mask).unwrap();
        assert_eq!(single.area, 9);
        let joined = largest_component(&clean_mask(&mask, 1)).unwrap();
        assert!(joined.area > 4 * single.area);
    }

    #[test]
    fn test_empty_mask() {
        let dark = GrayImage::from_fn(10, 10, |_, _| lit(false));
        assert!(largest_component(&binarize(&dark, 128)).is_none());
    }
}
