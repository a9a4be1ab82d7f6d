//! Detection Confidence Model
//!
//! Scores a single detection from its own pixel measurements and the image
//! geometry. Pure functions only; no detection set or cone is consulted.
//!
//! # Angular confidence
//!
//! Angular measurement error grows as `1 / cos(viewing_angle)`. The viewing
//! angle is approximated linearly from the radial pixel distance:
//!
//! ```text
//! viewing_angle = (r_px / r_max) * (fov / 2)
//! angular_confidence = max(cos(viewing_angle), min_confidence)
//! ```
//!
//! The frame corner corresponds to half the field of view, never 90°.
//!
//! # Weight table
//!
//! | term        | weight | level        |
//! |-------------|--------|--------------|
//! | brightness  | 0.15   | detection    |
//! | size        | 0.10   | detection    |
//! | edge        | 0.10   | detection    |
//! | reflection  | 0.35   | observation  |
//! | angular     | 0.30   | observation  |
//!
//! `detection_confidence` renormalizes the three detection-level weights so it
//! spans [0, 1]; the reflection and angular terms enter at the observation
//! level (see [`crate::observation`]).

use ledmap_env::{Camera, Detection};
use serde::{Deserialize, Serialize};

/// Weight table for the confidence terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceWeights {
    pub brightness: f64,
    pub size: f64,
    pub edge: f64,
    pub reflection: f64,
    pub angular: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            brightness: 0.15,
            size: 0.10,
            edge: 0.10,
            reflection: 0.35,
            angular: 0.30,
        }
    }
}

impl ConfidenceWeights {
    /// Sum of the detection-level weights.
    pub fn detection_total(&self) -> f64 {
        self.brightness + self.size + self.edge
    }
}

/// Configuration for per-detection scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    /// Field of view used when the camera does not supply one (degrees)
    pub fov_degrees: f64,

    /// Floor applied to the angular confidence
    pub min_confidence: f64,

    /// Brightness at or above which a blob scores fully (0-255)
    pub good_brightness: f64,

    /// Blob area range (px²) that scores fully
    pub good_area: [f64; 2],

    /// Distance from the image border (px) below which a blob is penalized
    pub edge_margin_px: f64,

    pub weights: ConfidenceWeights,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            fov_degrees: 60.0,
            min_confidence: 0.2,
            good_brightness: 150.0,
            good_area: [10.0, 50.0],
            edge_margin_px: 20.0,
            weights: ConfidenceWeights::default(),
        }
    }
}

/// Per-detection sub-scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionScores {
    pub brightness: f64,
    pub size: f64,
    pub edge: f64,
    pub angular_confidence: f64,
    pub detection_confidence: f64,
}

/// Angular confidence of a pixel in an image of the given size.
pub fn angular_confidence(
    pixel: [f64; 2],
    image_size: (u32, u32),
    fov_degrees: f64,
    min_confidence: f64,
) -> f64 {
    let cx = image_size.0 as f64 / 2.0;
    let cy = image_size.1 as f64 / 2.0;
    let max_radial = (cx * cx + cy * cy).sqrt();
    if max_radial <= 0.0 {
        return min_confidence;
    }

    let dx = pixel[0] - cx;
    let dy = pixel[1] - cy;
    let radial = (dx * dx + dy * dy).sqrt();

    let viewing_angle = (radial / max_radial) * (fov_degrees / 2.0).to_radians();
    viewing_angle.cos().max(min_confidence)
}

/// Brightness sub-score: full above `good`, linear ramp below.
pub fn brightness_score(brightness: f64, good: f64) -> f64 {
    if good <= 0.0 || brightness >= good {
        1.0
    } else {
        (brightness / good).clamp(0.0, 1.0)
    }
}

/// Size sub-score: full inside `[min, max]`, ratio penalty outside.
///
/// Tiny blobs are likely noise; oversized blobs are likely glare or
/// reflections.
pub fn size_score(area: f64, good: [f64; 2]) -> f64 {
    let [min, max] = good;
    if area < min {
        if min <= 0.0 {
            1.0
        } else {
            (area / min).clamp(0.0, 1.0)
        }
    } else if area > max {
        (max / area).clamp(0.0, 1.0)
    } else {
        1.0
    }
}

/// Edge-validity sub-score: blobs touching the frame border are truncated.
pub fn edge_score(pixel: [f64; 2], image_size: (u32, u32), margin: f64) -> f64 {
    let (w, h) = (image_size.0 as f64, image_size.1 as f64);
    let inside = pixel[0] >= 0.0 && pixel[1] >= 0.0 && pixel[0] <= w && pixel[1] <= h;
    if !inside {
        return 0.0;
    }
    if margin <= 0.0 {
        return 1.0;
    }
    let border = pixel[0].min(pixel[1]).min(w - pixel[0]).min(h - pixel[1]);
    (border / margin).clamp(0.0, 1.0)
}

/// Score one detection against the camera that produced it.
pub fn score_detection(detection: &Detection, camera: &Camera, config: &ConfidenceConfig) -> DetectionScores {
    let pixel = detection.pixel();
    let image_size = camera.image_size();
    let fov = if camera.fov_degrees() > 0.0 {
        camera.fov_degrees()
    } else {
        config.fov_degrees
    };

    let brightness = brightness_score(detection.brightness, config.good_brightness);
    let size = size_score(detection.blob_area, config.good_area);
    let edge = edge_score(pixel, image_size, config.edge_margin_px);
    let angular = angular_confidence(pixel, image_size, fov, config.min_confidence);

    let w = &config.weights;
    let total = w.detection_total();
    let detection_confidence = if total > 0.0 {
        ((w.brightness * brightness + w.size * size + w.edge * edge) / total).clamp(0.0, 1.0)
    } else {
        1.0
    };

    DetectionScores {
        brightness,
        size,
        edge,
        angular_confidence: angular,
        detection_confidence,
    }
}
