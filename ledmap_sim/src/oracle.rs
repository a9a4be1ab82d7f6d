//! Ground truth oracle for synthetic captures.
//!
//! The Oracle maintains the "God's eye view" of a synthetic tree:
//! - True positions of every LED along a seeded spiral
//! - A ring of calibrated cameras around the trunk
//! - Detection generation (pixel noise, dropout, light leaking through the
//!   foliage, stray reflections)
//! - All-lights-on photographs for silhouette fitting

use std::collections::{BTreeMap, BTreeSet};

use ledmap_core::angle::normalize_degrees;
use ledmap_core::{intersect, CaptureSession, ConeOverride, ConeParameters, IntersectConfig, Ray};
use ledmap_env::{gray_image, Camera, CameraId, Detection, GrayImage};
use nalgebra::Vector3;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::SimError;

/// Gray level of the lit tree in an all-on photograph.
const FOREGROUND: u8 = 220;

/// Gray level of the unlit background.
const BACKGROUND: u8 = 12;

/// Column stride of the coarse silhouette scan before edge refinement.
const SCAN_STEP: u32 = 4;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Shape of the synthetic string of lights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeConfig {
    pub cone: ConeOverride,
    pub led_count: usize,

    /// Full turns of the string from the first LED to the last
    pub turns: f64,

    /// Normalized heights of the first and last LED
    pub height_range: [f64; 2],

    /// Azimuth of LED 0 (degrees)
    pub start_angle: f64,

    /// Placement irregularity along the string (degrees)
    pub angle_jitter_deg: f64,

    /// Placement irregularity along the axis (normalized height)
    pub height_jitter: f64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            cone: ConeOverride {
                center_x: 0.0,
                center_y: 0.0,
                r_bottom: 0.5,
                r_top: 0.1,
                height: 2.0,
            },
            led_count: 150,
            turns: 4.0,
            height_range: [0.03, 0.97],
            start_angle: 10.0,
            angle_jitter_deg: 1.0,
            height_jitter: 0.003,
        }
    }
}

/// Evenly spaced ring of cameras aimed at the trunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraRig {
    pub count: usize,

    /// Horizontal distance from the cone axis (m)
    pub distance: f64,

    /// Camera height above the floor (m)
    pub height: f64,

    /// Height of the point on the axis every camera looks at (m)
    pub aim_height: f64,

    pub fov_degrees: f64,
    pub image_width: u32,
    pub image_height: u32,
}

impl Default for CameraRig {
    fn default() -> Self {
        Self {
            count: 4,
            distance: 3.5,
            height: 1.0,
            aim_height: 1.0,
            fov_degrees: 60.0,
            image_width: 4000,
            image_height: 3000,
        }
    }
}

impl CameraRig {
    /// Azimuth of camera `k` around the axis (degrees).
    pub fn azimuth(&self, k: usize) -> f64 {
        360.0 * k as f64 / self.count.max(1) as f64
    }

    /// Build the calibrated cameras, ids `0..count`.
    pub fn build(&self, center: [f64; 2]) -> Result<Vec<Camera>, SimError> {
        (0..self.count)
            .map(|k| {
                let a = self.azimuth(k).to_radians();
                let position = Vector3::new(
                    center[0] + self.distance * a.cos(),
                    center[1] + self.distance * a.sin(),
                    self.height,
                );
                let camera = Camera::looking_at(
                    CameraId(k as u32),
                    position,
                    Vector3::new(center[0], center[1], self.aim_height),
                    self.fov_degrees,
                    self.image_width,
                    self.image_height,
                )?;
                Ok(camera)
            })
            .collect()
    }
}

/// Imperfections injected into the single-LED captures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureNoise {
    /// Blob centroid noise (pixels)
    pub pixel_std: f64,

    /// Facing cosine above which an LED is directly visible
    pub visibility_threshold: f64,

    /// Probability that a visible LED produces no blob
    pub dropout_probability: f64,

    /// Probability that a hidden LED glows through the foliage
    pub leak_probability: f64,

    /// Stray bright spots per camera
    pub reflection_spots: usize,

    /// Hidden LEDs whose capture lands on each spot
    pub reflection_members: usize,
}

impl Default for CaptureNoise {
    fn default() -> Self {
        Self {
            pixel_std: 0.3,
            visibility_threshold: 0.1,
            dropout_probability: 0.0,
            leak_probability: 0.0,
            reflection_spots: 0,
            reflection_members: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OracleConfig {
    pub tree: TreeConfig,
    pub rig: CameraRig,
    pub noise: CaptureNoise,
}

// ============================================================================
// GROUND TRUTH
// ============================================================================

/// A ground truth LED in the simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthLed {
    pub led_index: usize,
    pub position: Vector3<f64>,

    /// Normalized height
    pub height: f64,

    /// Azimuth (degrees)
    pub angle: f64,
}

/// Detections generated from ground truth, with bookkeeping of what was
/// injected.
#[derive(Debug, Clone, Default)]
pub struct SyntheticCapture {
    pub detections: Vec<Detection>,

    /// `(camera, led)` captures that landed on a stray reflection
    pub reflected: Vec<(CameraId, usize)>,

    /// Visible captures that produced no blob
    pub dropped: usize,

    /// Hidden captures that glowed through the foliage
    pub leaked: usize,
}

/// The Oracle - owns the true tree and generates captures of it.
pub struct Oracle {
    seed: u64,
    config: OracleConfig,

    /// RNG for capture noise; the tree itself is drawn once in `new`
    rng: ChaCha8Rng,

    cone: ConeParameters,
    cameras: Vec<Camera>,
    leds: Vec<GroundTruthLed>,
}

impl Oracle {
    /// Creates a new Oracle, drawing the LED layout from `seed`.
    pub fn new(seed: u64, config: OracleConfig) -> Result<Self, SimError> {
        let cone = ConeParameters::try_from(config.tree.cone)?;
        let cameras = config.rig.build(cone.center())?;
        if config.tree.led_count == 0 {
            return Err(SimError::Config("tree.led_count must be at least 1".into()));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let leds = spiral(&config.tree, &cone, &mut rng)?;

        Ok(Self {
            seed,
            config,
            rng,
            cone,
            cameras,
            leds,
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    /// True cone of the tree.
    pub fn cone(&self) -> &ConeParameters {
        &self.cone
    }

    pub fn cameras(&self) -> &[Camera] {
        &self.cameras
    }

    pub fn leds(&self) -> &[GroundTruthLed] {
        &self.leds
    }

    /// True positions keyed by LED index.
    pub fn truth(&self) -> BTreeMap<usize, Vector3<f64>> {
        self.leds.iter().map(|l| (l.led_index, l.position)).collect()
    }

    /// Generate one blob per visible (camera, LED) pair, plus injected
    /// leaks and reflections.
    pub fn capture(&mut self) -> Result<SyntheticCapture, SimError> {
        let noise = self.config.noise.clone();
        let pixel_noise = normal(noise.pixel_std)?;
        let spot_noise = normal(2.0)?;
        let mut out = SyntheticCapture::default();

        for (k, camera) in self.cameras.iter().enumerate() {
            let mut captured = BTreeSet::new();

            for led in &self.leds {
                let outward = self.cone.surface_normal(&led.position);
                let facing = outward.dot(&(camera.position() - led.position).normalize());
                let visible = facing > noise.visibility_threshold;

                let (brightness, area) = if visible {
                    if self.rng.gen::<f64>() < noise.dropout_probability {
                        out.dropped += 1;
                        continue;
                    }
                    ((90.0 + 160.0 * facing).min(255.0), 18.0 + 6.0 * facing)
                } else if self.rng.gen::<f64>() < noise.leak_probability {
                    out.leaked += 1;
                    (25.0, 4.0)
                } else {
                    continue;
                };

                let Some([px, py]) = camera.project(&led.position) else {
                    continue;
                };
                let pixel = [
                    px + pixel_noise.sample(&mut self.rng),
                    py + pixel_noise.sample(&mut self.rng),
                ];
                if !camera.contains_pixel(pixel) {
                    continue;
                }
                out.detections
                    .push(Detection::new(camera.id(), led.led_index, pixel[0], pixel[1], brightness, area)?);
                captured.insert(led.led_index);
            }

            // Stray reflections only ever replace captures of LEDs the camera cannot see
            for _ in 0..noise.reflection_spots {
                let h = self.rng.gen_range(0.2..0.8);
                let offset = self.rng.gen_range(-20.0..20.0);
                let ornament = self.cone.surface_point(h, self.config.rig.azimuth(k) + offset);
                let Some(spot) = camera.project(&ornament) else {
                    continue;
                };

                let hidden: Vec<usize> = self
                    .leds
                    .iter()
                    .map(|l| l.led_index)
                    .filter(|i| !captured.contains(i))
                    .collect();
                let members: Vec<usize> = hidden
                    .choose_multiple(&mut self.rng, noise.reflection_members)
                    .copied()
                    .collect();

                for led_index in members {
                    let pixel = [
                        spot[0] + spot_noise.sample(&mut self.rng),
                        spot[1] + spot_noise.sample(&mut self.rng),
                    ];
                    if !camera.contains_pixel(pixel) {
                        continue;
                    }
                    out.detections
                        .push(Detection::new(camera.id(), led_index, pixel[0], pixel[1], 240.0, 30.0)?);
                    out.reflected.push((camera.id(), led_index));
                    captured.insert(led_index);
                }
            }

            debug!("Camera {}: {} captures", camera.id(), captured.len());
        }

        Ok(out)
    }

    /// All-lights-on photograph of the tree from one camera.
    pub fn all_on_photo(&self, camera: &Camera) -> Result<GrayImage, SimError> {
        render_silhouette(camera, &self.cone)
    }

    /// Assemble a capture session.
    ///
    /// The session id is derived from the seed so exports are reproducible.
    pub fn session(
        &self,
        capture: &SyntheticCapture,
        cone_override: bool,
        photos: bool,
    ) -> Result<CaptureSession, SimError> {
        let mut builder = CaptureSession::builder(self.leds.len())
            .cameras(self.cameras.iter().cloned())
            .detections(capture.detections.iter().copied())
            .id(Uuid::from_u64_pair(self.seed, self.leds.len() as u64));

        if cone_override {
            builder = builder.cone_override(self.cone);
        }
        if photos {
            for camera in &self.cameras {
                builder = builder.all_on_photo(camera.id(), self.all_on_photo(camera)?);
            }
        }
        Ok(builder.build()?)
    }
}

fn normal(std: f64) -> Result<Normal<f64>, SimError> {
    Normal::new(0.0, std).map_err(|e| SimError::Config(format!("noise std {}: {}", std, e)))
}

/// Draw the LED layout: a spiral from bottom to top with small jitter.
fn spiral(tree: &TreeConfig, cone: &ConeParameters, rng: &mut ChaCha8Rng) -> Result<Vec<GroundTruthLed>, SimError> {
    let angle_noise = normal(tree.angle_jitter_deg)?;
    let height_noise = normal(tree.height_jitter)?;
    let [h0, h1] = tree.height_range;
    let n = tree.led_count;

    Ok((0..n)
        .map(|i| {
            let t = if n > 1 { i as f64 / (n - 1) as f64 } else { 0.5 };
            let height = (h0 + (h1 - h0) * t + height_noise.sample(rng)).clamp(0.0, 1.0);
            let angle =
                normalize_degrees(tree.start_angle + 360.0 * tree.turns * t + angle_noise.sample(rng));
            GroundTruthLed {
                led_index: i,
                position: cone.surface_point(height, angle),
                height,
                angle,
            }
        })
        .collect())
}

// ============================================================================
// RENDERING
// ============================================================================

/// Render the lit tree as a solid bright silhouette on a dark background.
///
/// Each image row cuts the frustum in a convex section, so the lit pixels of
/// a row form one interval: a coarse scan finds it and a bisection refines
/// both edges.
pub fn render_silhouette(camera: &Camera, cone: &ConeParameters) -> Result<GrayImage, SimError> {
    let (w, h) = camera.image_size();
    let mut data = vec![BACKGROUND; w as usize * h as usize];
    let config = IntersectConfig {
        epsilon: 1e-9,
        height_tolerance: 0.0,
    };
    let hits = |x: u32, y: u32| {
        Ray::new(camera.position(), camera.pixel_ray(x as f64 + 0.5, y as f64 + 0.5))
            .map(|ray| intersect(&ray, cone, &config).is_ok())
            .unwrap_or(false)
    };

    let ([x0, x1], [y0, y1]) = bounding_box(camera, cone);
    for y in y0..y1 {
        let mut span: Option<(u32, u32)> = None;
        let mut x = x0;
        while x < x1 {
            if hits(x, y) {
                span = Some(span.map_or((x, x), |(first, _)| (first, x)));
            }
            x += SCAN_STEP;
        }
        let Some((first, last)) = span else {
            continue;
        };

        let left = if first == x0 {
            x0
        } else {
            let (mut miss, mut hit) = (first - SCAN_STEP, first);
            while hit - miss > 1 {
                let mid = miss + (hit - miss) / 2;
                if hits(mid, y) {
                    hit = mid;
                } else {
                    miss = mid;
                }
            }
            hit
        };
        let right = {
            let (mut hit, mut miss) = (last, (last + SCAN_STEP).min(x1));
            while miss - hit > 1 {
                let mid = hit + (miss - hit) / 2;
                if hits(mid, y) {
                    hit = mid;
                } else {
                    miss = mid;
                }
            }
            hit
        };

        let row = y as usize * w as usize;
        data[row + left as usize..=row + right as usize].fill(FOREGROUND);
    }

    Ok(gray_image(w, h, data)?)
}

/// Pixel box `([x0, x1), [y0, y1))` enclosing the projected frustum.
fn bounding_box(camera: &Camera, cone: &ConeParameters) -> ([u32; 2], [u32; 2]) {
    let (w, h) = camera.image_size();
    let full = ([0, w], [0, h]);
    let [cx, cy] = cone.center();
    let r = cone.r_bottom();

    let mut min = [f64::INFINITY; 2];
    let mut max = [f64::NEG_INFINITY; 2];
    for z in [0.0, cone.height()] {
        for (dx, dy) in [(-r, -r), (-r, r), (r, -r), (r, r)] {
            let Some(p) = camera.project(&Vector3::new(cx + dx, cy + dy, z)) else {
                return full;
            };
            for i in 0..2 {
                min[i] = min[i].min(p[i]);
                max[i] = max[i].max(p[i]);
            }
        }
    }

    let clamp = |v: f64, hi: u32| v.clamp(0.0, hi as f64) as u32;
    (
        [clamp(min[0] - 4.0, w), clamp(max[0] + 5.0, w)],
        [clamp(min[1] - 4.0, h), clamp(max[1] + 5.0, h)],
    )
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> OracleConfig {
        OracleConfig {
            tree: TreeConfig {
                led_count: 40,
                ..TreeConfig::default()
            },
            rig: CameraRig {
                image_width: 640,
                image_height: 480,
                ..CameraRig::default()
            },
            noise: CaptureNoise::default(),
        }
    }

    #[test]
    fn test_same_seed_same_world() {
        let mut a = Oracle::new(7, small_config()).unwrap();
        let mut b = Oracle::new(7, small_config()).unwrap();
        assert_eq!(a.leds(), b.leds());
        assert_eq!(a.capture().unwrap().detections, b.capture().unwrap().detections);
    }

    #[test]
    fn test_leds_lie_on_surface() {
        let oracle = Oracle::new(3, small_config()).unwrap();
        for led in oracle.leds() {
            let local = oracle.cone().to_cone_space(&led.position);
            assert!(oracle.cone().radius_deviation(local.height, local.radius) < 1e-9);
        }
    }

    #[test]
    fn test_only_facing_leds_detected() {
        let mut oracle = Oracle::new(11, small_config()).unwrap();
        let capture = oracle.capture().unwrap();
        assert!(!capture.detections.is_empty());
        for d in &capture.detections {
            let camera = &oracle.cameras()[d.camera_id.index() as usize];
            let p = oracle.leds()[d.led_index].position;
            let facing = oracle.cone().surface_normal(&p).dot(&(camera.position() - p).normalize());
            assert!(facing > 0.1);
        }
    }

    #[test]
    fn test_reflections_only_hit_hidden_leds() {
        let mut config = small_config();
        config.noise.reflection_spots = 1;
        config.noise.reflection_members = 6;
        let mut oracle = Oracle::new(5, config).unwrap();
        let capture = oracle.capture().unwrap();
        assert!(!capture.reflected.is_empty());

        let mut seen = BTreeSet::new();
        for d in &capture.detections {
            assert!(seen.insert((d.camera_id, d.led_index)), "duplicate capture");
        }
    }

    #[test]
    fn test_silhouette_covers_tree() {
        let oracle = Oracle::new(1, small_config()).unwrap();
        let camera = &oracle.cameras()[0];
        let photo = oracle.all_on_photo(camera).unwrap();

        let axis = camera.project(&Vector3::new(0.0, 0.0, 1.0)).unwrap();
        assert_eq!(photo.get_pixel(axis[0] as u32, axis[1] as u32)[0], FOREGROUND);
        assert_eq!(photo.get_pixel(0, 0)[0], BACKGROUND);

        let lit = photo.as_raw().iter().filter(|&&v| v == FOREGROUND).count();
        assert!(lit > 1000 && lit < 640 * 480 / 2, "lit {}", lit);
    }
}
