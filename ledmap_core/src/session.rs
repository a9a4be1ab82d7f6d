//! Capture Session - the immutable context handed to every stage.
//!
//! Collects cameras, detections, the LED count and optional cone sources once,
//! validates them, and is read-only afterwards. Re-running with different
//! inputs means building a new session.
//!
//! A bad record never sinks the session: it is dropped, logged, and kept as a
//! [`Diagnostic`] on the session. Assembly only fails when nothing usable is
//! left.

use std::collections::{BTreeMap, HashSet};

use ledmap_env::{Camera, CameraCalibration, CameraId, Detection, GrayImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::diagnostics::Diagnostic;
use crate::ledmap_cone::ConeParameters;

/// Errors raised while assembling a session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("Session has no usable cameras ({rejected} rejected)")]
    NoCameras { rejected: usize },

    #[error("Session has zero LEDs")]
    NoLeds,

    #[error("Every one of {rejected} detections was rejected")]
    NoUsableDetections { rejected: usize },
}

/// Serialized capture records: calibrations, detections and an optional cone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureInput {
    pub led_count: usize,
    pub cameras: Vec<CameraCalibration>,
    pub detections: Vec<Detection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cone: Option<ConeParameters>,
}

impl CaptureInput {
    /// Re-validate every record and assemble a session.
    ///
    /// Records that fail validation are dropped individually.
    pub fn into_session(self) -> Result<CaptureSession, SessionError> {
        let mut builder = CaptureSession::builder(self.led_count);

        for calibration in self.cameras {
            let camera_id = calibration.camera_id;
            match Camera::from_calibration(calibration) {
                Ok(camera) => builder = builder.camera(camera),
                Err(e) => {
                    builder = builder.reject(Diagnostic::RejectedCamera {
                        camera_id,
                        reason: e.to_string(),
                    })
                }
            }
        }
        for d in self.detections {
            match Detection::new(d.camera_id, d.led_index, d.pixel_x, d.pixel_y, d.brightness, d.blob_area) {
                Ok(detection) => builder = builder.detection(detection),
                Err(e) => {
                    builder = builder.reject(Diagnostic::RejectedDetection {
                        camera_id: d.camera_id,
                        led_index: d.led_index,
                        reason: e.to_string(),
                    })
                }
            }
        }

        if let Some(cone) = self.cone {
            builder = builder.cone_override(cone);
        }
        builder.build()
    }
}

/// Immutable reconstruction context.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    id: Uuid,
    led_count: usize,
    cameras: BTreeMap<CameraId, Camera>,
    detections: Vec<Detection>,
    cone_override: Option<ConeParameters>,
    all_on_photos: BTreeMap<CameraId, GrayImage>,
    rejected: Vec<Diagnostic>,
}

impl CaptureSession {
    /// Start assembling a session for `led_count` LEDs.
    pub fn builder(led_count: usize) -> CaptureSessionBuilder {
        CaptureSessionBuilder {
            led_count,
            cameras: Vec::new(),
            detections: Vec::new(),
            cone_override: None,
            all_on_photos: Vec::new(),
            id: None,
            rejected: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Number of LEDs `N`; valid indices are `0..N`.
    pub fn led_count(&self) -> usize {
        self.led_count
    }

    pub fn cameras(&self) -> &BTreeMap<CameraId, Camera> {
        &self.cameras
    }

    pub fn camera(&self, id: CameraId) -> Option<&Camera> {
        self.cameras.get(&id)
    }

    /// Detections sorted by `(led_index, camera_id)`.
    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn cone_override(&self) -> Option<&ConeParameters> {
        self.cone_override.as_ref()
    }

    pub fn all_on_photos(&self) -> &BTreeMap<CameraId, GrayImage> {
        &self.all_on_photos
    }

    /// Records dropped during assembly, in the order they were seen.
    pub fn rejected(&self) -> &[Diagnostic] {
        &self.rejected
    }

    /// Detections grouped per LED, each group ordered by camera id.
    pub fn detections_by_led(&self) -> BTreeMap<usize, Vec<&Detection>> {
        let mut map: BTreeMap<usize, Vec<&Detection>> = BTreeMap::new();
        for d in &self.detections {
            map.entry(d.led_index).or_default().push(d);
        }
        map
    }

    /// Detections grouped per camera, each group ordered by LED index.
    pub fn detections_by_camera(&self) -> BTreeMap<CameraId, Vec<&Detection>> {
        let mut map: BTreeMap<CameraId, Vec<&Detection>> =
            self.cameras.keys().map(|&id| (id, Vec::new())).collect();
        for d in &self.detections {
            map.entry(d.camera_id).or_default().push(d);
        }
        map
    }
}

/// Builder that validates a [`CaptureSession`].
#[derive(Debug, Clone)]
pub struct CaptureSessionBuilder {
    led_count: usize,
    cameras: Vec<Camera>,
    detections: Vec<Detection>,
    cone_override: Option<ConeParameters>,
    all_on_photos: Vec<(CameraId, GrayImage)>,
    id: Option<Uuid>,
    rejected: Vec<Diagnostic>,
}

impl CaptureSessionBuilder {
    pub fn camera(mut self, camera: Camera) -> Self {
        self.cameras.push(camera);
        self
    }

    pub fn cameras(mut self, cameras: impl IntoIterator<Item = Camera>) -> Self {
        self.cameras.extend(cameras);
        self
    }

    pub fn detection(mut self, detection: Detection) -> Self {
        self.detections.push(detection);
        self
    }

    pub fn detections(mut self, detections: impl IntoIterator<Item = Detection>) -> Self {
        self.detections.extend(detections);
        self
    }

    /// Manually supplied cone; skips estimation entirely.
    pub fn cone_override(mut self, cone: ConeParameters) -> Self {
        self.cone_override = Some(cone);
        self
    }

    /// All-lights-on photograph for silhouette-based cone estimation.
    pub fn all_on_photo(mut self, camera: CameraId, photo: GrayImage) -> Self {
        self.all_on_photos.push((camera, photo));
        self
    }

    /// Fix the session id (deterministic exports); random v4 otherwise.
    pub fn id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    /// Record a raw record that failed validation before reaching the builder.
    pub fn reject(mut self, diagnostic: Diagnostic) -> Self {
        self.rejected.push(diagnostic);
        self
    }

    pub fn build(self) -> Result<CaptureSession, SessionError> {
        if self.led_count == 0 {
            return Err(SessionError::NoLeds);
        }
        let mut rejected = self.rejected;

        let mut cameras = BTreeMap::new();
        for cam in self.cameras {
            let id = cam.id();
            if cameras.contains_key(&id) {
                rejected.push(Diagnostic::RejectedCamera {
                    camera_id: id,
                    reason: "registered twice; first registration kept".into(),
                });
                continue;
            }
            cameras.insert(id, cam);
        }
        if cameras.is_empty() {
            let rejected = rejected
                .iter()
                .filter(|d| matches!(d, Diagnostic::RejectedCamera { .. }))
                .count();
            return Err(SessionError::NoCameras { rejected });
        }

        let supplied = self.detections.len()
            + rejected
                .iter()
                .filter(|d| matches!(d, Diagnostic::RejectedDetection { .. }))
                .count();
        let mut seen = HashSet::new();
        let mut detections = Vec::with_capacity(self.detections.len());
        for d in self.detections {
            let reason = if !cameras.contains_key(&d.camera_id) {
                Some("unknown camera".to_string())
            } else if d.led_index >= self.led_count {
                Some(format!("LED index out of range (N = {})", self.led_count))
            } else if !seen.insert((d.camera_id, d.led_index)) {
                Some("duplicate detection; first one kept".to_string())
            } else {
                None
            };
            match reason {
                Some(reason) => rejected.push(Diagnostic::RejectedDetection {
                    camera_id: d.camera_id,
                    led_index: d.led_index,
                    reason,
                }),
                None => detections.push(d),
            }
        }
        if supplied > 0 && detections.is_empty() {
            return Err(SessionError::NoUsableDetections { rejected: supplied });
        }
        detections.sort_by_key(|d| (d.led_index, d.camera_id));

        let mut all_on_photos = BTreeMap::new();
        for (id, photo) in self.all_on_photos {
            if cameras.contains_key(&id) {
                all_on_photos.insert(id, photo);
            } else {
                rejected.push(Diagnostic::RejectedPhoto {
                    camera_id: id,
                    reason: "unknown camera".into(),
                });
            }
        }

        for diag in &rejected {
            warn!("{}", diag);
        }

        Ok(CaptureSession {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            led_count: self.led_count,
            cameras,
            detections,
            cone_override: self.cone_override,
            all_on_photos,
            rejected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn camera(id: u32) -> Camera {
        Camera::looking_at(
            CameraId(id),
            Vector3::new(3.0 * (id as f64).cos(), 3.0 * (id as f64).sin(), 1.0),
            Vector3::new(0.0, 0.0, 1.0),
            60.0,
            640,
            480,
        )
        .unwrap()
    }

    fn det(cam: u32, led: usize) -> Detection {
        Detection::new(CameraId(cam), led, 100.0, 100.0, 200.0, 20.0).unwrap()
    }

    #[test]
    fn test_build_sorts_and_groups() {
        let session = CaptureSession::builder(10)
            .cameras([camera(0), camera(1)])
            .detections([det(1, 5), det(0, 5), det(0, 2)])
            .build()
            .unwrap();

        let leds: Vec<(usize, CameraId)> = session.detections().iter().map(|d| (d.led_index, d.camera_id)).collect();
        assert_eq!(leds, vec![(2, CameraId(0)), (5, CameraId(0)), (5, CameraId(1))]);
        assert_eq!(session.detections_by_led()[&5].len(), 2);
        assert_eq!(session.detections_by_camera()[&CameraId(1)].len(), 1);
        assert!(session.rejected().is_empty());
    }

    #[test]
    fn test_fails_only_without_usable_records() {
        assert_eq!(CaptureSession::builder(10).build().unwrap_err(), SessionError::NoCameras { rejected: 0 });
        assert_eq!(CaptureSession::builder(0).camera(camera(0)).build().unwrap_err(), SessionError::NoLeds);
        assert_eq!(
            CaptureSession::builder(10)
                .camera(camera(0))
                .detections([det(3, 1), det(0, 10)])
                .build()
                .unwrap_err(),
            SessionError::NoUsableDetections { rejected: 2 }
        );
    }

    #[test]
    fn test_bad_records_are_dropped_individually() {
        let session = CaptureSession::builder(10)
            .cameras([camera(0), camera(0), camera(1)])
            .detections([det(0, 1), det(0, 1), det(3, 2), det(1, 10), det(1, 4)])
            .all_on_photo(CameraId(7), GrayImage::new(4, 4))
            .build()
            .unwrap();

        assert_eq!(session.cameras().len(), 2);
        let kept: Vec<(usize, CameraId)> = session.detections().iter().map(|d| (d.led_index, d.camera_id)).collect();
        assert_eq!(kept, vec![(1, CameraId(0)), (4, CameraId(1))]);
        assert!(session.all_on_photos().is_empty());

        let rejected = session.rejected();
        assert_eq!(rejected.len(), 5);
        assert!(matches!(rejected[0], Diagnostic::RejectedCamera { camera_id: CameraId(0), .. }));
        assert_eq!(rejected[1].led_index(), Some(1));
        assert!(matches!(rejected[2], Diagnostic::RejectedDetection { camera_id: CameraId(3), led_index: 2, .. }));
        assert_eq!(rejected[3].led_index(), Some(10));
        assert!(matches!(rejected[4], Diagnostic::RejectedPhoto { camera_id: CameraId(7), .. }));
    }

    #[test]
    fn test_capture_input_from_json() {
        let json = r#"{
            "led_count": 4,
            "cameras": [{"camera_id": 0, "position": [0.0, -3.0, 1.0], "look_at": [0.0, 0.0, 1.0],
                         "image_width": 640, "image_height": 480}],
            "detections": [{"camera_id": 0, "led_index": 2, "pixel_x": 300.0, "pixel_y": 200.0,
                            "brightness": 180.0, "blob_area": 22.0}],
            "cone": {"centerX": 0.0, "centerY": 0.0, "rBottom": 0.5, "rTop": 0.05, "height": 2.0}
        }"#;
        let input: CaptureInput = serde_json::from_str(json).unwrap();
        let session = input.into_session().unwrap();
        assert_eq!(session.led_count(), 4);
        assert_eq!(session.camera(CameraId(0)).unwrap().fov_degrees(), 60.0);
        assert!(session.cone_override().is_some());
    }

    #[test]
    fn test_capture_input_drops_invalid_records() {
        let json = r#"{
            "led_count": 4,
            "cameras": [{"camera_id": 0, "position": [0.0, -3.0, 1.0], "look_at": [0.0, 0.0, 1.0],
                         "image_width": 640, "image_height": 480},
                        {"camera_id": 1, "position": [0.0, 0.0, 5.0], "look_at": [0.0, 0.0, 1.0],
                         "image_width": 640, "image_height": 480}],
            "detections": [{"camera_id": 0, "led_index": 2, "pixel_x": 300.0, "pixel_y": 200.0,
                            "brightness": 180.0, "blob_area": -1.0},
                           {"camera_id": 0, "led_index": 3, "pixel_x": 310.0, "pixel_y": 190.0,
                            "brightness": 180.0, "blob_area": 20.0}]
        }"#;
        let input: CaptureInput = serde_json::from_str(json).unwrap();
        let session = input.into_session().unwrap();

        assert_eq!(session.cameras().len(), 1);
        assert_eq!(session.detections().len(), 1);
        assert_eq!(session.detections()[0].led_index, 3);
        assert!(matches!(session.rejected()[0], Diagnostic::RejectedCamera { camera_id: CameraId(1), .. }));
        assert!(matches!(
            session.rejected()[1],
            Diagnostic::RejectedDetection { camera_id: CameraId(0), led_index: 2, .. }
        ));
    }
}
