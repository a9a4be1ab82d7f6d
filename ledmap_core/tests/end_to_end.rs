//! End-to-end reconstruction scenarios on hand-built sessions.

use std::collections::BTreeMap;

use approx::assert_relative_eq;
use ledmap_core::{
    CaptureSession, ConeEstimate, ConeParameters, ConeSource, GapConfig, Observation, ReconstructionConfig,
    ReconstructionEngine,
};
use ledmap_env::{Camera, CameraId, Detection};
use nalgebra::Vector3;

fn tree() -> ConeParameters {
    ConeParameters::new([0.0, 0.0], 0.5, 0.05, 2.0).unwrap()
}

fn ring_camera(id: u32, azimuth_deg: f64) -> Camera {
    let a = azimuth_deg.to_radians();
    Camera::looking_at(
        CameraId(id),
        Vector3::new(4.0 * a.cos(), 4.0 * a.sin(), 1.0),
        Vector3::new(0.0, 0.0, 1.0),
        50.0,
        4000,
        3000,
    )
    .unwrap()
}

fn detect(camera: &Camera, led: usize, point: &Vector3<f64>) -> Detection {
    let [px, py] = camera.project(point).unwrap();
    Detection::new(camera.id(), led, px, py, 200.0, 25.0).unwrap()
}

fn manual(cone: ConeParameters) -> ConeEstimate {
    ConeEstimate {
        cone,
        source: ConeSource::Manual,
        fallbacks: Vec::new(),
    }
}

// ============================================================================
// BEST VIEW SELECTION
// ============================================================================

/// Three cameras see LED 42; camera 2 has the best combined weight.
fn three_camera_setup() -> (CaptureSession, Vec<Observation>, Vector3<f64>) {
    let cone = tree();
    let cameras: Vec<Camera> = (1..=3).map(|id| ring_camera(id, 120.0 * id as f64)).collect();
    let cam2_azimuth = 240.0;

    // Every LED on the face of camera 2, low to high
    let truth: Vec<Vector3<f64>> = (0..60).map(|i| cone.surface_point(0.2 + 0.01 * i as f64, cam2_azimuth)).collect();

    let mut detections = Vec::new();
    let mut observations = Vec::new();
    let scores = [(0.95, 0.30), (0.90, 0.92), (0.87, 0.65)];
    for (led, point) in truth.iter().enumerate() {
        for (k, cam) in cameras.iter().enumerate() {
            let d = detect(cam, led, point);
            detections.push(d);
            let (dc, ac) = if led == 42 { scores[k] } else { (0.9, 0.9) };
            observations.push(Observation::new(d, dc, ac, 0.0).unwrap());
        }
    }

    let session = CaptureSession::builder(truth.len())
        .cameras(cameras)
        .detections(detections)
        .cone_override(cone)
        .build()
        .unwrap();
    (session, observations, truth[42])
}

#[test]
fn test_led42_uses_camera_2() {
    let (session, observations, truth) = three_camera_setup();
    let engine = ReconstructionEngine::default();
    let result = engine.resolve(&session, manual(tree()), &observations);

    assert_eq!(result.selected_camera(42), Some(CameraId(2)));
    let led = result.position(42).unwrap();
    assert!(!led.predicted);
    assert_relative_eq!(led.confidence, 0.828, epsilon = 1e-9);
    assert_eq!(led.num_observations, 3);
    assert_relative_eq!(led.point(), truth, epsilon = 1e-6);
}

#[test]
fn test_equal_weights_pick_lowest_camera() {
    let (session, observations, _) = three_camera_setup();
    let result = ReconstructionEngine::default().resolve(&session, manual(tree()), &observations);
    assert_eq!(result.selected_camera(10), Some(CameraId(1)));
}

#[test]
fn test_reruns_are_identical() {
    let (session, observations, _) = three_camera_setup();
    let engine = ReconstructionEngine::default();
    let a = engine.resolve(&session, manual(tree()), &observations);
    let b = engine.resolve(&session, manual(tree()), &observations);
    assert_eq!(a, b);
    assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
}

// ============================================================================
// MISSING LEDS ACROSS THE SEAM
// ============================================================================

/// 200 LEDs, five turns; LED 5 at 9° and LED 195 at 351°, LEDs 0-4 and
/// 196-199 never detected.
fn spiral_session(wraps_dark: bool) -> (CaptureSession, BTreeMap<usize, Vector3<f64>>) {
    let cone = tree();
    let cameras: Vec<Camera> = (0..4).map(|k| ring_camera(k, 90.0 * k as f64)).collect();
    let step = (342.0 + 4.0 * 360.0) / 190.0;

    let truth: BTreeMap<usize, Vector3<f64>> = (0..200)
        .map(|i| {
            let angle = 9.0 + step * (i as f64 - 5.0);
            (i, cone.surface_point(0.05 + 0.9 * i as f64 / 200.0, angle))
        })
        .collect();

    let mut detections = Vec::new();
    for (&led, point) in &truth {
        if wraps_dark && !(5..=195).contains(&led) {
            continue;
        }
        let normal = cone.surface_normal(point);
        for cam in &cameras {
            let to_camera = (cam.position() - point).normalize();
            if normal.dot(&to_camera) > 0.2 {
                detections.push(detect(cam, led, point));
            }
        }
    }

    let session = CaptureSession::builder(200)
        .cameras(cameras)
        .detections(detections)
        .cone_override(cone)
        .build()
        .unwrap();
    (session, truth)
}

#[test]
fn test_led199_interpolates_across_seam() {
    let (session, _) = spiral_session(true);
    let config = ReconstructionConfig {
        gaps: GapConfig {
            wraps: true,
            ..GapConfig::default()
        },
        ..ReconstructionConfig::default()
    };
    let result = ReconstructionEngine::new(config).reconstruct(&session).unwrap();

    assert_relative_eq!(result.position(195).unwrap().angle, 351.0, epsilon = 1e-6);
    assert_relative_eq!(result.position(5).unwrap().angle, 9.0, epsilon = 1e-6);

    let led = result.position(199).unwrap();
    assert!(led.predicted);
    assert!(led.angle > 351.0 && led.angle < 360.0, "angle {}", led.angle);
    assert_eq!(result.positions.len(), 200);
    assert!(result.unresolved.is_empty());
    assert_eq!(result.num_predicted, 9);
}

#[test]
fn test_front_and_back_faces_are_resolved() {
    let (session, truth) = spiral_session(false);
    let result = ReconstructionEngine::default().reconstruct(&session).unwrap();

    assert_eq!(result.num_observed, 200);
    for p in &result.positions {
        let err = (p.point() - truth[&p.led_index]).norm();
        assert!(err < 1e-6, "LED {} off by {}", p.led_index, err);
    }
    let stats = result.stats();
    assert_relative_eq!(stats.observed_fraction, 1.0);
    assert_eq!(stats.unresolved, 0);
}

// ============================================================================
// BACK FACE THROUGH THE FAR ROOT
// ============================================================================

/// One camera watches a two-turn spiral. LEDs on the far side of the trunk
/// still leak through as dim blobs, which puts them in back segments.
#[test]
fn test_dim_runs_resolve_to_the_far_face() {
    let cone = tree();
    let camera = ring_camera(0, 0.0);
    let truth: Vec<Vector3<f64>> = (0..60)
        .map(|i| cone.surface_point(0.2 + 0.6 * i as f64 / 59.0, 12.0 * i as f64))
        .collect();
    let facing: Vec<f64> = truth
        .iter()
        .map(|p| cone.surface_normal(p).dot(&(camera.position() - p).normalize()))
        .collect();

    let mut detections = Vec::new();
    let mut observations = Vec::new();
    for (led, point) in truth.iter().enumerate() {
        let d = detect(&camera, led, point);
        detections.push(d);
        let dc = if facing[led] > 0.0 { 0.9 } else { 0.1 };
        observations.push(Observation::new(d, dc, 0.9, 0.0).unwrap());
    }
    let session = CaptureSession::builder(truth.len())
        .camera(camera)
        .detections(detections)
        .cone_override(cone)
        .build()
        .unwrap();

    let result = ReconstructionEngine::default().resolve(&session, manual(cone), &observations);
    assert_eq!(result.num_observed, 60);

    let mut far = 0;
    for selection in &result.selections {
        let led = selection.led_index;
        // Rays through the limb graze the surface; both roots coincide there
        if facing[led].abs() < 0.05 {
            continue;
        }
        assert_eq!(selection.used_far_root, facing[led] < 0.0, "LED {} facing {:.3}", led, facing[led]);
        if selection.used_far_root {
            far += 1;
        }
        let err = (result.position(led).unwrap().point() - truth[led]).norm();
        assert!(err < 1e-6, "LED {} off by {}", led, err);
    }
    assert!(far >= 15, "only {} LEDs used the far root", far);
}

#[test]
fn test_boundary_runs_extrapolate_without_wrap() {
    let (session, _) = spiral_session(true);
    let result = ReconstructionEngine::default().reconstruct(&session).unwrap();
    let stats = result.stats();
    assert_eq!(stats.predicted, 9);
    for led in (0..5).chain(196..200) {
        let p = result.position(led).unwrap();
        assert!(p.predicted);
        assert_eq!(p.num_observations, 0);
        assert!((0.0..360.0).contains(&p.angle));
    }
}
