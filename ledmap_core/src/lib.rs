//! LED Mapper Core - Geometric Reconstruction of LEDs on a Conical Tree
//!
//! Recovers the 3-D position of every LED in a sequentially addressed string
//! wound around a tree, from one photograph per LED per camera.
//!
//! The hard parts, and where they live:
//! 1. **Which surface?** A ray meets a cone twice. Per-camera sequence
//!    segmentation of detection confidence decides front vs back
//!    ([`ledmap_occlusion`]).
//! 2. **Which view?** Views of opposite faces must never be averaged; the
//!    single best view wins ([`ledmap_triangulation`]).
//! 3. **What about the gaps?** Missing LEDs are interpolated along the
//!    shortest circular arc and extrapolated with the observed winding
//!    ([`ledmap_gaps`]).
//!
//! # Example
//!
//! ```
//! use ledmap_core::{CaptureSession, ConeParameters, ReconstructionEngine};
//! use ledmap_env::{Camera, CameraId, Detection};
//! use nalgebra::Vector3;
//!
//! let cone = ConeParameters::new([0.0, 0.0], 0.5, 0.05, 2.0)?;
//! let cam = Camera::looking_at(
//!     CameraId(0),
//!     Vector3::new(3.0, 0.0, 1.0),
//!     Vector3::new(0.0, 0.0, 1.0),
//!     60.0,
//!     640,
//!     480,
//! )?;
//! let session = CaptureSession::builder(1)
//!     .camera(cam)
//!     .detection(Detection::new(CameraId(0), 0, 320.0, 240.0, 200.0, 25.0)?)
//!     .cone_override(cone)
//!     .build()?;
//!
//! let result = ReconstructionEngine::default().reconstruct(&session)?;
//! let led = result.position(0).unwrap();
//! assert!(!led.predicted);
//! assert!((led.height - 0.5).abs() < 1e-9);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod angle;
pub mod cone_estimator;
pub mod confidence;
pub mod diagnostics;
pub mod ledmap_cone;
pub mod ledmap_engine;
pub mod ledmap_gaps;
pub mod ledmap_occlusion;
pub mod ledmap_ray;
pub mod ledmap_triangulation;
pub mod metrics;
pub mod observation;
pub mod position;
pub mod reflection;
pub mod session;
pub mod silhouette;
pub mod validation;

// Re-export key types for convenience
pub use cone_estimator::{ConeEstimate, ConeEstimator, ConeEstimatorConfig, ConeSource};
pub use confidence::{ConfidenceConfig, ConfidenceWeights};
pub use diagnostics::Diagnostic;
pub use ledmap_cone::{ConeError, ConeOverride, ConeParameters, ConePoint};
pub use ledmap_engine::{
    ReconstructionConfig, ReconstructionEngine, ReconstructionError, ReconstructionResult, ScoredSession,
};
pub use ledmap_gaps::{GapConfig, GapFiller};
pub use ledmap_occlusion::{OcclusionAnalyzer, OcclusionConfig, OcclusionMap};
pub use ledmap_ray::{intersect, ConeHit, ConeIntersection, IntersectConfig, IntersectError, Ray};
pub use ledmap_triangulation::{TriangulationEngine, ViewSelection};
pub use metrics::ReconstructionStats;
pub use observation::Observation;
pub use position::LedPosition;
pub use reflection::{ReflectionConfig, ReflectionFilter, ReflectionScores};
pub use session::{CaptureInput, CaptureSession, CaptureSessionBuilder, SessionError};
pub use validation::{validate, ValidationReport};
