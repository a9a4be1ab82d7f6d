//! LED Mapper Synthetic Capture Harness
//!
//! A controlled, fully seeded stand-in for the physical capture rig, so the
//! whole reconstruction pipeline can be graded against ground truth.
//!
//! # Core Principle: One Seed
//!
//! Every source of variation is drawn from a single 64-bit seed:
//! - **Tree**: LED placement along the spiral (jittered)
//! - **Captures**: pixel noise, dropouts, light leaks, reflection spots
//! - **Session id**: derived from the seed, so exports diff cleanly
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  detections   ┌──────────────────────┐
//! │    Oracle    │──────────────►│ ReconstructionEngine │
//! │ (true tree,  │  photos       │     (ledmap_core)    │
//! │  camera rig) │──────────────►└──────────┬───────────┘
//! └──────┬───────┘                          │ positions
//!        │ truth                            ▼
//!        └─────────────────────────►  validate + grade
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use ledmap_sim::{ScenarioId, ScenarioRunner};
//!
//! let runner = ScenarioRunner::new(42, 150, 4);
//! let result = runner.run(ScenarioId::Baseline);
//! assert!(result.passed, "{:?}", result.failure_reason);
//! ```

mod error;
pub mod exporter;
pub mod oracle;
pub mod runner;
pub mod scenarios;

pub use error::SimError;
pub use exporter::{SimExport, TruthPosition};
pub use oracle::{render_silhouette, CameraRig, CaptureNoise, GroundTruthLed, Oracle, OracleConfig, SyntheticCapture, TreeConfig};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRun, ScenarioRunner, Thresholds};
pub use scenarios::ScenarioId;
