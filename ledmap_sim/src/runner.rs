//! Scenario runner - generates a synthetic capture, reconstructs it and
//! grades the result against ground truth.

use ledmap_core::{validate, ConeSource, Diagnostic, ReconstructionConfig, ReconstructionEngine, ReconstructionResult, ValidationReport};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::SimError;
use crate::oracle::{GroundTruthLed, Oracle, OracleConfig, SyntheticCapture};
use crate::scenarios::ScenarioId;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioMetrics {
    pub detections: usize,
    pub reflected_captures: usize,
    pub dropped_captures: usize,
    pub leaked_captures: usize,

    pub observed: usize,
    pub predicted: usize,
    pub unresolved: usize,
    pub diagnostics: usize,
    pub reflection_ambiguities: usize,

    /// Fraction of observed LEDs within the scenario's position tolerance
    pub observed_within_tolerance: f64,

    pub observed_rms: f64,
    pub predicted_rms: f64,

    /// `|r_bottom - true r_bottom|` of the cone used (m)
    pub cone_radius_error: f64,
}

/// Pass criteria of one scenario.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Position error (m) under which an observed LED counts as accurate
    pub position_tolerance: f64,

    /// Required fraction of accurate observed LEDs
    pub min_within_tolerance: f64,

    /// Largest acceptable RMS error of predicted LEDs (m)
    pub max_predicted_rms: f64,
}

impl Thresholds {
    pub fn for_scenario(scenario: ScenarioId) -> Self {
        match scenario {
            ScenarioId::Baseline => Self {
                position_tolerance: 0.01,
                min_within_tolerance: 0.98,
                max_predicted_rms: 0.05,
            },
            ScenarioId::Reflections => Self {
                position_tolerance: 0.01,
                min_within_tolerance: 0.95,
                max_predicted_rms: 0.05,
            },
            ScenarioId::Silhouette => Self {
                position_tolerance: 0.03,
                min_within_tolerance: 0.9,
                max_predicted_rms: 0.08,
            },
            ScenarioId::SparseFallback => Self {
                position_tolerance: 0.03,
                min_within_tolerance: 0.9,
                max_predicted_rms: 0.08,
            },
            ScenarioId::Dropout => Self {
                position_tolerance: 0.02,
                min_within_tolerance: 0.9,
                max_predicted_rms: 0.08,
            },
        }
    }
}

/// Everything one scenario produced, kept for grading and export.
#[derive(Debug, Clone)]
pub struct ScenarioRun {
    pub scenario: ScenarioId,
    pub seed: u64,
    pub truth: Vec<GroundTruthLed>,
    pub true_r_bottom: f64,
    pub capture: SyntheticCapture,
    pub result: ReconstructionResult,
    pub report: ValidationReport,
}

impl ScenarioRun {
    pub fn metrics(&self, thresholds: &Thresholds) -> ScenarioMetrics {
        let observed: Vec<f64> = self
            .result
            .positions
            .iter()
            .filter(|p| !p.predicted)
            .filter_map(|p| self.truth.get(p.led_index).map(|t| (p.point() - t.position).norm()))
            .collect();
        let accurate = observed.iter().filter(|&&e| e < thresholds.position_tolerance).count();

        ScenarioMetrics {
            detections: self.capture.detections.len(),
            reflected_captures: self.capture.reflected.len(),
            dropped_captures: self.capture.dropped,
            leaked_captures: self.capture.leaked,
            observed: self.result.num_observed,
            predicted: self.result.num_predicted,
            unresolved: self.result.unresolved.len(),
            diagnostics: self.result.diagnostics.len(),
            reflection_ambiguities: self
                .result
                .diagnostics
                .iter()
                .filter(|d| matches!(d, Diagnostic::ReflectionAmbiguity { .. }))
                .count(),
            observed_within_tolerance: if observed.is_empty() {
                0.0
            } else {
                accurate as f64 / observed.len() as f64
            },
            observed_rms: self.report.observed.rms,
            predicted_rms: self.report.predicted.rms,
            cone_radius_error: (self.result.cone.r_bottom() - self.true_r_bottom).abs(),
        }
    }

    /// Grade the run against the scenario's thresholds.
    pub fn evaluate(&self) -> ScenarioResult {
        let thresholds = Thresholds::for_scenario(self.scenario);
        let metrics = self.metrics(&thresholds);

        let source_ok = match self.scenario {
            ScenarioId::Silhouette => matches!(self.result.cone_source, ConeSource::Silhouette { .. }),
            ScenarioId::SparseFallback => matches!(self.result.cone_source, ConeSource::SparsePoints { .. }),
            _ => self.result.cone_source == ConeSource::Manual,
        };

        let failure_reason = if !source_ok {
            Some(format!("Unexpected cone source {:?}", self.result.cone_source))
        } else if metrics.unresolved > 0 {
            Some(format!("{} LEDs left unresolved", metrics.unresolved))
        } else if metrics.observed_within_tolerance < thresholds.min_within_tolerance {
            Some(format!(
                "Only {:.1}% of observed LEDs within {:.0} mm (need {:.0}%)",
                metrics.observed_within_tolerance * 100.0,
                thresholds.position_tolerance * 1000.0,
                thresholds.min_within_tolerance * 100.0
            ))
        } else if self.report.predicted.count > 0 && metrics.predicted_rms > thresholds.max_predicted_rms {
            Some(format!(
                "Predicted RMS error {:.3}m exceeds {:.3}m",
                metrics.predicted_rms, thresholds.max_predicted_rms
            ))
        } else {
            None
        };

        ScenarioResult {
            scenario: self.scenario,
            seed: self.seed,
            passed: failure_reason.is_none(),
            failure_reason,
            metrics,
        }
    }
}

/// Runs synthetic capture scenarios.
#[derive(Debug, Clone)]
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Tree and rig shared by every scenario; noise is set per scenario
    base: OracleConfig,

    reconstruction: ReconstructionConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, led_count: usize, camera_count: usize) -> Self {
        let mut base = OracleConfig::default();
        base.tree.led_count = led_count;
        base.rig.count = camera_count;
        Self {
            seed,
            base,
            reconstruction: ReconstructionConfig::default(),
        }
    }

    /// Sets the camera resolution.
    pub fn with_image_size(mut self, width: u32, height: u32) -> Self {
        self.base.rig.image_width = width;
        self.base.rig.image_height = height;
        self
    }

    /// Sets how many times the string winds around the tree.
    pub fn with_turns(mut self, turns: f64) -> Self {
        self.base.tree.turns = turns;
        self
    }

    pub fn with_reconstruction_config(mut self, config: ReconstructionConfig) -> Self {
        self.reconstruction = config;
        self
    }

    /// Oracle configuration of a scenario.
    pub fn oracle_config(&self, scenario: ScenarioId) -> OracleConfig {
        let mut config = self.base.clone();
        match scenario {
            ScenarioId::Baseline | ScenarioId::Silhouette | ScenarioId::SparseFallback => {}
            ScenarioId::Reflections => {
                config.noise.reflection_spots = 2;
                config.noise.reflection_members = 10;
            }
            ScenarioId::Dropout => {
                config.noise.dropout_probability = 0.15;
                config.noise.leak_probability = 0.25;
            }
        }
        config
    }

    /// Generate, reconstruct and validate one scenario.
    pub fn execute(&self, scenario: ScenarioId) -> Result<ScenarioRun, SimError> {
        let mut oracle = Oracle::new(self.seed, self.oracle_config(scenario))?;
        let capture = oracle.capture()?;
        debug!(
            "Captured {} blobs ({} reflected, {} dropped, {} leaked)",
            capture.detections.len(),
            capture.reflected.len(),
            capture.dropped,
            capture.leaked
        );

        let cone_override = !matches!(scenario, ScenarioId::Silhouette | ScenarioId::SparseFallback);
        if scenario.renders_photos() {
            info!("Rendering {} all-on photographs", oracle.cameras().len());
        }
        let session = oracle.session(&capture, cone_override, scenario.renders_photos())?;

        let engine = ReconstructionEngine::new(self.reconstruction.clone());
        let result = engine.reconstruct(&session)?;
        let report = validate(&result.positions, &oracle.truth(), oracle.cone());

        Ok(ScenarioRun {
            scenario,
            seed: self.seed,
            truth: oracle.leds().to_vec(),
            true_r_bottom: oracle.cone().r_bottom(),
            capture,
            result,
            report,
        })
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        match self.execute(scenario) {
            Ok(run) => {
                let result = run.evaluate();
                debug!("  metrics: {:?}", result.metrics);
                result
            }
            Err(e) => {
                warn!("Scenario {} aborted: {}", scenario.name(), e);
                ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: false,
                    failure_reason: Some(e.to_string()),
                    metrics: ScenarioMetrics::default(),
                }
            }
        }
    }
}
