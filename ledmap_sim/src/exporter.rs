//! JSON exporter for offline inspection.
//!
//! Writes the reconstruction result next to the oracle's ground truth so a
//! plotting script can overlay the two.

use std::fs::File;
use std::io::Write;

use ledmap_core::{ReconstructionResult, ValidationReport};
use serde::{Deserialize, Serialize};

use crate::oracle::GroundTruthLed;
use crate::runner::{ScenarioMetrics, ScenarioRun};

/// True position of one LED.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TruthPosition {
    pub led_index: usize,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl From<&GroundTruthLed> for TruthPosition {
    fn from(led: &GroundTruthLed) -> Self {
        Self {
            led_index: led.led_index,
            x: led.position.x,
            y: led.position.y,
            z: led.position.z,
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    pub truth: Vec<TruthPosition>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconstruction: Option<ReconstructionResult>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ScenarioMetrics>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            truth: Vec::new(),
            reconstruction: None,
            validation: None,
            passed: false,
            failure_reason: None,
            metrics: None,
        }
    }

    /// Export of a finished run.
    pub fn from_run(run: &ScenarioRun) -> Self {
        let mut export = Self::new(run.scenario.name(), run.seed);
        export.truth = run.truth.iter().map(TruthPosition::from).collect();
        export.reconstruction = Some(run.result.clone());
        export.validation = Some(run.report.clone());
        export
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>, metrics: Option<ScenarioMetrics>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
        self.metrics = metrics;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
