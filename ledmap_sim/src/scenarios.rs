//! Synthetic capture scenarios.

use serde::{Deserialize, Serialize};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// SIM-001: Clean captures, manual cone
    Baseline,

    /// SIM-002: Stray bright spots collecting hidden LEDs
    Reflections,

    /// SIM-003: Cone recovered from all-on photographs
    Silhouette,

    /// SIM-004: No photographs, cone fitted to triangulated LEDs
    SparseFallback,

    /// SIM-005: Missed blobs and light leaking through the foliage
    Dropout,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Baseline,
            ScenarioId::Reflections,
            ScenarioId::Silhouette,
            ScenarioId::SparseFallback,
            ScenarioId::Dropout,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Baseline => "baseline",
            ScenarioId::Reflections => "reflections",
            ScenarioId::Silhouette => "silhouette",
            ScenarioId::SparseFallback => "sparse_fallback",
            ScenarioId::Dropout => "dropout",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Baseline => "Every facing LED captured once per camera; cone supplied manually",
            ScenarioId::Reflections => "Two reflection spots per camera absorb captures of hidden LEDs",
            ScenarioId::Silhouette => "Cone estimated from rendered all-lights-on photographs",
            ScenarioId::SparseFallback => "Cone fitted to LEDs triangulated from two or more cameras",
            ScenarioId::Dropout => "15% of visible blobs missed, 25% of hidden LEDs leak through",
        }
    }

    /// Whether the scenario needs all-on photographs (slow to render).
    pub fn renders_photos(&self) -> bool {
        matches!(self, ScenarioId::Silhouette)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "baseline" | "sim-001" => Ok(ScenarioId::Baseline),
            "reflections" | "reflection" | "sim-002" => Ok(ScenarioId::Reflections),
            "silhouette" | "sim-003" => Ok(ScenarioId::Silhouette),
            "sparse_fallback" | "sparse" | "sim-004" => Ok(ScenarioId::SparseFallback),
            "dropout" | "sim-005" => Ok(ScenarioId::Dropout),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
