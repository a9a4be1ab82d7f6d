//! The "RECONSTRUCTION" Engine - Full Pipeline
//!
//! ```text
//! detections + cameras
//!   → reflection scores (per camera)      → observations (per detection)
//!   → cone (override | silhouettes | sparse points)
//!   → occlusion segmentation (per camera)
//!   → best-view triangulation (per LED)
//!   → gap filling (per missing LED)
//!   → sorted positions + diagnostics
//! ```
//!
//! Only an invalid configuration or a missing cone is fatal. Everything else
//! degrades into lower confidence, predicted positions or diagnostics.

use ledmap_env::CameraId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cone_estimator::{ConeEstimate, ConeEstimator, ConeEstimatorConfig, ConeSource};
use crate::confidence::ConfidenceConfig;
use crate::diagnostics::Diagnostic;
use crate::ledmap_cone::{ConeError, ConeParameters};
use crate::ledmap_gaps::{GapConfig, GapFiller};
use crate::ledmap_occlusion::{OcclusionAnalyzer, OcclusionConfig};
use crate::ledmap_ray::IntersectConfig;
use crate::ledmap_triangulation::{TriangulationEngine, ViewSelection};
use crate::metrics::{cone_deviations, ReconstructionStats};
use crate::observation::{build_observations, Observation};
use crate::position::LedPosition;
use crate::reflection::{ReflectionConfig, ReflectionFilter, ReflectionScores};
use crate::session::{CaptureSession, SessionError};

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconstructionError {
    #[error("Invalid capture session: {0}")]
    Session(#[from] SessionError),

    #[error("No usable cone: {0}")]
    Cone(#[from] ConeError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Every tunable of the pipeline, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    pub confidence: ConfidenceConfig,
    pub reflection: ReflectionConfig,
    pub occlusion: OcclusionConfig,
    pub intersection: IntersectConfig,
    pub cone: ConeEstimatorConfig,
    pub gaps: GapConfig,

    /// Radius deviation from `r(h)` (m) above which a position is flagged
    pub surface_tolerance: f64,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            confidence: ConfidenceConfig::default(),
            reflection: ReflectionConfig::default(),
            occlusion: OcclusionConfig::default(),
            intersection: IntersectConfig::default(),
            cone: ConeEstimatorConfig::default(),
            gaps: GapConfig::default(),
            surface_tolerance: 0.05,
        }
    }
}

impl ReconstructionConfig {
    /// Parse a (possibly partial) JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self, ReconstructionError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ReconstructionError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String, ReconstructionError> {
        serde_json::to_string_pretty(self).map_err(|e| ReconstructionError::Config(e.to_string()))
    }

    /// Reject settings no stage can work with.
    pub fn validate(&self) -> Result<(), ReconstructionError> {
        let o = &self.occlusion;
        if !(o.hidden_enter_below < o.hidden_exit_above) {
            return Err(ReconstructionError::Config(format!(
                "occlusion.hidden_enter_below ({}) must be below hidden_exit_above ({})",
                o.hidden_enter_below, o.hidden_exit_above
            )));
        }
        if o.min_run_length == 0 {
            return Err(ReconstructionError::Config("occlusion.min_run_length must be at least 1".into()));
        }
        let c = &self.confidence;
        if !(0.0..=1.0).contains(&c.min_confidence) {
            return Err(ReconstructionError::Config(format!(
                "confidence.min_confidence ({}) must lie in [0, 1]",
                c.min_confidence
            )));
        }
        if !(self.reflection.cluster_size_normalizer > 0.0) {
            return Err(ReconstructionError::Config("reflection.cluster_size_normalizer must be positive".into()));
        }
        if !(self.intersection.epsilon > 0.0) {
            return Err(ReconstructionError::Config("intersection.epsilon must be positive".into()));
        }
        Ok(())
    }
}

// ============================================================================
// RESULT
// ============================================================================

/// Complete output of one reconstruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconstructionResult {
    pub session_id: Uuid,

    /// One entry per placed LED, sorted by index
    pub positions: Vec<LedPosition>,

    /// LEDs that could not be placed (sorted)
    pub unresolved: Vec<usize>,

    pub diagnostics: Vec<Diagnostic>,
    pub cone: ConeParameters,
    pub cone_source: ConeSource,

    /// Best view chosen for each observed LED
    pub selections: Vec<ViewSelection>,

    pub total_leds: usize,
    pub tree_height: f64,
    pub num_cameras: usize,
    pub num_observed: usize,
    pub num_predicted: usize,
}

impl ReconstructionResult {
    pub fn position(&self, led_index: usize) -> Option<&LedPosition> {
        self.positions
            .binary_search_by_key(&led_index, |p| p.led_index)
            .ok()
            .map(|i| &self.positions[i])
    }

    /// Camera whose view produced an observed LED.
    pub fn selected_camera(&self, led_index: usize) -> Option<CameraId> {
        self.selections.iter().find(|s| s.led_index == led_index).map(|s| s.camera_id)
    }

    pub fn stats(&self) -> ReconstructionStats {
        ReconstructionStats::compute(&self.positions, self.total_leds)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Reflection scores and observations derived from one session.
#[derive(Debug, Clone)]
pub struct ScoredSession {
    pub reflections: ReflectionScores,
    pub observations: Vec<Observation>,

    /// Detections that could not be scored
    pub rejected: Vec<Diagnostic>,
}

// ============================================================================
// ENGINE
// ============================================================================

#[derive(Debug, Clone)]
pub struct ReconstructionEngine {
    config: ReconstructionConfig,
    reflection: ReflectionFilter,
    estimator: ConeEstimator,
    occlusion: OcclusionAnalyzer,
    triangulation: TriangulationEngine,
    gaps: GapFiller,
}

impl Default for ReconstructionEngine {
    fn default() -> Self {
        Self::new(ReconstructionConfig::default())
    }
}

impl ReconstructionEngine {
    pub fn new(config: ReconstructionConfig) -> Self {
        Self {
            reflection: ReflectionFilter::new(config.reflection.clone()),
            estimator: ConeEstimator::new(config.cone.clone()),
            occlusion: OcclusionAnalyzer::new(config.occlusion.clone()),
            triangulation: TriangulationEngine::new(config.intersection.clone(), config.reflection.max_reflection_score),
            gaps: GapFiller::new(config.gaps.clone()),
            config,
        }
    }

    pub fn config(&self) -> &ReconstructionConfig {
        &self.config
    }

    /// Reflection scores and scored observations for a session.
    pub fn score(&self, session: &CaptureSession) -> ScoredSession {
        let reflections = self.reflection.score_all(session.detections());
        let (observations, rejected) = build_observations(session, &reflections, &self.config.confidence);
        ScoredSession {
            reflections,
            observations,
            rejected,
        }
    }

    /// Run the whole pipeline.
    ///
    /// The configuration is validated first, so a config built in code is
    /// held to the same rules as one loaded from JSON.
    pub fn reconstruct(&self, session: &CaptureSession) -> Result<ReconstructionResult, ReconstructionError> {
        self.config.validate()?;
        info!(
            "Reconstructing session {}: {} LEDs, {} cameras, {} detections",
            session.id(),
            session.led_count(),
            session.cameras().len(),
            session.detections().len()
        );

        let scored = self.score(session);
        info!(
            "Scored {} observations ({} rejected), {} reflection clusters",
            scored.observations.len(),
            scored.rejected.len(),
            scored.reflections.clusters().len()
        );

        let estimate = self.estimator.estimate(session, &scored.reflections).map_err(|e| {
            warn!("Cone estimation failed on every path: {}", e);
            ReconstructionError::from(e)
        })?;

        let mut result = self.resolve(session, estimate, &scored.observations);
        let at = session.rejected().len();
        result.diagnostics.splice(at..at, scored.rejected);
        Ok(result)
    }

    /// Run occlusion, triangulation and gap filling on scored observations.
    pub fn resolve(&self, session: &CaptureSession, estimate: ConeEstimate, observations: &[Observation]) -> ReconstructionResult {
        let cone = estimate.cone;
        let mut diagnostics: Vec<Diagnostic> = session.rejected().to_vec();
        diagnostics.extend(estimate.fallbacks.iter().map(Diagnostic::cone_fallback));

        let camera_ids: Vec<CameraId> = session.cameras().keys().copied().collect();
        let occlusion = self.occlusion.analyze(session.led_count(), &camera_ids, observations);

        let triangulated = self.triangulation.triangulate(session, &cone, observations, &occlusion);
        info!(
            "Triangulated {} of {} LEDs ({} diagnostics)",
            triangulated.positions.len(),
            session.led_count(),
            triangulated.diagnostics.len()
        );
        diagnostics.extend(triangulated.diagnostics);

        let filled = self.gaps.fill(&cone, session.led_count(), &triangulated.positions);
        info!(
            "Gap filling: {} interpolated, {} extrapolated, {} unresolved",
            filled.interpolated,
            filled.extrapolated,
            filled.unresolved.len()
        );
        diagnostics.extend(filled.diagnostics);

        let num_observed = triangulated.positions.len();
        let num_predicted = filled.positions.len();
        let mut positions: Vec<LedPosition> = triangulated.positions.into_values().collect();
        positions.extend(filled.positions);
        positions.sort_by_key(|p| p.led_index);

        let deviations = cone_deviations(&cone, &positions, self.config.surface_tolerance);
        for d in &deviations {
            warn!("{}", d);
        }
        diagnostics.extend(deviations);

        ReconstructionResult {
            session_id: session.id(),
            positions,
            unresolved: filled.unresolved,
            diagnostics,
            cone,
            cone_source: estimate.source,
            selections: triangulated.selections.into_values().collect(),
            total_leds: session.led_count(),
            tree_height: cone.height(),
            num_cameras: session.cameras().len(),
            num_observed,
            num_predicted,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_json() {
        let config = ReconstructionConfig::from_json_str(r#"{"gaps": {"wraps": true}, "occlusion": {"min_run_length": 4}}"#).unwrap();
        assert!(config.gaps.wraps);
        assert_eq!(config.gaps.predicted_confidence_scale, 0.5);
        assert_eq!(config.occlusion.min_run_length, 4);
        assert_eq!(config.occlusion.hidden_enter_below, 0.35);
        assert_eq!(config.reflection.cluster_radius_px, 20.0);
        assert_eq!(config.surface_tolerance, 0.05);
    }

    #[test]
    fn test_config_rejects_inverted_hysteresis() {
        let err = ReconstructionConfig::from_json_str(
            r#"{"occlusion": {"hidden_enter_below": 0.6, "hidden_exit_above": 0.4}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ReconstructionError::Config(_)));
    }

    #[test]
    fn test_reconstruct_rejects_invalid_code_config() {
        let camera = ledmap_env::Camera::looking_at(
            CameraId(0),
            nalgebra::Vector3::new(0.0, -3.0, 1.0),
            nalgebra::Vector3::new(0.0, 0.0, 1.0),
            60.0,
            640,
            480,
        )
        .unwrap();
        let detection = ledmap_env::Detection::new(CameraId(0), 1, 320.0, 240.0, 200.0, 20.0).unwrap();
        let session = CaptureSession::builder(4)
            .camera(camera)
            .detection(detection)
            .cone_override(ConeParameters::new([0.0, 0.0], 0.5, 0.05, 2.0).unwrap())
            .build()
            .unwrap();

        let mut config = ReconstructionConfig::default();
        config.confidence.min_confidence = 1.5;
        let err = ReconstructionEngine::new(config).reconstruct(&session).unwrap_err();
        assert!(matches!(err, ReconstructionError::Config(_)));

        let result = ReconstructionEngine::default().reconstruct(&session).unwrap();
        assert_eq!(result.num_observed, 1);
    }

    #[test]
    fn test_rejected_records_reach_the_result() {
        let camera = |id: u32| {
            ledmap_env::Camera::looking_at(
                CameraId(id),
                nalgebra::Vector3::new(0.0, -3.0, 1.0),
                nalgebra::Vector3::new(0.0, 0.0, 1.0),
                60.0,
                640,
                480,
            )
            .unwrap()
        };
        let detection = |cam: u32, led: usize| ledmap_env::Detection::new(CameraId(cam), led, 320.0, 240.0, 200.0, 20.0).unwrap();
        let session = CaptureSession::builder(4)
            .camera(camera(0))
            .detections([detection(0, 1), detection(9, 2)])
            .cone_override(ConeParameters::new([0.0, 0.0], 0.5, 0.05, 2.0).unwrap())
            .build()
            .unwrap();

        let result = ReconstructionEngine::default().reconstruct(&session).unwrap();
        assert_eq!(result.num_observed, 1);
        assert!(matches!(
            result.diagnostics[0],
            Diagnostic::RejectedDetection { camera_id: CameraId(9), led_index: 2, .. }
        ));
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = ReconstructionConfig::default();
        let json = config.to_json_string().unwrap();
        assert_eq!(ReconstructionConfig::from_json_str(&json).unwrap(), config);
    }
}
