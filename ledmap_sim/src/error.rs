//! Harness error type.

use ledmap_core::{ConeError, ReconstructionError, SessionError};
use ledmap_env::InputError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Invalid synthetic record: {0}")]
    Input(#[from] InputError),

    #[error("Invalid synthetic tree: {0}")]
    Cone(#[from] ConeError),

    #[error("Invalid synthetic session: {0}")]
    Session(#[from] SessionError),

    #[error("Reconstruction failed: {0}")]
    Reconstruction(#[from] ReconstructionError),

    #[error("Invalid simulation config: {0}")]
    Config(String),

    #[error("Export failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Export failed: {0}")]
    Json(#[from] serde_json::Error),
}
