//! Error types for capture-environment records.

use thiserror::Error;

/// Errors raised when a capture record fails validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    /// A numeric field was NaN or infinite
    #[error("Non-finite value for {field}: {value}")]
    NonFinite { field: &'static str, value: f64 },

    /// A numeric field was outside its allowed range
    #[error("{field} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// Blob area must be non-negative
    #[error("Negative blob area: {0}")]
    NegativeArea(f64),

    /// Camera pose could not produce an orthonormal frame
    #[error("Degenerate camera pose: {0}")]
    DegeneratePose(String),

    /// Image buffer does not match its declared dimensions
    #[error("Image buffer has {actual} bytes, expected {expected}")]
    ImageSize { expected: usize, actual: usize },
}

impl InputError {
    /// Checks that `value` is finite.
    pub fn finite(field: &'static str, value: f64) -> Result<f64, Self> {
        if value.is_finite() {
            Ok(value)
        } else {
            Err(Self::NonFinite { field, value })
        }
    }

    /// Checks that `value` is finite and inside `[min, max]`.
    pub fn in_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<f64, Self> {
        let value = Self::finite(field, value)?;
        if value < min || value > max {
            return Err(Self::OutOfRange { field, value, min, max });
        }
        Ok(value)
    }
}
