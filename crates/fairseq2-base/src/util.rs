//! Utilities for reading hyperparameters and checking them.
pub use ggml::util::*;

use crate::LoadError;

/// Fails with [LoadError::InvalidHyperparameter] unless `value` is greater than zero.
pub fn ensure_positive(field: &'static str, value: i64) -> Result<(), LoadError> {
    if value > 0 {
        Ok(())
    } else {
        Err(LoadError::InvalidHyperparameter {
            field,
            reason: format!("{value} must be greater than zero"),
        })
    }
}

/// Fails with [LoadError::InvalidHyperparameter] if `value` is negative.
pub fn ensure_non_negative(field: &'static str, value: i64) -> Result<(), LoadError> {
    if value >= 0 {
        Ok(())
    } else {
        Err(LoadError::InvalidHyperparameter {
            field,
            reason: format!("{value} must not be negative"),
        })
    }
}

/// Fails with [LoadError::InvalidHyperparameter] unless `value` lies in `[0, 1]`.
pub fn ensure_probability(field: &'static str, value: f32) -> Result<(), LoadError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(LoadError::InvalidHyperparameter {
            field,
            reason: format!("{value} is not a probability"),
        })
    }
}

/// Converts a validated dimension to `usize`.
pub fn to_usize(field: &'static str, value: i64) -> Result<usize, LoadError> {
    usize::try_from(value).map_err(|_| LoadError::InvalidHyperparameter {
        field,
        reason: format!("{value} does not fit in usize"),
    })
}
