//! Shared threshold validation helpers.
//!
//! Range and ordering checks used when validating monitor configuration at
//! startup. Every failure is a [`CoreError::Configuration`], which callers
//! treat as fatal.

use crate::error::CoreError;

/// Validate that a value falls within `[0.0, 1.0]`.
pub fn validate_unit_range(value: f64, name: &str) -> Result<(), CoreError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(CoreError::Configuration(format!(
            "{name} must be between 0.0 and 1.0, got {value}"
        )));
    }
    Ok(())
}

/// Validate that a value is strictly positive and finite.
pub fn validate_positive(value: f64, name: &str) -> Result<(), CoreError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(CoreError::Configuration(format!(
            "{name} must be a positive number, got {value}"
        )));
    }
    Ok(())
}

/// Validate that `min <= max`.
pub fn validate_min_max(min: f64, max: f64, name: &str) -> Result<(), CoreError> {
    if min > max {
        return Err(CoreError::Configuration(format!(
            "{name}: minimum {min} exceeds maximum {max}"
        )));
    }
    Ok(())
}

/// Validate that a threshold ladder is monotonic.
///
/// `ascending = true` requires each step to be >= the previous one;
/// `false` requires each step to be <= the previous one.
pub fn validate_monotonic(steps: &[f64], ascending: bool, name: &str) -> Result<(), CoreError> {
    let ordered = steps.windows(2).all(|w| {
        if ascending {
            w[0] <= w[1]
        } else {
            w[0] >= w[1]
        }
    });
    if !ordered {
        let direction = if ascending { "ascending" } else { "descending" };
        return Err(CoreError::Configuration(format!(
            "{name} thresholds must be {direction}, got {steps:?}"
        )));
    }
    Ok(())
}
