use thiserror::Error;

#[derive(Error, Debug)]
pub enum PropulsionError {
    #[error("{quantity} = {value} is outside its valid domain: {requirement}")]
    DomainViolation {
        quantity: &'static str,
        value: f64,
        requirement: &'static str,
    },

    #[error("{quantity} has length {actual}, expected {expected}")]
    ShapeMismatch {
        quantity: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Jacobian is singular at Newton iteration {iteration}")]
    SingularJacobian { iteration: usize },

    #[error("Newton solve failed to converge after {iteration} iterations (|r| = {residual_norm:e})")]
    SolverDiverged { iteration: usize, residual_norm: f64 },

    #[error("Unknown unit '{unit}' for {kind}")]
    UnknownUnit { unit: String, kind: &'static str },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Surrogate model error: {0}")]
    Surrogate(String),

    #[error("No feasible design point: {0}")]
    Infeasible(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type PropulsionResult<T> = Result<T, PropulsionError>;

/// Fails with [`PropulsionError::DomainViolation`] unless `value` is finite and `> 0`.
pub fn require_positive(quantity: &'static str, value: f64) -> PropulsionResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PropulsionError::DomainViolation {
            quantity,
            value,
            requirement: "must be finite and > 0",
        })
    }
}

/// Fails unless `value` is finite.
pub fn require_finite(quantity: &'static str, value: f64) -> PropulsionResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(PropulsionError::DomainViolation {
            quantity,
            value,
            requirement: "must be finite",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_violation_message_names_quantity() {
        let err = require_positive("motor_idle_current", 0.0).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("motor_idle_current"), "{msg}");
        assert!(msg.contains("> 0"), "{msg}");
    }

    #[test]
    fn test_require_positive_rejects_nan_and_negative() {
        assert!(require_positive("x", f64::NAN).is_err());
        assert!(require_positive("x", -1.0).is_err());
        assert!(require_positive("x", f64::INFINITY).is_err());
        assert!(require_positive("x", 1e-12).is_ok());
    }

    #[test]
    fn test_require_finite() {
        assert!(require_finite("velocity", 0.0).is_ok());
        assert!(require_finite("velocity", -3.0).is_ok());
        assert!(require_finite("velocity", f64::NAN).is_err());
    }
}
