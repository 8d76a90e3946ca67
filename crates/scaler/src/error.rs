use crate::types::ScaleAction;
use erpgate_pool::PoolError;
use thiserror::Error;

/// Result type alias for autoscaler operations
pub type ScalerResult<T> = Result<T, ScalerError>;

/// Autoscaler error types
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScalerError {
    /// The pool rejected or failed a resize; the failed event is already recorded
    #[error("Scaling {action} of '{connection_id}' failed: {source}")]
    ScalingFailed {
        connection_id: String,
        action: ScaleAction,
        #[source]
        source: PoolError,
    },

    #[error("No autoscaler registered for '{0}'")]
    UnknownConnection(String),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid value '{value}' for {var}: expected {expected}")]
    InvalidEnvVar {
        var: String,
        value: String,
        expected: String,
    },
}

impl ScalerError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        ScalerError::Configuration {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaling_failed_message_includes_pool_error() {
        let err = ScalerError::ScalingFailed {
            connection_id: "erp-main".into(),
            action: ScaleAction::Up,
            source: PoolError::ResizeOutOfBounds { requested: 12, min: 2, max: 10 },
        };
        assert_eq!(
            err.to_string(),
            "Scaling up of 'erp-main' failed: Requested pool size 12 is outside [2, 10]"
        );
    }
}
