//! Crate-level error handling
//!
//! Upstream call failures are modelled by [`crate::core::DomainError`] and never
//! escape the orchestrator. This module covers the remaining failures: loading
//! configuration and installing the logger.

use std::fmt;

use thiserror::Error;

/// Errors raised while setting up the orchestration layer
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Reading a configuration file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML could not be parsed into a configuration
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// Logger installation failed
    #[error("Logger error: {0}")]
    Logger(String),

    /// Metrics registration or encoding failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Internal system errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for orchestrator setup
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> OrchestratorResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> OrchestratorResult<T> {
        self.map_err(|e| OrchestratorError::Internal(format!("{context}: {e}")))
    }
}

#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::core::OrchestratorError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::OrchestratorError::Configuration(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::Configuration("bad window".to_string());
        assert_eq!(err.to_string(), "Configuration error: bad window");

        let err = config_error!("window {} too small", 0);
        assert!(matches!(err, OrchestratorError::Configuration(ref m) if m == "window 0 too small"));
    }

    #[test]
    fn test_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: OrchestratorError = io_error.into();
        assert!(matches!(err, OrchestratorError::Io(_)));

        let result: Result<(), &str> = Err("boom");
        let err = result.with_context("loading").unwrap_err();
        assert_eq!(err.to_string(), "Internal error: loading: boom");
    }
}
