//! Core types shared across the orchestration layer
//!
//! Error model, call outcomes and crate-level error handling.

pub mod domain;
pub mod error;
pub mod outcome;

// Re-export commonly used types
pub use domain::{DomainError, ErrorKind, RawError};
pub use error::{ErrorContext, OrchestratorError, OrchestratorResult};
pub use outcome::CallOutcome;
