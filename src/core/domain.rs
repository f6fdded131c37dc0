//! Domain error model shared by the retry policy, the classifier and the
//! orchestrator.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Closed set of domain error kinds produced by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Unauthorized,
    Forbidden,
    Conflict,
    BadRequest,
    Unknown,
}

impl ErrorKind {
    /// HTTP-like status for this kind.
    pub fn status(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::Conflict => 409,
            ErrorKind::BadRequest => 400,
            ErrorKind::Unknown => 500,
        }
    }

    /// Not-found, unauthorized, forbidden and conflict are never transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ErrorKind::NotFound | ErrorKind::Unauthorized | ErrorKind::Forbidden | ErrorKind::Conflict
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Conflict => "conflict",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error as reported by the backend data service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawError {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
    #[serde(default)]
    pub details: Option<JsonValue>,
}

impl RawError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
            details: None,
        }
    }

    pub fn details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for RawError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{code}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// A backend error translated into one of the [`ErrorKind`]s.
///
/// Cloneable so a single upstream outcome can be handed to every caller
/// that joined the same in-flight request.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct DomainError {
    pub message: String,
    pub kind: ErrorKind,
    pub cause: Option<RawError>,
    pub status: u16,
}

impl DomainError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            cause: None,
            status: kind.status(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message)
    }

    pub fn with_cause(mut self, cause: RawError) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Short message suitable for showing to an end user.
    pub fn user_message(&self) -> &'static str {
        match self.kind {
            ErrorKind::NotFound => "The requested record could not be found.",
            ErrorKind::Unauthorized => "Your session has expired. Please sign in again.",
            ErrorKind::Forbidden => "You do not have permission to perform this action.",
            ErrorKind::Conflict => "A record with these details already exists.",
            ErrorKind::BadRequest => "The request references data that does not exist.",
            ErrorKind::Unknown => "Something went wrong. Please try again later.",
        }
    }
}

impl From<RawError> for DomainError {
    fn from(raw: RawError) -> Self {
        crate::orchestration::classifier::classify(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_status_and_retryability() {
        assert_eq!(ErrorKind::NotFound.status(), 404);
        assert_eq!(ErrorKind::Unknown.status(), 500);
        assert!(!ErrorKind::Unauthorized.is_retryable());
        assert!(!ErrorKind::Conflict.is_retryable());
        assert!(ErrorKind::BadRequest.is_retryable());
        assert!(ErrorKind::Unknown.is_retryable());
    }

    #[test]
    fn test_kind_deserializes_from_snake_case() {
        let kind: ErrorKind = serde_yaml::from_str("not_found").unwrap();
        assert_eq!(kind, ErrorKind::NotFound);
    }

    #[test]
    fn test_domain_error_display() {
        let err = DomainError::new(ErrorKind::Forbidden, "no access to events");
        assert_eq!(err.status, 403);
        assert_eq!(err.to_string(), "forbidden: no access to events");
        assert!(err.cause.is_none());
    }

    #[test]
    fn test_raw_error_into_domain_error() {
        let err: DomainError = RawError::with_code("23505", "duplicate key").into();
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert_eq!(err.cause.as_ref().and_then(|c| c.code.as_deref()), Some("23505"));
    }
}
