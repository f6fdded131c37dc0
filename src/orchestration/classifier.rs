//! Backend error code classification.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::core::{DomainError, ErrorKind, RawError};

/// Built-in code table: symbolic names plus the hosted Postgres/PostgREST
/// codes the data service reports.
static DEFAULT_CODES: Lazy<HashMap<&'static str, ErrorKind>> = Lazy::new(|| {
    let arr: Vec<(&str, ErrorKind)> = vec![
        ("not_found", ErrorKind::NotFound),
        ("PGRST116", ErrorKind::NotFound), // no rows for a single-row request
        ("unauthorized", ErrorKind::Unauthorized),
        ("PGRST301", ErrorKind::Unauthorized), // expired or invalid JWT
        ("401", ErrorKind::Unauthorized),
        ("forbidden", ErrorKind::Forbidden),
        ("42501", ErrorKind::Forbidden), // insufficient privilege / RLS
        ("403", ErrorKind::Forbidden),
        ("duplicate", ErrorKind::Conflict),
        ("conflict", ErrorKind::Conflict),
        ("23505", ErrorKind::Conflict), // unique violation
        ("bad_reference", ErrorKind::BadRequest),
        ("23503", ErrorKind::BadRequest), // foreign key violation
    ];
    arr.into_iter().collect()
});

/// Classify with the built-in table.
pub fn classify(raw: &RawError) -> DomainError {
    let kind = raw
        .code
        .as_deref()
        .and_then(|code| DEFAULT_CODES.get(code).copied())
        .unwrap_or(ErrorKind::Unknown);
    build(kind, raw)
}

fn build(kind: ErrorKind, raw: &RawError) -> DomainError {
    let message = if raw.message.is_empty() {
        kind.as_str().replace('_', " ")
    } else {
        raw.message.clone()
    };
    DomainError::new(kind, message).with_cause(raw.clone())
}

/// Errors that can be turned into a [`DomainError`].
///
/// Already-classified errors pass through untouched; raw backend errors go
/// through the classifier's code table.
pub trait Classify {
    fn classify_with(&self, classifier: &ErrorClassifier) -> DomainError;

    /// Kind under the built-in table.
    fn error_kind(&self) -> ErrorKind {
        self.classify_with(&ErrorClassifier::default()).kind
    }
}

impl Classify for DomainError {
    fn classify_with(&self, _classifier: &ErrorClassifier) -> DomainError {
        self.clone()
    }

    fn error_kind(&self) -> ErrorKind {
        self.kind
    }
}

impl Classify for RawError {
    fn classify_with(&self, classifier: &ErrorClassifier) -> DomainError {
        classifier.classify(self)
    }
}

/// Classifier with extra codes layered over the built-in table.
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    extra: HashMap<String, ErrorKind>,
}

impl ErrorClassifier {
    pub fn new(extra: HashMap<String, ErrorKind>) -> Self {
        Self { extra }
    }

    pub fn classify(&self, raw: &RawError) -> DomainError {
        match raw.code.as_deref().and_then(|code| self.extra.get(code)) {
            Some(kind) => build(*kind, raw),
            None => classify(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table() {
        let cases = [
            ("PGRST116", ErrorKind::NotFound, 404),
            ("not_found", ErrorKind::NotFound, 404),
            ("PGRST301", ErrorKind::Unauthorized, 401),
            ("42501", ErrorKind::Forbidden, 403),
            ("23505", ErrorKind::Conflict, 409),
            ("duplicate", ErrorKind::Conflict, 409),
            ("23503", ErrorKind::BadRequest, 400),
            ("bad_reference", ErrorKind::BadRequest, 400),
            ("XX000", ErrorKind::Unknown, 500),
        ];
        for (code, kind, status) in cases {
            let err = classify(&RawError::with_code(code, "boom"));
            assert_eq!(err.kind, kind, "code {code}");
            assert_eq!(err.status, status, "code {code}");
            assert_eq!(err.message, "boom");
        }
    }

    #[test]
    fn test_missing_code_is_unknown() {
        let err = classify(&RawError::new("network down"));
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert_eq!(err.status, 500);
        assert_eq!(err.cause, Some(RawError::new("network down")));
    }

    #[test]
    fn test_empty_message_gets_kind_text() {
        let err = classify(&RawError::with_code("23505", ""));
        assert_eq!(err.message, "conflict");
    }

    #[test]
    fn test_extra_codes_take_precedence() {
        let mut extra = HashMap::new();
        extra.insert("P0001".to_string(), ErrorKind::BadRequest);
        extra.insert("23505".to_string(), ErrorKind::Unknown);
        let classifier = ErrorClassifier::new(extra);

        assert_eq!(
            classifier.classify(&RawError::with_code("P0001", "raise")).kind,
            ErrorKind::BadRequest
        );
        assert_eq!(
            classifier.classify(&RawError::with_code("23505", "dup")).kind,
            ErrorKind::Unknown
        );
        assert_eq!(
            classifier.classify(&RawError::with_code("42501", "rls")).kind,
            ErrorKind::Forbidden
        );
    }

    #[test]
    fn test_classify_trait() {
        let classifier = ErrorClassifier::new(HashMap::from([(
            "P0001".to_string(),
            ErrorKind::Conflict,
        )]));
        let raw = RawError::with_code("P0001", "raise");
        assert_eq!(raw.error_kind(), ErrorKind::Unknown);
        assert_eq!(raw.classify_with(&classifier).kind, ErrorKind::Conflict);

        let domain = DomainError::new(ErrorKind::NotFound, "gone");
        assert_eq!(domain.classify_with(&classifier), domain);
    }
}
