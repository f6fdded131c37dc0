//! Per-call outcome of an orchestrated request.

use super::domain::DomainError;

/// Terminal state of one orchestrated call.
///
/// `execute` collapses this into a plain value; callers that need to know
/// whether they are looking at real data use `execute_with_outcome`.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome<T> {
    /// Served from a fresh cache entry, no upstream call made.
    CacheHit(T),
    /// Produced by an upstream call (possibly one shared with other callers).
    Fresh(T),
    /// Refused by the rate limiter.
    RateLimited,
    /// The upstream call failed.
    Failed(DomainError),
}

impl<T> CallOutcome<T> {
    pub fn label(&self) -> &'static str {
        match self {
            CallOutcome::CacheHit(_) => "cache_hit",
            CallOutcome::Fresh(_) => "succeeded",
            CallOutcome::RateLimited => "rate_limited",
            CallOutcome::Failed(_) => "failed",
        }
    }

    pub fn is_genuine(&self) -> bool {
        matches!(self, CallOutcome::CacheHit(_) | CallOutcome::Fresh(_))
    }

    /// The genuine value, if any.
    pub fn value(self) -> Option<T> {
        match self {
            CallOutcome::CacheHit(v) | CallOutcome::Fresh(v) => Some(v),
            CallOutcome::RateLimited | CallOutcome::Failed(_) => None,
        }
    }

    pub fn into_value(self, fallback: T) -> T {
        self.value().unwrap_or(fallback)
    }
}
