//! Request orchestration
//!
//! Caching, in-flight deduplication, rate limiting, retries and bounded
//! batching around a plain request/response data service.

pub mod batch;
pub mod classifier;
pub mod inflight;
pub mod metrics;
pub mod orchestrator;
pub mod rate_limit;
pub mod retry;


// Re-export commonly used types
pub use batch::{BatchExecutor, BatchItem};
pub use classifier::{classify, Classify, ErrorClassifier};
pub use inflight::InFlightRegistry;
pub use metrics::OrchestratorMetrics;
pub use orchestrator::{AnyValue, CallOptions, OrchestratorStats, RequestOrchestrator};
pub use rate_limit::{RateLimiter, RateWindow};
pub use retry::RetryPolicy;
