use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use crate::core::{ErrorContext, OrchestratorResult};

/// Counters owned by one orchestrator instance.
///
/// Each orchestrator keeps its own registry so independent instances (and
/// tests) never share counts.
pub struct OrchestratorMetrics {
    registry: Registry,
    // Terminal state of every call, labelled by operation and outcome
    pub(crate) calls: IntCounterVec,
    // Real upstream invocations; joiners and cache hits are not counted
    pub(crate) upstream_calls: IntCounterVec,
    pub(crate) retries: IntCounterVec,
}

impl OrchestratorMetrics {
    pub fn new() -> OrchestratorResult<Self> {
        let registry = Registry::new();

        let calls = IntCounterVec::new(
            Opts::new(
                "orchestrator_calls_total",
                "Orchestrated calls by terminal outcome",
            ),
            &["operation", "outcome"],
        )?;
        let upstream_calls = IntCounterVec::new(
            Opts::new(
                "orchestrator_upstream_calls_total",
                "Operations actually invoked against the data service",
            ),
            &["operation"],
        )?;
        let retries = IntCounterVec::new(
            Opts::new(
                "orchestrator_retries_total",
                "Retry attempts made by the retry policy",
            ),
            &["operation"],
        )?;

        registry.register(Box::new(calls.clone()))?;
        registry.register(Box::new(upstream_calls.clone()))?;
        registry.register(Box::new(retries.clone()))?;

        Ok(Self {
            registry,
            calls,
            upstream_calls,
            retries,
        })
    }

    pub fn call_count(&self, operation: &str, outcome: &str) -> u64 {
        self.calls.with_label_values(&[operation, outcome]).get()
    }

    pub fn upstream_count(&self, operation: &str) -> u64 {
        self.upstream_calls.with_label_values(&[operation]).get()
    }

    pub fn retry_count(&self, operation: &str) -> u64 {
        self.retries.with_label_values(&[operation]).get()
    }

    /// Render all counters in the Prometheus text format.
    pub fn gather(&self) -> OrchestratorResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).with_context("metrics are not valid UTF-8")
    }
}
