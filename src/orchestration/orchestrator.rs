//! Request orchestration
//!
//! Every data-access call funnels through [`RequestOrchestrator::execute`]:
//! cache check, rate-limit admission, in-flight deduplication, execution and
//! cache population. Failures never escape; the caller gets its fallback.

use std::{any::Any, collections::HashMap, future::Future, sync::Arc, time::Duration};

use log::{debug, trace, warn};
use serde::Serialize;

use crate::{
    cache::FingerprintCache,
    config::{Config, RateLimitConfig},
    core::{CallOutcome, DomainError, OrchestratorResult},
};

use super::{
    batch::{BatchExecutor, BatchItem},
    classifier::{Classify, ErrorClassifier},
    inflight::{run_detached, InFlightRegistry},
    metrics::OrchestratorMetrics,
    rate_limit::RateLimiter,
    retry::RetryPolicy,
};

/// Type-erased value stored in the cache and shared between joined callers.
pub type AnyValue = Arc<dyn Any + Send + Sync>;

/// Per-call cache settings.
///
/// Without a cache key the call is neither cached nor deduplicated.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub cache_key: Option<String>,
    pub ttl: Option<Duration>,
}

impl CallOptions {
    pub fn uncached() -> Self {
        Self::default()
    }

    pub fn cached(key: impl Into<String>) -> Self {
        Self {
            cache_key: Some(key.into()),
            ttl: None,
        }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Point-in-time view of the orchestrator's shared state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestratorStats {
    pub cached_entries: usize,
    pub in_flight: usize,
    pub rate_windows: usize,
}

pub struct RequestOrchestrator {
    config: Config,
    cache: FingerprintCache<AnyValue>,
    inflight: InFlightRegistry<AnyValue>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    classifier: Arc<ErrorClassifier>,
    metrics: OrchestratorMetrics,
}

impl RequestOrchestrator {
    pub fn new(config: Config) -> OrchestratorResult<Self> {
        Ok(Self {
            cache: FingerprintCache::new(),
            inflight: InFlightRegistry::new(),
            limiter: RateLimiter::new(config.rate_limit.clone()),
            retry: RetryPolicy::from_config(&config.retry),
            classifier: Arc::new(ErrorClassifier::new(config.classifier.codes.clone())),
            metrics: OrchestratorMetrics::new()?,
            config,
        })
    }

    /// Run `operation` through the orchestration pipeline.
    ///
    /// Never fails: a rate-limited or failed call resolves to `fallback`.
    pub async fn execute<T, F, Fut, E>(
        &self,
        operation_name: &str,
        operation: F,
        fallback: T,
        options: CallOptions,
    ) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Classify + Send + 'static,
    {
        self.execute_with_outcome(operation_name, operation, options)
            .await
            .into_value(fallback)
    }

    /// Like [`execute`](Self::execute), but reports how the value was obtained.
    pub async fn execute_with_outcome<T, F, Fut, E>(
        &self,
        operation_name: &str,
        operation: F,
        options: CallOptions,
    ) -> CallOutcome<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Classify + Send + 'static,
    {
        let outcome = self.orchestrate(operation_name, operation, &options).await;
        self.metrics
            .calls
            .with_label_values(&[operation_name, outcome.label()])
            .inc();
        outcome
    }

    async fn orchestrate<T, F, Fut, E>(
        &self,
        operation_name: &str,
        operation: F,
        options: &CallOptions,
    ) -> CallOutcome<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Classify + Send + 'static,
    {
        let cache_key = options.cache_key.as_deref();

        // 1. cache
        if let Some(key) = cache_key {
            match self.cache.get(key).map(|value| value.downcast_ref::<T>().cloned()) {
                Some(Some(value)) => {
                    trace!("Cache hit for {operation_name} ({key})");
                    return CallOutcome::CacheHit(value);
                }
                Some(None) => debug!("Cache entry {key} holds another type, ignoring"),
                None => trace!("Cache miss for {operation_name} ({key})"),
            }
        }

        // 2. rate limit
        if !self.limiter.try_admit(operation_name) {
            warn!("Rate limit exceeded for {operation_name}, serving fallback");
            return CallOutcome::RateLimited;
        }

        // 3. execute, sharing the call with identical concurrent requests
        let generation = self.cache.generation();
        let upstream = self.metrics.upstream_calls.with_label_values(&[operation_name]);
        let classifier = Arc::clone(&self.classifier);
        let wrapped = move || {
            upstream.inc();
            let fut = operation();
            async move {
                fut.await
                    .map(|value| Arc::new(value) as AnyValue)
                    .map_err(|err| err.classify_with(&classifier))
            }
        };

        let dedupe_key = match cache_key {
            Some(key) => Some(key),
            None if self.config.inflight.dedupe_without_key => Some(operation_name),
            None => None,
        };
        let result = match dedupe_key {
            Some(key) => self.inflight.begin_or_join(key, wrapped).await,
            None => run_detached(operation_name, wrapped).await,
        };

        let value = result.and_then(|value| {
            value.downcast_ref::<T>().cloned().ok_or_else(|| {
                DomainError::unknown(format!("{operation_name} shared a value of another type"))
            })
        });

        match value {
            // 4. populate cache
            Ok(value) => {
                if let Some(key) = cache_key {
                    let ttl = options.ttl.unwrap_or_else(|| self.config.cache.default_ttl());
                    let stored: AnyValue = Arc::new(value.clone());
                    if self.config.cache.versioned_writes {
                        self.cache.set_if_generation(key, stored, ttl, generation);
                    } else {
                        self.cache.set(key, stored, ttl);
                    }
                }
                CallOutcome::Fresh(value)
            }
            // 5. fall back
            Err(err) => {
                warn!("{operation_name} failed ({err}), serving fallback");
                CallOutcome::Failed(err)
            }
        }
    }

    /// [`execute`](Self::execute) with `operation` wrapped in the configured
    /// retry policy. Cache, rate limit and dedup see the retried call as one
    /// call.
    pub async fn with_retry<T, F, Fut, E>(
        &self,
        operation_name: &str,
        operation: F,
        fallback: T,
        options: CallOptions,
    ) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Classify + Send + 'static,
    {
        let retried = self.retrying(operation_name, operation);
        self.execute(operation_name, move || retried, fallback, options)
            .await
    }

    /// Wrap `operation` in the retry policy, classifying every error with this
    /// orchestrator's classifier.
    pub(crate) fn retrying<T, F, Fut, E>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> impl Future<Output = Result<T, DomainError>> + Send + 'static
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Classify + Send + 'static,
    {
        let policy = self.retry.clone();
        let classifier = Arc::clone(&self.classifier);
        let retries = self.metrics.retries.with_label_values(&[operation_name]);

        async move {
            let mut attempts = 0u32;
            policy
                .run(|| {
                    if attempts > 0 {
                        retries.inc();
                    }
                    attempts += 1;
                    let fut = operation();
                    let classifier = Arc::clone(&classifier);
                    async move { fut.await.map_err(|err| err.classify_with(&classifier)) }
                })
                .await
        }
    }

    /// Drop every cached entry, or those whose key matches `pattern`.
    /// Returns how many entries were removed.
    pub fn invalidate_cache(&self, pattern: Option<&str>) -> usize {
        self.cache.invalidate(pattern)
    }

    /// Run `items` in chunks of the configured concurrency.
    pub async fn run_batch<T>(&self, items: Vec<BatchItem<T>>, ttl: Option<Duration>) -> HashMap<String, T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.batch().ttl(ttl).run(items).await
    }

    /// Batch executor preconfigured from this orchestrator's settings.
    pub fn batch(&self) -> BatchExecutor<'_> {
        BatchExecutor::new(self)
            .concurrency(self.config.batch.concurrency)
            .on_failure(self.config.batch.on_failure)
    }

    pub fn update_rate_limits(&self, config: RateLimitConfig) {
        self.limiter.update_config(config);
    }

    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            cached_entries: self.cache.len(),
            in_flight: self.inflight.len(),
            rate_windows: self.limiter.tracked(),
        }
    }

    pub fn metrics(&self) -> &OrchestratorMetrics {
        &self.metrics
    }

    pub fn gather_metrics(&self) -> OrchestratorResult<String> {
        self.metrics.gather()
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
