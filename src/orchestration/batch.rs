use std::{collections::HashMap, future::Future, time::Duration};

use futures::{future::BoxFuture, FutureExt};
use log::{debug, info};

use crate::{
    config::BatchFailurePolicy,
    core::{CallOutcome, DomainError},
};

use super::orchestrator::{CallOptions, RequestOrchestrator};

type BatchOperation<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, DomainError>> + Send>;

/// One keyed operation in a batch.
pub struct BatchItem<T> {
    pub key: String,
    pub fallback: T,
    operation: BatchOperation<T>,
}

impl<T> BatchItem<T>
where
    T: Send + 'static,
{
    pub fn new<F, Fut, E>(key: impl Into<String>, fallback: T, operation: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<DomainError> + 'static,
    {
        Self {
            key: key.into(),
            fallback,
            operation: Box::new(move || {
                operation()
                    .map(|r| r.map_err(Into::<DomainError>::into))
                    .boxed()
            }),
        }
    }
}

/// Runs keyed operations through the orchestrator with a fixed concurrency
/// ceiling.
///
/// Items are taken in chunks; a chunk runs concurrently and the next chunk
/// starts only once every item of the current one has settled. One failing
/// item never aborts the batch.
pub struct BatchExecutor<'a> {
    orchestrator: &'a RequestOrchestrator,
    concurrency: usize,
    on_failure: BatchFailurePolicy,
    ttl: Option<Duration>,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(orchestrator: &'a RequestOrchestrator) -> Self {
        Self {
            orchestrator,
            concurrency: 3,
            on_failure: BatchFailurePolicy::Omit,
            ttl: None,
        }
    }

    /// Items per chunk. Zero is treated as one.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn on_failure(mut self, on_failure: BatchFailurePolicy) -> Self {
        self.on_failure = on_failure;
        self
    }

    pub fn ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub async fn run<T>(&self, items: Vec<BatchItem<T>>) -> HashMap<String, T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let total = items.len();
        let mut results = HashMap::with_capacity(total);
        let mut items = items.into_iter().peekable();

        while items.peek().is_some() {
            let chunk: Vec<_> = items.by_ref().take(self.concurrency).collect();
            debug!("Running batch chunk of {} items", chunk.len());

            let settled =
                futures::future::join_all(chunk.into_iter().map(|item| self.run_item(item))).await;

            for (key, fallback, outcome) in settled {
                match outcome.value() {
                    Some(value) => {
                        results.insert(key, value);
                    }
                    None if self.on_failure == BatchFailurePolicy::Fallback => {
                        results.insert(key, fallback);
                    }
                    None => debug!("Omitting failed batch item {key}"),
                }
            }
        }

        info!("Batch finished: {} of {total} items resolved", results.len());
        results
    }

    async fn run_item<T>(&self, item: BatchItem<T>) -> (String, T, CallOutcome<T>)
    where
        T: Clone + Send + Sync + 'static,
    {
        let BatchItem {
            key,
            fallback,
            operation,
        } = item;

        let mut options = CallOptions::cached(key.clone());
        options.ttl = self.ttl;

        let outcome = self
            .orchestrator
            .execute_with_outcome(&format!("batch:{key}"), operation, options)
            .await;
        (key, fallback, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, core::RawError};

    fn orchestrator() -> RequestOrchestrator {
        RequestOrchestrator::new(Config::default()).unwrap()
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let orchestrator = orchestrator();
        let results = orchestrator.run_batch(Vec::<BatchItem<u32>>::new(), None).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_fallback_policy_fills_failed_keys() {
        let orchestrator = orchestrator();
        let items = vec![
            BatchItem::new("ok", 0, || async { Ok::<_, RawError>(1) }),
            BatchItem::new("bad", -1, || async {
                Err::<i32, _>(RawError::with_code("42501", "denied"))
            }),
        ];

        let results = orchestrator
            .batch()
            .on_failure(BatchFailurePolicy::Fallback)
            .run(items)
            .await;
        assert_eq!(results.get("ok"), Some(&1));
        assert_eq!(results.get("bad"), Some(&-1));
    }

    #[tokio::test]
    async fn test_items_use_the_cache() {
        let orchestrator = orchestrator();
        let first = vec![BatchItem::new("events:count", 0, || async { Ok::<_, RawError>(12) })];
        orchestrator.run_batch(first, Some(Duration::from_secs(60))).await;

        let second = vec![BatchItem::new("events:count", 0, || async {
            Err::<i32, _>(RawError::new("should not be called"))
        })];
        let results = orchestrator.run_batch(second, None).await;
        assert_eq!(results.get("events:count"), Some(&12));
    }
}
