//! In-flight request registry
//!
//! Concurrent callers asking for the same key share one upstream call. The
//! call runs on its own task, so it settles and clears its entry even if every
//! caller stops waiting for it.

use std::{future::Future, panic::AssertUnwindSafe, sync::Arc};

use dashmap::{mapref::entry::Entry, DashMap};
use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use log::{debug, warn};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::core::DomainError;

type SharedOutcome<V> = Shared<BoxFuture<'static, Result<V, DomainError>>>;

struct PendingRequest<V> {
    id: Uuid,
    handle: SharedOutcome<V>,
}

pub struct InFlightRegistry<V> {
    pending: Arc<DashMap<String, PendingRequest<V>>>,
}

impl<V> Default for InFlightRegistry<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> InFlightRegistry<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Start `operation` for `key`, or wait on the call already running for it.
    ///
    /// `operation` is only invoked when this caller starts the call. Every
    /// caller, starter or joiner, observes the same outcome.
    pub async fn begin_or_join<F, Fut>(&self, key: &str, operation: F) -> Result<V, DomainError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, DomainError>> + Send + 'static,
    {
        let (handle, started) = match self.pending.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                debug!("Joining in-flight request {} for {key}", entry.get().id);
                (entry.get().handle.clone(), None)
            }
            Entry::Vacant(entry) => {
                let id = Uuid::new_v4();
                let (tx, rx) = oneshot::channel();
                let handle = rx
                    .map(|settled| {
                        settled.unwrap_or_else(|_| {
                            Err(DomainError::unknown("in-flight request was dropped"))
                        })
                    })
                    .boxed()
                    .shared();
                entry.insert(PendingRequest {
                    id,
                    handle: handle.clone(),
                });
                (handle, Some((id, tx)))
            }
        };

        // The shard lock is released before user code runs.
        if let Some((id, tx)) = started {
            debug!("Starting in-flight request {id} for {key}");
            self.launch(key.to_string(), id, operation, tx);
        }

        handle.await
    }

    fn launch<F, Fut>(
        &self,
        key: String,
        id: Uuid,
        operation: F,
        tx: oneshot::Sender<Result<V, DomainError>>,
    ) where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, DomainError>> + Send + 'static,
    {
        let started = std::panic::catch_unwind(AssertUnwindSafe(operation));
        let pending = Arc::clone(&self.pending);

        tokio::spawn(async move {
            let result = settle(&key, started).await;

            // Clear the entry first, then wake every joined caller.
            pending.remove_if(&key, |_, request| request.id == id);
            let _ = tx.send(result);
        });
    }

    /// Number of keys with a call currently in flight.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }
}

/// Run `operation` on its own task without sharing it with anyone.
///
/// Same settlement rules as a registered call: it runs to completion even if
/// the caller goes away, and a panic comes back as an `Unknown` error.
pub async fn run_detached<V, F, Fut>(label: &str, operation: F) -> Result<V, DomainError>
where
    V: Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, DomainError>> + Send + 'static,
{
    let started = std::panic::catch_unwind(AssertUnwindSafe(operation));
    let label = label.to_string();

    tokio::spawn(async move { settle(&label, started).await })
        .await
        .unwrap_or_else(|e| Err(DomainError::unknown(format!("task failed: {e}"))))
}

async fn settle<V, Fut>(label: &str, started: std::thread::Result<Fut>) -> Result<V, DomainError>
where
    Fut: Future<Output = Result<V, DomainError>>,
{
    match started {
        Ok(fut) => AssertUnwindSafe(fut)
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(panicked(label))),
        Err(_) => Err(panicked(label)),
    }
}

fn panicked(label: &str) -> DomainError {
    warn!("Operation for {label} panicked");
    DomainError::unknown(format!("operation for {label} panicked"))
}
