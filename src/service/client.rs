//! Orchestrated data-access client
//!
//! Reads are cached, deduplicated and rate limited, and degrade to an empty
//! row set. Writes are retried and report their error; a successful write
//! drops every cached read of its table.

use std::{future::Future, sync::Arc};

use log::{debug, info};
use serde_json::Value as JsonValue;

use crate::{
    core::{CallOutcome, DomainError, RawError},
    orchestration::{CallOptions, RequestOrchestrator},
};

use super::{DataService, Filter};

pub struct OrchestratedClient {
    service: Arc<dyn DataService>,
    orchestrator: Arc<RequestOrchestrator>,
}

impl OrchestratedClient {
    pub fn new(service: Arc<dyn DataService>, orchestrator: Arc<RequestOrchestrator>) -> Self {
        Self {
            service,
            orchestrator,
        }
    }

    pub fn orchestrator(&self) -> &RequestOrchestrator {
        &self.orchestrator
    }

    pub fn cache_key(table: &str, filter: &Filter) -> String {
        format!("{table}:{filter}")
    }

    /// Matching rows, or an empty set if the read is refused or fails.
    pub async fn select(&self, table: &str, filter: &Filter) -> Vec<JsonValue> {
        self.select_with_outcome(table, filter)
            .await
            .into_value(Vec::new())
    }

    pub async fn select_with_outcome(
        &self,
        table: &str,
        filter: &Filter,
    ) -> CallOutcome<Vec<JsonValue>> {
        let service = Arc::clone(&self.service);
        let owned_table = table.to_string();
        let owned_filter = filter.clone();

        self.orchestrator
            .execute_with_outcome(
                &format!("select:{table}"),
                move || async move { service.select(&owned_table, &owned_filter).await },
                CallOptions::cached(Self::cache_key(table, filter)),
            )
            .await
    }

    pub async fn insert(&self, table: &str, row: JsonValue) -> Result<JsonValue, DomainError> {
        let service = Arc::clone(&self.service);
        let owned_table = table.to_string();
        self.write("insert", table, move || {
            let service = Arc::clone(&service);
            let table = owned_table.clone();
            let row = row.clone();
            async move { service.insert(&table, row).await }
        })
        .await
    }

    pub async fn update(
        &self,
        table: &str,
        filter: &Filter,
        patch: JsonValue,
    ) -> Result<Vec<JsonValue>, DomainError> {
        let service = Arc::clone(&self.service);
        let owned_table = table.to_string();
        let filter = filter.clone();
        self.write("update", table, move || {
            let service = Arc::clone(&service);
            let table = owned_table.clone();
            let filter = filter.clone();
            let patch = patch.clone();
            async move { service.update(&table, &filter, patch).await }
        })
        .await
    }

    pub async fn delete(&self, table: &str, filter: &Filter) -> Result<usize, DomainError> {
        let service = Arc::clone(&self.service);
        let owned_table = table.to_string();
        let filter = filter.clone();
        self.write("delete", table, move || {
            let service = Arc::clone(&service);
            let table = owned_table.clone();
            let filter = filter.clone();
            async move { service.delete(&table, &filter).await }
        })
        .await
    }

    async fn write<T, F, Fut>(&self, verb: &str, table: &str, operation: F) -> Result<T, DomainError>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, RawError>> + Send + 'static,
    {
        let operation_name = format!("{verb}:{table}");
        match self.orchestrator.retrying(&operation_name, operation).await {
            Ok(value) => {
                let dropped = self
                    .orchestrator
                    .invalidate_cache(Some(&format!("^{}:", regex::escape(table))));
                debug!("{operation_name} invalidated {dropped} cached reads");
                Ok(value)
            }
            Err(err) => {
                info!("{operation_name} failed: {err}");
                Err(err)
            }
        }
    }
}
