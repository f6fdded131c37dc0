use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use log::debug;
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::core::RawError;

use super::{DataService, Filter};

struct InjectedFailure {
    error: RawError,
    // None fails forever
    remaining: Option<u32>,
}

/// In-memory tables of JSON rows.
///
/// Rows are JSON objects keyed by an `id` column, generated on insert when
/// missing. Failures can be injected per table to exercise error handling.
#[derive(Default)]
pub struct MemoryDataService {
    tables: DashMap<String, Vec<JsonValue>>,
    failures: DashMap<String, InjectedFailure>,
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl MemoryDataService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every request by `latency` before it is served.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn with_rows(self, table: &str, rows: Vec<JsonValue>) -> Self {
        self.tables.insert(table.to_string(), rows);
        self
    }

    /// Fail every request against `table` with `error`.
    pub fn fail_always(&self, table: &str, error: RawError) {
        self.failures.insert(
            table.to_string(),
            InjectedFailure {
                error,
                remaining: None,
            },
        );
    }

    /// Fail the next `times` requests against `table` with `error`.
    pub fn fail_times(&self, table: &str, error: RawError, times: u32) {
        if times == 0 {
            return;
        }
        self.failures.insert(
            table.to_string(),
            InjectedFailure {
                error,
                remaining: Some(times),
            },
        );
    }

    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    /// Requests served so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn rows(&self, table: &str) -> Vec<JsonValue> {
        self.tables
            .get(table)
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    async fn begin(&self, table: &str) -> Result<(), RawError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let (error, exhausted) = match self.failures.get_mut(table) {
            Some(mut failure) => {
                let exhausted = match failure.remaining.as_mut() {
                    Some(remaining) => {
                        *remaining -= 1;
                        *remaining == 0
                    }
                    None => false,
                };
                (failure.error.clone(), exhausted)
            }
            None => return Ok(()),
        };

        if exhausted {
            self.failures.remove(table);
        }
        debug!("Injected failure on {table}: {error}");
        Err(error)
    }
}

fn as_object(row: JsonValue) -> Result<Map<String, JsonValue>, RawError> {
    match row {
        JsonValue::Object(map) => Ok(map),
        other => Err(RawError::with_code(
            "PGRST102",
            format!("expected a JSON object, got {other}"),
        )),
    }
}

#[async_trait]
impl DataService for MemoryDataService {
    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<JsonValue>, RawError> {
        self.begin(table).await?;
        Ok(self
            .tables
            .get(table)
            .map(|rows| rows.iter().filter(|row| filter.matches(row)).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(&self, table: &str, row: JsonValue) -> Result<JsonValue, RawError> {
        self.begin(table).await?;
        let mut row = as_object(row)?;
        row.entry("id")
            .or_insert_with(|| JsonValue::String(Uuid::new_v4().to_string()));
        let row = JsonValue::Object(row);

        let mut rows = self.tables.entry(table.to_string()).or_default();
        if rows.iter().any(|existing| existing.get("id") == row.get("id")) {
            return Err(RawError::with_code(
                "23505",
                format!("duplicate key value violates unique constraint \"{table}_pkey\""),
            ));
        }
        rows.push(row.clone());
        Ok(row)
    }

    async fn update(
        &self,
        table: &str,
        filter: &Filter,
        patch: JsonValue,
    ) -> Result<Vec<JsonValue>, RawError> {
        self.begin(table).await?;
        let patch = as_object(patch)?;

        let mut updated = Vec::new();
        if let Some(mut rows) = self.tables.get_mut(table) {
            for row in rows.iter_mut().filter(|row| filter.matches(row)) {
                if let JsonValue::Object(fields) = row {
                    fields.extend(patch.clone());
                }
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<usize, RawError> {
        self.begin(table).await?;
        let Some(mut rows) = self.tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|row| !filter.matches(row));
        Ok(before - rows.len())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_crud() {
        let service = MemoryDataService::new();

        let org = service
            .insert("organizations", json!({"name": "Clinic", "status": "pending"}))
            .await
            .unwrap();
        assert!(org.get("id").is_some());

        service
            .insert("organizations", json!({"id": "o2", "name": "School", "status": "pending"}))
            .await
            .unwrap();

        let updated = service
            .update(
                "organizations",
                &Filter::eq("id", "o2"),
                json!({"status": "approved"}),
            )
            .await
            .unwrap();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0]["status"], "approved");

        let approved = service
            .select("organizations", &Filter::eq("status", "approved"))
            .await
            .unwrap();
        assert_eq!(approved.len(), 1);

        let removed = service
            .delete("organizations", &Filter::eq("status", "pending"))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(service.rows("organizations").len(), 1);
        assert_eq!(service.calls(), 5);
    }

    #[tokio::test]
    async fn test_duplicate_id_and_bad_rows() {
        let service = MemoryDataService::new().with_rows("events", vec![json!({"id": "e1"})]);

        let dup = service.insert("events", json!({"id": "e1"})).await;
        assert_eq!(dup.unwrap_err().code.as_deref(), Some("23505"));

        let bad = service.insert("events", json!(["not", "a", "row"])).await;
        assert_eq!(bad.unwrap_err().code.as_deref(), Some("PGRST102"));
    }

    #[tokio::test]
    async fn test_unknown_table_is_empty() {
        let service = MemoryDataService::new();
        assert!(service.select("reports", &Filter::all()).await.unwrap().is_empty());
        assert_eq!(service.delete("reports", &Filter::all()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let service = MemoryDataService::new();

        service.fail_times("events", RawError::new("timeout"), 2);
        assert!(service.select("events", &Filter::all()).await.is_err());
        assert!(service.select("events", &Filter::all()).await.is_err());
        assert!(service.select("events", &Filter::all()).await.is_ok());

        service.fail_always("events", RawError::with_code("42501", "denied"));
        for _ in 0..3 {
            assert!(service.select("events", &Filter::all()).await.is_err());
        }
        // Other tables are unaffected.
        assert!(service.select("reports", &Filter::all()).await.is_ok());

        service.clear_failures();
        assert!(service.select("events", &Filter::all()).await.is_ok());
    }
}
