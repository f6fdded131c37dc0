//! Data-access layer
//!
//! [`DataService`] is the generic request interface of the backing store.
//! [`OrchestratedClient`] puts a [`RequestOrchestrator`](crate::orchestration::RequestOrchestrator)
//! in front of any implementation.

use std::{collections::BTreeMap, fmt};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::core::RawError;

pub mod client;
pub mod memory;

pub use client::OrchestratedClient;
pub use memory::MemoryDataService;

/// Equality filter over row columns. An empty filter matches every row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    conditions: BTreeMap<String, JsonValue>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self::all().and(column, value)
    }

    pub fn and(mut self, column: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.conditions.insert(column.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, row: &JsonValue) -> bool {
        self.conditions
            .iter()
            .all(|(column, value)| row.get(column) == Some(value))
    }
}

/// Stable textual form, used as the filter part of cache keys.
impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.conditions.is_empty() {
            return f.write_str("*");
        }
        for (i, (column, value)) in self.conditions.iter().enumerate() {
            if i > 0 {
                f.write_str("&")?;
            }
            write!(f, "{column}={value}")?;
        }
        Ok(())
    }
}

/// Request interface of the backing data store.
///
/// Errors are reported in the store's own vocabulary and classified by the
/// orchestration layer.
#[async_trait]
pub trait DataService: Send + Sync {
    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<JsonValue>, RawError>;

    /// Insert one row and return it as stored.
    async fn insert(&self, table: &str, row: JsonValue) -> Result<JsonValue, RawError>;

    /// Merge `patch` into every matching row and return the updated rows.
    async fn update(
        &self,
        table: &str,
        filter: &Filter,
        patch: JsonValue,
    ) -> Result<Vec<JsonValue>, RawError>;

    /// Delete every matching row, returning how many were removed.
    async fn delete(&self, table: &str, filter: &Filter) -> Result<usize, RawError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_filter_display_is_stable() {
        assert_eq!(Filter::all().to_string(), "*");

        let a = Filter::eq("status", "approved").and("org_id", 7);
        let b = Filter::eq("org_id", 7).and("status", "approved");
        assert_eq!(a.to_string(), "org_id=7&status=\"approved\"");
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_filter_matches() {
        let row = json!({"id": "1", "status": "approved"});
        assert!(Filter::all().matches(&row));
        assert!(Filter::eq("status", "approved").matches(&row));
        assert!(!Filter::eq("status", "pending").matches(&row));
        assert!(!Filter::eq("missing", 1).matches(&row));
    }
}
