//! Query execution and failure classification.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::backends::WarehouseConnection;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    /// Type declared by the warehouse, e.g. `STRING` or `FLOAT64`.
    #[serde(default)]
    pub data_type: Option<String>,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, data_type: Option<&str>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Map<String, Value>>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Values of one column, `Null` where a row lacks it.
    pub fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.rows
            .iter()
            .map(move |row| row.get(name).unwrap_or(&Value::Null))
    }

    /// The only value of a one-row, one-column result.
    pub fn scalar(&self) -> Option<&Value> {
        match (self.columns.as_slice(), self.rows.as_slice()) {
            ([column], [row]) => row.get(&column.name),
            _ => None,
        }
    }
}

/// Known type-mismatch failures, each with a deterministic fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    StringSumMismatch,
    StringIntCompareMismatch,
    StringFloatCompareMismatch,
    Unclassified,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Success(QueryResult),
    EmptyResult,
    TypedFailure { error: String, kind: FailureKind },
    OtherFailure { error: String },
}

impl ExecutionOutcome {
    pub fn from_error(error: String) -> Self {
        match classify_error(&error) {
            Some(kind) => ExecutionOutcome::TypedFailure { error, kind },
            None => ExecutionOutcome::OtherFailure { error },
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ExecutionOutcome::TypedFailure { .. } | ExecutionOutcome::OtherFailure { .. }
        )
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::TypedFailure { error, .. } | ExecutionOutcome::OtherFailure { error } => {
                Some(error)
            }
            _ => None,
        }
    }
}

/// Classify a warehouse error message; `None` means the failure is not a
/// type mismatch.
pub fn classify_error(error: &str) -> Option<FailureKind> {
    let text = error.to_lowercase();
    if text.contains("aggregate function sum") && text.contains("string") {
        return Some(FailureKind::StringSumMismatch);
    }
    if text.contains("operator =") {
        if text.contains("int64, string") || text.contains("string, int64") {
            return Some(FailureKind::StringIntCompareMismatch);
        }
        if text.contains("float64, string") || text.contains("string, float64") {
            return Some(FailureKind::StringFloatCompareMismatch);
        }
    }
    if text.contains("no matching signature") {
        return Some(FailureKind::Unclassified);
    }
    None
}

/// Runs canonical queries once each; retries belong to the repair engine.
#[derive(Clone)]
pub struct Executor {
    connection: Arc<dyn WarehouseConnection>,
}

impl Executor {
    pub fn new(connection: Arc<dyn WarehouseConnection>) -> Self {
        Self { connection }
    }

    pub fn connection(&self) -> &Arc<dyn WarehouseConnection> {
        &self.connection
    }

    pub async fn execute(&self, sql: &str) -> ExecutionOutcome {
        let started = Instant::now();
        tracing::debug!(
            project = self.connection.project_id(),
            dataset = self.connection.dataset(),
            "executing query"
        );
        tracing::trace!(sql = %sql, "query text");
        match self.connection.execute_sql(sql).await {
            Ok(result) if result.is_empty() => {
                tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "query returned no rows");
                ExecutionOutcome::EmptyResult
            }
            Ok(result) => {
                tracing::debug!(
                    rows = result.rows.len(),
                    columns = result.columns.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "query succeeded"
                );
                ExecutionOutcome::Success(result)
            }
            Err(e) => {
                let outcome = ExecutionOutcome::from_error(e.to_string());
                tracing::debug!(
                    error = %e,
                    typed = matches!(outcome, ExecutionOutcome::TypedFailure { .. }),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "query failed"
                );
                outcome
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_mismatches() {
        assert_eq!(
            classify_error("No matching signature for aggregate function SUM for argument types: STRING"),
            Some(FailureKind::StringSumMismatch)
        );
        assert_eq!(
            classify_error("No matching signature for operator = for argument types: INT64, STRING"),
            Some(FailureKind::StringIntCompareMismatch)
        );
        assert_eq!(
            classify_error("No matching signature for operator = for argument types: STRING, FLOAT64"),
            Some(FailureKind::StringFloatCompareMismatch)
        );
        assert_eq!(
            classify_error("No matching signature for function DATE_DIFF"),
            Some(FailureKind::Unclassified)
        );
        assert_eq!(classify_error("Unrecognized name: FOO at [1:8]"), None);
    }

    #[test]
    fn scalar_requires_one_cell() {
        let mut row = Map::new();
        row.insert("total".to_string(), Value::from(12));
        let result = QueryResult {
            columns: vec![ColumnMeta::new("total", Some("INT64"))],
            rows: vec![row.clone()],
        };
        assert_eq!(result.scalar(), Some(&Value::from(12)));

        let two_rows = QueryResult {
            rows: vec![row.clone(), row],
            ..result
        };
        assert_eq!(two_rows.scalar(), None);
    }
}
