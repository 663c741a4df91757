//! Warehouse backend implementations.
//!
//! Each backend is implemented in its own file and gated behind a feature flag.

use async_trait::async_trait;

use crate::error::Result;
use crate::executor::QueryResult;

/// SQL in, relation or error text out.
///
/// Errors should be [`crate::error::SqlPilotError::Warehouse`] carrying the
/// warehouse's own message, since failures are classified by matching it.
#[async_trait]
pub trait WarehouseConnection: Send + Sync {
    /// Project that owns the dataset and is billed for queries.
    fn project_id(&self) -> &str;
    fn dataset(&self) -> &str;
    async fn execute_sql(&self, sql: &str) -> Result<QueryResult>;
}

#[cfg(feature = "bigquery")]
pub mod bigquery;
