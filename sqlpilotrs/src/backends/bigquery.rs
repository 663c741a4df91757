//! BigQuery backend implementation using gcp-bigquery-client.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use gcp_bigquery_client::model::query_request::QueryRequest;
use gcp_bigquery_client::model::query_response::{QueryResponse, ResultSet};
use gcp_bigquery_client::Client;

use crate::config::BigQueryConfig;
use crate::error::{Result, SqlPilotError};
use crate::executor::{ColumnMeta, QueryResult};

use super::WarehouseConnection;

pub struct BigQueryConnection {
    client: Client,
    project_id: String,
    dataset: String,
    config: BigQueryConfig,
}

impl BigQueryConnection {
    /// Create a new BigQuery connection from a service account key file.
    ///
    /// # Arguments
    /// * `service_account_path` - Path to the GCP service account JSON key file
    /// * `project_id` - GCP project ID
    /// * `dataset` - BigQuery dataset name
    pub async fn from_service_account_key_file(
        service_account_path: &str,
        project_id: &str,
        dataset: &str,
        config: BigQueryConfig,
    ) -> Result<Self> {
        tracing::info!(
            project_id = %project_id,
            dataset = %dataset,
            use_query_cache = config.use_query_cache,
            maximum_bytes_billed = config.maximum_bytes_billed,
            "creating BigQuery connection from service account"
        );

        let client = Client::from_service_account_key_file(service_account_path)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "failed to create BigQuery client");
                SqlPilotError::Config(format!("create bigquery client: {e}"))
            })?;

        tracing::info!(project_id = %project_id, "BigQuery connection established");
        Ok(Self::with_client(client, project_id, dataset, config))
    }

    /// Create a new BigQuery connection from application default credentials.
    ///
    /// This uses GOOGLE_APPLICATION_CREDENTIALS environment variable or
    /// the default credentials from gcloud CLI.
    pub async fn from_application_default_credentials(
        project_id: &str,
        dataset: &str,
        config: BigQueryConfig,
    ) -> Result<Self> {
        tracing::info!(
            project_id = %project_id,
            dataset = %dataset,
            use_query_cache = config.use_query_cache,
            maximum_bytes_billed = config.maximum_bytes_billed,
            "creating BigQuery connection from application default credentials"
        );

        let client = Client::from_application_default_credentials()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "failed to create BigQuery client from ADC");
                SqlPilotError::Config(format!("create bigquery client: {e}"))
            })?;

        tracing::info!(project_id = %project_id, "BigQuery connection established via ADC");
        Ok(Self::with_client(client, project_id, dataset, config))
    }

    fn with_client(client: Client, project_id: &str, dataset: &str, config: BigQueryConfig) -> Self {
        Self {
            client,
            project_id: project_id.to_string(),
            dataset: dataset.to_string(),
            config,
        }
    }

    /// Get the current BigQuery configuration.
    pub fn config(&self) -> &BigQueryConfig {
        &self.config
    }

    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        let start = Instant::now();
        tracing::debug!(
            project = %self.project_id,
            sql_len = sql.len(),
            use_query_cache = self.config.use_query_cache,
            "executing BigQuery query"
        );
        tracing::trace!(sql = %sql, "BigQuery SQL");

        // Build query request with config options
        let mut query_request = QueryRequest::new(sql);
        query_request.use_query_cache = Some(self.config.use_query_cache);
        if self.config.maximum_bytes_billed > 0 {
            query_request.maximum_bytes_billed = Some(self.config.maximum_bytes_billed.to_string());
        }

        let job = self.client.job();
        let query = job.query(&self.project_id, query_request);
        let outcome = if self.config.query_timeout_ms == 0 {
            query.await
        } else {
            let timeout = Duration::from_millis(self.config.query_timeout_ms);
            tokio::time::timeout(timeout, query).await.map_err(|_| {
                tracing::warn!(timeout_ms = self.config.query_timeout_ms, "BigQuery query timed out");
                SqlPilotError::Warehouse(format!(
                    "query did not finish within {}ms",
                    self.config.query_timeout_ms
                ))
            })?
        };
        let response = outcome.map_err(|e| {
            tracing::error!(error = %e, "BigQuery query execution failed");
            SqlPilotError::Warehouse(e.to_string())
        })?;

        let result = convert_response(response);
        tracing::debug!(
            rows = result.rows.len(),
            columns = result.columns.len(),
            ms = start.elapsed().as_millis() as u64,
            "bigquery execute_sql"
        );
        Ok(result)
    }
}

/// Schema and data come from the same response, so column order matches.
fn convert_response(response: QueryResponse) -> QueryResult {
    let declared: Vec<(String, String)> = response
        .schema
        .as_ref()
        .and_then(|s| s.fields.as_ref())
        .map(|fields| {
            fields
                .iter()
                .map(|f| (f.name.clone(), standard_type_name(&format!("{:?}", f.r#type))))
                .collect()
        })
        .unwrap_or_default();

    let mut rs = ResultSet::new_from_query_response(response);

    // column_names() comes from a HashMap; prefer the schema's field order.
    let col_names: Vec<String> = if declared.is_empty() {
        rs.column_names().iter().map(|s| s.to_string()).collect()
    } else {
        declared.iter().map(|(name, _)| name.clone()).collect()
    };
    let types: HashMap<&str, &str> = declared
        .iter()
        .map(|(name, ty)| (name.as_str(), ty.as_str()))
        .collect();

    let columns: Vec<ColumnMeta> = col_names
        .iter()
        .map(|name| ColumnMeta::new(name.clone(), types.get(name.as_str()).copied()))
        .collect();

    let mut rows = Vec::new();
    while rs.next_row() {
        let mut map = serde_json::Map::new();
        for col_name in &col_names {
            // Get value by name to avoid HashMap ordering issues
            let value = rs
                .get_json_value_by_name(col_name)
                .ok()
                .flatten()
                .unwrap_or(serde_json::Value::Null);
            map.insert(col_name.to_string(), value);
        }
        rows.push(map);
    }

    QueryResult { columns, rows }
}

/// Legacy type names from the REST schema mapped to Standard SQL names.
fn standard_type_name(field_type: &str) -> String {
    match field_type.to_ascii_uppercase().as_str() {
        "INTEGER" => "INT64".to_string(),
        "FLOAT" => "FLOAT64".to_string(),
        "BOOLEAN" => "BOOL".to_string(),
        "RECORD" => "STRUCT".to_string(),
        other => other.to_string(),
    }
}

#[async_trait]
impl WarehouseConnection for BigQueryConnection {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    fn dataset(&self) -> &str {
        &self.dataset
    }

    async fn execute_sql(&self, sql: &str) -> Result<QueryResult> {
        self.execute_query(sql).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_type_names_are_normalised() {
        assert_eq!(standard_type_name("Integer"), "INT64");
        assert_eq!(standard_type_name("Float"), "FLOAT64");
        assert_eq!(standard_type_name("Numeric"), "NUMERIC");
        assert_eq!(standard_type_name("String"), "STRING");
    }
}
