//! Configuration system for SQLPilot.
//!
//! Supports TOML-based configuration with built-in defaults and a handful of
//! environment overrides for the warehouse location.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SqlPilotError};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SqlPilotConfig {
    pub warehouse: WarehouseConfig,
    pub model: ModelConfig,
    pub schema: SchemaConfig,
    pub rewrite: RewriteConfig,
    pub bigquery: BigQueryConfig,
    pub documents: DocumentsConfig,
}

/// Where canonical table paths point.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// GCP project that owns the dataset and runs the queries.
    pub project_id: String,
    /// Dataset holding the star schema.
    pub dataset_id: String,
    /// Processing location (default: us-central1).
    pub location: String,
}

/// Language model settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Model identifier (default: gemini-2.0-flash-001).
    pub name: String,
    pub temperature: f32,
    /// Vertex AI location; falls back to the warehouse location when empty.
    pub location: Option<String>,
    /// Environment variable holding an OAuth access token.
    pub access_token_env: String,
    /// Full `generateContent` URL, overriding the derived Vertex AI endpoint.
    pub endpoint: Option<String>,
    /// Request timeout in milliseconds (default: 60000).
    pub timeout_ms: u64,
}

/// Schema source.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// A YAML file, or a directory of YAML files.
    pub path: PathBuf,
}

/// Alias rewriter behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RewriteConfig {
    /// Extra curated aliases (table name -> alias), merged over the built-in table.
    pub curated_aliases: BTreeMap<String, String>,
    /// `TABLE.COLUMN` pairs whose text comparisons must stay case-sensitive.
    pub protected_columns: Vec<String>,
    /// Wrap plain text equality comparisons in `UPPER()` (default: true).
    pub case_insensitive_compare: bool,
}

/// BigQuery-specific configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BigQueryConfig {
    /// Enable query cache (default: true).
    pub use_query_cache: bool,
    /// Maximum bytes billed per query (0 = unlimited).
    pub maximum_bytes_billed: i64,
    /// Query timeout in milliseconds (0 = wait for the job).
    pub query_timeout_ms: u64,
}

/// Document answerer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DocumentsConfig {
    /// Number of chunks handed to the model (default: 5).
    pub top_k: usize,
}

// Default implementations

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            project_id: "vertex-ai-462816".to_string(),
            dataset_id: "PROCUREMENT_DATA".to_string(),
            location: "us-central1".to_string(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "gemini-2.0-flash-001".to_string(),
            temperature: 0.1,
            location: None,
            access_token_env: "VERTEX_ACCESS_TOKEN".to_string(),
            endpoint: None,
            timeout_ms: 60_000,
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("Full_Procurement_Schema.yaml"),
        }
    }
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            curated_aliases: BTreeMap::new(),
            protected_columns: vec!["DIL_APPROVAL_STATUS_D.DESCRIPTION".to_string()],
            case_insensitive_compare: true,
        }
    }
}

impl Default for BigQueryConfig {
    fn default() -> Self {
        Self {
            use_query_cache: true,
            maximum_bytes_billed: 0, // 0 = unlimited
            query_timeout_ms: 120_000,
        }
    }
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self { top_k: 5 }
    }
}

impl SqlPilotConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SqlPilotError::Config(format!("failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| SqlPilotError::Config(format!("failed to parse config: {e}")))
    }

    /// Load from default locations (env var, cwd, user config dir, or defaults),
    /// then apply environment overrides.
    ///
    /// Search order:
    /// 1. `SQLPILOT_CONFIG` environment variable
    /// 2. `./sqlpilot.toml` (current directory)
    /// 3. `~/.config/sqlpilot/config.toml` (user config dir)
    /// 4. Built-in defaults
    pub fn load_default() -> Self {
        let mut cfg = Self::load_file_or_default();
        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        cfg
    }

    fn load_file_or_default() -> Self {
        if let Ok(path) = std::env::var("SQLPILOT_CONFIG") {
            match Self::from_file(&path) {
                Ok(cfg) => {
                    tracing::info!(path = %path, "loaded config from SQLPILOT_CONFIG");
                    return cfg;
                }
                Err(e) => tracing::warn!(path = %path, error = %e, "ignoring SQLPILOT_CONFIG"),
            }
        }

        if let Ok(cfg) = Self::from_file("sqlpilot.toml") {
            tracing::info!("loaded config from ./sqlpilot.toml");
            return cfg;
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("sqlpilot").join("config.toml");
            if let Ok(cfg) = Self::from_file(&user_config) {
                tracing::info!(path = %user_config.display(), "loaded config from user config dir");
                return cfg;
            }
        }

        tracing::debug!("no config file found, using defaults");
        Self::default()
    }

    /// Apply `GCP_PROJECT_ID`, `BQ_DATASET_ID`, `GCP_LOCATION` and
    /// `SQLPILOT_SCHEMA_PATH` from the given lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(project) = lookup("GCP_PROJECT_ID").filter(|v| !v.is_empty()) {
            self.warehouse.project_id = project;
        }
        if let Some(dataset) = lookup("BQ_DATASET_ID").filter(|v| !v.is_empty()) {
            self.warehouse.dataset_id = dataset;
        }
        if let Some(location) = lookup("GCP_LOCATION").filter(|v| !v.is_empty()) {
            self.warehouse.location = location;
        }
        if let Some(path) = lookup("SQLPILOT_SCHEMA_PATH").filter(|v| !v.is_empty()) {
            self.schema.path = PathBuf::from(path);
        }
    }

    /// Vertex AI location for the model, defaulting to the warehouse location.
    pub fn model_location(&self) -> &str {
        self.model
            .location
            .as_deref()
            .unwrap_or(&self.warehouse.location)
    }
}
