// Scripted collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};

use sqlpilot::backends::WarehouseConnection;
use sqlpilot::config::SqlPilotConfig;
use sqlpilot::executor::{ColumnMeta, QueryResult};
use sqlpilot::llm::LanguageModel;
use sqlpilot::schema::{SchemaDescriptor, SchemaDigest};
use sqlpilot::{AliasRewriter, Result, SqlPilotError};

pub const PROJECT: &str = "proj";
pub const DATASET: &str = "ds";

pub fn fixture_path() -> String {
    format!("{}/tests/fixtures/procurement.yaml", env!("CARGO_MANIFEST_DIR"))
}

pub fn schema() -> SchemaDescriptor {
    SchemaDescriptor::from_file(fixture_path()).unwrap()
}

pub fn digest() -> SchemaDigest {
    SchemaDigest::load_or_placeholder(fixture_path())
}

pub fn config() -> SqlPilotConfig {
    let mut config = SqlPilotConfig::default();
    config.warehouse.project_id = PROJECT.to_string();
    config.warehouse.dataset_id = DATASET.to_string();
    config.schema.path = fixture_path().into();
    config
}

pub fn rewriter() -> AliasRewriter {
    AliasRewriter::new(Arc::new(schema()), PROJECT, DATASET)
}

/// Answers prompts from a queue and records every prompt it saw.
#[derive(Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<Result<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(texts: &[&str]) -> Arc<Self> {
        Self::new(texts.iter().map(|t| Ok(t.to_string())).collect())
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SqlPilotError::Model("no scripted response left".to_string())))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Returns queued results and records every query it ran.
#[derive(Default)]
pub struct ScriptedWarehouse {
    responses: Mutex<VecDeque<Result<QueryResult>>>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedWarehouse {
    pub fn new(responses: Vec<Result<QueryResult>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            executed: Mutex::new(Vec::new()),
        })
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl WarehouseConnection for ScriptedWarehouse {
    fn project_id(&self) -> &str {
        PROJECT
    }

    fn dataset(&self) -> &str {
        DATASET
    }

    async fn execute_sql(&self, sql: &str) -> Result<QueryResult> {
        self.executed.lock().unwrap().push(sql.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SqlPilotError::Warehouse("no scripted result left".to_string())))
    }
}

pub fn warehouse_error(message: &str) -> Result<QueryResult> {
    Err(SqlPilotError::Warehouse(message.to_string()))
}

/// A result built from (name, declared type) columns and JSON rows.
pub fn table(columns: &[(&str, &str)], rows: Vec<Value>) -> QueryResult {
    QueryResult {
        columns: columns
            .iter()
            .map(|(name, ty)| ColumnMeta::new(*name, Some(*ty)))
            .collect(),
        rows: rows
            .into_iter()
            .map(|row| match row {
                Value::Object(map) => map,
                _ => Map::new(),
            })
            .collect(),
    }
}
