use thiserror::Error;

pub type Result<T> = std::result::Result<T, SqlPilotError>;

#[derive(Debug, Error)]
pub enum SqlPilotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config error: {0}")]
    Config(String),
    #[error("schema error: {0}")]
    Schema(String),
    #[error("sql error: {0}")]
    Sql(String),
    #[error("model error: {0}")]
    Model(String),
    /// Raised by a warehouse backend; the payload is the warehouse's own message.
    #[error("{0}")]
    Warehouse(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
