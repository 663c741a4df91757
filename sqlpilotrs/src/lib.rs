pub mod aliases;
pub mod backends;
pub mod chart;
pub mod config;
pub mod conversation;
pub mod dialect;
pub mod documents;
pub mod error;
pub mod executor;
pub mod llm;
pub mod pattern_fix;
pub mod pipeline;
pub mod prompts;
pub mod repair;
pub mod rewriter;
pub mod schema;
pub mod sql_format;
pub mod sql_lexer;
pub mod summarizer;
pub mod synthesizer;

use std::sync::Arc;

use crate::backends::WarehouseConnection;
use crate::config::SqlPilotConfig;
use crate::documents::{DocumentAnswerer, DocumentRetriever};
use crate::llm::LanguageModel;
use crate::schema::SchemaDigest;

/// Load the schema named in `config` and wire a full assistant around the
/// given collaborators. A missing or broken schema degrades to a placeholder
/// digest instead of failing.
pub fn build_assistant(
    config: &SqlPilotConfig,
    model: Arc<dyn LanguageModel>,
    connection: Arc<dyn WarehouseConnection>,
    retriever: Option<Arc<dyn DocumentRetriever>>,
) -> Assistant {
    let schema = SchemaDigest::load_or_placeholder(&config.schema.path);
    let database = SqlAssistant::new(Arc::clone(&model), connection, schema, config);
    let documents = DocumentAnswerer::new(retriever, model, config.documents.top_k);
    Assistant::new(database, documents)
}

pub use aliases::{AliasCatalog, AliasMap};
pub use chart::{ChartData, ChartKind, PlotSpec};
pub use conversation::{chart_for, AnswerSource, Assistant, ConversationState, TurnResponse};
pub use error::{Result, SqlPilotError};
pub use executor::{ExecutionOutcome, Executor, FailureKind, QueryResult};
pub use pipeline::{AnswerOutcome, DatabaseAnswer, SqlAssistant};
pub use repair::{FinalOutcome, RepairEngine, RepairReport, RepairStrategy};
pub use rewriter::{AliasRewriter, RewriteOutput};
pub use schema::SchemaDescriptor;
