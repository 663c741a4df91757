//! One database turn: synthesize, rewrite, execute with repair, summarize.

use std::sync::Arc;

use serde::Serialize;

use crate::backends::WarehouseConnection;
use crate::chart::PlotSpec;
use crate::config::SqlPilotConfig;
use crate::executor::{Executor, QueryResult};
use crate::llm::LanguageModel;
use crate::prompts::PromptRules;
use crate::repair::{FinalOutcome, RepairAttempt, RepairEngine};
use crate::rewriter::AliasRewriter;
use crate::schema::SchemaDigest;
use crate::sql_format::format_sql;
use crate::summarizer::summarize;
use crate::synthesizer::{QuerySynthesizer, Synthesis};

pub const DECLINED_TEXT: &str =
    "Sorry, I don't have enough data in the database to answer that specifically.";
pub const EMPTY_TEXT: &str = "No relevant data found for your query in the database.";
const ERROR_PREFIX: &str = "An error occurred fetching data from the database:";
const EXHAUSTED_PREFIX: &str = "All attempts to fix the query failed:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    /// Rows came back.
    Answered,
    /// The query ran and returned nothing.
    Empty,
    /// The model said the schema cannot answer the question.
    Declined,
    /// Synthesis failed or every repair was exhausted.
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseAnswer {
    pub text: String,
    /// The last query executed, formatted for display.
    pub sql_display: Option<String>,
    pub result: Option<QueryResult>,
    pub plot: Option<PlotSpec>,
    pub outcome: AnswerOutcome,
    pub trace: Vec<RepairAttempt>,
}

impl DatabaseAnswer {
    fn without_query(text: String, outcome: AnswerOutcome) -> Self {
        Self {
            text,
            sql_display: None,
            result: None,
            plot: None,
            outcome,
            trace: Vec::new(),
        }
    }

    /// Rows to show, if any.
    pub fn rows(&self) -> Option<&QueryResult> {
        self.result.as_ref().filter(|r| !r.is_empty())
    }
}

pub struct SqlAssistant {
    synthesizer: QuerySynthesizer,
    rewriter: Arc<AliasRewriter>,
    repair: RepairEngine,
}

impl SqlAssistant {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        connection: Arc<dyn WarehouseConnection>,
        schema: SchemaDigest,
        config: &SqlPilotConfig,
    ) -> Self {
        let rules = PromptRules::from_config(config);
        let rewriter = Arc::new(AliasRewriter::from_config(
            Arc::new(schema.descriptor),
            config,
        ));
        let synthesizer = QuerySynthesizer::new(Arc::clone(&model), schema.text, rules.clone());
        let repair = RepairEngine::new(
            Executor::new(connection),
            model,
            Arc::clone(&rewriter),
            rules,
        );
        Self {
            synthesizer,
            rewriter,
            repair,
        }
    }

    pub fn rewriter(&self) -> &AliasRewriter {
        &self.rewriter
    }

    pub async fn answer(&self, question: &str) -> DatabaseAnswer {
        tracing::info!(question = %question, "answering from the database");
        let raw = match self.synthesizer.synthesize(question).await {
            Ok(Synthesis::Query(sql)) => sql,
            Ok(Synthesis::NoAnswer) => {
                return DatabaseAnswer::without_query(DECLINED_TEXT.to_string(), AnswerOutcome::Declined);
            }
            Err(e) => {
                tracing::error!(error = %e, "query synthesis failed");
                return DatabaseAnswer::without_query(
                    format!("{ERROR_PREFIX} {e}"),
                    AnswerOutcome::Failed,
                );
            }
        };

        let canonical = match self.rewriter.rewrite(&raw) {
            Ok(output) => output.sql,
            Err(e) => {
                tracing::warn!(error = %e, "rewrite failed, executing the generated query as is");
                raw
            }
        };

        let report = self.repair.run(&canonical).await;
        let repaired_by = report.repaired_by();
        let sql_display = Some(format_sql(&report.final_sql));
        tracing::info!(
            executions = report.executions,
            repaired_by = ?repaired_by,
            "database turn finished"
        );

        match report.outcome {
            FinalOutcome::Success(result) => {
                let summary = summarize(question, &result, repaired_by);
                DatabaseAnswer {
                    text: summary.text,
                    sql_display,
                    result: Some(result),
                    plot: summary.plot,
                    outcome: AnswerOutcome::Answered,
                    trace: report.trace,
                }
            }
            FinalOutcome::Empty => DatabaseAnswer {
                text: EMPTY_TEXT.to_string(),
                sql_display,
                result: None,
                plot: None,
                outcome: AnswerOutcome::Empty,
                trace: report.trace,
            },
            FinalOutcome::ExhaustedFailure {
                last_error,
                suggestion,
            } => {
                let first_error = report.first_error.as_deref().unwrap_or(&last_error);
                DatabaseAnswer {
                    text: format!(
                        "{ERROR_PREFIX} {first_error}\n{EXHAUSTED_PREFIX} {last_error}\n{suggestion}"
                    ),
                    sql_display,
                    result: None,
                    plot: None,
                    outcome: AnswerOutcome::Failed,
                    trace: report.trace,
                }
            }
        }
    }
}
