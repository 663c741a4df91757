//! Conversation state and the combined database + document turn.
//!
//! The state is owned by the caller and passed into each turn; nothing is
//! kept between turns inside the assistant.

use serde::Serialize;

use crate::chart::{prepare_chart, ChartData, ChartKind, PlotSpec};
use crate::documents::{has_document_answer, DocumentAnswerer};
use crate::executor::QueryResult;
use crate::pipeline::{AnswerOutcome, DatabaseAnswer, SqlAssistant};

const FALLBACK_TEXT: &str = "I couldn't find a direct answer from either the database or documents. Please try rephrasing your question or ask a question related to procurement insights.";
const NO_DATABASE_ANSWER: &str = "No direct data found or an error occurred.";
const NO_QUERY: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Query shown with an assistant message.
    pub query: Option<String>,
}

/// The result the plot controls work on.
#[derive(Debug, Clone, PartialEq)]
pub struct LastResult {
    pub question: String,
    pub sql: Option<String>,
    pub result: QueryResult,
    pub default_plot: Option<PlotSpec>,
}

/// User-chosen plot encoding; unset fields fall back to the default plot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlotSelection {
    pub x: Option<String>,
    pub y: Option<String>,
    pub kind: Option<ChartKind>,
}

impl PlotSelection {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// The plot to draw for `last`, preferring the user's choice.
    pub fn spec_for(&self, last: &LastResult) -> Option<PlotSpec> {
        match (&self.x, self.kind) {
            (Some(x), Some(kind)) => Some(PlotSpec {
                kind,
                x: x.clone(),
                y: self.y.clone().filter(|y| !y.is_empty()),
                title: last.question.clone(),
            }),
            _ => last.default_plot.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    pub messages: Vec<ChatMessage>,
    pub last_result: Option<LastResult>,
    pub plot_selection: PlotSelection,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start over, e.g. after logout.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Columns the plot controls can offer.
    pub fn plot_columns(&self) -> Vec<&str> {
        self.last_result
            .as_ref()
            .map(|last| last.result.columns.iter().map(|c| c.name.as_str()).collect())
            .unwrap_or_default()
    }
}

/// Chart for the last result under the current plot selection.
pub fn chart_for(state: &ConversationState) -> Option<ChartData> {
    let last = state.last_result.as_ref()?;
    let spec = state.plot_selection.spec_for(last)?;
    let chart = prepare_chart(&last.result, &spec);
    if chart.is_none() {
        tracing::debug!(kind = %spec.kind, x = %spec.x, "selected columns do not suit the chart");
    }
    chart
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    Database,
    DatabaseAttempt,
    Document,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnResponse {
    pub text: String,
    pub query_display: Option<String>,
    pub plot: Option<ChartData>,
    pub sources: Vec<AnswerSource>,
}

pub struct Assistant {
    database: SqlAssistant,
    documents: DocumentAnswerer,
}

impl Assistant {
    pub fn new(database: SqlAssistant, documents: DocumentAnswerer) -> Self {
        Self {
            database,
            documents,
        }
    }

    pub fn database(&self) -> &SqlAssistant {
        &self.database
    }

    /// Answer `question` from both sources and record the exchange in `state`.
    pub async fn process_turn(&self, state: &mut ConversationState, question: &str) -> TurnResponse {
        state.messages.push(ChatMessage {
            role: Role::User,
            content: question.to_string(),
            query: None,
        });

        let db = self.database.answer(question).await;
        let doc = self.documents.answer(question).await;
        let response = combine(state, question, db, &doc);

        state.messages.push(ChatMessage {
            role: Role::Assistant,
            content: response.text.clone(),
            query: response.query_display.clone(),
        });
        tracing::info!(sources = ?response.sources, "turn answered");
        response
    }
}

/// Merge both answers into one reply, updating the last result.
fn combine(state: &mut ConversationState, question: &str, db: DatabaseAnswer, doc: &str) -> TurnResponse {
    let mut text = String::new();
    let mut sources = Vec::new();
    let mut plot = None;
    let query_display;

    let has_rows = db.rows().is_some();
    match db {
        DatabaseAnswer {
            text: db_text,
            sql_display,
            result: Some(result),
            plot: default_plot,
            ..
        } if has_rows => {
            text.push_str(&format!("**Database Insights:**\n{db_text}\n\n"));
            plot = default_plot.as_ref().and_then(|spec| prepare_chart(&result, spec));
            query_display = sql_display.clone();
            sources.push(AnswerSource::Database);
            state.last_result = Some(LastResult {
                question: question.to_string(),
                sql: sql_display,
                result,
                default_plot,
            });
            state.plot_selection.reset();
        }
        DatabaseAnswer {
            text: db_text,
            sql_display,
            outcome,
            ..
        } if outcome != AnswerOutcome::Declined && !db_text.is_empty() => {
            text.push_str(&format!("**Database Attempt:**\n{db_text}\n\n"));
            query_display = sql_display;
            sources.push(AnswerSource::DatabaseAttempt);
            state.last_result = None;
        }
        DatabaseAnswer { sql_display, .. } => {
            text.push_str(&format!("**Database Attempt:** {NO_DATABASE_ANSWER}\n\n"));
            query_display = Some(sql_display.unwrap_or_else(|| NO_QUERY.to_string()));
            state.last_result = None;
        }
    }

    if has_document_answer(doc) {
        text.push_str(&format!("**Document-Based Information:**\n{doc}\n\n"));
        sources.push(AnswerSource::Document);
    } else {
        text.push_str(&format!("**Document-Based Information:** {doc}\n\n"));
    }

    if sources.is_empty() {
        text.push_str(FALLBACK_TEXT);
        sources.push(AnswerSource::Fallback);
    }

    TurnResponse {
        text: text.trim().to_string(),
        query_display,
        plot,
        sources,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::executor::ColumnMeta;
    use crate::pipeline::{DECLINED_TEXT, EMPTY_TEXT};
    use crate::prompts::NO_DOCUMENT_ANSWER;

    fn rows() -> QueryResult {
        QueryResult {
            columns: vec![
                ColumnMeta::new("VENDOR_NAME", Some("STRING")),
                ColumnMeta::new("SPEND", Some("FLOAT64")),
            ],
            rows: vec![json!({"VENDOR_NAME": "Acme", "SPEND": 10.0})]
                .into_iter()
                .filter_map(|v| v.as_object().cloned())
                .collect(),
        }
    }

    fn answer(outcome: AnswerOutcome, text: &str, result: Option<QueryResult>) -> DatabaseAnswer {
        DatabaseAnswer {
            text: text.to_string(),
            sql_display: Some("SELECT 1".to_string()),
            plot: result.as_ref().map(|_| PlotSpec {
                kind: ChartKind::Bar,
                x: "VENDOR_NAME".to_string(),
                y: Some("SPEND".to_string()),
                title: "Top vendors".to_string(),
            }),
            result,
            outcome,
            trace: Vec::new(),
        }
    }

    #[test]
    fn rows_become_insights_and_last_result() {
        let mut state = ConversationState::new();
        state.plot_selection.kind = Some(ChartKind::Pie);
        let db = answer(AnswerOutcome::Answered, "Here are the key insights from the database:", Some(rows()));
        let turn = combine(&mut state, "Top vendors", db, NO_DOCUMENT_ANSWER);

        assert!(turn.text.starts_with("**Database Insights:**\nHere are the key insights"));
        assert!(turn.text.ends_with(&format!("**Document-Based Information:** {NO_DOCUMENT_ANSWER}")));
        assert_eq!(turn.sources, vec![AnswerSource::Database]);
        assert!(turn.plot.is_some());
        assert_eq!(state.plot_selection, PlotSelection::default());
        assert_eq!(state.last_result.as_ref().map(|l| l.question.as_str()), Some("Top vendors"));
    }

    #[test]
    fn empty_results_are_attempts() {
        let mut state = ConversationState::new();
        let db = answer(AnswerOutcome::Empty, EMPTY_TEXT, None);
        let turn = combine(&mut state, "q", db, "The Spend Cube report.");
        assert!(turn.text.starts_with(&format!("**Database Attempt:**\n{EMPTY_TEXT}")));
        assert_eq!(turn.sources, vec![AnswerSource::DatabaseAttempt, AnswerSource::Document]);
        assert!(state.last_result.is_none());
    }

    #[test]
    fn declined_with_no_documents_falls_back() {
        let mut state = ConversationState::new();
        let mut db = answer(AnswerOutcome::Declined, DECLINED_TEXT, None);
        db.sql_display = None;
        let turn = combine(&mut state, "q", db, NO_DOCUMENT_ANSWER);
        assert!(turn.text.starts_with("**Database Attempt:** No direct data found or an error occurred."));
        assert!(turn.text.ends_with(FALLBACK_TEXT));
        assert_eq!(turn.query_display.as_deref(), Some("N/A"));
        assert_eq!(turn.sources, vec![AnswerSource::Fallback]);
    }

    #[test]
    fn chart_follows_the_plot_selection() {
        let mut state = ConversationState::new();
        assert!(chart_for(&state).is_none());
        state.last_result = Some(LastResult {
            question: "Top vendors".to_string(),
            sql: None,
            result: rows(),
            default_plot: None,
        });
        assert!(chart_for(&state).is_none());

        state.plot_selection = PlotSelection {
            x: Some("VENDOR_NAME".to_string()),
            y: None,
            kind: Some(ChartKind::CountPlot),
        };
        let chart = chart_for(&state).unwrap();
        assert_eq!(chart.kind, ChartKind::CountPlot);
        assert_eq!(chart.title, "Top vendors");
        assert_eq!(state.plot_columns(), vec!["VENDOR_NAME", "SPEND"]);

        state.reset();
        assert!(state.last_result.is_none());
        assert!(state.messages.is_empty());
    }
}
