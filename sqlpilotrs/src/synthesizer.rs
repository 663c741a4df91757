//! Query synthesis: question + schema digest in, raw SQL (or a refusal) out.

use std::sync::Arc;

use crate::error::{Result, SqlPilotError};
use crate::llm::LanguageModel;
use crate::prompts::{generation_prompt, PromptRules, NO_ANSWER_SENTINEL};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Synthesis {
    /// Raw query text, fences removed, not yet rewritten.
    Query(String),
    /// The model answered with the no-answer sentinel.
    NoAnswer,
}

/// Contents of the first fenced block when the text contains a fence,
/// otherwise the trimmed text.
pub fn strip_code_fences(text: &str) -> String {
    let Some(open) = text.find("```") else {
        return text.trim().to_string();
    };
    let rest = &text[open + 3..];
    let block = match rest.find("```") {
        Some(close) => &rest[..close],
        None => rest,
    };
    strip_info_string(block).trim().to_string()
}

/// Drop a leading language tag such as `sql` from a fenced block.
fn strip_info_string(block: &str) -> &str {
    let trimmed = block.trim_start_matches([' ', '\t']);
    let tag_len = trimmed
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(trimmed.len());
    let (tag, after) = trimmed.split_at(tag_len);
    if tag.is_empty() {
        return block;
    }
    let statement = tag.eq_ignore_ascii_case("select") || tag.eq_ignore_ascii_case("with");
    if !statement && (after.starts_with('\n') || after.starts_with("\r\n")) {
        // A tag alone on the opening line.
        return after;
    }
    if tag.eq_ignore_ascii_case("sql") && after.starts_with(char::is_whitespace) {
        return after;
    }
    block
}

/// Whether the model declined with the sentinel.
pub fn is_no_answer(text: &str) -> bool {
    text.to_lowercase()
        .contains(&NO_ANSWER_SENTINEL.to_lowercase())
}

pub struct QuerySynthesizer {
    model: Arc<dyn LanguageModel>,
    digest: String,
    rules: PromptRules,
}

impl QuerySynthesizer {
    pub fn new(model: Arc<dyn LanguageModel>, digest: impl Into<String>, rules: PromptRules) -> Self {
        Self {
            model,
            digest: digest.into(),
            rules,
        }
    }

    pub fn rules(&self) -> &PromptRules {
        &self.rules
    }

    /// One model call. Model errors propagate; no retry happens here.
    pub async fn synthesize(&self, question: &str) -> Result<Synthesis> {
        let prompt = generation_prompt(question, &self.digest, &self.rules);
        let response = self.model.complete(&prompt).await?;
        if is_no_answer(&response) {
            tracing::info!(model = self.model.name(), "model declined the question");
            return Ok(Synthesis::NoAnswer);
        }
        let text = strip_code_fences(&response);
        if text.is_empty() {
            return Err(SqlPilotError::Model("model returned an empty query".to_string()));
        }
        tracing::debug!(model = self.model.name(), sql_len = text.len(), "synthesized query");
        tracing::trace!(sql = %text, "raw generated query");
        Ok(Synthesis::Query(text))
    }
}
