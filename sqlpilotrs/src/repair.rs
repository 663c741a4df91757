//! Self-healing execution.
//!
//! A canonical query runs once. A typed failure gets one deterministic
//! pattern fix; anything still failing gets one model fix. There is no loop:
//! at most three executions per question.
//!
//! ```text
//! Start --success/empty--> done
//!   |typed           |other
//!   v                v
//! PatternFix ---> ModelFix --success/empty--> done
//!   |success/empty     |failure
//!   v                  v
//!  done          ExhaustedFailure
//! ```

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::executor::{ExecutionOutcome, Executor, FailureKind, QueryResult};
use crate::llm::LanguageModel;
use crate::pattern_fix;
use crate::prompts::{repair_prompt, FailedQuery, PromptRules};
use crate::rewriter::AliasRewriter;
use crate::synthesizer::strip_code_fences;

/// Suggestion attached to every exhausted repair.
pub const REPHRASE_SUGGESTION: &str =
    "Please try rephrasing your question or check the schema definition.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepairStrategy {
    PatternFix,
    ModelFix,
}

impl fmt::Display for RepairStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairStrategy::PatternFix => write!(f, "pattern-fix"),
            RepairStrategy::ModelFix => write!(f, "model-fix"),
        }
    }
}

/// What one repair attempt led to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success { rows: usize },
    Empty,
    Failed { error: String },
    /// The pattern fix left the query unchanged; nothing was executed.
    NoChange,
    /// The model call itself failed; nothing was executed.
    ModelError { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairAttempt {
    pub strategy: RepairStrategy,
    pub input_sql: String,
    pub output_sql: Option<String>,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinalOutcome {
    Success(QueryResult),
    Empty,
    ExhaustedFailure { last_error: String, suggestion: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepairReport {
    /// The last query executed.
    pub final_sql: String,
    /// Error of the first execution, before any repair.
    pub first_error: Option<String>,
    pub outcome: FinalOutcome,
    pub trace: Vec<RepairAttempt>,
    pub executions: usize,
}

impl RepairReport {
    /// The strategy that produced a terminal success or empty result, if any.
    pub fn repaired_by(&self) -> Option<RepairStrategy> {
        if matches!(self.outcome, FinalOutcome::ExhaustedFailure { .. }) {
            return None;
        }
        self.trace
            .last()
            .filter(|a| matches!(a.outcome, AttemptOutcome::Success { .. } | AttemptOutcome::Empty))
            .map(|a| a.strategy)
    }

    pub fn attempts(&self, strategy: RepairStrategy) -> usize {
        self.trace.iter().filter(|a| a.strategy == strategy).count()
    }
}

// Transition guards.

/// Success and empty results end the turn.
pub fn is_terminal(outcome: &ExecutionOutcome) -> bool {
    matches!(
        outcome,
        ExecutionOutcome::Success(_) | ExecutionOutcome::EmptyResult
    )
}

/// The failure kind to pattern-fix, when the failure is typed.
pub fn pattern_fixable(outcome: &ExecutionOutcome) -> Option<FailureKind> {
    match outcome {
        ExecutionOutcome::TypedFailure { kind, .. } => Some(*kind),
        _ => None,
    }
}

/// Any remaining failure goes to the model.
pub fn needs_model_fix(outcome: &ExecutionOutcome) -> bool {
    outcome.is_failure()
}

fn attempt_outcome(outcome: &ExecutionOutcome) -> AttemptOutcome {
    match outcome {
        ExecutionOutcome::Success(result) => AttemptOutcome::Success {
            rows: result.rows.len(),
        },
        ExecutionOutcome::EmptyResult => AttemptOutcome::Empty,
        ExecutionOutcome::TypedFailure { error, .. } | ExecutionOutcome::OtherFailure { error } => {
            AttemptOutcome::Failed {
                error: error.clone(),
            }
        }
    }
}

pub struct RepairEngine {
    executor: Executor,
    model: Arc<dyn LanguageModel>,
    rewriter: Arc<AliasRewriter>,
    rules: PromptRules,
}

impl RepairEngine {
    pub fn new(
        executor: Executor,
        model: Arc<dyn LanguageModel>,
        rewriter: Arc<AliasRewriter>,
        rules: PromptRules,
    ) -> Self {
        Self {
            executor,
            model,
            rewriter,
            rules,
        }
    }

    /// Execute `sql`, repairing it at most twice.
    pub async fn run(&self, sql: &str) -> RepairReport {
        let mut run = Run::new(sql);
        let mut outcome = run.execute(&self.executor, sql).await;
        if is_terminal(&outcome) {
            return run.finish(outcome);
        }
        run.first_error = outcome.error().map(str::to_string);

        if let Some(kind) = pattern_fixable(&outcome) {
            tracing::warn!(kind = ?kind, "typed failure, trying pattern fix");
            let input = run.sql.clone();
            match pattern_fix::apply(&input, kind) {
                Some(fixed) => {
                    outcome = run.execute(&self.executor, &fixed).await;
                    run.record(RepairStrategy::PatternFix, input, Some(fixed), attempt_outcome(&outcome));
                    if is_terminal(&outcome) {
                        return run.finish(outcome);
                    }
                }
                None => {
                    tracing::warn!(kind = ?kind, "pattern fix changed nothing");
                    run.record(RepairStrategy::PatternFix, input, None, AttemptOutcome::NoChange);
                }
            }
        }

        if !needs_model_fix(&outcome) {
            return run.finish(outcome);
        }
        let error = outcome.error().unwrap_or_default().to_string();
        tracing::warn!(error = %error, "asking the model to fix the query");
        let input = run.sql.clone();
        let original = match (&run.first_error, input != sql) {
            (Some(first_error), true) => Some(FailedQuery::new(sql, first_error)),
            _ => None,
        };
        let prompt = repair_prompt(FailedQuery::new(&input, &error), original, &self.rules);
        let fixed = match self.model.complete(&prompt).await {
            Ok(text) => self.canonicalize(&strip_code_fences(&text)),
            Err(e) => {
                tracing::warn!(error = %e, "model fix call failed");
                run.record(
                    RepairStrategy::ModelFix,
                    input,
                    None,
                    AttemptOutcome::ModelError { error: e.to_string() },
                );
                return run.exhausted(e.to_string());
            }
        };
        outcome = run.execute(&self.executor, &fixed).await;
        run.record(RepairStrategy::ModelFix, input, Some(fixed), attempt_outcome(&outcome));
        if is_terminal(&outcome) {
            return run.finish(outcome);
        }
        let last_error = outcome.error().unwrap_or_default().to_string();
        tracing::warn!(error = %last_error, "all repair strategies failed");
        run.exhausted(last_error)
    }

    /// Model output goes through the rewriter like generated queries do.
    fn canonicalize(&self, sql: &str) -> String {
        match self.rewriter.rewrite(sql) {
            Ok(output) => output.sql,
            Err(e) => {
                tracing::warn!(error = %e, "could not rewrite model-fixed query, executing as returned");
                sql.to_string()
            }
        }
    }
}

/// Turn-local bookkeeping.
struct Run {
    sql: String,
    first_error: Option<String>,
    trace: Vec<RepairAttempt>,
    executions: usize,
}

impl Run {
    fn new(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            first_error: None,
            trace: Vec::new(),
            executions: 0,
        }
    }

    async fn execute(&mut self, executor: &Executor, sql: &str) -> ExecutionOutcome {
        self.executions += 1;
        self.sql = sql.to_string();
        tracing::debug!(attempt = self.executions, "executing query");
        executor.execute(sql).await
    }

    fn record(
        &mut self,
        strategy: RepairStrategy,
        input_sql: String,
        output_sql: Option<String>,
        outcome: AttemptOutcome,
    ) {
        self.trace.push(RepairAttempt {
            strategy,
            input_sql,
            output_sql,
            outcome,
        });
    }

    fn finish(self, outcome: ExecutionOutcome) -> RepairReport {
        let outcome = match outcome {
            ExecutionOutcome::Success(result) => FinalOutcome::Success(result),
            ExecutionOutcome::EmptyResult => FinalOutcome::Empty,
            ExecutionOutcome::TypedFailure { error, .. } | ExecutionOutcome::OtherFailure { error } => {
                return self.exhausted(error);
            }
        };
        RepairReport {
            final_sql: self.sql,
            first_error: self.first_error,
            outcome,
            trace: self.trace,
            executions: self.executions,
        }
    }

    fn exhausted(self, last_error: String) -> RepairReport {
        RepairReport {
            final_sql: self.sql,
            first_error: self.first_error,
            outcome: FinalOutcome::ExhaustedFailure {
                last_error,
                suggestion: REPHRASE_SUGGESTION.to_string(),
            },
            trace: self.trace,
            executions: self.executions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_route_outcomes() {
        let typed = ExecutionOutcome::TypedFailure {
            error: "No matching signature for aggregate function SUM; STRING".to_string(),
            kind: FailureKind::StringSumMismatch,
        };
        let other = ExecutionOutcome::OtherFailure {
            error: "Unrecognized name: FOO".to_string(),
        };
        assert!(is_terminal(&ExecutionOutcome::EmptyResult));
        assert!(is_terminal(&ExecutionOutcome::Success(QueryResult::default())));
        assert_eq!(pattern_fixable(&typed), Some(FailureKind::StringSumMismatch));
        assert_eq!(pattern_fixable(&other), None);
        assert!(needs_model_fix(&other));
        assert!(needs_model_fix(&typed));
        assert!(!needs_model_fix(&ExecutionOutcome::EmptyResult));
    }

    #[test]
    fn repaired_by_reports_last_successful_strategy() {
        let report = RepairReport {
            final_sql: "SELECT 1".to_string(),
            first_error: Some("boom".to_string()),
            outcome: FinalOutcome::Empty,
            trace: vec![
                RepairAttempt {
                    strategy: RepairStrategy::PatternFix,
                    input_sql: "SELECT 1".to_string(),
                    output_sql: None,
                    outcome: AttemptOutcome::NoChange,
                },
                RepairAttempt {
                    strategy: RepairStrategy::ModelFix,
                    input_sql: "SELECT 1".to_string(),
                    output_sql: Some("SELECT 1".to_string()),
                    outcome: AttemptOutcome::Empty,
                },
            ],
            executions: 2,
        };
        assert_eq!(report.repaired_by(), Some(RepairStrategy::ModelFix));
        assert_eq!(report.attempts(RepairStrategy::PatternFix), 1);
        assert_eq!(RepairStrategy::PatternFix.to_string(), "pattern-fix");
    }
}
