//! Prompt templates for query generation, query repair and document QA.

use crate::aliases::AliasCatalog;
use crate::config::SqlPilotConfig;
use crate::rewriter::STATUS_VALUES;

/// Exact text the model returns when the schema cannot answer a question.
pub const NO_ANSWER_SENTINEL: &str = "Sorry, this data is not available";

/// Exact text the document model returns when its context has no answer.
pub const NO_DOCUMENT_ANSWER: &str =
    "Sorry, I don't have enough information in the documents to answer that.";

/// Deployment facts the prompts refer to.
#[derive(Debug, Clone)]
pub struct PromptRules {
    pub project_id: String,
    pub dataset_id: String,
    /// `TABLE.COLUMN` entries compared case-sensitively.
    pub protected_columns: Vec<String>,
    /// Curated (table, alias) pairs, listed in the repair prompt.
    pub curated_aliases: Vec<(String, String)>,
}

impl PromptRules {
    pub fn new(project_id: impl Into<String>, dataset_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            dataset_id: dataset_id.into(),
            protected_columns: vec!["DIL_APPROVAL_STATUS_D.DESCRIPTION".to_string()],
            curated_aliases: curated_pairs(&AliasCatalog::new()),
        }
    }

    pub fn from_config(config: &SqlPilotConfig) -> Self {
        let catalog = AliasCatalog::new().with_overrides(&config.rewrite.curated_aliases);
        Self {
            project_id: config.warehouse.project_id.clone(),
            dataset_id: config.warehouse.dataset_id.clone(),
            protected_columns: config.rewrite.protected_columns.clone(),
            curated_aliases: curated_pairs(&catalog),
        }
    }

    fn example_table(&self) -> String {
        format!("{}.{}.DIL_PURCH_COST_F", self.project_id, self.dataset_id)
    }

    fn protected_list(&self) -> String {
        if self.protected_columns.is_empty() {
            return "the status description column".to_string();
        }
        self.protected_columns.join(", ")
    }
}

fn curated_pairs(catalog: &AliasCatalog) -> Vec<(String, String)> {
    catalog
        .curated()
        .map(|(table, alias)| (table.to_string(), alias.to_string()))
        .collect()
}

fn status_value_lines() -> String {
    STATUS_VALUES
        .iter()
        .map(|v| format!("  '{v}'"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompt asking for one BigQuery query answering `question`.
pub fn generation_prompt(question: &str, digest: &str, rules: &PromptRules) -> String {
    format!(
        r#"You are an expert BigQuery SQL generator specifically for procurement data.
Your goal is to translate user questions into valid and efficient BigQuery SQL queries.

Here are the available tables and their relevant columns from the procurement domain:
{digest}

Strict rules for SQL generation:
- Always use fully qualified table names in the FROM and JOIN clauses, e.g. `{example}`. The system will handle aliasing automatically.
- Do NOT assign aliases yourself (e.g. FROM table AS alias). The system will handle aliases.
- Do NOT use markdown code blocks (e.g. ```sql). Return ONLY the raw SQL query.
- Use column_name directly in SELECT, WHERE, GROUP BY and ORDER BY. The system will prepend aliases.
- If a column is used in ORDER BY or GROUP BY, it MUST also be in the SELECT clause (unless it is inside an aggregate function like COUNT(*) or SUM(column)).
- If the requested data is not available or cannot be answered with the provided schema, respond EXACTLY with the string: "{sentinel}".
- Ensure the query is syntactically correct and logical. Pay close attention to aggregations and grouping.
- When calculating differences (e.g. month over month change), use LAG() or self-joins if appropriate, but keep it simple if possible.
- Text comparisons in WHERE clauses or CASE expressions must be case-insensitive: write UPPER(column) = 'VALUE'.
- Do not upper-case comparisons on {protected}. Its values are exactly:
{statuses}
- Never divide directly. Write CASE WHEN denominator != 0 THEN numerator / denominator ELSE NULL END, also inside AVG(), SUM() and other aggregates.

User Question: {question}
"#,
        digest = digest,
        example = rules.example_table(),
        sentinel = NO_ANSWER_SENTINEL,
        protected = rules.protected_list(),
        statuses = status_value_lines(),
        question = question,
    )
}

/// A query the warehouse rejected, with its error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailedQuery<'a> {
    pub sql: &'a str,
    pub error: &'a str,
}

impl<'a> FailedQuery<'a> {
    pub fn new(sql: &'a str, error: &'a str) -> Self {
        Self { sql, error }
    }
}

/// Prompt asking the model to correct `failed` given the warehouse error.
/// `original` is the query as first run when an automatic fix changed it
/// before it failed again.
pub fn repair_prompt(
    failed: FailedQuery<'_>,
    original: Option<FailedQuery<'_>>,
    rules: &PromptRules,
) -> String {
    let aliases: String = rules
        .curated_aliases
        .iter()
        .map(|(table, alias)| format!("  {table} AS {alias}\n"))
        .collect();
    let history = original
        .map(|o| {
            format!(
                "Original SQL:\n{}\n\nOriginal Error Message:\n{}\n\nAn automatic type fix was applied and the query still failed.\n\n",
                o.sql, o.error
            )
        })
        .unwrap_or_default();
    format!(
        r#"You are an expert in BigQuery SQL debugging and correction.

The following SQL query failed with the error message below.
Your task is to fix the query based on the error.

Instructions for fixing:
- Focus ONLY on resolving the specific error mentioned.
- Do NOT change the query logic or structure unnecessarily.
- Preserve all original SELECT columns, WHERE conditions, JOINs, GROUP BYs and ORDER BY clauses.
- Ensure any column used in ORDER BY or GROUP BY is also present in the SELECT clause (unless it is an aggregate function).
- If a STRING column is used in SUM(), AVG() or another numeric function, or in a numerical comparison, cast it explicitly with CAST(column AS FLOAT64) or CAST(column AS INT64).
- If a numerical column is compared to a string literal (e.g. WHERE amount = '100'), cast the literal to the numeric type (e.g. CAST('100' AS FLOAT64)).
- Keep the project id and dataset id exactly as `{project}.{dataset}`.
- Never divide directly. Write CASE WHEN denominator != 0 THEN numerator / denominator ELSE NULL END, also inside aggregates.
- Do not upper-case comparisons on {protected}. Its values are exactly:
{statuses}
- Use table aliases consistently. Never refer to a full table name after it has been aliased. The standard aliases are:
{aliases}- Return ONLY the corrected SQL query. Do not include any explanations or markdown formatting.

{history}Broken SQL:
{sql}

Error Message:
{error}
"#,
        project = rules.project_id,
        dataset = rules.dataset_id,
        protected = rules.protected_list(),
        statuses = status_value_lines(),
        aliases = aliases,
        history = history,
        sql = failed.sql,
        error = failed.error,
    )
}

/// Grounded question answering over retrieved document chunks.
pub fn document_prompt(question: &str, context: &str) -> String {
    format!(
        r#"You are a helpful assistant. Use only the following context to answer the question.
There are two documents. The second one describes the Procurement Insights Metrics; follow it when the question is about metrics.
Otherwise follow the first one, the Procurement Insight Solution Overview. Its tables list S. No., Report Name, Description and Key Question Answered.
When the question matches a Key Question Answered, answer with the Description of that row.
If the answer isn't found in the context, say:
"{sentinel}"

Context:
{context}

Question: {question}

Answer:
"#,
        sentinel = NO_DOCUMENT_ANSWER,
    )
}
