//! Turns a result relation into answer text and a default plot.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use serde_json::Value;

use crate::chart::{ChartKind, PlotSpec};
use crate::executor::QueryResult;
use crate::repair::RepairStrategy;

/// Header used for multi-cell results.
pub const RESULTS_HEADER: &str = "Here are the key insights from the database:";

const QUESTION_PREFIXES: &[&str] = &[
    "what is the ",
    "what's the ",
    "what are the ",
    "show me the ",
    "tell me the ",
    "give me the ",
];

/// Column names that suggest a time axis.
const TIME_HINTS: &[&str] = &["date", "time", "month", "year", "dt", "day", "period"];

/// Column names grouped by kind, each in result order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ColumnGroups {
    pub numeric: Vec<String>,
    pub textual: Vec<String>,
    pub temporal: Vec<String>,
}

impl ColumnGroups {
    pub fn is_numeric(&self, column: &str) -> bool {
        self.numeric.iter().any(|c| c == column)
    }

    pub fn is_textual(&self, column: &str) -> bool {
        self.textual.iter().any(|c| c == column)
    }

    pub fn is_temporal(&self, column: &str) -> bool {
        self.temporal.iter().any(|c| c == column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Numeric,
    Textual,
    Temporal,
}

/// Group columns by declared type, inferring from values when undeclared.
/// Booleans, records and all-null columns land in no group.
pub fn classify_columns(result: &QueryResult) -> ColumnGroups {
    let mut groups = ColumnGroups::default();
    for column in &result.columns {
        let kind = match column.data_type.as_deref() {
            Some(declared) => declared_kind(declared),
            None => inferred_kind(&column.name, result.values(&column.name)),
        };
        let bucket = match kind {
            Some(ColumnKind::Numeric) => &mut groups.numeric,
            Some(ColumnKind::Textual) => &mut groups.textual,
            Some(ColumnKind::Temporal) => &mut groups.temporal,
            None => continue,
        };
        bucket.push(column.name.clone());
    }
    groups
}

fn declared_kind(declared: &str) -> Option<ColumnKind> {
    let base = declared
        .split(['(', '<'])
        .next()
        .unwrap_or(declared)
        .trim()
        .to_ascii_uppercase();
    match base.as_str() {
        "INT64" | "INTEGER" | "INT" | "SMALLINT" | "BIGINT" | "TINYINT" | "BYTEINT" | "FLOAT64"
        | "FLOAT" | "NUMERIC" | "BIGNUMERIC" | "DECIMAL" | "BIGDECIMAL" => Some(ColumnKind::Numeric),
        "STRING" => Some(ColumnKind::Textual),
        "DATE" | "DATETIME" | "TIMESTAMP" | "TIME" => Some(ColumnKind::Temporal),
        _ => None,
    }
}

fn inferred_kind<'a>(name: &str, values: impl Iterator<Item = &'a Value>) -> Option<ColumnKind> {
    let mut numbers = 0;
    let mut strings = 0;
    let mut temporal = 0;
    let mut other = 0;
    for value in values {
        match value {
            Value::Null => {}
            Value::Number(_) => numbers += 1,
            Value::String(s) => {
                strings += 1;
                if parses_as_temporal(s) {
                    temporal += 1;
                }
            }
            _ => other += 1,
        }
    }
    if other > 0 || (numbers > 0 && strings > 0) {
        return (strings > 0).then_some(ColumnKind::Textual);
    }
    if numbers > 0 {
        return Some(ColumnKind::Numeric);
    }
    if strings == 0 {
        return None;
    }
    if temporal == strings || (temporal > 0 && hints_time(name)) {
        return Some(ColumnKind::Temporal);
    }
    Some(ColumnKind::Textual)
}

fn hints_time(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|part| TIME_HINTS.contains(&part))
}

/// Dates, datetimes and timestamps as BigQuery renders them.
pub fn parses_as_temporal(text: &str) -> bool {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").is_ok()
        || DateTime::parse_from_rfc3339(text).is_ok()
        || DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z").is_ok()
        || NaiveTime::parse_from_str(text, "%H:%M:%S%.f").is_ok()
}

/// The chart shown with a fresh result, by column-kind priority.
pub fn default_plot(result: &QueryResult, title: &str) -> Option<PlotSpec> {
    if result.is_empty() {
        return None;
    }
    let groups = classify_columns(result);
    let first = |names: &[String]| names.first().cloned();
    let (kind, x, y) = match (
        first(&groups.temporal),
        first(&groups.textual),
        first(&groups.numeric),
    ) {
        (Some(time), _, Some(num)) => (ChartKind::Line, time, Some(num)),
        (None, Some(text), Some(num)) => (ChartKind::Bar, text, Some(num)),
        (_, _, Some(num)) => (ChartKind::Histogram, num, None),
        (_, Some(text), None) => (ChartKind::CountPlot, text, None),
        _ => return None,
    };
    Some(PlotSpec {
        kind,
        x,
        y,
        title: title.to_string(),
    })
}

/// Suffix marking a repaired answer.
pub fn repair_suffix(repaired_by: Option<RepairStrategy>) -> &'static str {
    match repaired_by {
        Some(RepairStrategy::PatternFix) => " (auto-fixed)",
        Some(RepairStrategy::ModelFix) => " (model-fixed)",
        None => "",
    }
}

/// Plot title: the question, marked when a repair produced the data.
pub fn plot_title(question: &str, repaired_by: Option<RepairStrategy>) -> String {
    match repaired_by {
        Some(RepairStrategy::PatternFix) => format!("{question} (Auto-Fixed)"),
        Some(RepairStrategy::ModelFix) => format!("{question} (Model-Fixed)"),
        None => question.to_string(),
    }
}

/// Lower-cased question with leading question phrases and trailing
/// punctuation removed.
pub fn question_subject(question: &str) -> String {
    let lower = question.trim().to_lowercase();
    let mut subject = lower.as_str();
    for prefix in QUESTION_PREFIXES {
        if let Some(rest) = subject.strip_prefix(prefix) {
            subject = rest;
            break;
        }
    }
    subject
        .trim_end_matches(['?', '.', '!'])
        .trim()
        .to_string()
}

pub fn answer_text(
    question: &str,
    result: &QueryResult,
    repaired_by: Option<RepairStrategy>,
) -> String {
    let suffix = repair_suffix(repaired_by);
    if let Some(value) = result.scalar() {
        return format!(
            "The {} is: **{}**{suffix}",
            question_subject(question),
            display_value(value)
        );
    }
    if repaired_by.is_some() {
        format!("Here are the results from the database{suffix}:")
    } else {
        RESULTS_HEADER.to_string()
    }
}

/// A cell as shown to the user.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Text, plot and column groups for a non-empty result.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub text: String,
    pub plot: Option<PlotSpec>,
    pub groups: ColumnGroups,
}

pub fn summarize(
    question: &str,
    result: &QueryResult,
    repaired_by: Option<RepairStrategy>,
) -> Summary {
    let groups = classify_columns(result);
    let plot = default_plot(result, &plot_title(question, repaired_by));
    tracing::debug!(
        numeric = groups.numeric.len(),
        textual = groups.textual.len(),
        temporal = groups.temporal.len(),
        plot = ?plot.as_ref().map(|p| p.kind),
        "summarized result"
    );
    Summary {
        text: answer_text(question, result, repaired_by),
        plot,
        groups,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map};

    use super::*;
    use crate::executor::ColumnMeta;

    fn result(columns: &[(&str, Option<&str>)], rows: Vec<Value>) -> QueryResult {
        QueryResult {
            columns: columns
                .iter()
                .map(|(name, ty)| ColumnMeta::new(*name, *ty))
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

    #[test]
    fn classifies_declared_types() {
        let r = result(
            &[
                ("VENDOR_NAME", Some("STRING")),
                ("TOTAL", Some("NUMERIC(18, 2)")),
                ("PO_DATE", Some("DATE")),
                ("ACTIVE", Some("BOOL")),
            ],
            vec![],
        );
        let groups = classify_columns(&r);
        assert_eq!(groups.textual, vec!["VENDOR_NAME"]);
        assert_eq!(groups.numeric, vec!["TOTAL"]);
        assert_eq!(groups.temporal, vec!["PO_DATE"]);
    }

    #[test]
    fn infers_undeclared_types_from_values() {
        let r = result(
            &[("month", None), ("label", None), ("amount", None), ("created", None)],
            vec![
                json!({"month": "2024-01-01", "label": "a", "amount": 1.5, "created": "2024-01-01 10:00:00"}),
                json!({"month": "2024-02-01", "label": "2024-01-01", "amount": null, "created": "n/a"}),
            ],
        );
        let groups = classify_columns(&r);
        assert_eq!(groups.numeric, vec!["amount"]);
        assert_eq!(groups.temporal, vec!["month"]);
        // `created` has no time hint and not every value parses.
        assert_eq!(groups.textual, vec!["label", "created"]);
    }

    #[test]
    fn default_plot_priority() {
        let line = result(
            &[("VENDOR", Some("STRING")), ("MONTH", Some("DATE")), ("SPEND", Some("FLOAT64"))],
            vec![json!({"VENDOR": "a", "MONTH": "2024-01-01", "SPEND": 1.0})],
        );
        let plot = default_plot(&line, "q").unwrap();
        assert_eq!((plot.kind, plot.x.as_str(), plot.y.as_deref()), (ChartKind::Line, "MONTH", Some("SPEND")));

        let bar = result(
            &[("VENDOR", Some("STRING")), ("SPEND", Some("FLOAT64"))],
            vec![json!({"VENDOR": "a", "SPEND": 1.0})],
        );
        assert_eq!(default_plot(&bar, "q").unwrap().kind, ChartKind::Bar);

        let hist = result(&[("SPEND", Some("FLOAT64"))], vec![json!({"SPEND": 1.0})]);
        let plot = default_plot(&hist, "q").unwrap();
        assert_eq!((plot.kind, plot.y), (ChartKind::Histogram, None));

        let count = result(&[("VENDOR", Some("STRING"))], vec![json!({"VENDOR": "a"})]);
        assert_eq!(default_plot(&count, "q").unwrap().kind, ChartKind::CountPlot);

        let none = result(&[("FLAG", Some("BOOL"))], vec![json!({"FLAG": true})]);
        assert_eq!(default_plot(&none, "q"), None);
    }

    #[test]
    fn scalar_answers_name_the_subject() {
        let r = result(&[("total", Some("FLOAT64"))], vec![json!({"total": 1234.5})]);
        assert_eq!(
            answer_text("What is the total spend?", &r, None),
            "The total spend is: **1234.5**"
        );
        assert_eq!(
            answer_text("Show me the number of suppliers", &r, Some(RepairStrategy::PatternFix)),
            "The number of suppliers is: **1234.5** (auto-fixed)"
        );
    }

    #[test]
    fn multi_cell_answers_use_a_header() {
        let r = result(
            &[("VENDOR", Some("STRING")), ("SPEND", Some("FLOAT64"))],
            vec![json!({"VENDOR": "a", "SPEND": 1.0})],
        );
        assert_eq!(answer_text("Top vendors", &r, None), RESULTS_HEADER);
        assert_eq!(
            answer_text("Top vendors", &r, Some(RepairStrategy::ModelFix)),
            "Here are the results from the database (model-fixed):"
        );
        assert_eq!(plot_title("Top vendors", Some(RepairStrategy::ModelFix)), "Top vendors (Model-Fixed)");
    }
}
