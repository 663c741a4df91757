//! Chart data preparation. Rendering is left to the front end; this module
//! only shapes a result into the series a chart of the given kind draws.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

use crate::error::SqlPilotError;
use crate::executor::QueryResult;
use crate::summarizer::{classify_columns, display_value};

/// Categories shown on bar and count plots before the rest become `Others`.
pub const MAX_BAR_CATEGORIES: usize = 15;
/// Slices on a pie chart, `Others` included.
pub const MAX_PIE_SLICES: usize = 10;
pub const OTHERS_LABEL: &str = "Others";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
    Scatter,
    Histogram,
    CountPlot,
}

impl ChartKind {
    pub const ALL: [ChartKind; 6] = [
        ChartKind::Bar,
        ChartKind::Line,
        ChartKind::Pie,
        ChartKind::Scatter,
        ChartKind::Histogram,
        ChartKind::CountPlot,
    ];

    /// Whether the kind needs a y column.
    pub fn needs_y(self) -> bool {
        matches!(self, ChartKind::Line | ChartKind::Pie | ChartKind::Scatter)
    }
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChartKind::Bar => "bar",
            ChartKind::Line => "line",
            ChartKind::Pie => "pie",
            ChartKind::Scatter => "scatter",
            ChartKind::Histogram => "histogram",
            ChartKind::CountPlot => "countplot",
        };
        f.write_str(name)
    }
}

impl FromStr for ChartKind {
    type Err = SqlPilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "bar" => Ok(ChartKind::Bar),
            "line" => Ok(ChartKind::Line),
            "pie" => Ok(ChartKind::Pie),
            "scatter" => Ok(ChartKind::Scatter),
            "histogram" | "hist" => Ok(ChartKind::Histogram),
            "countplot" | "count" => Ok(ChartKind::CountPlot),
            _ => Err(SqlPilotError::Config(format!("unknown chart type: {s}"))),
        }
    }
}

/// Which columns to draw and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlotSpec {
    pub kind: ChartKind,
    pub x: String,
    pub y: Option<String>,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Category {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    pub x: Value,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Series {
    Categories(Vec<Category>),
    Points(Vec<Point>),
    /// Raw samples; binning is the renderer's job.
    Samples(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartData {
    pub kind: ChartKind,
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub series: Series,
}

/// Shape `result` for the plot `spec`. `None` when the columns don't suit the kind
/// or nothing is left to draw.
pub fn prepare_chart(result: &QueryResult, spec: &PlotSpec) -> Option<ChartData> {
    if result.is_empty() || result.column(&spec.x).is_none() {
        return None;
    }
    let y = spec
        .y
        .as_deref()
        .filter(|y| result.column(y).is_some());
    let groups = classify_columns(result);
    let x = spec.x.as_str();

    let (x_label, y_label, series) = match spec.kind {
        ChartKind::Bar => match y {
            Some(y) if groups.is_numeric(y) => {
                let sums = group_sum(result, x, y);
                (axis_label(x), axis_label(y), Series::Categories(top_with_others(sums, MAX_BAR_CATEGORIES)))
            }
            None if groups.is_numeric(x) => {
                let counts = value_counts(result, x);
                (axis_label(x), "Count".to_string(), Series::Categories(top_with_others(counts, MAX_BAR_CATEGORIES)))
            }
            _ => return None,
        },
        ChartKind::Line => {
            let y = y.filter(|y| groups.is_numeric(y))?;
            let mut points = points(result, x, y);
            points.sort_by(|a, b| compare_values(&a.x, &b.x));
            (axis_label(x), axis_label(y), Series::Points(points))
        }
        ChartKind::Scatter => {
            let y = y.filter(|y| groups.is_numeric(y) && groups.is_numeric(x))?;
            let points = points(result, x, y)
                .into_iter()
                .filter(|p| as_number(&p.x).is_some())
                .collect();
            (axis_label(x), axis_label(y), Series::Points(points))
        }
        ChartKind::Pie => {
            let y = y.filter(|y| groups.is_numeric(y))?;
            pie_series(result, x, y).map(|series| (axis_label(x), axis_label(y), series))?
        }
        ChartKind::Histogram => {
            if !groups.is_numeric(x) {
                return None;
            }
            let samples = result.values(x).filter_map(as_number).collect();
            (axis_label(x), "Frequency".to_string(), Series::Samples(samples))
        }
        ChartKind::CountPlot => {
            if !groups.is_textual(x) {
                return None;
            }
            let counts = value_counts(result, x);
            // Horizontal bars: categories on the y axis.
            ("Count".to_string(), axis_label(x), Series::Categories(top_with_others(counts, MAX_BAR_CATEGORIES)))
        }
    };

    let empty = match &series {
        Series::Categories(c) => c.is_empty(),
        Series::Points(p) => p.is_empty(),
        Series::Samples(s) => s.is_empty(),
    };
    if empty {
        return None;
    }
    Some(ChartData {
        kind: spec.kind,
        title: spec.title.clone(),
        x_label,
        y_label,
        series,
    })
}

fn pie_series(result: &QueryResult, x: &str, y: &str) -> Option<Series> {
    if result.values(y).filter_map(as_number).any(|v| v < 0.0) {
        return None;
    }
    let sums = group_sum(result, x, y);
    let keep = if sums.len() > MAX_PIE_SLICES {
        MAX_PIE_SLICES - 1
    } else {
        MAX_PIE_SLICES
    };
    let slices = top_with_others(sums, keep);
    let total: f64 = slices.iter().map(|c| c.value).sum();
    if total == 0.0 {
        return None;
    }
    Some(Series::Categories(slices))
}

/// `x` title-cased with underscores as spaces.
pub fn axis_label(column: &str) -> String {
    column
        .replace('_', " ")
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn label(value: &Value) -> Option<String> {
    (!value.is_null()).then(|| display_value(value))
}

/// Sum of `y` per distinct `x`, in first-seen order. Null keys are dropped.
fn group_sum(result: &QueryResult, x: &str, y: &str) -> Vec<Category> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<Category> = Vec::new();
    for row in &result.rows {
        let Some(key) = row.get(x).and_then(label) else {
            continue;
        };
        let value = row.get(y).and_then(as_number).unwrap_or(0.0);
        match index.get(&key) {
            Some(&i) => out[i].value += value,
            None => {
                index.insert(key.clone(), out.len());
                out.push(Category { label: key, value });
            }
        }
    }
    out
}

fn value_counts(result: &QueryResult, x: &str) -> Vec<Category> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<Category> = Vec::new();
    for key in result.values(x).filter_map(label) {
        match index.get(&key) {
            Some(&i) => out[i].value += 1.0,
            None => {
                index.insert(key.clone(), out.len());
                out.push(Category { label: key, value: 1.0 });
            }
        }
    }
    out
}

/// Sort descending and fold everything past `keep` into one `Others` entry
/// (dropped when it sums to zero).
fn top_with_others(mut categories: Vec<Category>, keep: usize) -> Vec<Category> {
    categories.sort_by(|a, b| b.value.partial_cmp(&a.value).unwrap_or(Ordering::Equal));
    if categories.len() <= keep {
        return categories;
    }
    let rest: f64 = categories[keep..].iter().map(|c| c.value).sum();
    categories.truncate(keep);
    if rest > 0.0 {
        categories.push(Category {
            label: OTHERS_LABEL.to_string(),
            value: rest,
        });
    }
    categories
}

fn points(result: &QueryResult, x: &str, y: &str) -> Vec<Point> {
    result
        .rows
        .iter()
        .filter_map(|row| {
            let x = row.get(x).filter(|v| !v.is_null())?.clone();
            let y = row.get(y).and_then(as_number)?;
            Some(Point { x, y })
        })
        .collect()
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (as_number(a), as_number(b)) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        _ => display_value(a).cmp(&display_value(b)),
    }
}
