//! Deterministic fixes for typed execution failures.

use std::collections::BTreeMap;

use crate::dialect::{BigQueryDialect, Dialect};
use crate::executor::FailureKind;
use crate::sql_lexer::{
    is_numeric_text, matching_paren, next_significant, prev_significant, render, tokenize, Token,
    TokenKind,
};

/// Apply the substitution for `kind` with the BigQuery dialect. Returns
/// `None` when nothing changed (including unclassified failures).
pub fn apply(sql: &str, kind: FailureKind) -> Option<String> {
    apply_with(&BigQueryDialect::default(), sql, kind)
}

pub fn apply_with<D: Dialect>(dialect: &D, sql: &str, kind: FailureKind) -> Option<String> {
    let tokens = match tokenize(sql) {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::debug!(error = %e, "pattern fix skipped: query does not tokenize");
            return None;
        }
    };
    let edits = match kind {
        FailureKind::StringSumMismatch => cast_sum_arguments(dialect, &tokens),
        FailureKind::StringIntCompareMismatch => {
            cast_compared_literals(dialect, &tokens, dialect.int_type(), true)
        }
        FailureKind::StringFloatCompareMismatch => {
            cast_compared_literals(dialect, &tokens, dialect.float_type(), false)
        }
        FailureKind::Unclassified => BTreeMap::new(),
    };
    if edits.is_empty() {
        return None;
    }

    let mut out = String::with_capacity(sql.len() + 32 * edits.len());
    let mut i = 0;
    while i < tokens.len() {
        match edits.get(&i) {
            Some((end, text)) => {
                out.push_str(text);
                i = end + 1;
            }
            None => {
                out.push_str(&tokens[i].text);
                i += 1;
            }
        }
    }
    (out != sql).then_some(out)
}

/// `SUM(x)` -> `SUM(CAST(x AS FLOAT64))`; `SUM(DISTINCT x)` casts `x`.
fn cast_sum_arguments<D: Dialect>(dialect: &D, tokens: &[Token]) -> BTreeMap<usize, (usize, String)> {
    let mut edits = BTreeMap::new();
    let mut i = 0;
    while i < tokens.len() {
        let call = tokens[i].is_keyword("SUM")
            && next_significant(tokens, i).is_some_and(|n| tokens[n].is_punct("("));
        if !call {
            i += 1;
            continue;
        }
        let Some(open) = next_significant(tokens, i) else {
            break;
        };
        let Some(close) = matching_paren(tokens, open) else {
            break;
        };
        let mut start = next_significant(tokens, open).filter(|&s| s < close);
        if let Some(s) = start.filter(|&s| tokens[s].is_keyword("DISTINCT")) {
            start = next_significant(tokens, s).filter(|&s| s < close);
        }
        let end = prev_significant(tokens, close).filter(|&e| e > open);
        if let (Some(start), Some(end)) = (start, end) {
            if start <= end && !is_float_cast(dialect, tokens, start, end) {
                let arg = render(&tokens[start..=end]);
                edits.insert(start, (end, dialect.cast(&arg, dialect.float_type())));
            }
        }
        // Argument edits cover any nested SUM.
        i = close + 1;
    }
    edits
}

/// `CAST(... AS FLOAT64)` spanning exactly `start..=end`.
fn is_float_cast<D: Dialect>(dialect: &D, tokens: &[Token], start: usize, end: usize) -> bool {
    let is_cast = tokens[start].is_keyword("CAST") || tokens[start].is_keyword("SAFE_CAST");
    let Some(open) = next_significant(tokens, start).filter(|&o| tokens[o].is_punct("(")) else {
        return false;
    };
    is_cast
        && matching_paren(tokens, open) == Some(end)
        && prev_significant(tokens, end).is_some_and(|t| tokens[t].is_keyword(dialect.float_type()))
}

/// A numeric string literal compared with `=` to a column, on either side.
fn cast_compared_literals<D: Dialect>(
    dialect: &D,
    tokens: &[Token],
    ty: &str,
    integer_only: bool,
) -> BTreeMap<usize, (usize, String)> {
    let mut edits = BTreeMap::new();
    for (i, token) in tokens.iter().enumerate() {
        if token.kind != TokenKind::String {
            continue;
        }
        let numeric = token
            .string_content()
            .is_some_and(|text| is_numeric_text(text, integer_only));
        if !numeric {
            continue;
        }
        let column_right = next_significant(tokens, i)
            .filter(|&op| tokens[op].is_punct("="))
            .and_then(|op| next_significant(tokens, op))
            .is_some_and(|c| tokens[c].is_ident());
        let column_left = prev_significant(tokens, i)
            .filter(|&op| tokens[op].is_punct("="))
            .and_then(|op| prev_significant(tokens, op))
            .is_some_and(|c| tokens[c].is_ident());
        if column_left || column_right {
            edits.insert(i, (i, dialect.cast(&token.text, ty)));
        }
    }
    edits
}
