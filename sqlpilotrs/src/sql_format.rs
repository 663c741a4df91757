//! Display formatting for the query shown alongside an answer.

use std::collections::HashSet;

use once_cell::sync::Lazy;

use crate::sql_lexer::{next_significant, prev_significant, tokenize, Token, TokenKind};

static KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "ALL", "AND", "AS", "ASC", "BETWEEN", "BY", "CASE", "CROSS", "DESC", "DISTINCT", "ELSE",
        "END", "EXCEPT", "EXISTS", "FALSE", "FROM", "FULL", "GROUP", "HAVING", "IN", "INNER",
        "INTERSECT", "INTERVAL", "IS", "JOIN", "LEFT", "LIKE", "LIMIT", "NOT", "NULL", "OFFSET",
        "ON", "OR", "ORDER", "OUTER", "OVER", "PARTITION", "QUALIFY", "RIGHT", "SELECT", "THEN",
        "TRUE", "UNION", "USING", "WHEN", "WHERE", "WITH",
    ]
    .into_iter()
    .collect()
});

const JOIN_MODIFIERS: &[&str] = &["LEFT", "RIGHT", "FULL", "INNER", "CROSS", "OUTER"];

const INDENT: &str = "  ";

/// Upper-case keywords and start each major clause on its own line.
/// Literals, quoted identifiers and comments are kept as written. Input
/// that does not tokenize is returned trimmed.
pub fn format_sql(sql: &str) -> String {
    let tokens = match tokenize(sql) {
        Ok(tokens) => tokens,
        Err(_) => return sql.trim().to_string(),
    };

    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    // One entry per open paren: true when it opens a subquery.
    let mut parens: Vec<bool> = Vec::new();
    for (i, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::Punct if token.is_punct("(") => {
                let subquery = next_significant(&tokens, i)
                    .is_some_and(|n| tokens[n].is_keyword("SELECT") || tokens[n].is_keyword("WITH"));
                parens.push(subquery);
            }
            TokenKind::Punct if token.is_punct(")") => {
                parens.pop();
            }
            TokenKind::Word => {
                let query_level = parens.last().copied().unwrap_or(true);
                if query_level && starts_clause(&tokens, i) {
                    while out.last().is_some_and(|s| s.trim().is_empty()) {
                        out.pop();
                    }
                    let depth = parens.iter().filter(|&&s| s).count();
                    out.push(format!("\n{}", INDENT.repeat(depth)));
                }
                if is_keyword(&tokens, i) {
                    out.push(token.text.to_ascii_uppercase());
                    continue;
                }
            }
            _ => {}
        }
        out.push(token.text.clone());
    }
    out.concat().trim().to_string()
}

fn is_keyword(tokens: &[Token], i: usize) -> bool {
    let dotted = |j: Option<usize>| j.is_some_and(|j| tokens[j].is_punct("."));
    KEYWORDS.contains(tokens[i].text.to_ascii_uppercase().as_str())
        && !dotted(prev_significant(tokens, i))
        && !dotted(next_significant(tokens, i))
}

fn starts_clause(tokens: &[Token], i: usize) -> bool {
    let Some(prev) = prev_significant(tokens, i) else {
        return false;
    };
    if tokens[prev].is_punct("(") || tokens[prev].is_punct(".") {
        return false;
    }
    let next_is = |kw: &str| next_significant(tokens, i).is_some_and(|n| tokens[n].is_keyword(kw));
    let word = tokens[i].text.to_ascii_uppercase();
    match word.as_str() {
        "SELECT" => !["ALL", "DISTINCT"]
            .iter()
            .any(|kw| tokens[prev].is_keyword(kw) && !preceded_by_set_op(tokens, prev))
            && !tokens[prev].is_keyword("AS"),
        "FROM" | "WHERE" | "HAVING" | "LIMIT" | "QUALIFY" | "UNION" | "INTERSECT" | "EXCEPT" => true,
        "GROUP" | "ORDER" => next_is("BY"),
        "JOIN" => !JOIN_MODIFIERS.iter().any(|m| tokens[prev].is_keyword(m)),
        "LEFT" | "RIGHT" | "FULL" | "INNER" | "CROSS" => {
            (next_is("JOIN") || next_is("OUTER"))
                && !JOIN_MODIFIERS.iter().any(|m| tokens[prev].is_keyword(m))
        }
        _ => false,
    }
}

fn preceded_by_set_op(tokens: &[Token], i: usize) -> bool {
    prev_significant(tokens, i).is_some_and(|p| {
        ["UNION", "INTERSECT", "EXCEPT"]
            .iter()
            .any(|kw| tokens[p].is_keyword(kw))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaks_major_clauses() {
        let sql = "select a, b from `p.d.t` t left join `p.d.u` u on t.id = u.id where a = 'from x' group by a order by b limit 5";
        assert_eq!(
            format_sql(sql),
            "SELECT a, b\nFROM `p.d.t` t\nLEFT JOIN `p.d.u` u ON t.id = u.id\nWHERE a = 'from x'\nGROUP BY a\nORDER BY b\nLIMIT 5"
        );
    }

    #[test]
    fn indents_subqueries_and_leaves_calls_alone() {
        let sql = "select extract(year from d) as y from (select d from t) x";
        assert_eq!(
            format_sql(sql),
            "SELECT extract(year FROM d) AS y\nFROM (SELECT d\n  FROM t) x"
        );
    }

    #[test]
    fn set_operations_start_lines() {
        assert_eq!(
            format_sql("select 1 union all select 2"),
            "SELECT 1\nUNION ALL\nSELECT 2"
        );
    }

    #[test]
    fn comments_and_dotted_names_are_kept() {
        assert_eq!(
            format_sql("select t.order -- keep me\nfrom t"),
            "SELECT t.order -- keep me\nFROM t"
        );
    }
}
