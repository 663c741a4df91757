//! Alias Rewriter: turns a generated query into a canonical one.
//!
//! Pass one discovers warehouse tables, assigns aliases, rewrites every table
//! reference to `` `project.dataset.table` alias `` and qualifies column
//! references with the alias of the table that owns them. Pass two makes
//! plain text equality comparisons case-insensitive. Both passes are edits
//! over the lexer's token stream, so text that is not rewritten keeps its
//! original formatting, and running the rewriter on its own output changes
//! nothing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::aliases::{AliasCatalog, AliasMap};
use crate::config::SqlPilotConfig;
use crate::dialect::{BigQueryDialect, Dialect};
use crate::error::Result;
use crate::schema::{FieldGroup, SchemaDescriptor};
use crate::sql_lexer::{
    chain_end, chain_start, enclosing_calls, is_numeric_text, join_dashed_paths, matching_paren,
    next_significant, prev_significant, render, tokenize, Token, TokenKind,
};

/// Values of the approval status description. Comparisons against them stay
/// case-sensitive.
pub const STATUS_VALUES: [&str; 6] = [
    "Document has been Approved",
    "Document has been Cancelled",
    "Document is Approved but not yet Accepted",
    "Document is still undergoing Approval",
    "Document is not yet Complete",
    "Document has been Rejected",
];

/// Words that are never column references.
static HARD_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "ALL", "AND", "ANY", "ARRAY", "AS", "ASC", "AT", "BETWEEN", "BY", "CASE", "COLLATE",
        "CREATE", "CROSS", "CUBE", "CURRENT", "DEFAULT", "DELETE", "DESC", "DISTINCT", "ELSE",
        "END", "ESCAPE", "EXCEPT", "EXCLUDE", "EXISTS", "FALSE", "FETCH", "FIRST", "FOLLOWING",
        "FOR", "FROM", "FULL", "GROUP", "GROUPING", "GROUPS", "HAVING", "IF", "IGNORE", "IN",
        "INNER", "INSERT", "INTERSECT", "INTERVAL", "INTO", "IS", "JOIN", "LAST", "LATERAL",
        "LEFT", "LIKE", "LIMIT", "MERGE", "NATURAL", "NOT", "NULL", "NULLS", "OF", "OFFSET", "ON",
        "OR", "ORDER", "OUTER", "OVER", "PARTITION", "PIVOT", "PRECEDING", "QUALIFY", "RANGE",
        "RECURSIVE", "RESPECT", "RIGHT", "ROLLUP", "ROW", "ROWS", "SELECT", "SET", "SOME",
        "STRUCT", "SYSTEM_TIME", "TABLE", "TABLESAMPLE", "THEN", "TO", "TRUE", "UNBOUNDED",
        "UNION", "UNNEST", "UNPIVOT", "UPDATE", "USING", "VALUES", "WHEN", "WHERE", "WINDOW",
        "WITH", "WITHIN",
    ]
    .into_iter()
    .collect()
});

/// Date parts, type names and niladic functions. They are only treated as
/// columns when the schema declares a column of that name and the context
/// allows one.
static SOFT_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "MICROSECOND", "MILLISECOND", "SECOND", "MINUTE", "HOUR", "DAY", "DAYOFWEEK", "DAYOFYEAR",
        "WEEK", "ISOWEEK", "MONTH", "QUARTER", "YEAR", "ISOYEAR", "SUNDAY", "MONDAY", "TUESDAY",
        "WEDNESDAY", "THURSDAY", "FRIDAY", "SATURDAY", "DATE", "DATETIME", "TIME", "TIMESTAMP",
        "INT64", "INT", "INTEGER", "SMALLINT", "BIGINT", "TINYINT", "BYTEINT", "FLOAT64",
        "NUMERIC", "BIGNUMERIC", "DECIMAL", "BIGDECIMAL", "BOOL", "BOOLEAN", "STRING", "BYTES",
        "JSON", "GEOGRAPHY", "CURRENT_DATE", "CURRENT_DATETIME", "CURRENT_TIME",
        "CURRENT_TIMESTAMP",
    ]
    .into_iter()
    .collect()
});

/// Functions whose arguments include date parts or type names.
static DATE_PART_FUNCTIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "CAST", "SAFE_CAST", "EXTRACT", "DATE_TRUNC", "DATETIME_TRUNC", "TIMESTAMP_TRUNC",
        "TIME_TRUNC", "DATE_DIFF", "DATETIME_DIFF", "TIMESTAMP_DIFF", "TIME_DIFF", "DATE_ADD",
        "DATE_SUB", "DATETIME_ADD", "DATETIME_SUB", "TIMESTAMP_ADD", "TIMESTAMP_SUB", "TIME_ADD",
        "TIME_SUB", "LAST_DAY", "GENERATE_DATE_ARRAY", "WEEK",
    ]
    .into_iter()
    .collect()
});

fn is_hard_keyword(token: &Token) -> bool {
    token.kind == TokenKind::Word && HARD_KEYWORDS.contains(token.text.to_ascii_uppercase().as_str())
}

fn is_soft_keyword(token: &Token) -> bool {
    token.kind == TokenKind::Word && SOFT_KEYWORDS.contains(token.text.to_ascii_uppercase().as_str())
}

/// Canonical query plus the aliases it uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteOutput {
    pub sql: String,
    pub alias_map: AliasMap,
}

pub struct AliasRewriter {
    schema: Arc<SchemaDescriptor>,
    catalog: AliasCatalog,
    dialect: BigQueryDialect,
    /// (table, column) pairs compared case-sensitively.
    protected: Vec<(String, String)>,
    fold_text_comparisons: bool,
}

impl AliasRewriter {
    pub fn new(
        schema: Arc<SchemaDescriptor>,
        project: impl Into<String>,
        dataset: impl Into<String>,
    ) -> Self {
        Self {
            schema,
            catalog: AliasCatalog::new(),
            dialect: BigQueryDialect::new(project, dataset),
            protected: vec![("DIL_APPROVAL_STATUS_D".to_string(), "DESCRIPTION".to_string())],
            fold_text_comparisons: true,
        }
    }

    pub fn from_config(schema: Arc<SchemaDescriptor>, config: &SqlPilotConfig) -> Self {
        Self::new(
            schema,
            config.warehouse.project_id.clone(),
            config.warehouse.dataset_id.clone(),
        )
        .with_catalog(AliasCatalog::new().with_overrides(&config.rewrite.curated_aliases))
        .with_protected_columns(&config.rewrite.protected_columns)
        .with_text_folding(config.rewrite.case_insensitive_compare)
    }

    pub fn with_catalog(mut self, catalog: AliasCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Replace the protected columns; entries are `TABLE.COLUMN` or a bare `COLUMN`.
    pub fn with_protected_columns<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.protected = columns
            .iter()
            .map(|entry| match entry.as_ref().rsplit_once('.') {
                Some((table, column)) => (table.to_string(), column.to_string()),
                None => (String::new(), entry.as_ref().to_string()),
            })
            .collect();
        self
    }

    pub fn with_text_folding(mut self, enabled: bool) -> Self {
        self.fold_text_comparisons = enabled;
        self
    }

    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    pub fn rewrite(&self, sql: &str) -> Result<RewriteOutput> {
        let tokens = join_dashed_paths(tokenize(sql)?);
        let (qualified, alias_map) = self.qualify(&tokens)?;
        let sql = if self.fold_text_comparisons {
            self.fold_comparisons(&qualified, &alias_map)?
        } else {
            qualified
        };
        tracing::debug!(
            tables = alias_map.len(),
            aliases = ?alias_map.aliases().collect::<Vec<_>>(),
            "rewrote generated query"
        );
        tracing::trace!(sql = %sql, "canonical query");
        Ok(RewriteOutput { sql, alias_map })
    }

    // Pass one.

    fn qualify(&self, tokens: &[Token]) -> Result<(String, AliasMap)> {
        let calls = enclosing_calls(tokens);
        let clause = clauses(tokens);
        let mut tree = ScopeTree::build(tokens);
        let mut consumed = vec![false; tokens.len()];

        let ctes = find_ctes(tokens, &mut tree, &mut consumed);
        let found = self.discover_tables(tokens, &mut tree, &ctes, &mut consumed);
        mark_using_lists(tokens, &mut consumed);

        let mut taken: HashSet<String> = ctes.clone();
        taken.extend(found.opaque_names.iter().cloned());
        let alias_map = self
            .catalog
            .assign(found.tables.iter().map(|t| t.base.as_str()), &taken);
        let instance_aliases = instance_aliases(&found.tables, &alias_map, &taken);

        let ctx = QueryContext {
            tree: &tree,
            tables: &found.tables,
            model_aliases: &found.model_aliases,
            alias_map: &alias_map,
            instance_aliases: &instance_aliases,
        };
        let mut edits: BTreeMap<usize, Edit> = BTreeMap::new();

        for (index, table) in found.tables.iter().enumerate() {
            if let Some(alias) = &instance_aliases[index] {
                edits.insert(
                    table.start,
                    Edit::new(
                        table.end,
                        vec![
                            Token::new(TokenKind::QuotedIdent, self.dialect.qualify_table(&table.base)),
                            Token::space(),
                            Token::word(alias),
                        ],
                    ),
                );
            }
        }

        // Select-list aliases, `expr AS name` or `expr name`. A plain column's
        // alias is dropped and its uses replaced by the qualified column.
        let mut output_names: HashSet<(usize, String)> = HashSet::new();
        let mut stripped: HashMap<(usize, String), (usize, usize)> = HashMap::new();
        let mut in_stripped_column = vec![false; tokens.len()];
        for a in 0..tokens.len() {
            if consumed[a] {
                continue;
            }
            let n = if tokens[a].is_keyword("AS") {
                if matches!(calls[a].as_str(), "CAST" | "SAFE_CAST") {
                    continue;
                }
                let Some(n) = next_significant(tokens, a).filter(|&n| tokens[n].is_ident()) else {
                    continue;
                };
                consumed[a] = true;
                n
            } else if is_implicit_alias(tokens, a, &clause, &tree) {
                a
            } else {
                continue;
            };
            consumed[n] = true;
            let name = ident_key(&tokens[n]);
            let scope = tree.scope_of[a];
            match column_before_alias(tokens, a, tree.query_level[a]) {
                Some((s, p)) if !tree.scopes[scope].exports => {
                    edits.insert(p + 1, Edit::new(n, Vec::new()));
                    for flag in &mut in_stripped_column[s..=p] {
                        *flag = true;
                    }
                    stripped.insert((scope, name), (s, p));
                }
                _ => {
                    output_names.insert((scope, name));
                }
            }
        }

        // Qualified references: re-point model aliases and table names.
        let mut i = 0;
        while i < tokens.len() {
            let starts_chain = tokens[i].is_ident()
                && !consumed[i]
                && (i == 0 || !tokens[i - 1].is_punct("."))
                && tokens.get(i + 1).is_some_and(|t| t.is_punct("."));
            if !starts_chain {
                i += 1;
                continue;
            }
            let end = chain_end(tokens, i);
            let qualifier_end = if end > i {
                end - 2
            } else if tokens.get(i + 2).is_some_and(|t| t.is_punct("*")) {
                i
            } else {
                i += 1;
                continue;
            };
            let is_call = end > i
                && next_significant(tokens, end).is_some_and(|n| tokens[n].is_punct("("));
            if !is_call {
                if let Some(alias) = ctx.qualifier_alias(&tokens[i..=qualifier_end], &ctes) {
                    if render(&tokens[i..=qualifier_end]) != alias {
                        edits.insert(i, Edit::new(qualifier_end, vec![Token::word(alias)]));
                    }
                }
            }
            i = end + 1;
        }

        // Bare column references.
        let mut alias_names: HashSet<String> = ctes.clone();
        alias_names.extend(found.opaque_names.iter().cloned());
        alias_names.extend(found.model_aliases.keys().cloned());
        alias_names.extend(alias_map.aliases().map(str::to_ascii_lowercase));
        alias_names.extend(instance_aliases.iter().flatten().map(|a| a.to_ascii_lowercase()));

        let mut substitutions = Vec::new();
        for (i, token) in tokens.iter().enumerate() {
            if token.kind != TokenKind::Word || consumed[i] {
                continue;
            }
            let dotted = (i > 0 && tokens[i - 1].is_punct("."))
                || tokens.get(i + 1).is_some_and(|t| t.is_punct("."));
            if dotted || is_hard_keyword(token) {
                continue;
            }
            let prev = prev_significant(tokens, i);
            let next = next_significant(tokens, i);
            if next.is_some_and(|n| tokens[n].is_punct("(") || tokens[n].is_punct("=>")) {
                continue;
            }
            if prev.is_some_and(|p| tokens[p].is_keyword("AS") || tokens[p].is_keyword("OVER")) {
                continue;
            }
            let name = ident_key(token);
            if alias_names.contains(&name) {
                continue;
            }
            let scope = tree.scope_of[i];
            if !in_stripped_column[i] {
                if let Some(&(s, p)) = stripped.get(&(scope, name.clone())) {
                    substitutions.push((i, s, p));
                    continue;
                }
            }
            // An output alias is referenced by name where the select list is
            // visible, and anywhere when no table in scope has such a column.
            if output_names.contains(&(scope, name.clone()))
                && (clause[i].sees_select_aliases()
                    || ctx.schema_owner(self, scope, &token.text).is_none())
            {
                continue;
            }
            if is_soft_keyword(token) {
                let date_part_context = DATE_PART_FUNCTIONS.contains(calls[i].as_str())
                    || prev.is_some_and(|p| {
                        tokens[p].is_keyword("INTERVAL") || tokens[p].kind == TokenKind::Number
                    })
                    || next.is_some_and(|n| tokens[n].kind == TokenKind::String);
                if date_part_context || ctx.schema_owner(self, scope, &token.text).is_none() {
                    continue;
                }
            }
            let owner = ctx
                .schema_owner(self, scope, &token.text)
                .or_else(|| ctx.fallback_owner(scope));
            if let Some(alias) = owner {
                edits.insert(
                    i,
                    Edit::new(
                        i,
                        vec![Token::word(alias), Token::punct("."), token.clone()],
                    ),
                );
            }
        }

        // References to a stripped column alias become the qualified column.
        for (i, s, p) in substitutions {
            let replacement = tokenize(&render_range(tokens, &edits, s, p))?;
            edits.insert(i, Edit::new(i, replacement));
        }

        Ok((apply_edits(tokens, &edits), alias_map))
    }

    fn discover_tables(
        &self,
        tokens: &[Token],
        tree: &mut ScopeTree,
        ctes: &HashSet<String>,
        consumed: &mut [bool],
    ) -> Discovered {
        let mut found = Discovered::default();
        for i in 0..tokens.len() {
            let is_from = tokens[i].is_keyword("FROM")
                && tree.query_level[i]
                && !prev_significant(tokens, i).is_some_and(|p| tokens[p].is_keyword("DISTINCT"));
            let is_join = tokens[i].is_keyword("JOIN");
            if !is_from && !is_join {
                continue;
            }
            let scope = tree.scope_of[i];
            let mut cursor = next_significant(tokens, i);
            while let Some(j) = cursor {
                let Some(end) = self.discover_item(tokens, j, scope, tree, ctes, consumed, &mut found)
                else {
                    break;
                };
                cursor = if is_from {
                    next_significant(tokens, end)
                        .filter(|&c| tokens[c].is_punct(","))
                        .and_then(|c| next_significant(tokens, c))
                } else {
                    None
                };
            }
        }
        found
    }

    /// One `FROM`/`JOIN` item starting at `j`; returns its last token index.
    #[allow(clippy::too_many_arguments)]
    fn discover_item(
        &self,
        tokens: &[Token],
        j: usize,
        scope: usize,
        tree: &mut ScopeTree,
        ctes: &HashSet<String>,
        consumed: &mut [bool],
        found: &mut Discovered,
    ) -> Option<usize> {
        let token = &tokens[j];

        // Derived table or table function (`UNNEST(...)`).
        let open = if token.is_punct("(") {
            Some(j)
        } else if token.kind == TokenKind::Word {
            next_significant(tokens, j).filter(|&n| tokens[n].is_punct("("))
        } else {
            None
        };
        if let Some(open) = open {
            let close = matching_paren(tokens, open)?;
            if let Some(&head) = tree.opened_at.get(&open) {
                tree.detach(head);
            }
            tree.scopes[scope].opaque = true;
            let end = match item_alias(tokens, close) {
                Some(alias) => {
                    mark(consumed, close + 1, alias);
                    found.opaque_names.insert(ident_key(&tokens[alias]));
                    alias
                }
                None => close,
            };
            return Some(end);
        }

        if !token.is_ident() || is_hard_keyword(token) {
            return None;
        }
        let path_end = chain_end(tokens, j);
        let segments = path_segments(&tokens[j..=path_end]);
        let base = segments.last()?.clone();
        let alias = item_alias(tokens, path_end);
        let end = alias.unwrap_or(path_end);
        mark(consumed, j, end);

        if segments.len() == 1 && ctes.contains(&base.to_ascii_lowercase()) {
            tree.scopes[scope].opaque = true;
            if let Some(alias) = alias {
                found.opaque_names.insert(ident_key(&tokens[alias]));
            }
            return Some(end);
        }

        let base = self
            .schema
            .table(&base)
            .map(|t| t.name.clone())
            .unwrap_or(base);
        let index = found.tables.len();
        if let Some(alias) = alias {
            found
                .model_aliases
                .entry(ident_key(&tokens[alias]))
                .or_insert(index);
        }
        found.tables.push(TableRef {
            start: j,
            end,
            base,
        });
        tree.scopes[scope].tables.push(index);
        Some(end)
    }

    // Pass two.

    fn fold_comparisons(&self, sql: &str, alias_map: &AliasMap) -> Result<String> {
        let tokens = tokenize(sql)?;
        let fold = self.dialect.case_fold_function();
        let mut edits: BTreeMap<usize, Edit> = BTreeMap::new();
        let mut touched = vec![false; tokens.len()];

        for (i, token) in tokens.iter().enumerate() {
            if !(token.is_punct("=") || token.is_punct("!=") || token.is_punct("<>")) {
                continue;
            }
            let (Some(l), Some(r)) = (prev_significant(&tokens, i), next_significant(&tokens, i))
            else {
                continue;
            };
            let (start, end, literal) =
                if tokens[r].kind == TokenKind::String && tokens[l].is_ident() {
                    (chain_start(&tokens, l), l, r)
                } else if tokens[l].kind == TokenKind::String && tokens[r].is_ident() {
                    (r, chain_end(&tokens, r), l)
                } else {
                    continue;
                };
            if start == end && is_hard_keyword(&tokens[start]) {
                continue;
            }
            if !operands_isolated(&tokens, start.min(literal), end.max(literal)) {
                continue;
            }
            if touched[start..=end].iter().any(|t| *t) || touched[literal] {
                continue;
            }
            if !self.should_fold(&tokens[start..=end], &tokens[literal], alias_map) {
                continue;
            }
            for (s, e) in [(start, end), (literal, literal)] {
                let mut wrapped = vec![Token::word(fold), Token::punct("(")];
                wrapped.extend_from_slice(&tokens[s..=e]);
                wrapped.push(Token::punct(")"));
                edits.insert(s, Edit::new(e, wrapped));
                mark(&mut touched, s, e);
            }
        }
        Ok(apply_edits(&tokens, &edits))
    }

    fn should_fold(&self, column: &[Token], literal: &Token, alias_map: &AliasMap) -> bool {
        let Some(text) = literal.string_content() else {
            return false;
        };
        if !text.chars().any(char::is_alphabetic)
            || is_numeric_text(text, false)
            || STATUS_VALUES.contains(&text)
        {
            return false;
        }

        let segments = path_segments(column);
        let Some(name) = segments.last() else {
            return false;
        };
        let table = segments
            .len()
            .checked_sub(2)
            .map(|q| segments[q].as_str())
            .and_then(|q| {
                alias_map
                    .table_for_alias(q)
                    .or_else(|| self.schema.table(q).map(|t| t.name.as_str()))
            });

        if self.is_protected(table, name) {
            return false;
        }
        match table {
            Some(table) => self
                .schema
                .field(table, name)
                .map_or(true, |(group, field)| is_text_field(group, field.data_type.as_deref())),
            None => self
                .schema
                .tables
                .iter()
                .filter_map(|t| t.field(name))
                .all(|(group, field)| is_text_field(group, field.data_type.as_deref())),
        }
    }

    fn is_protected(&self, table: Option<&str>, column: &str) -> bool {
        self.protected.iter().any(|(t, c)| {
            c.eq_ignore_ascii_case(column)
                && (t.is_empty() || table.map_or(true, |table| table.eq_ignore_ascii_case(t)))
        })
    }
}

fn is_text_field(group: FieldGroup, data_type: Option<&str>) -> bool {
    group == FieldGroup::Dimension
        && data_type.map_or(true, |ty| ty.to_ascii_uppercase().starts_with("STRING"))
}

/// Both ends of `operand op operand` border a clause keyword, a bracket or a comma.
fn operands_isolated(tokens: &[Token], first: usize, last: usize) -> bool {
    let left_ok = prev_significant(tokens, first).map_or(true, |p| {
        is_hard_keyword(&tokens[p]) || tokens[p].is_punct("(") || tokens[p].is_punct(",")
    });
    let right_ok = next_significant(tokens, last).map_or(true, |n| {
        is_hard_keyword(&tokens[n])
            || tokens[n].is_punct(")")
            || tokens[n].is_punct(",")
            || tokens[n].is_punct(";")
    });
    left_ok && right_ok
}

/// A token range replaced by `tokens`; `end` is inclusive.
#[derive(Debug, Clone)]
struct Edit {
    end: usize,
    tokens: Vec<Token>,
}

impl Edit {
    fn new(end: usize, tokens: Vec<Token>) -> Self {
        Self { end, tokens }
    }
}

fn apply_edits(tokens: &[Token], edits: &BTreeMap<usize, Edit>) -> String {
    render_range(tokens, edits, 0, tokens.len().saturating_sub(1))
}

fn render_range(tokens: &[Token], edits: &BTreeMap<usize, Edit>, from: usize, to: usize) -> String {
    let mut out = String::new();
    let mut i = from;
    while i <= to && i < tokens.len() {
        match edits.get(&i) {
            Some(edit) => {
                out.push_str(&render(&edit.tokens));
                i = edit.end + 1;
            }
            None => {
                out.push_str(&tokens[i].text);
                i += 1;
            }
        }
    }
    out
}

fn mark(flags: &mut [bool], from: usize, to: usize) {
    for flag in flags.iter_mut().take(to + 1).skip(from) {
        *flag = true;
    }
}

fn ident_key(token: &Token) -> String {
    token.ident_name().unwrap_or(&token.text).to_ascii_lowercase()
}

/// Dot-separated name parts of an identifier chain, backtick paths split too.
fn path_segments(tokens: &[Token]) -> Vec<String> {
    tokens
        .iter()
        .filter_map(Token::ident_name)
        .flat_map(|name| name.split('.'))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Alias token following a `FROM`/`JOIN` item ending at `end`.
fn item_alias(tokens: &[Token], end: usize) -> Option<usize> {
    let n = next_significant(tokens, end)?;
    if tokens[n].is_keyword("AS") {
        return next_significant(tokens, n).filter(|&a| tokens[a].is_ident());
    }
    let implicit = tokens[n].kind == TokenKind::QuotedIdent
        || (tokens[n].kind == TokenKind::Word && !is_hard_keyword(&tokens[n]));
    implicit.then_some(n)
}

/// The plain column reference (`s..=p`) aliased by the `AS` (or the implicit
/// alias) at `a`, if the item is a column and not an expression.
fn column_before_alias(tokens: &[Token], a: usize, query_level: bool) -> Option<(usize, usize)> {
    if !query_level {
        return None;
    }
    let p = prev_significant(tokens, a)?;
    if !tokens[p].is_ident() || is_hard_keyword(&tokens[p]) {
        return None;
    }
    let s = chain_start(tokens, p);
    let starts_item = prev_significant(tokens, s).map_or(true, |b| {
        tokens[b].is_keyword("SELECT")
            || tokens[b].is_keyword("DISTINCT")
            || tokens[b].is_keyword("ALL")
            || tokens[b].is_punct(",")
    });
    starts_item.then_some((s, p))
}

/// An identifier ending a select-list item right after a complete
/// expression, as in `SUM(x) total` or `t.col c`.
fn is_implicit_alias(tokens: &[Token], i: usize, clause: &[Clause], tree: &ScopeTree) -> bool {
    let token = &tokens[i];
    if !token.is_ident() || is_hard_keyword(token) {
        return false;
    }
    if clause[i] != Clause::Select || !tree.query_level[i] {
        return false;
    }
    if (i > 0 && tokens[i - 1].is_punct(".")) || tokens.get(i + 1).is_some_and(|t| t.is_punct(".")) {
        return false;
    }
    let ends_item = next_significant(tokens, i).map_or(true, |n| {
        tokens[n].is_punct(",")
            || tokens[n].is_punct(")")
            || tokens[n].is_punct(";")
            || tokens[n].is_keyword("FROM")
    });
    if !ends_item {
        return false;
    }
    prev_significant(tokens, i).is_some_and(|p| {
        let prev = &tokens[p];
        prev.is_punct(")")
            || prev.is_punct("]")
            || matches!(prev.kind, TokenKind::Number | TokenKind::String | TokenKind::QuotedIdent)
            || (prev.kind == TokenKind::Word && !is_hard_keyword(prev))
            || ["END", "NULL", "TRUE", "FALSE"].iter().any(|k| prev.is_keyword(k))
    })
}

/// Columns named in `JOIN ... USING (a, b)` must stay unqualified.
fn mark_using_lists(tokens: &[Token], consumed: &mut [bool]) {
    for (u, token) in tokens.iter().enumerate() {
        if !token.is_keyword("USING") {
            continue;
        }
        let open = next_significant(tokens, u).filter(|&o| tokens[o].is_punct("("));
        if let Some(close) = open.and_then(|o| matching_paren(tokens, o)) {
            mark(consumed, u, close);
        }
    }
}

/// Alias of each table reference. The first reference to a table uses the
/// table's alias; later ones, such as the other side of a self-join, get the
/// next free numeric suffix.
fn instance_aliases(tables: &[TableRef], alias_map: &AliasMap, taken: &HashSet<String>) -> Vec<Option<String>> {
    let mut used: HashSet<String> = taken.iter().map(|t| t.to_ascii_lowercase()).collect();
    used.extend(alias_map.aliases().map(str::to_ascii_lowercase));
    let mut seen: HashSet<String> = HashSet::new();
    tables
        .iter()
        .map(|table| {
            let alias = alias_map.get(&table.base)?;
            if seen.insert(table.base.to_ascii_uppercase()) {
                return Some(alias.to_string());
            }
            let mut suffix = 2;
            let mut candidate = format!("{alias}{suffix}");
            while used.contains(&candidate.to_ascii_lowercase()) {
                suffix += 1;
                candidate = format!("{alias}{suffix}");
            }
            tracing::debug!(table = %table.base, alias = %candidate, "repeated table gets its own alias");
            used.insert(candidate.to_ascii_lowercase());
            Some(candidate)
        })
        .collect()
}

/// Clause of the query a token sits in, at its own parenthesis level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clause {
    Select,
    From,
    Where,
    GroupBy,
    Having,
    Qualify,
    OrderBy,
    Other,
}

impl Clause {
    /// Clauses where BigQuery resolves names against select-list aliases.
    fn sees_select_aliases(self) -> bool {
        matches!(self, Clause::GroupBy | Clause::Qualify | Clause::OrderBy)
    }
}

fn clauses(tokens: &[Token]) -> Vec<Clause> {
    let mut stack = vec![Clause::Other];
    let mut out = Vec::with_capacity(tokens.len());
    for (i, token) in tokens.iter().enumerate() {
        if token.is_punct(")") && stack.len() > 1 {
            stack.pop();
        }
        if token.kind == TokenKind::Word {
            let next = match token.text.to_ascii_uppercase().as_str() {
                "SELECT" => Some(Clause::Select),
                "FROM" if !prev_significant(tokens, i).is_some_and(|p| tokens[p].is_keyword("DISTINCT")) => {
                    Some(Clause::From)
                }
                "JOIN" => Some(Clause::From),
                "WHERE" => Some(Clause::Where),
                "GROUP" => Some(Clause::GroupBy),
                "HAVING" => Some(Clause::Having),
                "QUALIFY" => Some(Clause::Qualify),
                "ORDER" => Some(Clause::OrderBy),
                "LIMIT" | "WINDOW" | "UNION" | "INTERSECT" => Some(Clause::Other),
                "EXCEPT" if is_set_operator(tokens, i) => Some(Clause::Other),
                _ => None,
            };
            if let (Some(next), Some(top)) = (next, stack.last_mut()) {
                *top = next;
            }
        }
        let current = stack.last().copied().unwrap_or(Clause::Other);
        out.push(current);
        if token.is_punct("(") {
            stack.push(current);
        }
    }
    out
}

/// Names defined by `name AS (` (CTEs and named windows). Returns the CTE
/// names; their bodies become detached scopes.
fn find_ctes(tokens: &[Token], tree: &mut ScopeTree, consumed: &mut [bool]) -> HashSet<String> {
    let mut ctes = HashSet::new();
    for (i, token) in tokens.iter().enumerate() {
        if !token.is_ident() || is_hard_keyword(token) {
            continue;
        }
        let Some(a) = next_significant(tokens, i).filter(|&a| tokens[a].is_keyword("AS")) else {
            continue;
        };
        let Some(open) = next_significant(tokens, a).filter(|&p| tokens[p].is_punct("(")) else {
            continue;
        };
        consumed[i] = true;
        consumed[a] = true;
        if let Some(&head) = tree.opened_at.get(&open) {
            tree.detach(head);
            ctes.insert(ident_key(token));
        }
    }
    ctes
}

#[derive(Debug, Clone)]
struct TableRef {
    start: usize,
    end: usize,
    base: String,
}

#[derive(Debug, Default)]
struct Discovered {
    tables: Vec<TableRef>,
    /// Aliases of CTE references and derived tables.
    opaque_names: HashSet<String>,
    /// Model-written table alias -> index into `tables`.
    model_aliases: HashMap<String, usize>,
}

#[derive(Debug, Clone)]
struct Scope {
    parent: Option<usize>,
    /// Scope opened by the same parenthesis (shared by set-operation branches).
    head: usize,
    /// CTE and derived-table bodies: their column names are visible outside.
    exports: bool,
    /// Reads from a CTE, derived table or table function.
    opaque: bool,
    tables: Vec<usize>,
}

impl Scope {
    fn new(parent: Option<usize>, head: usize) -> Self {
        Self {
            parent,
            head,
            exports: false,
            opaque: false,
            tables: Vec::new(),
        }
    }
}

/// Query scopes: the top level, each parenthesised `SELECT`/`WITH`, and each
/// branch of a set operation.
#[derive(Debug)]
struct ScopeTree {
    scopes: Vec<Scope>,
    scope_of: Vec<usize>,
    /// Whether the innermost enclosing parenthesis is a query (or there is none).
    query_level: Vec<bool>,
    /// Opening parenthesis index -> scope it opens.
    opened_at: HashMap<usize, usize>,
}

impl ScopeTree {
    fn build(tokens: &[Token]) -> Self {
        let mut tree = Self {
            scopes: vec![Scope::new(None, 0)],
            scope_of: Vec::with_capacity(tokens.len()),
            query_level: Vec::with_capacity(tokens.len()),
            opened_at: HashMap::new(),
        };
        let mut frames: Vec<(usize, bool)> = vec![(0, true)];
        for (i, token) in tokens.iter().enumerate() {
            let (current, level) = frames.last().copied().unwrap_or((0, true));
            if token.is_punct("(") {
                tree.scope_of.push(current);
                tree.query_level.push(level);
                let opens_query = next_significant(tokens, i)
                    .is_some_and(|n| tokens[n].is_keyword("SELECT") || tokens[n].is_keyword("WITH"));
                if opens_query {
                    let id = tree.scopes.len();
                    tree.scopes.push(Scope::new(Some(current), id));
                    tree.opened_at.insert(i, id);
                    frames.push((id, true));
                } else {
                    frames.push((current, false));
                }
            } else if token.is_punct(")") {
                if frames.len() > 1 {
                    frames.pop();
                }
                let (outer, level) = frames.last().copied().unwrap_or((0, true));
                tree.scope_of.push(outer);
                tree.query_level.push(level);
            } else if level && is_set_operator(tokens, i) {
                let id = tree.scopes.len();
                let branch = &tree.scopes[current];
                let sibling = Scope {
                    exports: branch.exports,
                    ..Scope::new(branch.parent, branch.head)
                };
                tree.scopes.push(sibling);
                if let Some(top) = frames.last_mut() {
                    top.0 = id;
                }
                tree.scope_of.push(id);
                tree.query_level.push(true);
            } else {
                tree.scope_of.push(current);
                tree.query_level.push(level);
            }
        }
        tree
    }

    /// CTE and derived-table bodies cannot see the enclosing query.
    fn detach(&mut self, head: usize) {
        for scope in self.scopes.iter_mut().filter(|s| s.head == head) {
            scope.parent = None;
            scope.exports = true;
        }
    }
}

fn is_set_operator(tokens: &[Token], i: usize) -> bool {
    let token = &tokens[i];
    if token.is_keyword("UNION") || token.is_keyword("INTERSECT") {
        return true;
    }
    // `SELECT * EXCEPT (col)` is a column filter.
    token.is_keyword("EXCEPT")
        && !prev_significant(tokens, i).is_some_and(|p| tokens[p].is_punct("*"))
}

/// Read-only view used while computing edits.
struct QueryContext<'a> {
    tree: &'a ScopeTree,
    tables: &'a [TableRef],
    model_aliases: &'a HashMap<String, usize>,
    alias_map: &'a AliasMap,
    instance_aliases: &'a [Option<String>],
}

impl QueryContext<'_> {
    fn alias_of(&self, table: usize) -> Option<String> {
        self.instance_aliases.get(table).cloned().flatten()
    }

    fn is_assigned_alias(&self, name: &str) -> bool {
        self.alias_map.table_for_alias(name).is_some()
            || self
                .instance_aliases
                .iter()
                .flatten()
                .any(|a| a.eq_ignore_ascii_case(name))
    }

    /// First table, innermost scope outwards, whose schema declares `column`.
    fn schema_owner(&self, rewriter: &AliasRewriter, scope: usize, column: &str) -> Option<String> {
        let mut cursor = Some(scope);
        while let Some(s) = cursor {
            let scope = &self.tree.scopes[s];
            if let Some(&table) = scope
                .tables
                .iter()
                .find(|&&t| rewriter.schema.has_column(&self.tables[t].base, column))
            {
                return self.alias_of(table);
            }
            cursor = scope.parent;
        }
        None
    }

    /// Owner for a column the schema does not know: the first table of the
    /// nearest scope with sources, unless that scope reads from a CTE or
    /// derived table.
    fn fallback_owner(&self, scope: usize) -> Option<String> {
        let mut cursor = Some(scope);
        while let Some(s) = cursor {
            let scope = &self.tree.scopes[s];
            if scope.opaque {
                return None;
            }
            if let Some(&table) = scope.tables.first() {
                return self.alias_of(table);
            }
            cursor = scope.parent;
        }
        None
    }

    /// Our alias for a qualifier written by the model (its alias, the bare
    /// table name, or a table path).
    fn qualifier_alias(&self, qualifier: &[Token], ctes: &HashSet<String>) -> Option<String> {
        let segments = path_segments(qualifier);
        if segments.len() == 1 {
            let key = segments[0].to_ascii_lowercase();
            if let Some(&table) = self.model_aliases.get(&key) {
                return self.alias_of(table);
            }
            if self.is_assigned_alias(&key) || ctes.contains(&key) {
                return None;
            }
        }
        let last = segments.last()?;
        let table = self
            .tables
            .iter()
            .position(|t| t.base.eq_ignore_ascii_case(last))?;
        self.alias_of(table)
    }
}
