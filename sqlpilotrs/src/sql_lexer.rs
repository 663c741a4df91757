//! Lossless tokenizer for BigQuery Standard SQL.
//!
//! Every byte of the input ends up in exactly one token, so
//! `render(&tokenize(sql)?) == sql`. Rewrites edit the token stream and
//! render it back, which keeps the user's formatting intact.

use crate::error::{Result, SqlPilotError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Whitespace,
    Comment,
    /// Unquoted identifier or keyword.
    Word,
    /// Backtick-quoted identifier, possibly a dotted path.
    QuotedIdent,
    /// String literal, quotes included.
    String,
    Number,
    /// `@name` query parameter or `@@system_variable`.
    Param,
    Punct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn word(text: impl Into<String>) -> Self {
        Self::new(TokenKind::Word, text)
    }

    pub fn punct(text: impl Into<String>) -> Self {
        Self::new(TokenKind::Punct, text)
    }

    pub fn space() -> Self {
        Self::new(TokenKind::Whitespace, " ")
    }

    /// Whitespace and comments.
    pub fn is_trivia(&self) -> bool {
        matches!(self.kind, TokenKind::Whitespace | TokenKind::Comment)
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    pub fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == punct
    }

    pub fn is_ident(&self) -> bool {
        matches!(self.kind, TokenKind::Word | TokenKind::QuotedIdent)
    }

    /// Identifier text without backticks.
    pub fn ident_name(&self) -> Option<&str> {
        match self.kind {
            TokenKind::Word => Some(&self.text),
            TokenKind::QuotedIdent => self
                .text
                .strip_prefix('`')
                .and_then(|s| s.strip_suffix('`')),
            _ => None,
        }
    }

    /// Contents of a single- or double-quoted string literal, without quotes.
    /// Triple-quoted and prefixed literals yield `None`.
    pub fn string_content(&self) -> Option<&str> {
        if self.kind != TokenKind::String || self.text.len() < 2 {
            return None;
        }
        let quote = self.text.chars().next()?;
        if quote != '\'' && quote != '"' {
            return None;
        }
        if self.text.len() >= 6 && self.text.starts_with(&quote.to_string().repeat(3)) {
            return None;
        }
        self.text.strip_prefix(quote)?.strip_suffix(quote)
    }
}

pub fn tokenize(sql: &str) -> Result<Vec<Token>> {
    let chars: Vec<(usize, char)> = sql.char_indices().collect();
    let byte_at = |i: usize| chars.get(i).map(|(b, _)| *b).unwrap_or(sql.len());
    let char_at = |i: usize| chars.get(i).map(|(_, c)| *c);

    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i].1;
        let start = i;
        let kind = if c.is_whitespace() {
            while char_at(i).is_some_and(char::is_whitespace) {
                i += 1;
            }
            TokenKind::Whitespace
        } else if c == '#' || (c == '-' && char_at(i + 1) == Some('-')) {
            while char_at(i).is_some_and(|c| c != '\n') {
                i += 1;
            }
            TokenKind::Comment
        } else if c == '/' && char_at(i + 1) == Some('*') {
            i += 2;
            loop {
                match (char_at(i), char_at(i + 1)) {
                    (Some('*'), Some('/')) => {
                        i += 2;
                        break;
                    }
                    (Some(_), _) => i += 1,
                    (None, _) => {
                        return Err(SqlPilotError::Sql(format!(
                            "unterminated block comment at byte {}",
                            byte_at(start)
                        )))
                    }
                }
            }
            TokenKind::Comment
        } else if c == '`' {
            i = scan_quoted(&chars, i, '`').ok_or_else(|| {
                SqlPilotError::Sql(format!(
                    "unterminated quoted identifier at byte {}",
                    byte_at(start)
                ))
            })?;
            TokenKind::QuotedIdent
        } else if c == '\'' || c == '"' {
            i = scan_string(&chars, i, c).ok_or_else(|| {
                SqlPilotError::Sql(format!(
                    "unterminated string literal at byte {}",
                    byte_at(start)
                ))
            })?;
            TokenKind::String
        } else if c.is_ascii_digit() {
            i = scan_number(&chars, i);
            TokenKind::Number
        } else if c == '@' {
            i += 1;
            if char_at(i) == Some('@') {
                i += 1;
            }
            while char_at(i).is_some_and(is_word_char) {
                i += 1;
            }
            TokenKind::Param
        } else if is_word_start(c) {
            while char_at(i).is_some_and(is_word_char) {
                i += 1;
            }
            TokenKind::Word
        } else {
            let two: String = chars[i..chars.len().min(i + 2)]
                .iter()
                .map(|(_, c)| *c)
                .collect();
            i += if matches!(two.as_str(), "!=" | "<>" | "<=" | ">=" | "||" | "=>" | "<<" | ">>")
            {
                2
            } else {
                1
            };
            TokenKind::Punct
        };
        tokens.push(Token::new(kind, &sql[byte_at(start)..byte_at(i)]));
    }
    Ok(tokens)
}

pub fn render(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.text.as_str()).collect()
}

/// Fold an unquoted dashed project name in a `FROM`/`JOIN` path
/// (`my-project-123.dataset.table`) into a single word token. The run must
/// be written without spaces and be followed by `.`.
pub fn join_dashed_paths(tokens: Vec<Token>) -> Vec<Token> {
    let adjacent_part = |t: &Token| matches!(t.kind, TokenKind::Word | TokenKind::Number);
    let mut out: Vec<Token> = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        let after_source = prev_significant(&out, out.len())
            .is_some_and(|p| out[p].is_keyword("FROM") || out[p].is_keyword("JOIN"));
        if after_source && tokens[i].kind == TokenKind::Word {
            let mut end = i;
            loop {
                while tokens.get(end + 1).is_some_and(adjacent_part) {
                    end += 1;
                }
                if tokens.get(end + 1).is_some_and(|t| t.is_punct("-"))
                    && tokens.get(end + 2).is_some_and(adjacent_part)
                {
                    end += 2;
                } else {
                    break;
                }
            }
            let dashed = tokens[i..=end].iter().any(|t| t.is_punct("-"));
            if dashed && tokens.get(end + 1).is_some_and(|t| t.is_punct(".")) {
                out.push(Token::word(render(&tokens[i..=end])));
                i = end + 1;
                continue;
            }
        }
        out.push(tokens[i].clone());
        i += 1;
    }
    out
}

fn is_word_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_word_char(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

/// Returns the index just past the closing quote.
fn scan_quoted(chars: &[(usize, char)], open: usize, quote: char) -> Option<usize> {
    let mut i = open + 1;
    while i < chars.len() {
        match chars[i].1 {
            '\\' => i += 2,
            c if c == quote => return Some(i + 1),
            _ => i += 1,
        }
    }
    None
}

fn scan_string(chars: &[(usize, char)], open: usize, quote: char) -> Option<usize> {
    let at = |i: usize| chars.get(i).map(|(_, c)| *c);
    if at(open + 1) == Some(quote) && at(open + 2) == Some(quote) {
        let mut i = open + 3;
        while i < chars.len() {
            if chars[i].1 == '\\' {
                i += 2;
            } else if at(i) == Some(quote) && at(i + 1) == Some(quote) && at(i + 2) == Some(quote)
            {
                return Some(i + 3);
            } else {
                i += 1;
            }
        }
        return None;
    }

    let mut i = open + 1;
    while i < chars.len() {
        match chars[i].1 {
            '\\' => i += 2,
            c if c == quote => {
                // A doubled quote inside the literal is an escaped quote.
                if at(i + 1) == Some(quote) && i + 1 != open + 1 {
                    i += 2;
                } else {
                    return Some(i + 1);
                }
            }
            _ => i += 1,
        }
    }
    None
}

fn scan_number(chars: &[(usize, char)], start: usize) -> usize {
    let at = |i: usize| chars.get(i).map(|(_, c)| *c);
    let mut i = start;
    while at(i).is_some_and(|c| c.is_ascii_digit()) {
        i += 1;
    }
    if at(i) == Some('.') && at(i + 1).is_some_and(|c| c.is_ascii_digit()) {
        i += 1;
        while at(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
    }
    if matches!(at(i), Some('e' | 'E')) {
        let sign = usize::from(matches!(at(i + 1), Some('+' | '-')));
        if at(i + 1 + sign).is_some_and(|c| c.is_ascii_digit()) {
            i += 1 + sign;
            while at(i).is_some_and(|c| c.is_ascii_digit()) {
                i += 1;
            }
        }
    }
    i
}

/// First non-trivia token after `idx`.
pub fn next_significant(tokens: &[Token], idx: usize) -> Option<usize> {
    (idx + 1..tokens.len()).find(|&i| !tokens[i].is_trivia())
}

/// Last non-trivia token before `idx`.
pub fn prev_significant(tokens: &[Token], idx: usize) -> Option<usize> {
    (0..idx).rev().find(|&i| !tokens[i].is_trivia())
}

/// Index of the `)` closing the `(` at `open`.
pub fn matching_paren(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        if token.is_punct("(") {
            depth += 1;
        } else if token.is_punct(")") {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Index of the `(` opened before `close`.
pub fn matching_open_paren(tokens: &[Token], close: usize) -> Option<usize> {
    let mut depth = 0usize;
    for i in (0..=close).rev() {
        if tokens[i].is_punct(")") {
            depth += 1;
        } else if tokens[i].is_punct("(") {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// For every token, the upper-cased name of the function whose argument list
/// encloses it (`""` for bare parentheses and at top level).
pub fn enclosing_calls(tokens: &[Token]) -> Vec<String> {
    let mut stack: Vec<String> = Vec::new();
    let mut out = Vec::with_capacity(tokens.len());
    for (i, token) in tokens.iter().enumerate() {
        if token.is_punct(")") {
            stack.pop();
        }
        out.push(stack.last().cloned().unwrap_or_default());
        if token.is_punct("(") {
            let owner = prev_significant(tokens, i)
                .filter(|&p| tokens[p].kind == TokenKind::Word)
                .map(|p| tokens[p].text.to_ascii_uppercase())
                .unwrap_or_default();
            stack.push(owner);
        }
    }
    out
}

/// Start index of the dotted identifier chain ending at `end`
/// (`a.b.c` ending at `c` starts at `a`).
pub fn chain_start(tokens: &[Token], end: usize) -> usize {
    let mut start = end;
    while start >= 2 && tokens[start - 1].is_punct(".") && tokens[start - 2].is_ident() {
        start -= 2;
    }
    start
}

/// End index (inclusive) of the dotted identifier chain starting at `start`.
pub fn chain_end(tokens: &[Token], start: usize) -> usize {
    let mut end = start;
    while end + 2 < tokens.len() && tokens[end + 1].is_punct(".") && tokens[end + 2].is_ident() {
        end += 2;
    }
    end
}

/// True when the string literal holds an unsigned number (`'123'`, `'12.5'`).
pub fn is_numeric_text(text: &str, integer_only: bool) -> bool {
    let mut parts = text.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let frac = parts.next();
    let digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if whole.is_empty() || !digits(whole) {
        return false;
    }
    match frac {
        None => true,
        Some(_) if integer_only => false,
        Some(f) => digits(f),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str) -> Vec<(TokenKind, String)> {
        tokenize(sql)
            .unwrap()
            .into_iter()
            .filter(|t| !t.is_trivia())
            .map(|t| (t.kind, t.text))
            .collect()
    }

    #[test]
    fn round_trips_every_byte() {
        let sql = "SELECT `p.d.T`.a, 'it''s', \"x\\\"y\" -- note\nFROM t /* c */ WHERE b<>1.5e3 AND c = @p1";
        assert_eq!(render(&tokenize(sql).unwrap()), sql);
    }

    #[test]
    fn classifies_tokens() {
        let toks = kinds("SELECT SUM(x) FROM `proj.ds.tbl` WHERE y >= '10' # tail");
        assert_eq!(toks[0], (TokenKind::Word, "SELECT".to_string()));
        assert_eq!(toks[2], (TokenKind::Punct, "(".to_string()));
        assert_eq!(toks[6], (TokenKind::QuotedIdent, "`proj.ds.tbl`".to_string()));
        assert_eq!(toks[9], (TokenKind::Punct, ">=".to_string()));
        assert_eq!(toks[10], (TokenKind::String, "'10'".to_string()));
        assert_eq!(toks[11].0, TokenKind::Comment);
    }

    #[test]
    fn keywords_inside_strings_stay_strings() {
        let toks = kinds("SELECT 'FROM x JOIN y' AS label");
        assert_eq!(toks[1].0, TokenKind::String);
        assert_eq!(toks.len(), 4);
    }

    #[test]
    fn triple_quoted_strings() {
        let toks = kinds("SELECT '''a 'quoted' word''' AS t");
        assert_eq!(toks[1], (TokenKind::String, "'''a 'quoted' word'''".to_string()));
        assert_eq!(Token::new(TokenKind::String, "'''abc'''").string_content(), None);
    }

    #[test]
    fn unterminated_literals_are_errors() {
        assert!(matches!(tokenize("SELECT 'oops"), Err(SqlPilotError::Sql(_))));
        assert!(matches!(tokenize("SELECT `oops"), Err(SqlPilotError::Sql(_))));
        assert!(matches!(tokenize("SELECT /* oops"), Err(SqlPilotError::Sql(_))));
    }

    #[test]
    fn empty_string_literal() {
        let toks = kinds("WHERE a = '' AND b = 1");
        assert_eq!(toks[3], (TokenKind::String, "''".to_string()));
        assert_eq!(toks[4], (TokenKind::Word, "AND".to_string()));
    }

    #[test]
    fn enclosing_calls_tracks_function_names() {
        let tokens = tokenize("CAST(x AS INT64) + (y)").unwrap();
        let owners = enclosing_calls(&tokens);
        let x = tokens.iter().position(|t| t.text == "x").unwrap();
        let y = tokens.iter().position(|t| t.text == "y").unwrap();
        assert_eq!(owners[x], "CAST");
        assert_eq!(owners[y], "");
    }

    #[test]
    fn chains_and_parens() {
        let tokens = tokenize("f(a.b.c, (d))").unwrap();
        let c = tokens.iter().position(|t| t.text == "c").unwrap();
        let a = tokens.iter().position(|t| t.text == "a").unwrap();
        assert_eq!(chain_start(&tokens, c), a);
        assert_eq!(chain_end(&tokens, a), c);
        assert_eq!(matching_paren(&tokens, 1), Some(tokens.len() - 1));
        assert_eq!(matching_open_paren(&tokens, tokens.len() - 1), Some(1));
    }

    #[test]
    fn dashed_project_paths_become_one_word() {
        let sql = "SELECT a - b FROM vertex-ai-462816.PROCUREMENT_DATA.T JOIN my-proj-2b.ds.U ON x-y = 1";
        let tokens = join_dashed_paths(tokenize(sql).unwrap());
        assert_eq!(render(&tokens), sql);
        let words: Vec<&str> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Word)
            .map(|t| t.text.as_str())
            .collect();
        assert!(words.contains(&"vertex-ai-462816"));
        assert!(words.contains(&"my-proj-2b"));
        // Only table paths are folded.
        assert!(words.contains(&"x") && words.contains(&"y"));
    }

    #[test]
    fn numeric_text() {
        assert!(is_numeric_text("123", true));
        assert!(!is_numeric_text("12.5", true));
        assert!(is_numeric_text("12.5", false));
        assert!(is_numeric_text("12.", false));
        assert!(!is_numeric_text("12a", false));
        assert!(!is_numeric_text("", false));
    }
}
