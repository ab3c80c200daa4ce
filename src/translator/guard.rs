//! Pulls the SQL statement out of a model answer and checks it is read-only.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

const STATEMENT_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "INSERT", "UPDATE", "DELETE",
    "DROP", "ALTER", "CREATE", "MERGE", "TRUNCATE", "GRANT", "REVOKE",
];

/// Words that follow a statement keyword in prose ("With this query...",
/// "Select the column...") but not in SQL.
const PROSE_FOLLOWERS: &[&str] = &[
    "A", "AN", "THE", "THIS", "THESE", "THAT", "THOSE", "IT", "ITS", "YOU", "YOUR", "WE",
    "OUR", "I", "ME", "MY", "US", "HERE", "THERE", "WHICH", "WHAT", "HOW",
];

static FORBIDDEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(INSERT|UPDATE|DELETE|DROP|ALTER|CREATE|MERGE|TRUNCATE|GRANT|REVOKE)\b")
        .unwrap_or_else(|e| panic!("invalid forbidden-verb pattern: {e}"))
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Generated SQL contains a disallowed operation: {verb}")]
pub struct UnsafeQueryError {
    pub verb: String,
}

/// Returns the single SQL statement contained in `answer`, if any.
///
/// Markdown fences and leading prose are dropped, as is everything from the
/// first statement terminator on.
pub fn extract_sql(answer: &str) -> Option<String> {
    let body = strip_fences(answer);

    let start = line_starting_with_keyword(body).or_else(|| body.find("SELECT "))?;
    let sql = truncate_at_terminator(&body[start..]).trim();
    (!sql.is_empty()).then(|| sql.to_string())
}

fn strip_fences(answer: &str) -> &str {
    let Some(open) = answer.find("```") else {
        return answer.trim();
    };
    let after_open = &answer[open + 3..];
    // Skip the info string (```sql).
    let content = match after_open.find('\n') {
        Some(newline) => &after_open[newline + 1..],
        None => after_open,
    };
    match content.find("```") {
        Some(close) => content[..close].trim(),
        None => content.trim(),
    }
}

fn line_starting_with_keyword(body: &str) -> Option<usize> {
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if starts_statement(trimmed) {
            return Some(offset + (line.len() - trimmed.len()));
        }
        offset += line.len();
    }
    None
}

/// A keyword opens a statement unless the line reads like a sentence.
fn starts_statement(line: &str) -> bool {
    let mut words = line
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_uppercase);
    let Some(first) = words.next() else {
        return false;
    };
    if !line.starts_with(|c: char| c.is_ascii_alphabetic())
        || !STATEMENT_KEYWORDS.contains(&first.as_str())
    {
        return false;
    }
    if line.trim_end().ends_with(':') {
        return false;
    }
    !words
        .next()
        .is_some_and(|second| PROSE_FOLLOWERS.contains(&second.as_str()))
}

fn truncate_at_terminator(sql: &str) -> &str {
    let mut in_literal = false;
    for (i, c) in sql.char_indices() {
        match c {
            '\'' => in_literal = !in_literal,
            ';' if !in_literal => return &sql[..i],
            _ => {}
        }
    }
    sql
}

/// Rejects SQL that contains a data- or schema-modifying verb as a whole
/// word outside string literals, quoted identifiers and comments.
pub fn ensure_read_only(sql: &str) -> Result<(), UnsafeQueryError> {
    let visible = mask_literals_and_comments(sql);
    match FORBIDDEN.find(&visible) {
        Some(m) => Err(UnsafeQueryError {
            verb: m.as_str().to_ascii_uppercase(),
        }),
        None => Ok(()),
    }
}

/// Replaces the contents of literals, quoted identifiers and comments with
/// spaces, leaving the rest of the text in place.
fn mask_literals_and_comments(sql: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Code,
        Single,
        Double,
        LineComment,
        BlockComment,
    }

    let mut out = String::with_capacity(sql.len());
    let mut state = State::Code;
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                '\'' => {
                    state = State::Single;
                    out.push(' ');
                }
                '"' => {
                    state = State::Double;
                    out.push(' ');
                }
                '-' if chars.peek() == Some(&'-') => {
                    chars.next();
                    state = State::LineComment;
                    out.push_str("  ");
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = State::BlockComment;
                    out.push_str("  ");
                }
                _ => out.push(c),
            },
            State::Single | State::Double => {
                let quote = if state == State::Single { '\'' } else { '"' };
                if c == quote {
                    // A doubled quote is an escaped quote.
                    if chars.peek() == Some(&quote) {
                        chars.next();
                        out.push(' ');
                    } else {
                        state = State::Code;
                    }
                } else if c == '\\' && state == State::Single {
                    chars.next();
                    out.push(' ');
                }
                out.push(' ');
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Code;
                    out.push('\n');
                } else {
                    out.push(' ');
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Code;
                    out.push(' ');
                }
                out.push(' ');
            }
        }
    }
    out
}
