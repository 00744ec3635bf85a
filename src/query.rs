//! Query record construction: cleaning, parsing, classification and digest.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;
use tracing::warn;

/// The atomic unit appended to the query log, matching the on-disk contract
/// the analyzer and replayer bind to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub timestamp: String,
    pub conn: u64,
    #[serde(rename = "type")]
    pub kind: QueryKind,
    pub digest: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
    Commit,
    Rollback,
    Ddl,
    Analyze,
    Others,
}

/// Strips C0 control characters from `raw`, keeping tab/newline/carriage-return.
pub fn clean(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}

static LITERAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*"|\b\d+(?:\.\d+)?\b"#)
        .expect("literal pattern is a fixed, valid regex")
});
static WHITESPACE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is a fixed, valid regex"));

/// A parameter-agnostic fingerprint of `cleaned`: literals collapse to `?`,
/// whitespace runs collapse to a single space, the result is SHA-256 hashed.
pub fn digest(cleaned: &str) -> String {
    let masked = LITERAL_PATTERN.replace_all(cleaned, "?");
    let normalized = WHITESPACE_PATTERN.replace_all(masked.trim(), " ");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Splits `cleaned` into its top-level statements on `;`, preserving each
/// statement's original source verbatim (quotes are respected so a `;`
/// inside a string literal does not split). Empty segments (a trailing
/// terminator, stray whitespace) are dropped.
fn split_statements(cleaned: &str) -> Vec<&str> {
    let bytes = cleaned.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_single = false;
    let mut in_double = false;
    for (i, &byte) in bytes.iter().enumerate() {
        match byte {
            b'\'' if !in_double => in_single = !in_single,
            b'"' if !in_single => in_double = !in_double,
            b';' if !in_single && !in_double => {
                parts.push(cleaned[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(cleaned[start..].trim());
    parts.into_iter().filter(|part| !part.is_empty()).collect()
}

/// Parses `cleaned` as one or more MySQL statements, returning the
/// `;`-terminated *original* source (not the parser's re-rendered form —
/// re-rendering would, e.g., turn `1+1` into `1 + 1`) and the category of
/// the last statement (multi-statement "last category wins", per the
/// on-disk format's quirk).
pub fn parse_and_classify(cleaned: &str) -> Option<(String, QueryKind)> {
    let dialect = MySqlDialect {};
    let statements = match Parser::parse_sql(&dialect, cleaned) {
        Ok(statements) if !statements.is_empty() => statements,
        Ok(_) => return None,
        Err(err) => {
            warn!(sql = cleaned, error = %err, "failed to parse COM_QUERY text");
            return None;
        }
    };

    let originals = split_statements(cleaned);
    let mut text = String::new();
    let mut kind = QueryKind::Others;
    for (index, statement) in statements.iter().enumerate() {
        let rendered = statement.to_string();
        kind = classify(&rendered);
        let original = originals.get(index).copied().unwrap_or(rendered.as_str());
        text.push_str(original);
        text.push(';');
    }
    Some((text, kind))
}

fn classify(rendered: &str) -> QueryKind {
    let leading = rendered
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    match leading.as_str() {
        "SELECT" => QueryKind::Select,
        "INSERT" => QueryKind::Insert,
        "UPDATE" => QueryKind::Update,
        "DELETE" => QueryKind::Delete,
        "COMMIT" => QueryKind::Commit,
        "ROLLBACK" => QueryKind::Rollback,
        "CREATE" | "DROP" | "ALTER" | "RENAME" | "TRUNCATE" | "OPTIMIZE" | "REPAIR" => {
            QueryKind::Ddl
        }
        "ANALYZE" => QueryKind::Analyze,
        _ => QueryKind::Others,
    }
}
