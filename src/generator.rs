//! Natural language → SQL generation and repair.
//!
//! [`QueryGenerator`] wraps a [`CompletionProvider`] with two prompts: one
//! that writes the first query for a question, and one that writes a
//! corrected query given the history of failed attempts. Both replies go
//! through pure parsing ([`parse_generation`], [`parse_repair_response`])
//! that is tested independently of any model.

use fancy_regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::debug;

use crate::completion::CompletionProvider;
use crate::error::ProviderError;
use crate::models::QueryAttempt;
use crate::parse::{capture, Parsed};

/// Start of a read statement: `WITH <name> [(cols)] AS (` or `SELECT`
/// followed by something that reads as a select list. A lone keyword on its
/// own line also starts a statement.
static QUERY_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)^(?:with(?:\s*$|\s+(?:recursive\s+)?[a-z_"`\[][\w"`\]]*\s*(?:\([^)]*\)\s*)?as\s*(?:\(|$))|select(?:\s*$|\s+(?:(?:distinct|case)\b|[*\d'(]|[a-z_"`\[][\w"`\].]*\s*(?:[,(*+\-/|=<>]|as\b|from\b|$))))"#,
    )
    .expect("valid regex")
});

/// Marker the generation prompt asks the model to emit when the schema
/// cannot answer the question.
static NO_INFORMATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bno\s+information\b").expect("valid regex"));

static NEW_QUERY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)^.*#NEW QUERY#\s*:?(.*)$").expect("valid regex"));

/// Output of the generation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryCandidate {
    Query(String),
    InsufficientInformation,
}

/// Inputs shared by generation and repair for one question.
#[derive(Debug, Clone, Copy)]
pub struct QueryRequest<'a> {
    pub question: &'a str,
    pub schema_context: &'a str,
    pub table_description: &'a str,
}

pub struct QueryGenerator {
    llm: Arc<dyn CompletionProvider>,
}

impl QueryGenerator {
    pub fn new(llm: Arc<dyn CompletionProvider>) -> Self {
        Self { llm }
    }

    /// Ask the model for a first query.
    pub async fn generate(
        &self,
        request: &QueryRequest<'_>,
    ) -> Result<Parsed<QueryCandidate>, ProviderError> {
        let system = generation_prompt(request.schema_context, request.table_description);
        let raw = self.llm.complete(&system, request.question).await?;
        debug!(raw = %raw, "generator reply");
        Ok(parse_generation(&raw))
    }

    /// Ask the model for a corrected query given every previous attempt.
    pub async fn repair(
        &self,
        request: &QueryRequest<'_>,
        attempts: &[QueryAttempt],
    ) -> Result<Parsed<String>, ProviderError> {
        let system = repair_prompt(request.schema_context);
        let user = repair_user_prompt(request.question, attempts);
        let raw = self.llm.complete(&system, &user).await?;
        debug!(raw = %raw, "repair reply");
        Ok(parse_repair_response(&raw))
    }
}

fn starts_query(line: &str) -> bool {
    !line.ends_with(':') && QUERY_START.is_match(line).unwrap_or(false)
}

/// Byte offset of the first `;` outside a quoted literal.
fn statement_end(sql: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in sql.char_indices() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            (None, ';') => return Some(i),
            _ => {}
        }
    }
    None
}

/// Normalize raw model output into a single terminated statement.
///
/// Code fences and prose are dropped. The statement starts at the first line
/// that opens a read query and continues over following lines until a
/// terminator, a blank line, or a closing fence. Exactly one `;` is appended.
/// Returns `None` when the output holds no statement.
pub fn normalize_query(raw: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            if parts.is_empty() {
                continue;
            }
            break;
        }
        let trimmed = trimmed.trim_matches('`').trim();

        if parts.is_empty() {
            if !starts_query(trimmed) {
                continue;
            }
        } else if trimmed.is_empty() {
            break;
        }

        parts.push(trimmed);
        if statement_end(trimmed).is_some() {
            break;
        }
    }

    let joined = parts.join(" ");
    let body = match statement_end(&joined) {
        Some(end) => &joined[..end],
        None => joined.as_str(),
    };
    let body = body.trim().trim_end_matches(';').trim();
    if body.is_empty() {
        return None;
    }
    Some(format!("{};", body))
}

/// Parse a generation reply.
///
/// A statement wins over everything else. Without one, only the
/// "No information" marker means the schema cannot answer; any other reply
/// is [`Parsed::Malformed`].
pub fn parse_generation(raw: &str) -> Parsed<QueryCandidate> {
    if let Some(query) = normalize_query(raw) {
        return Parsed::Parsed(QueryCandidate::Query(query));
    }
    if NO_INFORMATION.is_match(raw).unwrap_or(false) {
        debug!("generator reported insufficient information");
        return Parsed::Parsed(QueryCandidate::InsufficientInformation);
    }
    Parsed::Malformed(raw.to_string())
}

/// Parse a repair reply of the form `#Reasoning#: ... #NEW QUERY#: <sql>`.
///
/// Everything after the last `#NEW QUERY#` marker is normalized with
/// [`normalize_query`]. A missing marker or a marker followed by no
/// statement is [`Parsed::Malformed`].
pub fn parse_repair_response(raw: &str) -> Parsed<String> {
    match capture(&NEW_QUERY, raw).and_then(normalize_query) {
        Some(query) => Parsed::Parsed(query),
        None => Parsed::Malformed(raw.to_string()),
    }
}

/// Whitespace-insensitive form used to detect repeated queries.
pub fn canonical_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(';')
        .trim()
        .to_string()
}

fn generation_prompt(schema_context: &str, table_description: &str) -> String {
    format!(
        r#"You are an SQL assistant for a building facade database. Write one accurate SQLite query that answers the user's question.

### DATABASE CONTEXT ###
{schema_context}
### TABLE DESCRIPTIONS ###
{table_description}

### QUERY PATTERNS ###
Count: SELECT COUNT(*) FROM <table> WHERE ...
List items: SELECT <column> FROM <table> WHERE ...
Unique values: SELECT DISTINCT <column> FROM <table> WHERE ...
Group/aggregate: SELECT <column>, COUNT(*) FROM <table> GROUP BY <column>
Panel types: panel_id LIKE '%WINDOW%' (or %DOOR%, %WALL%, %FLOOR%, %ROOF%)

### INSTRUCTIONS ###
- Read the question carefully and cross-reference it with the schema and table descriptions.
- Fetch only the data the question needs.
- Use table and column names exactly as they appear in the schema.
- Output only the SQL query, without code fences or extra text.
- If the database does not contain enough information to answer the question, output exactly "No information"."#
    )
}

fn repair_prompt(schema_context: &str) -> String {
    format!(
        r#"You are an SQL database expert correcting a query. Previous attempts either failed to execute or returned no rows. Analyze the failures against the schema and write a corrected query that still answers the user's question.

## Database Schema ##
{schema_context}

## Instructions ##
1. Reason briefly about why the previous queries failed: is there a more appropriate table, or another column that answers the question?
2. Never repeat a previously attempted query. Try something different that the schema supports.
3. Use only table and column names shown in the schema.
4. Answer in exactly this format:
#Reasoning#: <your reasoning>
#NEW QUERY#: <the new query>
Write nothing after the query."#
    )
}

fn repair_user_prompt(question: &str, attempts: &[QueryAttempt]) -> String {
    let history = attempts
        .iter()
        .map(|a| {
            format!(
                "#Previously attempted query#: {} #SQL Exception error#: {}",
                a.query_text,
                a.outcome.describe()
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "#User question#\n{}\n#Failed queries and exceptions#\n{}",
        question, history
    )
}
