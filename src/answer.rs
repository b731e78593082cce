//! Natural-language answers from query results.

use std::sync::Arc;
use tracing::debug;

use crate::completion::CompletionProvider;
use crate::error::QaResult;
use crate::models::Row;

/// Marker sent to the model (and returned verbatim) for an empty result.
pub const NO_ROWS: &str = "(no rows)";

const SYSTEM_PROMPT: &str = r#"Interpret SQL query results and answer the user's question in natural language using the actual data.

Examples:
- SQL Result: [('187'), ('291'), ('385')] -> Answer: "[187, 291, 385]"
- SQL Result: [(15)] -> Answer: "15 panels"
- SQL Result: (no rows) -> Answer: "No results found"
- SQL Result: [('187', 'bedroom', 'North')] -> Answer: "Found: Unit 187 has a North-facing panel in bedroom"
- SQL Result: [(187, '3B_WINDOW9'), (173, '3B_WINDOW8')] -> Answer: "[(187, '3B_WINDOW9'), (173, '3B_WINDOW8')]"

Return only the formatted answer."#;

/// Canonical text form of a result set: `[(v1, v2), (v1, v2)]`.
pub fn render_rows(rows: &[Row]) -> String {
    if rows.is_empty() {
        return NO_ROWS.to_string();
    }
    let tuples: Vec<String> = rows
        .iter()
        .map(|row| {
            let values: Vec<String> = row.iter().map(ToString::to_string).collect();
            format!("({})", values.join(", "))
        })
        .collect();
    format!("[{}]", tuples.join(", "))
}

pub struct AnswerSynthesizer {
    llm: Arc<dyn CompletionProvider>,
    synthesize: bool,
}

impl AnswerSynthesizer {
    /// With `synthesize = false` the rendered rows are returned as the answer
    /// and no completion call is made.
    pub fn new(llm: Arc<dyn CompletionProvider>, synthesize: bool) -> Self {
        Self { llm, synthesize }
    }

    pub async fn synthesize(&self, query: &str, rows: &[Row], question: &str) -> QaResult<String> {
        let rendered = render_rows(rows);
        if !self.synthesize {
            return Ok(rendered);
        }
        let user = format!(
            "User question: {}\nSQL Query: {}\nSQL Result: {}\nReturn the formatted answer. Do not add anything else.",
            question, query, rendered
        );
        let answer = self.llm.complete(SYSTEM_PROMPT, &user).await?;
        debug!(chars = answer.len(), "answer synthesized");
        Ok(answer.trim().to_string())
    }
}
