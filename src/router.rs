//! Intent classification for incoming questions.
//!
//! The classifier is closed-world: the model's reply must match one of the
//! six labels exactly (after stripping markdown and quotes). Anything else
//! is treated as [`Intent::Refuse`].

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::completion::CompletionProvider;
use crate::error::QaResult;
use crate::parse::strip_formatting;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    FilterUnits,
    FilterPanels,
    TableSummary,
    Recommendations,
    ComponentRecommendations,
    Refuse,
}

/// Which answering path an intent is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Sql,
    Documents,
    Refuse,
}

impl Intent {
    pub const ALL: [Intent; 6] = [
        Intent::FilterUnits,
        Intent::FilterPanels,
        Intent::TableSummary,
        Intent::Recommendations,
        Intent::ComponentRecommendations,
        Intent::Refuse,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Intent::FilterUnits => "filter_units",
            Intent::FilterPanels => "filter_panels",
            Intent::TableSummary => "table_summary",
            Intent::Recommendations => "recommendations",
            Intent::ComponentRecommendations => "component_recommendations",
            Intent::Refuse => "refuse",
        }
    }

    /// Component recommendations are looked up in the component tables, so
    /// they take the SQL path alongside the filter and summary intents.
    pub fn route(&self) -> Route {
        match self {
            Intent::FilterUnits
            | Intent::FilterPanels
            | Intent::TableSummary
            | Intent::ComponentRecommendations => Route::Sql,
            Intent::Recommendations => Route::Documents,
            Intent::Refuse => Route::Refuse,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Map a raw classifier reply to an intent, failing closed to `Refuse`.
pub fn parse_intent(raw: &str) -> Intent {
    let cleaned = strip_formatting(raw);
    Intent::ALL
        .into_iter()
        .find(|intent| intent.label() == cleaned)
        .unwrap_or(Intent::Refuse)
}

const CLASSIFIER_PROMPT: &str = r#"You are classifying user queries about building facade data. Classify the input into one of these 6 categories:

filter_units - the user wants to FIND or SHOW specific units (returns unit IDs):
- "Show me units with low SDA values"
- "Find units on level 3"
- "Which units have WWR greater than 0.5?"
- "Display units connected to bedrooms"

filter_panels - the user wants to FIND or SHOW specific panels (returns panel IDs):
- "Show me panels facing south"
- "Find panels with WWR > 0.4"
- "Which panels have high radiation exposure?"
- "Display panels with viewscore below 0.3"

table_summary - the user wants COUNTS, STATISTICS, or SUMMARIES:
- "How many panels are facing south?"
- "What's the average WWR?"
- "Count panels by orientation"
- "Give me an overview of the building data"

recommendations - general design guidance and best practices:
- "What's the recommended WWR for Barcelona?"
- "How to improve SDA values?"
- "How to reduce radiation while maintaining daylight?"
- "Guidelines for WWR in hot climates"

component_recommendations - specific component selection from the library:
- "Which panel components for high radiation areas?"
- "What window type should I use for bedrooms?"
- "Suggest window types for low SDA panels"

refuse - unrelated to building or facade data:
- "What's the weather today?"
- "How to bake cookies?"
- "Best restaurants in Barcelona"

Output ONLY the exact category name."#;

pub struct RequestRouter {
    llm: Arc<dyn CompletionProvider>,
}

impl RequestRouter {
    pub fn new(llm: Arc<dyn CompletionProvider>) -> Self {
        Self { llm }
    }

    pub async fn classify(&self, question: &str) -> QaResult<Intent> {
        let raw = self.llm.complete(CLASSIFIER_PROMPT, question).await?;
        let intent = parse_intent(&raw);
        if intent == Intent::Refuse && strip_formatting(&raw) != Intent::Refuse.label() {
            warn!(reply = %raw, "unrecognized classifier reply, refusing");
        }
        info!(intent = %intent, "question classified");
        Ok(intent)
    }
}
