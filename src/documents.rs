//! Question answering over the knowledge pool.
//!
//! A single pass embeds the question, retrieves the `top_k` closest chunks
//! from a [`VectorIndex`], and asks the completion model to answer from that
//! context alone. The context lists the available documents first:
//!
//! ```text
//! Available knowledge base: daylight_guide, glazing_catalog
//!
//! [Source: daylight_guide]
//! North facades benefit from higher window-to-wall ratios.
//! ```
//!
//! # Refinement
//!
//! [`DocumentAnswerer::answer_refined`] rewrites the question for search
//! first, then judges each answer. An unsatisfactory answer (negative
//! verdict, unparseable verdict, or a [`detect_poor_answer`] hit) triggers a
//! reframed question and a new search, at most `max_reframes` times
//! (ceiling [`MAX_REFRAMES`]).

use fancy_regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

use crate::completion::CompletionProvider;
use crate::config::MAX_REFRAMES;
use crate::embedding::{embed_query, Embedder};
use crate::error::QaResult;
use crate::index::VectorIndex;
use crate::models::ScoredMatch;
use crate::parse::{capture, parse_verdict, Parsed};

static REFRAMED_QUESTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^.*reframed\s+question\s*:?(.*)$").expect("valid regex")
});

static ENHANCED_QUESTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^.*enhanced\s+question\s*:?(.*)$").expect("valid regex")
});

/// Result of answering a question from documents.
#[derive(Debug, Clone)]
pub struct DocumentAnswer {
    /// The question that produced `answer` (differs from the input after
    /// enhancement or reframing).
    pub question: String,
    pub answer: String,
    pub matches: Vec<ScoredMatch>,
    /// Numbered listing of the retrieved chunks.
    pub context_report: String,
    pub reframes: u32,
}

pub struct DocumentAnswerer {
    llm: Arc<dyn CompletionProvider>,
    embedder: Arc<dyn Embedder>,
}

impl DocumentAnswerer {
    pub fn new(llm: Arc<dyn CompletionProvider>, embedder: Arc<dyn Embedder>) -> Self {
        Self { llm, embedder }
    }

    /// Retrieve and answer once.
    pub async fn answer(
        &self,
        index: &VectorIndex,
        question: &str,
        top_k: usize,
    ) -> QaResult<DocumentAnswer> {
        let vector = embed_query(self.embedder.as_ref(), question).await?;
        let matches = index.search(&vector, top_k)?;
        debug!(matches = matches.len(), "retrieved chunks");

        let context = build_context(&index.sources(), &matches);
        let system = format!(
            "Answer the question based on the provided information. \
             You are given extracted parts of documents and a question. Provide a direct answer. \
             If you don't know the answer, just say \"I do not know.\". Don't make up an answer.\n\
             PROVIDED INFORMATION:\n{}",
            context
        );
        let answer = self.llm.complete(&system, question).await?;

        Ok(DocumentAnswer {
            question: question.to_string(),
            answer: answer.trim().to_string(),
            context_report: context_report(&matches),
            matches,
            reframes: 0,
        })
    }

    /// Enhance the question, answer, and reframe while the answer is judged
    /// unsatisfactory.
    pub async fn answer_refined(
        &self,
        index: &VectorIndex,
        question: &str,
        top_k: usize,
        max_reframes: u32,
    ) -> QaResult<DocumentAnswer> {
        let mut current = self.enhance(question).await?;
        info!(enhanced = %current, "question enhanced");
        let mut result = self.answer(index, &current, top_k).await?;

        for round in 1..=max_reframes.min(MAX_REFRAMES) {
            if self.is_satisfactory(&current, &result.answer).await? {
                break;
            }

            let mut context = result.answer.clone();
            for m in &result.matches {
                context.push('\n');
                context.push_str(&m.content);
            }

            match self.reframe(&current, &context).await? {
                Parsed::Parsed(reframed) => {
                    info!(round, reframed = %reframed, "answer unsatisfactory, reframing");
                    current = reframed;
                    result = self.answer(index, &current, top_k).await?;
                    result.reframes = round;
                }
                Parsed::Malformed(raw) => {
                    warn!(reply = %raw, "unparseable reframe reply");
                    break;
                }
            }
        }

        Ok(result)
    }

    async fn enhance(&self, question: &str) -> QaResult<String> {
        let prompt = format!(
            "Improve this question for better document search results. \
             Keep it succinct so it can be used for vector search. \
             Do not change the original meaning and do not add information, just improve the wording.\n\n\
             Original: {}\n\nEnhanced question:",
            question
        );
        let raw = self.llm.complete("", &prompt).await?;
        let enhanced = capture(&ENHANCED_QUESTION, &raw)
            .unwrap_or(&raw)
            .trim()
            .trim_matches('"')
            .trim()
            .to_string();
        if enhanced.is_empty() {
            return Ok(question.to_string());
        }
        Ok(enhanced)
    }

    async fn is_satisfactory(&self, question: &str, answer: &str) -> QaResult<bool> {
        if detect_poor_answer(answer) {
            debug!("answer flagged as poor");
            return Ok(false);
        }
        let prompt = format!(
            "Judge whether this answer responds to the question. If the answer says it does not know, \
             or does not answer the question correctly, return False. Otherwise return True. \
             Return only True or False.\n\
             Example:\nANSWER: I don't know the answer to your question based on the provided information.\nRESPONSE: False\n\n\
             QUESTION: {}\nANSWER: {}\nRESPONSE:",
            question, answer
        );
        let raw = self.llm.complete("", &prompt).await?;
        Ok(match parse_verdict(&raw) {
            Parsed::Parsed(v) => v,
            Parsed::Malformed(_) => false,
        })
    }

    async fn reframe(&self, question: &str, context: &str) -> QaResult<Parsed<String>> {
        let prompt = format!(
            "The document search didn't find a complete answer to this question: \"{}\"\n\n\
             Based on this context: {}\n\n\
             Provide a reframed question that would yield better results in the document search \
             and keeps the information required by the original question. \
             Return it in the format: Reframed question: <your question here>. \
             Do not provide any additional explanation.",
            question, context
        );
        let raw = self.llm.complete("", &prompt).await?;
        Ok(parse_reframed_question(&raw))
    }
}

/// Context block given to the model: available documents, then each chunk
/// tagged with its source.
pub fn build_context(sources: &[String], matches: &[ScoredMatch]) -> String {
    let mut parts = vec![format!("Available knowledge base: {}", sources.join(", "))];
    for m in matches {
        parts.push(format!(
            "[Source: {}]\n{}",
            m.source.trim_end_matches(".json"),
            m.content
        ));
    }
    parts.join("\n\n")
}

/// Numbered listing of retrieved chunks for display.
pub fn context_report(matches: &[ScoredMatch]) -> String {
    matches
        .iter()
        .enumerate()
        .map(|(i, m)| format!("[{}] Source: {}\nContent: {}\n\n", i + 1, m.source, m.content))
        .collect()
}

/// Extract the question from a `Reframed question: <q>` reply.
pub fn parse_reframed_question(raw: &str) -> Parsed<String> {
    let Some(rest) = capture(&REFRAMED_QUESTION, raw) else {
        return Parsed::Malformed(raw.to_string());
    };
    let question = rest
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .trim_matches(|c: char| c == '"' || c == '*' || c.is_whitespace());
    if question.is_empty() {
        return Parsed::Malformed(raw.to_string());
    }
    Parsed::Parsed(question.to_string())
}

/// Heuristic for degenerate answers: fewer than 10 words, or a single word
/// making up more than 30% of the text.
pub fn detect_poor_answer(answer: &str) -> bool {
    let words: Vec<&str> = answer.split_whitespace().collect();
    if words.len() < 10 {
        return true;
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for w in &words {
        *counts.entry(*w).or_default() += 1;
    }
    let max = counts.values().copied().max().unwrap_or(0);
    max as f64 / words.len() as f64 > 0.3
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::fakes::ScriptedCompletion;
    use crate::embedding::fakes::FixedEmbedder;
    use crate::models::EmbeddingRecord;

    const GOOD_ANSWER: &str =
        "North facades should use a window-to-wall ratio between thirty and forty percent for daylight.";

    fn index() -> VectorIndex {
        VectorIndex::from_records(vec![
            EmbeddingRecord {
                content: "North facades benefit from higher WWR.".into(),
                vector: vec![1.0, 0.0],
                source: "daylight_guide.json".into(),
            },
            EmbeddingRecord {
                content: "Triple glazing reduces heat loss.".into(),
                vector: vec![0.0, 1.0],
                source: "glazing_catalog.json".into(),
            },
        ])
        .unwrap()
    }

    fn embedder() -> Arc<FixedEmbedder> {
        Arc::new(FixedEmbedder::new(
            2,
            &[
                ("What WWR for north?", vec![0.9, 0.1]),
                ("Which glazing keeps heat in?", vec![0.1, 0.9]),
            ],
        ))
    }

    #[test]
    fn test_build_context() {
        let matches = vec![ScoredMatch {
            content: "chunk".into(),
            score: 0.9,
            source: "guide.json".into(),
        }];
        let context = build_context(&["guide".into(), "catalog".into()], &matches);
        assert_eq!(
            context,
            "Available knowledge base: guide, catalog\n\n[Source: guide]\nchunk"
        );
    }

    #[test]
    fn test_parse_reframed_question() {
        assert_eq!(
            parse_reframed_question("Reframed question: \"What is the WWR for north facades?\""),
            Parsed::Parsed("What is the WWR for north facades?".to_string())
        );
        assert_eq!(
            parse_reframed_question("Sure!\n**Reframed question:** Which glazing?"),
            Parsed::Parsed("Which glazing?".to_string())
        );
        assert_eq!(
            parse_reframed_question("reframed question:\n  Which glazing?\nThanks"),
            Parsed::Parsed("Which glazing?".to_string())
        );
        assert_eq!(
            parse_reframed_question(
                "Reply as Reframed question: <question>\nReframed question: Which panels face north?"
            ),
            Parsed::Parsed("Which panels face north?".to_string())
        );
        assert!(matches!(
            parse_reframed_question("Reframed question:   "),
            Parsed::Malformed(_)
        ));
        assert!(matches!(
            parse_reframed_question("A better question would be about glazing"),
            Parsed::Malformed(_)
        ));
    }

    #[test]
    fn test_detect_poor_answer() {
        assert!(detect_poor_answer("I do not know."));
        assert!(detect_poor_answer(
            "panel panel panel panel panel panel panel panel panel panel glass"
        ));
        assert!(!detect_poor_answer(GOOD_ANSWER));
    }

    #[tokio::test]
    async fn test_answer_retrieves_best_chunk() {
        let llm = Arc::new(ScriptedCompletion::new(vec![GOOD_ANSWER]));
        let answerer = DocumentAnswerer::new(llm.clone(), embedder());

        let result = answerer
            .answer(&index(), "What WWR for north?", 1)
            .await
            .unwrap();
        assert_eq!(result.answer, GOOD_ANSWER);
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].source, "daylight_guide.json");
        assert!(result.context_report.starts_with("[1] Source: daylight_guide.json"));

        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[0]
            .0
            .contains("Available knowledge base: daylight_guide, glazing_catalog"));
        assert!(prompts[0].0.contains("[Source: daylight_guide]"));
        assert!(!prompts[0].0.contains("Triple glazing"));
    }

    #[tokio::test]
    async fn test_refined_stops_when_satisfied() {
        let llm = Arc::new(ScriptedCompletion::new(vec![
            "Enhanced question: What WWR for north?",
            GOOD_ANSWER,
            "True",
        ]));
        let answerer = DocumentAnswerer::new(llm.clone(), embedder());

        let result = answerer
            .answer_refined(&index(), "wwr north??", 2, 1)
            .await
            .unwrap();
        assert_eq!(result.reframes, 0);
        assert_eq!(result.question, "What WWR for north?");
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_refined_reframes_once_on_poor_answer() {
        let llm = Arc::new(ScriptedCompletion::new(vec![
            "What WWR for north?",
            "I do not know.",
            "Reframed question: Which glazing keeps heat in?",
            GOOD_ANSWER,
        ]));
        let answerer = DocumentAnswerer::new(llm.clone(), embedder());

        let result = answerer
            .answer_refined(&index(), "q", 1, 1)
            .await
            .unwrap();
        assert_eq!(result.reframes, 1);
        assert_eq!(result.question, "Which glazing keeps heat in?");
        assert_eq!(result.matches[0].source, "glazing_catalog.json");
        // Budget of one reframe: no verdict call after the second answer.
        assert_eq!(llm.calls(), 4);
    }

    #[tokio::test]
    async fn test_refined_malformed_reframe_keeps_first_answer() {
        let llm = Arc::new(ScriptedCompletion::new(vec![
            "What WWR for north?",
            GOOD_ANSWER,
            "it depends",
            "Try asking about orientation.",
        ]));
        let answerer = DocumentAnswerer::new(llm.clone(), embedder());

        let result = answerer
            .answer_refined(&index(), "q", 1, 3)
            .await
            .unwrap();
        assert_eq!(result.reframes, 0);
        assert_eq!(result.answer, GOOD_ANSWER);
        assert_eq!(llm.calls(), 4);
    }
}
