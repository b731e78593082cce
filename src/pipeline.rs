//! End-to-end request handling.
//!
//! [`Pipeline::handle`] classifies a question and dispatches it:
//!
//! | Route | Steps |
//! |-------|-------|
//! | SQL | schema → table selection → [`RepairLoop`] → [`AnswerSynthesizer`] |
//! | Documents | [`IndexCache`] → [`DocumentAnswerer`] |
//! | Refuse | fixed refusal message |
//!
//! Expected terminal outcomes (unanswerable, exhausted, refused) are
//! successful responses with a distinct message. Infrastructure failures
//! (schema, provider, index, I/O) are returned as [`QaError`](crate::error::QaError) and shown to
//! the user as [`FAILURE_MESSAGE`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::answer::AnswerSynthesizer;
use crate::completion::{create_completion, CompletionProvider};
use crate::config::{Config, PathsConfig, RetrievalConfig};
use crate::db;
use crate::documents::{DocumentAnswer, DocumentAnswerer};
use crate::embedding::{create_embedder, embed_query, Embedder};
use crate::error::{ProviderError, QaResult};
use crate::generator::{QueryGenerator, QueryRequest};
use crate::index::IndexCache;
use crate::models::AttemptOutcome;
use crate::repair::{RepairLoop, SqlOutcome, SqliteExecutor, NO_STATEMENT};
use crate::router::{RequestRouter, Route};
use crate::schema;
use crate::tables::{TableCatalog, TableMatch};

pub const UNANSWERABLE_MESSAGE: &str =
    "I'm sorry, but this database does not contain enough information to answer that question.";
pub const EXHAUSTED_MESSAGE: &str =
    "I'm sorry but I was not able to find any relevant information to answer your question. Please, try again.";
pub const REFUSE_MESSAGE: &str =
    "I'm sorry, I cannot assist with that request. Ask me about building performance, facade design, or panel components.";
pub const FAILURE_MESSAGE: &str =
    "Something went wrong while processing your request. Please try again later.";

/// Body of `POST /llm_call`. Empty paths fall back to `[paths]` config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LlmRequest {
    pub input: String,
    pub db_path: String,
    pub table_descriptions_path: String,
    pub knowledge_pool_path: String,
}

impl LlmRequest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub response: String,
    pub json_values: Vec<Value>,
}

/// Outcome of the SQL path with the user-facing answer.
#[derive(Debug, Clone)]
pub struct SqlAnswer {
    pub answer: String,
    pub outcome: SqlOutcome,
    pub tables: Vec<TableMatch>,
}

impl SqlAnswer {
    pub fn query(&self) -> Option<&str> {
        match &self.outcome {
            SqlOutcome::Succeeded { query, .. } => Some(query),
            SqlOutcome::Exhausted { attempts } => attempts
                .iter()
                .rev()
                .find(|a| {
                    !matches!(&a.outcome, AttemptOutcome::ExecutionError(m) if m == NO_STATEMENT)
                })
                .map(|a| a.query_text.as_str()),
            SqlOutcome::Unanswerable => None,
        }
    }
}

fn resolve(requested: &str, fallback: &Path) -> PathBuf {
    if requested.trim().is_empty() {
        fallback.to_path_buf()
    } else {
        PathBuf::from(requested)
    }
}

pub struct Pipeline {
    router: RequestRouter,
    generator: QueryGenerator,
    synthesizer: AnswerSynthesizer,
    documents: DocumentAnswerer,
    embedder: Arc<dyn Embedder>,
    indexes: IndexCache,
    retrieval: RetrievalConfig,
    paths: PathsConfig,
    repair_budget: u32,
    embed_batch_size: usize,
}

impl Pipeline {
    pub fn new(
        config: &Config,
        llm: Arc<dyn CompletionProvider>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            router: RequestRouter::new(llm.clone()),
            generator: QueryGenerator::new(llm.clone()),
            synthesizer: AnswerSynthesizer::new(llm.clone(), config.answer.synthesize),
            documents: DocumentAnswerer::new(llm, embedder.clone()),
            embedder,
            indexes: IndexCache::new(),
            retrieval: config.retrieval.clone(),
            paths: config.paths.clone(),
            repair_budget: config.repair_budget(),
            embed_batch_size: config.embedding.batch_size,
        }
    }

    /// Build the configured providers and wire them into a pipeline.
    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        let llm: Arc<dyn CompletionProvider> = Arc::from(create_completion(&config.completion)?);
        let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding)?);
        Ok(Self::new(config, llm, embedder))
    }

    /// Classify and answer one request.
    pub async fn handle(&self, request: &LlmRequest) -> QaResult<LlmResponse> {
        info!(input = %request.input, "handling request");
        let intent = self.router.classify(&request.input).await?;
        let mut json_values = vec![json!({ "question classification": intent.label() })];

        let response = match intent.route() {
            Route::Refuse => REFUSE_MESSAGE.to_string(),
            Route::Sql => {
                let db_path = resolve(&request.db_path, &self.paths.db_path);
                let tables_path = resolve(
                    &request.table_descriptions_path,
                    &self.paths.table_descriptions_path,
                );
                let sql = self.answer_sql(&request.input, &db_path, &tables_path).await?;
                json_values.push(json!({ "sql_query": sql.query() }));
                json_values.push(json!({ "attempts": sql.outcome.attempts().len() }));
                sql.answer
            }
            Route::Documents => {
                let pool_path =
                    resolve(&request.knowledge_pool_path, &self.paths.knowledge_pool_path);
                let docs = self
                    .answer_documents(&request.input, &pool_path, self.retrieval.top_k, false)
                    .await?;
                json_values.push(json!({ "best_vectors": docs.matches }));
                json_values.push(json!({ "context_results": docs.context_report }));
                docs.answer
            }
        };

        Ok(LlmResponse {
            response,
            json_values,
        })
    }

    /// Answer a question from the structured database.
    pub async fn answer_sql(
        &self,
        question: &str,
        db_path: &Path,
        table_descriptions_path: &Path,
    ) -> QaResult<SqlAnswer> {
        let pool = db::connect(db_path).await?;
        let full_schema = schema::describe(&pool).await?;

        let tables = self
            .select_tables(question, table_descriptions_path)
            .await;
        let names: Vec<&str> = tables.iter().map(|t| t.table_name.as_str()).collect();
        let subset = full_schema.subset(&names);
        let schema_context = if subset.is_empty() {
            if !names.is_empty() {
                warn!(tables = ?names, "selected tables not in database, using full schema");
            }
            schema::render(&full_schema)
        } else {
            schema::render(&subset)
        };
        let table_description = tables
            .iter()
            .map(|t| format!("{}: {}", t.table_name, t.description))
            .collect::<Vec<_>>()
            .join("\n");

        let request = QueryRequest {
            question,
            schema_context: &schema_context,
            table_description: &table_description,
        };
        let executor = SqliteExecutor::new(pool.clone());
        let outcome = RepairLoop::new(self.repair_budget)
            .run(&self.generator, &executor, &request)
            .await;
        pool.close().await;
        let outcome = outcome?;

        let answer = match &outcome {
            SqlOutcome::Succeeded { query, rows, .. } => {
                self.synthesizer.synthesize(query, rows, question).await?
            }
            SqlOutcome::Exhausted { .. } => EXHAUSTED_MESSAGE.to_string(),
            SqlOutcome::Unanswerable => UNANSWERABLE_MESSAGE.to_string(),
        };

        Ok(SqlAnswer {
            answer,
            outcome,
            tables,
        })
    }

    /// Pick the most relevant tables. Selection narrows the prompt only, so
    /// any failure falls back to the full schema.
    async fn select_tables(&self, question: &str, path: &Path) -> Vec<TableMatch> {
        if !path.exists() {
            return Vec::new();
        }
        match self.rank_tables(question, path).await {
            Ok(tables) => {
                info!(tables = ?tables.iter().map(|t| &t.table_name).collect::<Vec<_>>(), "tables selected");
                tables
            }
            Err(e) => {
                warn!(error = %e, "table selection failed, using full schema");
                Vec::new()
            }
        }
    }

    async fn rank_tables(&self, question: &str, path: &Path) -> QaResult<Vec<TableMatch>> {
        let catalog =
            TableCatalog::load(path, self.embedder.as_ref(), self.embed_batch_size).await?;
        let vector = embed_query(self.embedder.as_ref(), question).await?;
        catalog.select(&vector, self.retrieval.table_k)
    }

    /// Answer a question from the knowledge pool.
    pub async fn answer_documents(
        &self,
        question: &str,
        knowledge_pool_path: &Path,
        top_k: usize,
        refine: bool,
    ) -> QaResult<DocumentAnswer> {
        let index = self.indexes.get_or_load(knowledge_pool_path)?;
        if refine {
            self.documents
                .answer_refined(&index, question, top_k, self.retrieval.max_reframes)
                .await
        } else {
            self.documents.answer(&index, question, top_k).await
        }
    }
}
