//! Bounded generate → execute → repair loop.
//!
//! ```text
//! Generating ──query──► Executing ──rows──► Succeeded
//!     │  │                 │
//!     │  │            empty / error
//!     │  │                 ▼
//!     │  └──no SQL──► Repairing ──budget spent / repeat / malformed──► Exhausted
//!     │                    │
//!     │                    └──new query──► Executing
//!     │
//!     └──"No information"──► Unanswerable
//! ```
//!
//! A first reply with no statement is recorded as a failed attempt and goes
//! straight to repair. With a budget of `max_retries` the loop records at
//! most `max_retries + 1` attempts, and every executed query differs from all
//! earlier ones after whitespace normalization. The budget is clamped to
//! [`MAX_REPAIR_RETRIES`].

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::config::MAX_REPAIR_RETRIES;
use crate::db;
use crate::error::{QaError, QaResult};
use crate::generator::{canonical_query, QueryCandidate, QueryGenerator, QueryRequest};
use crate::models::{AttemptOutcome, QueryAttempt, Row};
use crate::parse::Parsed;

/// Runs a query and returns its rows.
///
/// A statement the database rejects is [`QaError::QueryExecution`] carrying
/// the database's message; the repair loop feeds it back to the model. Any
/// other error aborts the run.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &str) -> QaResult<Vec<Row>>;
}

/// [`QueryExecutor`] over a read-only SQLite pool.
pub struct SqliteExecutor {
    pool: SqlitePool,
}

impl SqliteExecutor {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn execute(&self, query: &str) -> QaResult<Vec<Row>> {
        db::fetch_rows(&self.pool, query)
            .await
            .map_err(QaError::QueryExecution)
    }
}

/// Recorded for a first reply that holds no statement.
pub const NO_STATEMENT: &str = "no SQL statement in reply";

/// Terminal state of a [`RepairLoop`] run.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlOutcome {
    Succeeded {
        query: String,
        rows: Vec<Row>,
        attempts: Vec<QueryAttempt>,
    },
    Exhausted {
        attempts: Vec<QueryAttempt>,
    },
    Unanswerable,
}

impl SqlOutcome {
    pub fn attempts(&self) -> &[QueryAttempt] {
        match self {
            SqlOutcome::Succeeded { attempts, .. } | SqlOutcome::Exhausted { attempts } => attempts,
            SqlOutcome::Unanswerable => &[],
        }
    }
}

pub struct RepairLoop {
    max_retries: u32,
}

impl RepairLoop {
    pub fn new(max_retries: u32) -> Self {
        if max_retries > MAX_REPAIR_RETRIES {
            warn!(
                requested = max_retries,
                ceiling = MAX_REPAIR_RETRIES,
                "repair budget clamped"
            );
        }
        Self {
            max_retries: max_retries.min(MAX_REPAIR_RETRIES),
        }
    }

    /// Drive one question to a terminal [`SqlOutcome`].
    ///
    /// Execution errors and empty results are absorbed into the attempt
    /// history. Provider failures abort the run.
    pub async fn run(
        &self,
        generator: &QueryGenerator,
        executor: &dyn QueryExecutor,
        request: &QueryRequest<'_>,
    ) -> QaResult<SqlOutcome> {
        let mut attempts: Vec<QueryAttempt> = Vec::new();

        let mut next = match generator.generate(request).await? {
            Parsed::Parsed(QueryCandidate::Query(q)) => Some(q),
            Parsed::Parsed(QueryCandidate::InsufficientInformation) => {
                info!("question is unanswerable from the schema");
                return Ok(SqlOutcome::Unanswerable);
            }
            Parsed::Malformed(raw) => {
                warn!(reply = %raw, "generator reply holds no statement");
                attempts.push(QueryAttempt {
                    query_text: raw.trim().to_string(),
                    outcome: AttemptOutcome::ExecutionError(NO_STATEMENT.to_string()),
                });
                None
            }
        };

        loop {
            if let Some(query) = next.take() {
                let outcome = match executor.execute(&query).await {
                    Ok(rows) if !rows.is_empty() => AttemptOutcome::Success(rows),
                    Ok(_) => AttemptOutcome::EmptyResult,
                    Err(QaError::QueryExecution(message)) => {
                        AttemptOutcome::ExecutionError(message)
                    }
                    Err(e) => return Err(e),
                };
                debug!(
                    attempt = attempts.len() + 1,
                    query = %query,
                    outcome = %outcome.describe(),
                    "query executed"
                );

                if let AttemptOutcome::Success(rows) = &outcome {
                    let rows = rows.clone();
                    attempts.push(QueryAttempt {
                        query_text: query.clone(),
                        outcome,
                    });
                    info!(attempts = attempts.len(), rows = rows.len(), "query succeeded");
                    return Ok(SqlOutcome::Succeeded {
                        query,
                        rows,
                        attempts,
                    });
                }

                attempts.push(QueryAttempt {
                    query_text: query,
                    outcome,
                });
            }

            if attempts.len() as u32 > self.max_retries {
                info!(attempts = attempts.len(), "repair budget exhausted");
                return Ok(SqlOutcome::Exhausted { attempts });
            }

            match generator.repair(request, &attempts).await? {
                Parsed::Parsed(candidate) => {
                    let canonical = canonical_query(&candidate);
                    if attempts
                        .iter()
                        .any(|a| canonical_query(&a.query_text) == canonical)
                    {
                        warn!(query = %candidate, "repair repeated an earlier query");
                        return Ok(SqlOutcome::Exhausted { attempts });
                    }
                    next = Some(candidate);
                }
                Parsed::Malformed(raw) => {
                    warn!(reply = %raw, "unparseable repair reply");
                    return Ok(SqlOutcome::Exhausted { attempts });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::fakes::ScriptedCompletion;
    use crate::error::ProviderError;
    use crate::models::SqlValue;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Executor that returns canned results per query and records calls.
    struct FakeExecutor {
        results: HashMap<String, Result<Vec<Row>, String>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeExecutor {
        fn new(results: Vec<(&str, Result<Vec<Row>, String>)>) -> Self {
            Self {
                results: results
                    .into_iter()
                    .map(|(q, r)| (q.to_string(), r))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl QueryExecutor for FakeExecutor {
        async fn execute(&self, query: &str) -> QaResult<Vec<Row>> {
            self.calls.lock().unwrap().push(query.to_string());
            self.results
                .get(query)
                .cloned()
                .unwrap_or(Ok(Vec::new()))
                .map_err(QaError::QueryExecution)
        }
    }

    /// Executor whose database cannot be read at all.
    struct BrokenExecutor;

    #[async_trait]
    impl QueryExecutor for BrokenExecutor {
        async fn execute(&self, _query: &str) -> QaResult<Vec<Row>> {
            Err(QaError::SchemaRead("database disk image is malformed".into()))
        }
    }

    fn request() -> QueryRequest<'static> {
        QueryRequest {
            question: "How many panels face north?",
            schema_context: "Table: panels\nColumns:\n  - orientation (TEXT)\n",
            table_description: "panels: one row per facade panel",
        }
    }

    fn generator(replies: Vec<&str>) -> (QueryGenerator, Arc<ScriptedCompletion>) {
        let llm = Arc::new(ScriptedCompletion::new(replies));
        (QueryGenerator::new(llm.clone()), llm)
    }

    fn int_rows(values: &[i64]) -> Vec<Row> {
        values.iter().map(|v| vec![SqlValue::Integer(*v)]).collect()
    }

    #[tokio::test]
    async fn test_first_query_succeeds_without_repair() {
        let q = "SELECT COUNT(*) FROM panels WHERE orientation='North';";
        let (generator, llm) = generator(vec![q]);
        let executor = FakeExecutor::new(vec![(q, Ok(int_rows(&[42])))]);

        let outcome = RepairLoop::new(3)
            .run(&generator, &executor, &request())
            .await
            .unwrap();

        match outcome {
            SqlOutcome::Succeeded {
                query,
                rows,
                attempts,
            } => {
                assert_eq!(query, q);
                assert_eq!(rows, int_rows(&[42]));
                assert_eq!(attempts.len(), 1);
            }
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(llm.calls(), 1);
        assert_eq!(executor.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_result_then_repaired() {
        let first = "SELECT unit_id FROM units WHERE wwr > 0.9;";
        let second = "SELECT unit_id FROM units WHERE wwr > 0.4;";
        let (generator, llm) = generator(vec![
            first,
            "#Reasoning#: threshold too strict\n#NEW QUERY#: SELECT unit_id FROM units WHERE wwr > 0.4;",
        ]);
        let executor = FakeExecutor::new(vec![
            (first, Ok(Vec::new())),
            (second, Ok(int_rows(&[1, 2, 3]))),
        ]);

        let outcome = RepairLoop::new(3)
            .run(&generator, &executor, &request())
            .await
            .unwrap();

        let SqlOutcome::Succeeded { rows, attempts, .. } = outcome else {
            panic!("expected success");
        };
        assert_eq!(rows.len(), 3);
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].outcome, AttemptOutcome::EmptyResult);
        // Repair prompt saw the empty first attempt.
        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[1].1.contains(first));
    }

    #[tokio::test]
    async fn test_budget_exhausted_after_max_retries_plus_one() {
        let (generator, _) = generator(vec![
            "SELECT a FROM t;",
            "#NEW QUERY#: SELECT b FROM t;",
            "#NEW QUERY#: SELECT c FROM t;",
            "#NEW QUERY#: SELECT d FROM t;",
        ]);
        let executor = FakeExecutor::new(Vec::new());

        let outcome = RepairLoop::new(2)
            .run(&generator, &executor, &request())
            .await
            .unwrap();

        let SqlOutcome::Exhausted { attempts } = outcome else {
            panic!("expected exhaustion");
        };
        assert_eq!(attempts.len(), 3);
        assert_eq!(
            executor.calls(),
            vec!["SELECT a FROM t;", "SELECT b FROM t;", "SELECT c FROM t;"]
        );
    }

    #[tokio::test]
    async fn test_zero_retries_executes_once() {
        let (generator, llm) = generator(vec!["SELECT a FROM t;"]);
        let executor = FakeExecutor::new(vec![("SELECT a FROM t;", Err("no such table: t".into()))]);

        let outcome = RepairLoop::new(0)
            .run(&generator, &executor, &request())
            .await
            .unwrap();

        let SqlOutcome::Exhausted { attempts } = outcome else {
            panic!("expected exhaustion");
        };
        assert_eq!(attempts.len(), 1);
        assert_eq!(
            attempts[0].outcome,
            AttemptOutcome::ExecutionError("no such table: t".into())
        );
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_insufficient_information_never_executes() {
        let (generator, _) = generator(vec!["No information"]);
        let executor = FakeExecutor::new(Vec::new());

        let outcome = RepairLoop::new(3)
            .run(&generator, &executor, &request())
            .await
            .unwrap();

        assert_eq!(outcome, SqlOutcome::Unanswerable);
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_query_terminates() {
        let (generator, _) = generator(vec![
            "SELECT a FROM t;",
            "#NEW QUERY#:   SELECT a\n FROM t",
        ]);
        let executor = FakeExecutor::new(Vec::new());

        let outcome = RepairLoop::new(5)
            .run(&generator, &executor, &request())
            .await
            .unwrap();

        assert_eq!(outcome.attempts().len(), 1);
        assert!(matches!(outcome, SqlOutcome::Exhausted { .. }));
        assert_eq!(executor.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_repair_terminates() {
        let (generator, _) = generator(vec!["SELECT a FROM t;", "I am not sure what went wrong."]);
        let executor = FakeExecutor::new(Vec::new());

        let outcome = RepairLoop::new(5)
            .run(&generator, &executor, &request())
            .await
            .unwrap();

        assert!(matches!(outcome, SqlOutcome::Exhausted { ref attempts } if attempts.len() == 1));
    }

    #[tokio::test]
    async fn test_executed_queries_are_distinct() {
        let (generator, _) = generator(vec![
            "SELECT a FROM t;",
            "#NEW QUERY#: SELECT b FROM t;",
            "#NEW QUERY#: SELECT c FROM t;",
            "#NEW QUERY#: SELECT b FROM t;",
        ]);
        let executor = FakeExecutor::new(Vec::new());

        let outcome = RepairLoop::new(10)
            .run(&generator, &executor, &request())
            .await
            .unwrap();

        let calls = executor.calls();
        assert_eq!(calls.len(), 3);
        let mut unique = calls.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), calls.len());
        assert!(matches!(outcome, SqlOutcome::Exhausted { .. }));
    }

    #[tokio::test]
    async fn test_provider_error_aborts() {
        let llm = Arc::new(ScriptedCompletion::failing(ProviderError::Timeout { secs: 5 }));
        let generator = QueryGenerator::new(llm);
        let executor = FakeExecutor::new(Vec::new());

        let err = RepairLoop::new(3)
            .run(&generator, &executor, &request())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QaError::Provider(ProviderError::Timeout { .. })
        ));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_prose_first_reply_goes_to_repair() {
        let prose = "Sure! To count the panels you would query the panels table.";
        let q = "SELECT COUNT(*) FROM panels;";
        let (generator, llm) =
            generator(vec![prose, "#NEW QUERY#: SELECT COUNT(*) FROM panels"]);
        let executor = FakeExecutor::new(vec![(q, Ok(int_rows(&[7])))]);

        let outcome = RepairLoop::new(3)
            .run(&generator, &executor, &request())
            .await
            .unwrap();

        let SqlOutcome::Succeeded { query, attempts, .. } = outcome else {
            panic!("expected success");
        };
        assert_eq!(query, q);
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].query_text, prose);
        assert_eq!(
            attempts[0].outcome,
            AttemptOutcome::ExecutionError(NO_STATEMENT.into())
        );
        assert_eq!(executor.calls(), vec![q]);
        assert_eq!(llm.calls(), 2);
        // The repair prompt saw the unusable first reply.
        let prompts = llm.prompts.lock().unwrap();
        assert!(prompts[1].1.contains(NO_STATEMENT));
    }

    #[tokio::test]
    async fn test_prose_first_reply_with_zero_retries() {
        let (generator, llm) = generator(vec!["I would look at the panels table."]);
        let executor = FakeExecutor::new(Vec::new());

        let outcome = RepairLoop::new(0)
            .run(&generator, &executor, &request())
            .await
            .unwrap();

        assert!(matches!(outcome, SqlOutcome::Exhausted { ref attempts } if attempts.len() == 1));
        assert!(executor.calls().is_empty());
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_executor_failure_other_than_query_aborts() {
        let (generator, llm) = generator(vec!["SELECT a FROM t;"]);

        let err = RepairLoop::new(3)
            .run(&generator, &BrokenExecutor, &request())
            .await
            .unwrap_err();

        assert!(matches!(err, QaError::SchemaRead(_)));
        assert_eq!(llm.calls(), 1);
    }

    #[test]
    fn test_budget_clamped() {
        assert_eq!(RepairLoop::new(50).max_retries, MAX_REPAIR_RETRIES);
        assert_eq!(RepairLoop::new(2).max_retries, 2);
    }

    #[tokio::test]
    async fn test_sqlite_executor_against_real_database() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("facade.db");
        {
            let options = sqlx::sqlite::SqliteConnectOptions::new()
                .filename(&path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Delete)
                .create_if_missing(true);
            let pool = SqlitePool::connect_with(options).await.unwrap();
            sqlx::query("CREATE TABLE panels (panel_id TEXT, orientation TEXT)")
                .execute(&pool)
                .await
                .unwrap();
            sqlx::query("INSERT INTO panels VALUES ('P1_WINDOW', 'North'), ('P2_WALL', 'South')")
                .execute(&pool)
                .await
                .unwrap();
            pool.close().await;
        }

        let executor = SqliteExecutor::new(db::connect(&path).await.unwrap());
        let (generator, _) = generator(vec![
            "SELECT facing FROM panels;",
            "#NEW QUERY#: SELECT COUNT(*) FROM panels WHERE orientation = 'North'",
        ]);

        let outcome = RepairLoop::new(3)
            .run(&generator, &executor, &request())
            .await
            .unwrap();

        let SqlOutcome::Succeeded { rows, attempts, .. } = outcome else {
            panic!("expected success");
        };
        assert_eq!(rows, int_rows(&[1]));
        assert!(matches!(
            &attempts[0].outcome,
            AttemptOutcome::ExecutionError(msg) if msg.contains("no such column")
        ));
    }
}
