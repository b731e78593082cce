//! # facade-rag CLI (`frag`)
//!
//! ## Usage
//!
//! ```bash
//! frag --config ./config/frag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `frag serve` | Start the HTTP server |
//! | `frag ask "<q>"` | Classify and answer a question |
//! | `frag sql "<q>"` | Answer from the database only |
//! | `frag rag "<q>"` | Answer from the knowledge pool only |
//! | `frag schema` | Print the schema context sent to the model |
//! | `frag pool embed <dir>` | Embed every PDF in a knowledge pool |
//! | `frag pool merge <dir>` | Merge per-document embeddings into `merged.json` |
//! | `frag tables embed <path>` | Attach embeddings to table descriptions |
//!
//! Logs go to stderr and are filtered with `RUST_LOG`.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use facade_rag::config::{self, Config};
use facade_rag::embedding::create_embedder;
use facade_rag::models::AttemptOutcome;
use facade_rag::pipeline::{LlmRequest, Pipeline, FAILURE_MESSAGE};
use facade_rag::repair::SqlOutcome;
use facade_rag::{db, knowledge, schema, server, tables};

/// facade-rag: question answering over facade databases and design guides.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/frag.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "frag",
    about = "Retrieval-assisted question answering over facade databases and design guides",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/frag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// Serves `POST /llm_call` and `GET /health` on `[server].bind`.
    Serve,

    /// Classify a question and answer it from the database or the knowledge pool.
    ///
    /// Prints the answer followed by the JSON diagnostics the server returns
    /// in `json_values`.
    Ask {
        /// The question.
        question: String,
        /// SQLite database (defaults to `[paths].db_path`).
        #[arg(long)]
        db: Option<PathBuf>,
        /// Table descriptions file (defaults to `[paths].table_descriptions_path`).
        #[arg(long)]
        tables: Option<PathBuf>,
        /// Merged knowledge pool (defaults to `[paths].knowledge_pool_path`).
        #[arg(long)]
        pool: Option<PathBuf>,
    },

    /// Answer a question from the database, skipping classification.
    ///
    /// Prints every attempted query with its outcome, then the answer.
    Sql {
        question: String,
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        tables: Option<PathBuf>,
    },

    /// Answer a question from the knowledge pool, skipping classification.
    Rag {
        question: String,
        /// Number of chunks to retrieve (defaults to `[retrieval].top_k`).
        #[arg(short = 'n', long)]
        num_results: Option<usize>,
        /// Print the retrieved chunks.
        #[arg(short = 'c', long)]
        show_context: bool,
        /// Enhance the question and reframe unsatisfactory answers.
        #[arg(long)]
        refine: bool,
        #[arg(long)]
        pool: Option<PathBuf>,
    },

    /// Print the rendered schema context for a database.
    Schema {
        #[arg(long)]
        db: Option<PathBuf>,
        /// Restrict to these tables (repeatable).
        #[arg(long = "table")]
        tables: Vec<String>,
    },

    /// Knowledge-pool maintenance.
    Pool {
        #[command(subcommand)]
        action: PoolAction,
    },

    /// Table-description maintenance.
    Tables {
        #[command(subcommand)]
        action: TablesAction,
    },
}

#[derive(Subcommand)]
enum PoolAction {
    /// Extract, chunk, and embed every PDF in a directory.
    ///
    /// Writes `<name>.txt` and `<name>.json` next to each PDF.
    Embed {
        dir: PathBuf,
        /// Also write `merged.json` afterwards.
        #[arg(long)]
        merge: bool,
    },
    /// Merge every per-document embeddings file into `merged.json`.
    Merge { dir: PathBuf },
}

#[derive(Subcommand)]
enum TablesAction {
    /// Embed descriptions that have no vector yet and rewrite the file.
    Embed { path: PathBuf },
}

fn path_or(value: Option<PathBuf>, fallback: &Path) -> PathBuf {
    value.unwrap_or_else(|| fallback.to_path_buf())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    match &cli.command {
        Commands::Pool {
            action: PoolAction::Merge { dir },
        } => {
            let (path, count) = knowledge::write_merged(dir)?;
            println!("Merged {} records into {}", count, path.display());
            return Ok(());
        }
        Commands::Schema { db, tables } => {
            let cfg = config::load_config(&cli.config).unwrap_or_else(|_| Config::minimal());
            let db_path = path_or(db.clone(), &cfg.paths.db_path);
            let pool = db::connect(&db_path).await?;
            let description = schema::describe(&pool).await?;
            let description = if tables.is_empty() {
                description
            } else {
                description.subset(tables.as_slice())
            };
            print!("{}", schema::render(&description));
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ask {
            question,
            db,
            tables,
            pool,
        } => {
            let pipeline = Pipeline::from_config(&cfg)?;
            let request = LlmRequest {
                input: question,
                db_path: db.map(|p| p.display().to_string()).unwrap_or_default(),
                table_descriptions_path: tables
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
                knowledge_pool_path: pool.map(|p| p.display().to_string()).unwrap_or_default(),
            };
            match pipeline.handle(&request).await {
                Ok(response) => {
                    println!("{}", response.response);
                    println!();
                    println!("{}", serde_json::to_string_pretty(&response.json_values)?);
                }
                Err(e) => {
                    println!("{}", FAILURE_MESSAGE);
                    return Err(e.into());
                }
            }
        }
        Commands::Sql {
            question,
            db,
            tables,
        } => {
            let pipeline = Pipeline::from_config(&cfg)?;
            let db_path = path_or(db, &cfg.paths.db_path);
            let tables_path = path_or(tables, &cfg.paths.table_descriptions_path);
            let result = match pipeline.answer_sql(&question, &db_path, &tables_path).await {
                Ok(result) => result,
                Err(e) => {
                    println!("{}", FAILURE_MESSAGE);
                    return Err(e.into());
                }
            };

            if !result.tables.is_empty() {
                let names: Vec<&str> = result.tables.iter().map(|t| t.table_name.as_str()).collect();
                println!("Tables: {}", names.join(", "));
            }
            for (i, attempt) in result.outcome.attempts().iter().enumerate() {
                let status = match &attempt.outcome {
                    AttemptOutcome::Success(rows) => format!("{} rows", rows.len()),
                    AttemptOutcome::EmptyResult => "no rows".to_string(),
                    AttemptOutcome::ExecutionError(msg) => format!("error: {}", msg),
                };
                println!("[{}] {}  ({})", i + 1, attempt.query_text, status);
            }
            if let SqlOutcome::Unanswerable = result.outcome {
                println!("(no query generated)");
            }
            println!();
            println!("{}", result.answer);
        }
        Commands::Rag {
            question,
            num_results,
            show_context,
            refine,
            pool,
        } => {
            let pipeline = Pipeline::from_config(&cfg)?;
            let pool_path = path_or(pool, &cfg.paths.knowledge_pool_path);
            let top_k = num_results.unwrap_or(cfg.retrieval.top_k);
            let result = match pipeline
                .answer_documents(&question, &pool_path, top_k, refine)
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    println!("{}", FAILURE_MESSAGE);
                    return Err(e.into());
                }
            };

            if show_context {
                println!("RETRIEVED CONTEXT:");
                print!("{}", result.context_report);
            }
            if result.question != question {
                println!("QUESTION: {}", result.question);
            }
            println!("ANSWER: {}", result.answer);
            let mut sources: Vec<&str> = result.matches.iter().map(|m| m.source.as_str()).collect();
            sources.sort_unstable();
            sources.dedup();
            println!("SOURCES: {}", sources.join(", "));
        }
        Commands::Pool {
            action: PoolAction::Embed { dir, merge },
        } => {
            let embedder = create_embedder(&cfg.embedding)?;
            let report =
                knowledge::build_pdf_embeddings(&dir, embedder.as_ref(), cfg.embedding.batch_size)
                    .await?;
            println!(
                "Embedded {} documents ({} chunks)",
                report.documents, report.chunks
            );
            for failed in &report.failed {
                println!("  skipped: {}", failed);
            }
            if merge {
                let (path, count) = knowledge::write_merged(&dir)?;
                println!("Merged {} records into {}", count, path.display());
            }
        }
        Commands::Tables { action } => match action {
            TablesAction::Embed { path } => {
                let embedder = create_embedder(&cfg.embedding)?;
                let added =
                    tables::embed_descriptions_file(&path, embedder.as_ref(), cfg.embedding.batch_size)
                        .await
                        .with_context(|| format!("Failed to embed {}", path.display()))?;
                println!("Added {} embeddings to {}", added, path.display());
            }
        },
        // Handled before config load
        Commands::Pool {
            action: PoolAction::Merge { .. },
        }
        | Commands::Schema { .. } => {}
    }

    Ok(())
}
