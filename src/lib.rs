//! # facade-rag
//!
//! Retrieval-assisted question answering over a facade measurement database
//! and a knowledge pool of design documents.
//!
//! Questions are classified into one of six intents. Data questions are
//! answered by generating SQL against a read-only SQLite database, repairing
//! failed or empty queries within a fixed budget, and summarizing the rows.
//! Design-guidance questions are answered from the top-k most similar chunks
//! of the knowledge pool.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!   question ───▶ │ RequestRouter │
//!                 └──────┬───────┘
//!          ┌─────────────┼──────────────┐
//!          ▼             ▼              ▼
//!   ┌─────────────┐ ┌──────────┐   ┌────────┐
//!   │ QueryGen +  │ │ Vector   │   │ Refuse │
//!   │ RepairLoop  │ │ Index    │   └────────┘
//!   └──────┬──────┘ └────┬─────┘
//!          ▼             ▼
//!   ┌─────────────┐ ┌──────────────┐
//!   │ Answer      │ │ Document     │
//!   │ Synthesizer │ │ Answerer     │
//!   └─────────────┘ └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! frag pool embed knowledge_pool    # PDFs → per-document embeddings
//! frag pool merge knowledge_pool    # → knowledge_pool/merged.json
//! frag ask "How many panels face north?"
//! frag serve                        # POST /llm_call on [server].bind
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed pipeline errors |
//! | [`completion`] | Chat-completion provider abstraction |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Top-k dot-product vector search |
//! | [`db`] | Read-only SQLite access |
//! | [`schema`] | Schema introspection and rendering |
//! | [`tables`] | Embedded table descriptions |
//! | [`generator`] | SQL generation and normalization |
//! | [`repair`] | Bounded query repair loop |
//! | [`answer`] | Answers from query results |
//! | [`documents`] | Answers from the knowledge pool |
//! | [`router`] | Intent classification |
//! | [`pipeline`] | End-to-end request handling |
//! | [`server`] | HTTP server |
//! | [`knowledge`] | Knowledge-pool embedding and merging |
//! | [`extract`] | PDF text extraction |
//! | [`chunk`] | Bullet-entry chunking |
//! | [`parse`] | Total parsers for model replies |

pub mod answer;
pub mod chunk;
pub mod completion;
pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generator;
pub mod index;
pub mod knowledge;
pub mod models;
pub mod parse;
pub mod pipeline;
pub mod repair;
pub mod router;
pub mod schema;
pub mod server;
pub mod tables;
