//! # AskAccess
//!
//! A retrieval-augmented question-answering service. Documents and CRM
//! cases are chunked, embedded and indexed; questions are answered by a
//! language model grounded in the most similar chunks.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────────┐
//! │ Upload/File │──▶│  Pipeline   │──▶│      SQLite      │
//! │ CRM cases   │   │ Chunk+Embed │   │ chunks+documents │
//! └─────────────┘   └─────────────┘   └────────┬─────────┘
//!                                              │
//!        ┌──────────┐   ┌─────────────┐        │
//!  Q ───▶│Retriever │◀──┤ cosine top-k│◀───────┘
//!        └────┬─────┘   └─────────────┘
//!             ▼
//!        ┌──────────┐   ┌─────────────┐
//!        │Synthesize│──▶│ Query logs  │──▶ answer
//!        └──────────┘   └─────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunk`] | Overlapping text windows |
//! | [`extract`] | Text extraction (plain, HTML, PDF, CSV) |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`generation`] | Generative model abstraction |
//! | [`http`] | Retrying JSON client for hosted models |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`store`] | Vector index and metadata store |
//! | [`ingest`] | Ingestion pipeline |
//! | [`search`] | Similarity retrieval |
//! | [`answer`] | Prompting and answer synthesis |
//! | [`query_log`] | Daily JSON Lines query log |
//! | [`query`] | Retrieve → answer → log orchestration |
//! | [`app`] | Application context |
//! | [`server`] | HTTP API |

pub mod answer;
pub mod app;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod http;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod query;
pub mod query_log;
pub mod search;
pub mod server;
pub mod store;
