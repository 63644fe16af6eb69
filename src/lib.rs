//! # docqa
//!
//! A retrieval-augmented question answering engine over a personal
//! document collection.
//!
//! docqa ingests pages from a Notion-style source (or plain text),
//! chunks and embeds them into a local vector index backed by SQLite
//! metadata, and answers questions through multi-query fused retrieval
//! with dynamic thresholds, recency and length scoring, and per-user
//! TTL conversation memory. Answers come from an LLM strategy with an
//! extractive fallback, served over a CLI and a JSON HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────────┐
//! │  Source  │──▶│   Pipeline    │──▶│ SQLite + flat │
//! │  pages   │   │ Clean+Chunk  │   │ vector index  │
//! └──────────┘   │   +Embed     │   └──────┬────────┘
//!                └──────────────┘          │
//!                          ┌───────────────┤
//!                          ▼               ▼
//!                     ┌─────────┐    ┌──────────┐
//!                     │   CLI   │    │   HTTP   │
//!                     │ (docqa) │    │ /ask ... │
//!                     └─────────┘    └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docqa init                       # create config + data directory
//! docqa ingest <page-id>           # fetch, chunk, embed, store
//! docqa search "deployment steps"  # retrieval only, with scores
//! docqa ask "how do I deploy?"     # full question answering
//! docqa serve                      # start the HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Crate error type |
//! | [`text`] | Cleaning and chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Flat vector index file |
//! | [`store`] | Paired vector + metadata store |
//! | [`engine`] | Scored retrieval with dynamic thresholds |
//! | [`query`] | Query analysis and rewriting |
//! | [`fusion`] | Multi-query result fusion |
//! | [`memory`] | TTL conversation sessions |
//! | [`answer`] | Answer generation strategies |
//! | [`source`] | Document source client |
//! | [`pipeline`] | End-to-end ingest and answer |
//! | [`server`] | JSON HTTP server |

pub mod answer;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod index;
pub mod memory;
pub mod models;
pub mod pipeline;
pub mod query;
pub mod server;
pub mod source;
pub mod store;
pub mod text;

pub use error::{Error, Result};
