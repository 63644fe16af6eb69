//! Core error taxonomy.
//!
//! Retrieval and conversation operations never fail for "no results" or
//! "no session" — both are normal states. Only structural misconfiguration
//! and storage I/O escalate to the caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Fatal at startup: dimension mismatch, invalid weight split, bad
    /// provider name. Never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// Index or metadata I/O failure. Surfaced to the caller; the core
    /// does not retry internally.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Caller error: vector and record batches of different lengths.
    /// Rejected before any state is mutated.
    #[error("length mismatch: {vectors} vectors for {records} records")]
    LengthMismatch { vectors: usize, records: usize },

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("answer generation error: {0}")]
    Answer(String),

    #[error("document source error: {0}")]
    Source(String),
}

pub type Result<T> = std::result::Result<T, Error>;
