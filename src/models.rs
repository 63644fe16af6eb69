//! Core data models used throughout the question-answering pipeline.
//!
//! These types represent the indexed document chunks, per-query analysis,
//! scored retrieval results, and conversation messages that flow through
//! the ingest and answer paths.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata row for one indexed chunk. Immutable once written except
/// `updated_at`, which is bumped on idempotent re-ingestion.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    /// Positional offset into the vector index. Monotonically assigned.
    pub slot_index: u32,
    /// Derived identity: `{source}_{slot}_{content hash}`.
    pub chunk_id: String,
    pub content: String,
    pub source: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A scored retrieval result. Transient, produced per search call.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredResult {
    pub content: String,
    pub source: String,
    pub slot_index: u32,
    pub raw_score: f32,
    pub recency_score: f32,
    pub length_score: f32,
    pub final_score: f32,
}

impl ScoredResult {
    /// Sentinel returned when the index holds no vectors at all. Callers
    /// must special-case this rather than treating it as "no match".
    pub fn empty_corpus() -> Self {
        Self {
            content: String::new(),
            source: String::new(),
            slot_index: u32::MAX,
            raw_score: 0.0,
            recency_score: 0.0,
            length_score: 0.0,
            final_score: 0.0,
        }
    }

    pub fn is_empty_corpus(&self) -> bool {
        self.slot_index == u32::MAX
    }
}

/// Classified question intent, used to pick rewrite templates and the
/// semantic/keyword weight split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryIntent {
    Factual,
    Comparative,
    Temporal,
    Location,
    Person,
    Procedural,
    Conceptual,
    Unknown,
}

/// Weight split between the semantic and keyword search phases.
/// Invariant: `semantic + keyword == 1.0`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SearchWeights {
    pub semantic: f32,
    pub keyword: f32,
}

/// Result of analyzing one question. Created fresh per question and never
/// mutated after construction.
#[derive(Debug, Clone)]
pub struct QueryAnalysis {
    pub original_query: String,
    pub intent: QueryIntent,
    pub keywords: Vec<String>,
    pub entities: HashMap<String, String>,
    pub rewritten_queries: Vec<String>,
    pub confidence: f32,
    pub weights: SearchWeights,
}

/// Speaker role within a conversation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// One turn in a conversation session.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Snapshot of the document store, returned by `DocumentStore::stats`.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub total_records: i64,
    pub total_vectors: usize,
    pub per_source_counts: HashMap<String, i64>,
    pub avg_content_length: f64,
    pub dims: usize,
}

/// Snapshot of the conversation store, returned by `ConversationStore::stats`.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub total_messages: usize,
    pub avg_messages_per_session: f64,
    pub estimated_memory_bytes: usize,
}
