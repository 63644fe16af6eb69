//! Multi-signal retrieval fusion.
//!
//! Runs one vector search per rewritten query (semantic phase) and one per
//! extracted keyword (keyword phase), scales each result set by the
//! analysis weight split, and merges by exact content. A content string
//! retrieved by several queries accumulates its weighted scores — evidence
//! adds up, it is not replaced by the best single hit.
//!
//! A phase whose weight is zero is skipped entirely, so no embedding calls
//! are wasted on a signal that cannot contribute.

use std::collections::HashMap;

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::engine::RetrievalEngine;
use crate::error::Result;
use crate::models::{QueryAnalysis, ScoredResult};
use crate::store::DocumentStore;

pub struct QueryFusion {
    engine: RetrievalEngine,
}

impl QueryFusion {
    pub fn new(cfg: RetrievalConfig) -> Self {
        Self {
            engine: RetrievalEngine::new(cfg),
        }
    }

    pub fn engine(&self) -> &RetrievalEngine {
        &self.engine
    }

    /// Fused retrieval for one analyzed question. Returns at most `top_k`
    /// results ordered by accumulated weighted score. An empty corpus
    /// propagates as the single sentinel result.
    pub async fn retrieve(
        &self,
        store: &DocumentStore,
        embedder: &dyn Embedder,
        analysis: &QueryAnalysis,
        top_k: usize,
    ) -> Result<Vec<ScoredResult>> {
        let per_search_k = self.engine.config().top_k;
        let mut merged: HashMap<String, ScoredResult> = HashMap::new();

        if analysis.weights.semantic > 0.0 {
            for query in &analysis.rewritten_queries {
                let vector = embedder.encode_one(query).await?;
                let results = self.engine.search(store, &vector, per_search_k).await?;
                if let Some(sentinel) = sentinel_of(&results) {
                    return Ok(vec![sentinel]);
                }
                accumulate(&mut merged, results, analysis.weights.semantic);
            }
        }

        if analysis.weights.keyword > 0.0 {
            for keyword in &analysis.keywords {
                let vector = embedder.encode_one(keyword).await?;
                let results = self.engine.search(store, &vector, per_search_k).await?;
                if let Some(sentinel) = sentinel_of(&results) {
                    return Ok(vec![sentinel]);
                }
                accumulate(&mut merged, results, analysis.weights.keyword);
            }
        }

        let mut fused: Vec<ScoredResult> = merged.into_values().collect();
        fused.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        fused.truncate(top_k);

        tracing::debug!(
            results = fused.len(),
            rewrites = analysis.rewritten_queries.len(),
            keywords = analysis.keywords.len(),
            "fused retrieval complete"
        );
        Ok(fused)
    }
}

fn sentinel_of(results: &[ScoredResult]) -> Option<ScoredResult> {
    results
        .first()
        .filter(|r| r.is_empty_corpus())
        .cloned()
}

/// First occurrence of a content key inserts its weighted score; later
/// occurrences add theirs to the existing entry.
fn accumulate(merged: &mut HashMap<String, ScoredResult>, results: Vec<ScoredResult>, weight: f32) {
    for mut result in results {
        let weighted = result.final_score * weight;
        match merged.get_mut(&result.content) {
            Some(existing) => existing.final_score += weighted,
            None => {
                result.final_score = weighted;
                merged.insert(result.content.clone(), result);
            }
        }
    }
}
