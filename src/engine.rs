//! Retrieval engine: dynamic-threshold vector search with quality signals.
//!
//! Relevance is primarily the inner-product score from the index. Recency
//! and chunk length act only as tie-breaking quality signals: the adjusted
//! score is capped so secondary signals can never promote a stale or short
//! chunk past the primary relevance bar.
//!
//! When too few candidates clear the threshold, the threshold is relaxed
//! (`*= 0.8`) in a bounded iterative loop rather than by recursion, so a
//! sparse corpus still answers without unbounded call-stack growth.

use crate::config::RetrievalConfig;
use crate::error::Result;
use crate::models::ScoredResult;
use crate::store::DocumentStore;

const SECONDS_PER_DAY: f64 = 86_400.0;

pub struct RetrievalEngine {
    cfg: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(cfg: RetrievalConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.cfg
    }

    /// Search the store for the query vector.
    ///
    /// An empty index yields a single [`ScoredResult::empty_corpus`]
    /// sentinel with score 0 rather than an empty list; callers must
    /// special-case it instead of treating it as "no match".
    pub async fn search(
        &self,
        store: &DocumentStore,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredResult>> {
        let total = store.count().await;
        if total == 0 {
            return Ok(vec![ScoredResult::empty_corpus()]);
        }

        let mut threshold = if self.cfg.dynamic_threshold {
            self.dynamic_threshold(store, query).await?
        } else {
            self.cfg.base_threshold
        };
        // Secondary-signal ceiling: the dynamic max threshold in dynamic
        // mode, the base threshold otherwise.
        let ceiling = if self.cfg.dynamic_threshold {
            self.cfg.max_threshold
        } else {
            self.cfg.base_threshold
        };

        let hits = store.search_raw(query, top_k.min(total)).await?;
        let now = chrono::Utc::now().timestamp();

        let mut candidates = Vec::with_capacity(hits.len());
        for (slot, raw_score) in hits {
            // A record can be missing if a clear raced this search; skip it.
            let Some(record) = store.record_by_slot(slot).await? else {
                continue;
            };

            let age_days = ((now - record.created_at).max(0) as f64) / SECONDS_PER_DAY;
            let recency_score = recency_score(age_days, self.cfg.decay_rate);
            let length_score = length_score(
                record.content.chars().count(),
                self.cfg.min_length,
                self.cfg.max_length,
                self.cfg.penalty_factor,
            );

            let adjusted =
                raw_score * (1.0 + (recency_score + length_score - 1.0) * self.cfg.bonus_factor);
            let final_score = adjusted.min(raw_score.max(ceiling));

            candidates.push(ScoredResult {
                content: record.content,
                source: record.source,
                slot_index: slot,
                raw_score,
                recency_score,
                length_score,
                final_score,
            });
        }

        // Bounded relaxation: only ever lowers the threshold, terminates
        // within max_relax_depth passes.
        let mut surviving = filter_at(&candidates, threshold);
        let mut depth = 0u32;
        while surviving.len() < self.cfg.min_results
            && !candidates.is_empty()
            && threshold > self.cfg.relax_floor
            && depth < self.cfg.max_relax_depth
            && surviving.len() < total
        {
            threshold *= 0.8;
            depth += 1;
            tracing::debug!(threshold, depth, "relaxing relevance threshold");
            surviving = filter_at(&candidates, threshold);
        }

        surviving.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        surviving.truncate(self.cfg.max_results);
        Ok(surviving)
    }

    /// Per-query relevance cutoff from the corpus-wide score distribution.
    /// A tight corpus raises the bar, a diffuse one lowers it; the result
    /// is clamped to `[min_threshold, max_threshold]`.
    async fn dynamic_threshold(&self, store: &DocumentStore, query: &[f32]) -> Result<f32> {
        let scores = store.scan_scores(query).await?;
        if scores.is_empty() {
            return Ok(self.cfg.base_threshold);
        }

        let n = scores.len() as f32;
        let mean = scores.iter().sum::<f32>() / n;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f32>() / n;
        let std = variance.sqrt();

        let dynamic = mean * self.cfg.mean_weight
            + (mean + std * self.cfg.adjustment_factor) * self.cfg.std_weight;
        Ok(dynamic.clamp(self.cfg.min_threshold, self.cfg.max_threshold))
    }
}

fn filter_at(candidates: &[ScoredResult], threshold: f32) -> Vec<ScoredResult> {
    candidates
        .iter()
        .filter(|c| c.raw_score >= threshold)
        .cloned()
        .collect()
}

/// `1 / (1 + age_in_days * decay_rate)` — 1.0 for brand-new chunks,
/// asymptotically 0 for ancient ones.
fn recency_score(age_days: f64, decay_rate: f32) -> f32 {
    (1.0 / (1.0 + age_days * decay_rate as f64)) as f32
}

/// 1.0 inside `[min_length, max_length]` chars, linearly penalized by the
/// distance outside the bounds, floored at 0.
fn length_score(len: usize, min_length: usize, max_length: usize, penalty_factor: f32) -> f32 {
    let distance = if len < min_length {
        (min_length - len) as f32
    } else if len > max_length {
        (len - max_length) as f32
    } else {
        return 1.0;
    };
    (1.0 - penalty_factor * distance).max(0.0)
}
