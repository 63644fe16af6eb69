//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and two concrete providers:
//! - **[`OpenAiEmbedder`]** — calls the OpenAI embeddings API with batching,
//!   retry, and exponential backoff.
//! - **[`HashEmbedder`]** — deterministic offline vectors seeded from a
//!   content digest; lets the whole pipeline run and be tested without
//!   network access or API keys.
//!
//! A dimension mismatch between the configured provider and the vector
//! index is a fatal configuration error, caught at construction.
//!
//! # Retry Strategy (OpenAI)
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Fixed output dimensionality. Must match the vector index.
    fn dims(&self) -> usize;

    async fn encode_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn encode_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut results = self.encode_many(std::slice::from_ref(&text.to_string())).await?;
        results
            .pop()
            .ok_or_else(|| Error::Embedding("empty embedding response".into()))
    }
}

/// Instantiate the provider named in the configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>> {
    match config.provider.as_str() {
        "hash" => Ok(Box::new(HashEmbedder::new(config.dims))),
        "openai" => Ok(Box::new(OpenAiEmbedder::new(config)?)),
        other => Err(Error::Config(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

// ============ Hash Provider ============

/// Deterministic pseudo-embedding: the sha256 digest of the text seeds a
/// simple xorshift stream expanded to `dims` components, then unit
/// normalized. Identical texts always map to identical vectors, so
/// similarity degenerates to near-exact matching — adequate for offline
/// runs and tests, and honest about being no more than that.
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }

    fn encode_sync(&self, text: &str) -> Vec<f32> {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();

        let mut state = u64::from_le_bytes(digest[0..8].try_into().unwrap()) | 1;
        let mut v: Vec<f32> = (0..self.dims)
            .map(|_| {
                // xorshift64
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state as f64 / u64::MAX as f64) as f32 - 0.5
            })
            .collect();
        crate::index::normalize(&mut v);
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn encode_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.encode_sync(t)).collect())
    }
}

// ============ OpenAI Provider ============

pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::Config("embedding.model required for OpenAI provider".into()))?;

        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Config("OPENAI_API_KEY environment variable not set".into()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Embedding(e.to_string()))?;

        Ok(Self {
            model,
            dims: config.dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            client,
            api_key,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post("https://api.openai.com/v1/embeddings")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response
                            .json()
                            .await
                            .map_err(|e| Error::Embedding(e.to_string()))?;
                        return self.parse_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(%status, attempt, "embedding API error, retrying");
                        last_err = Some(Error::Embedding(format!(
                            "OpenAI API error {}: {}",
                            status, body_text
                        )));
                        continue;
                    }

                    return Err(Error::Embedding(format!(
                        "OpenAI API error {}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(Error::Embedding(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Embedding("embedding failed after retries".into())))
    }

    fn parse_response(&self, json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
        let data = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| Error::Embedding("invalid response: missing data array".into()))?;

        let mut embeddings = Vec::with_capacity(data.len());
        for item in data {
            let embedding = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| Error::Embedding("invalid response: missing embedding".into()))?;

            let vec: Vec<f32> = embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();

            if vec.len() != self.dims {
                return Err(Error::Config(format!(
                    "model returned dimension {} but {} was configured",
                    vec.len(),
                    self.dims
                )));
            }
            embeddings.push(vec);
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn dims(&self) -> usize {
        self.dims
    }

    async fn encode_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            all.extend(self.embed_batch(batch).await?);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_len(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[tokio::test]
    async fn test_hash_embedder_deterministic() {
        let emb = HashEmbedder::new(16);
        let a = emb.encode_one("hello world").await.unwrap();
        let b = emb.encode_one("hello world").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_hash_embedder_distinct_texts_differ() {
        let emb = HashEmbedder::new(16);
        let a = emb.encode_one("alpha").await.unwrap();
        let b = emb.encode_one("beta").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_hash_embedder_unit_norm() {
        let emb = HashEmbedder::new(32);
        let v = emb.encode_one("some chunk of text").await.unwrap();
        assert_eq!(v.len(), 32);
        assert!((unit_len(&v) - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_encode_many_order_preserved() {
        let emb = HashEmbedder::new(8);
        let texts = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        let batch = emb.encode_many(&texts).await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[1], emb.encode_one("two").await.unwrap());
    }

    #[test]
    fn test_create_embedder_unknown_provider() {
        let cfg = EmbeddingConfig {
            provider: "quantum".into(),
            ..Default::default()
        };
        assert!(matches!(create_embedder(&cfg), Err(Error::Config(_))));
    }
}
