use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub answer: AnswerConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// SQLite metadata database.
    pub metadata_path: PathBuf,
    /// Vector index file.
    pub vector_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_chunk_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_chunk_chars() -> usize {
    500
}
fn default_overlap_chars() -> usize {
    50
}

/// Scoring and thresholding knobs for the retrieval engine.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Results requested per individual vector search.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Relevance cutoff when dynamic thresholding is off.
    #[serde(default = "default_base_threshold")]
    pub base_threshold: f32,
    /// Compute the cutoff per query from the corpus score distribution.
    #[serde(default = "default_true")]
    pub dynamic_threshold: bool,
    #[serde(default = "default_mean_weight")]
    pub mean_weight: f32,
    #[serde(default = "default_std_weight")]
    pub std_weight: f32,
    #[serde(default = "default_adjustment_factor")]
    pub adjustment_factor: f32,
    #[serde(default = "default_min_threshold")]
    pub min_threshold: f32,
    #[serde(default = "default_max_threshold")]
    pub max_threshold: f32,
    /// Recency decay per day of chunk age.
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f32,
    #[serde(default = "default_min_length")]
    pub min_length: usize,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default = "default_penalty_factor")]
    pub penalty_factor: f32,
    /// How much recency/length may adjust the raw score.
    #[serde(default = "default_bonus_factor")]
    pub bonus_factor: f32,
    /// Relaxation kicks in below this survivor count.
    #[serde(default = "default_min_results")]
    pub min_results: usize,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_max_relax_depth")]
    pub max_relax_depth: u32,
    /// Relaxation never lowers the threshold past this floor.
    #[serde(default = "default_relax_floor")]
    pub relax_floor: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            base_threshold: default_base_threshold(),
            dynamic_threshold: true,
            mean_weight: default_mean_weight(),
            std_weight: default_std_weight(),
            adjustment_factor: default_adjustment_factor(),
            min_threshold: default_min_threshold(),
            max_threshold: default_max_threshold(),
            decay_rate: default_decay_rate(),
            min_length: default_min_length(),
            max_length: default_max_length(),
            penalty_factor: default_penalty_factor(),
            bonus_factor: default_bonus_factor(),
            min_results: default_min_results(),
            max_results: default_max_results(),
            max_relax_depth: default_max_relax_depth(),
            relax_floor: default_relax_floor(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_base_threshold() -> f32 {
    0.3
}
fn default_true() -> bool {
    true
}
fn default_mean_weight() -> f32 {
    0.6
}
fn default_std_weight() -> f32 {
    0.4
}
fn default_adjustment_factor() -> f32 {
    0.15
}
fn default_min_threshold() -> f32 {
    0.25
}
fn default_max_threshold() -> f32 {
    0.45
}
fn default_decay_rate() -> f32 {
    0.15
}
fn default_min_length() -> usize {
    10
}
fn default_max_length() -> usize {
    500
}
fn default_penalty_factor() -> f32 {
    0.1
}
fn default_bonus_factor() -> f32 {
    0.1
}
fn default_min_results() -> usize {
    1
}
fn default_max_results() -> usize {
    8
}
fn default_max_relax_depth() -> u32 {
    5
}
fn default_relax_floor() -> f32 {
    0.05
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConversationConfig {
    /// Idle minutes before a session expires.
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,
    /// Bounded message history per session.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Reaper sweep interval.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Token budget for the transcript handed to the answer path.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: default_timeout_minutes(),
            max_history: default_max_history(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_context_tokens: default_max_context_tokens(),
        }
    }
}

fn default_timeout_minutes() -> u64 {
    30
}
fn default_max_history() -> usize {
    20
}
fn default_sweep_interval_secs() -> u64 {
    300
}
fn default_max_context_tokens() -> usize {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `hash` (deterministic, offline) or `openai`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnswerConfig {
    /// `extractive` (compose retrieved context) or `openai` (LLM).
    #[serde(default = "default_answer_provider")]
    pub provider: String,
    #[serde(default = "default_answer_model")]
    pub model: String,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            provider: default_answer_provider(),
            model: default_answer_model(),
        }
    }
}

fn default_answer_provider() -> String {
    "extractive".to_string()
}
fn default_answer_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Document source API (the external page service the corpus is built from).
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_source_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    /// Default page to ingest when none is given on the command line.
    #[serde(default)]
    pub page_id: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_source_base_url(),
            token: None,
            page_id: None,
        }
    }
}

fn default_source_base_url() -> String {
    "https://api.notion.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Shared secret for webhook signature verification. Webhook delivery
    /// is rejected when unset.
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            webhook_secret: None,
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7431".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        anyhow::bail!("chunking.overlap_chars must be < chunking.max_chars");
    }

    let r = &config.retrieval;
    if r.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if r.max_results == 0 {
        anyhow::bail!("retrieval.max_results must be >= 1");
    }
    if !(0.0..=1.0).contains(&r.base_threshold) {
        anyhow::bail!("retrieval.base_threshold must be in [0.0, 1.0]");
    }
    if r.min_threshold > r.max_threshold {
        anyhow::bail!("retrieval.min_threshold must be <= retrieval.max_threshold");
    }
    let weight_sum = r.mean_weight + r.std_weight;
    if (weight_sum - 1.0).abs() > 1e-6 {
        anyhow::bail!(
            "retrieval.mean_weight + retrieval.std_weight must sum to 1.0 (got {})",
            weight_sum
        );
    }
    if r.min_length > r.max_length {
        anyhow::bail!("retrieval.min_length must be <= retrieval.max_length");
    }

    if config.conversation.max_history == 0 {
        anyhow::bail!("conversation.max_history must be >= 1");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    match config.embedding.provider.as_str() {
        "hash" => {}
        "openai" => {
            if config.embedding.model.is_none() {
                anyhow::bail!("embedding.model must be specified when provider is 'openai'");
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be hash or openai.",
            other
        ),
    }

    match config.answer.provider.as_str() {
        "extractive" | "openai" => {}
        other => anyhow::bail!(
            "Unknown answer provider: '{}'. Must be extractive or openai.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> String {
        r#"
[storage]
metadata_path = "/tmp/docqa/meta.sqlite"
vector_path = "/tmp/docqa/vectors.idx"
"#
        .to_string()
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config: Config = toml::from_str(&minimal_toml()).unwrap();
        validate(&config).unwrap();

        assert_eq!(config.retrieval.top_k, 5);
        assert!((config.retrieval.base_threshold - 0.3).abs() < 1e-6);
        assert!(config.retrieval.dynamic_threshold);
        assert_eq!(config.retrieval.max_results, 8);
        assert_eq!(config.conversation.timeout_minutes, 30);
        assert_eq!(config.conversation.max_history, 20);
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.embedding.dims, 384);
        assert_eq!(config.answer.provider, "extractive");
    }

    #[test]
    fn test_openai_embedding_requires_model() {
        let toml_str = format!("{}\n[embedding]\nprovider = \"openai\"\n", minimal_toml());
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_threshold_weight_sum_validated() {
        let toml_str = format!(
            "{}\n[retrieval]\nmean_weight = 0.6\nstd_weight = 0.6\n",
            minimal_toml()
        );
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_unknown_answer_provider_rejected() {
        let toml_str = format!("{}\n[answer]\nprovider = \"oracle\"\n", minimal_toml());
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let toml_str = format!(
            "{}\n[chunking]\nmax_chars = 100\noverlap_chars = 100\n",
            minimal_toml()
        );
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert!(validate(&config).is_err());
    }
}
