//! Answer generation strategies.
//!
//! Two interchangeable strategies behind one trait, selected at
//! construction: [`OpenAiAnswerer`] calls a chat-completion API with the
//! retrieved context; [`ExtractiveAnswerer`] composes the retrieved
//! passages directly, needing no network at all. The pipeline falls back
//! from the LLM strategy to the extractive one when the API call fails.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::AnswerConfig;
use crate::error::{Error, Result};
use crate::models::ScoredResult;

pub const SYSTEM_PROMPT: &str = "You are an assistant that answers questions about a user's \
document collection. Answer primarily from the provided reference passages, keep the \
conversation coherent with the transcript when one is given, and say plainly when the \
passages do not contain the answer. Do not invent information.";

#[async_trait]
pub trait AnswerStrategy: Send + Sync {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

/// Instantiate the strategy named in the configuration.
pub fn create_answerer(config: &AnswerConfig) -> Result<Box<dyn AnswerStrategy>> {
    match config.provider.as_str() {
        "extractive" => Ok(Box::new(ExtractiveAnswerer)),
        "openai" => Ok(Box::new(OpenAiAnswerer::new(config)?)),
        other => Err(Error::Config(format!("unknown answer provider: {}", other))),
    }
}

/// Number the retrieved passages into a reference block for the prompt.
pub fn build_context(results: &[ScoredResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            format!(
                "Reference {} (score {:.3}):\n{}",
                i + 1,
                r.final_score,
                r.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// What the caller returns when retrieval produced nothing usable: an
/// explicit "not found", never a fabricated answer.
pub fn not_found_response(had_conversation: bool) -> String {
    let mut response = String::from(
        "I could not find anything directly relevant in the indexed documents.",
    );
    if had_conversation {
        response.push_str(
            " We have discussed related things, but the documents do not cover this specific question.",
        );
    }
    response.push_str(
        "\n\nYou could try rephrasing with different keywords, asking something more specific, \
or checking that the relevant pages have been ingested.",
    );
    response
}

pub fn low_confidence_note(confidence: f32) -> String {
    format!(
        "\n\nNote: my reading of this question is uncertain (confidence {:.0}%); \
if the answer misses the point, try rephrasing.",
        confidence * 100.0
    )
}

// ============ Extractive strategy ============

/// Composes the reference passages into a direct answer without an LLM.
pub struct ExtractiveAnswerer;

#[async_trait]
impl AnswerStrategy for ExtractiveAnswerer {
    async fn generate(&self, _system_prompt: &str, user_prompt: &str) -> Result<String> {
        Ok(format!(
            "Here is what the indexed documents say:\n\n{}\n\nThe passages above are the closest \
matches found for your question.",
            user_prompt
        ))
    }
}

// ============ OpenAI strategy ============

pub struct OpenAiAnswerer {
    model: String,
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiAnswerer {
    pub fn new(config: &AnswerConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Config("OPENAI_API_KEY environment variable not set".into()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Answer(e.to_string()))?;

        Ok(Self {
            model: config.model.clone(),
            client,
            api_key,
        })
    }
}

#[async_trait]
impl AnswerStrategy for OpenAiAnswerer {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt }
            ],
            "temperature": 0.7,
            "max_tokens": 1000
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Answer(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::Answer(format!(
                "chat API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Answer(e.to_string()))?;

        json.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.trim().to_string())
            .ok_or_else(|| Error::Answer("invalid chat response: missing content".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(content: &str, score: f32) -> ScoredResult {
        ScoredResult {
            content: content.to_string(),
            source: "test".to_string(),
            slot_index: 0,
            raw_score: score,
            recency_score: 1.0,
            length_score: 1.0,
            final_score: score,
        }
    }

    #[test]
    fn test_build_context_numbers_passages() {
        let ctx = build_context(&[result("first passage", 0.9), result("second passage", 0.4)]);
        assert!(ctx.contains("Reference 1 (score 0.900):\nfirst passage"));
        assert!(ctx.contains("Reference 2 (score 0.400):\nsecond passage"));
    }

    #[test]
    fn test_not_found_mentions_conversation_only_when_present() {
        assert!(!not_found_response(false).contains("discussed"));
        assert!(not_found_response(true).contains("discussed"));
    }

    #[tokio::test]
    async fn test_extractive_includes_prompt_material() {
        let answer = ExtractiveAnswerer
            .generate(SYSTEM_PROMPT, "Reference 1: the offsite is in March")
            .await
            .unwrap();
        assert!(answer.contains("the offsite is in March"));
    }

    #[test]
    fn test_create_answerer_rejects_unknown() {
        let cfg = AnswerConfig {
            provider: "psychic".into(),
            model: "m".into(),
        };
        assert!(create_answerer(&cfg).is_err());
    }
}
