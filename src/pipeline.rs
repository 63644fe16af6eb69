//! End-to-end question answering pipeline.
//!
//! Owns the document store, embedder, query processor, fusion retriever,
//! and answer strategy, and exposes the two top-level operations:
//! ingesting a source page and answering a question. Conversation
//! context is folded into the retrieval query only when the question
//! actually refers back to it.

use tracing::{debug, info, warn};

use crate::answer::{self, AnswerStrategy, ExtractiveAnswerer};
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::error::Result;
use crate::fusion::QueryFusion;
use crate::query::QueryProcessor;
use crate::source::PageClient;
use crate::store::DocumentStore;
use crate::text;

/// Referring expressions that signal a question leans on the preceding
/// conversation and should be retrieved with that context attached.
const CONTEXT_INDICATORS: &[&str] = &[
    "this", "that", "it", "they", "them", "those", "these", "above", "earlier", "before",
    "previous", "mentioned", "also", "another", "again", "continue", "more about", "what about",
];

pub struct RagEngine {
    config: Config,
    store: DocumentStore,
    embedder: Box<dyn Embedder>,
    processor: QueryProcessor,
    fusion: QueryFusion,
    answerer: Box<dyn AnswerStrategy>,
}

impl RagEngine {
    /// Open the store and wire up every stage from the configuration.
    pub async fn open(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let store = DocumentStore::open(&config.storage, embedder.dims()).await?;
        let answerer = answer::create_answerer(&config.answer)?;
        let fusion = QueryFusion::new(config.retrieval.clone());

        Ok(Self {
            config,
            store,
            embedder,
            processor: QueryProcessor::new(),
            fusion,
            answerer,
        })
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fetch a page from the configured source and index it. A page that
    /// was ingested before is cleared and re-indexed from scratch so that
    /// chunks deleted upstream do not linger.
    pub async fn ingest_page(&self, page_id: &str) -> Result<usize> {
        let client = PageClient::new(&self.config.source)?;
        let raw = client.get_page_content(page_id).await?;
        self.ingest_text(&format!("notion_page_{}", page_id), &raw)
            .await
    }

    /// Clean, chunk, embed, and store one document under `source`.
    pub async fn ingest_text(&self, source: &str, raw: &str) -> Result<usize> {
        let cleaned = text::clean(raw);
        let chunks = text::split(
            &cleaned,
            self.config.chunking.max_chars,
            self.config.chunking.overlap_chars,
        );
        info!(source, chunks = chunks.len(), "ingesting document");

        if self.store.source_count(source).await? > 0 {
            info!(source, "source already indexed, clearing for re-sync");
            self.store.clear().await?;
        }

        let vectors = self.embedder.encode_many(&chunks).await?;
        let added = self.store.add(&chunks, &vectors, source).await?;
        info!(source, added, total = self.store.count().await, "ingest complete");
        Ok(added)
    }

    /// Fused retrieval for an already-analyzed query, without answer
    /// generation. Backs the `search` CLI command.
    pub async fn fused_search(
        &self,
        analysis: &crate::models::QueryAnalysis,
        top_k: usize,
    ) -> Result<Vec<crate::models::ScoredResult>> {
        self.fusion
            .retrieve(&self.store, self.embedder.as_ref(), analysis, top_k)
            .await
    }

    /// Answer a question, optionally grounded in a conversation
    /// transcript. Never errors out to the caller on answer-generation
    /// failure: the extractive strategy is the fallback.
    pub async fn answer(&self, question: &str, conversation_context: &str) -> Result<String> {
        let enhanced = enhance_question_with_context(question, conversation_context);
        let analysis = self.processor.process(&enhanced);
        debug!(
            intent = ?analysis.intent,
            keywords = ?analysis.keywords,
            confidence = analysis.confidence,
            "query analyzed"
        );

        let results = self
            .fusion
            .retrieve(
                &self.store,
                self.embedder.as_ref(),
                &analysis,
                self.config.retrieval.top_k,
            )
            .await?;

        if results.is_empty() || results[0].is_empty_corpus() {
            return Ok(answer::not_found_response(!conversation_context.is_empty()));
        }
        info!(matches = results.len(), top_score = results[0].final_score, "retrieval done");

        let document_context = answer::build_context(&results);
        let user_prompt = build_user_prompt(question, &document_context, conversation_context);

        let mut text = match self
            .answerer
            .generate(answer::SYSTEM_PROMPT, &user_prompt)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "answer generation failed, falling back to extractive");
                ExtractiveAnswerer
                    .generate(answer::SYSTEM_PROMPT, &document_context)
                    .await?
            }
        };

        if analysis.confidence < 0.5 {
            text.push_str(&answer::low_confidence_note(analysis.confidence));
        }
        Ok(text)
    }

    pub async fn close(&self) {
        self.store.close().await;
    }
}

/// Prefix the conversation transcript onto the question, but only when
/// the question contains a referring expression that needs it. The
/// enhanced form is used for retrieval only and never shown to the user.
fn enhance_question_with_context(question: &str, conversation_context: &str) -> String {
    if conversation_context.is_empty() {
        return question.to_string();
    }

    let lowered = question.to_lowercase();
    let needs_context = CONTEXT_INDICATORS.iter().any(|cue| {
        lowered
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word == *cue)
            || (cue.contains(' ') && lowered.contains(cue))
    });

    if needs_context {
        debug!("question refers back to the conversation, attaching transcript");
        format!("{}\nCurrent question: {}", conversation_context, question)
    } else {
        question.to_string()
    }
}

fn build_user_prompt(question: &str, document_context: &str, conversation_context: &str) -> String {
    let mut prompt = String::new();
    if !conversation_context.is_empty() {
        prompt.push_str("Conversation so far:\n");
        prompt.push_str(conversation_context);
        prompt.push_str("\n\n");
    }
    prompt.push_str("Reference passages:\n");
    prompt.push_str(document_context);
    prompt.push_str("\n\nQuestion: ");
    prompt.push_str(question);
    prompt
}
