//! JSON HTTP server.
//!
//! Exposes the question-answering pipeline over a small JSON API, with
//! per-user conversation memory wired around every answered question.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ask` | Answer a question for a conversation user |
//! | `POST` | `/webhook` | Signed messaging-platform webhook |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/stats` | Index and conversation statistics |
//!
//! # Webhook signing
//!
//! `POST /webhook` requires an `X-Signature` header carrying the
//! hex-encoded HMAC-SHA256 of the raw request body, keyed with
//! `[server].webhook_secret`. Requests with a missing or wrong signature
//! are rejected with 401; if no secret is configured the endpoint
//! rejects everything rather than accepting unsigned traffic.
//!
//! # Error Contract
//!
//! Error responses use one schema:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `internal` (500).

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::memory::ConversationStore;
use crate::models::{IndexStats, MemoryStats, Role};
use crate::pipeline::RagEngine;

type HmacSha256 = Hmac<Sha256>;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    engine: Arc<RagEngine>,
    memory: Arc<ConversationStore>,
    webhook_secret: Option<String>,
}

/// Starts the HTTP server.
///
/// Binds to `[server].bind`, opens the pipeline, and serves until the
/// process is terminated. The conversation reaper runs for the lifetime
/// of the server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let webhook_secret = config.server.webhook_secret.clone();

    let memory = Arc::new(ConversationStore::new(config.conversation.clone()));
    let engine = Arc::new(RagEngine::open(config).await?);

    let state = AppState {
        engine,
        memory,
        webhook_secret,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ask", post(handle_ask))
        .route("/webhook", post(handle_webhook))
        .route("/health", get(handle_health))
        .route("/stats", get(handle_stats))
        .layer(cors)
        .with_state(state);

    println!("Server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    user_id: String,
    message: String,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
}

/// Handler for `POST /ask`.
///
/// Records the user turn, answers with the conversation context attached,
/// then records the assistant turn so follow-up questions can refer back.
async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    let answer = answer_for_user(&state, &req.user_id, &req.message).await?;
    Ok(Json(AskResponse { answer }))
}

async fn answer_for_user(state: &AppState, user_id: &str, message: &str) -> Result<String, AppError> {
    if user_id.trim().is_empty() {
        return Err(bad_request("user_id must not be empty"));
    }
    if message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    state.memory.add_message(user_id, Role::User, message);
    let context = state.memory.get_default_context(user_id);

    let answer = state
        .engine
        .answer(message, &context)
        .await
        .map_err(|e| internal(e.to_string()))?;

    state.memory.add_message(user_id, Role::Assistant, &answer);
    Ok(answer)
}

// ============ POST /webhook ============

/// Reply sent for an event whose answer could not be produced.
const FALLBACK_REPLY: &str =
    "Sorry, something went wrong while answering this message. Please try again.";

/// Incoming webhook payload: a batch of messaging events. Non-text
/// events are acknowledged and skipped.
#[derive(Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    events: Vec<WebhookEvent>,
}

#[derive(Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    event_type: String,
    user_id: String,
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
struct WebhookResponse {
    replies: Vec<WebhookReply>,
}

#[derive(Serialize)]
struct WebhookReply {
    user_id: String,
    answer: String,
}

/// Handler for `POST /webhook`.
///
/// Verifies the body signature before parsing anything, then answers
/// each text event through the same path as `/ask`. An event that fails
/// gets a fallback reply instead of failing the whole batch.
async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, AppError> {
    let Some(ref secret) = state.webhook_secret else {
        warn!("webhook called but no webhook_secret is configured");
        return Err(unauthorized("webhook signing is not configured"));
    };

    let signature = headers
        .get("X-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| unauthorized("missing X-Signature header"))?;

    if !verify_signature(secret, &body, signature) {
        return Err(unauthorized("signature mismatch"));
    }

    let payload: WebhookPayload =
        serde_json::from_slice(&body).map_err(|e| bad_request(format!("invalid payload: {}", e)))?;

    let mut replies = Vec::new();
    for event in payload.events {
        if event.event_type != "message" || event.text.trim().is_empty() {
            continue;
        }
        info!(user_id = %event.user_id, "webhook message event");
        // One bad event must not sink the rest of the batch; answer what
        // we can and send a fallback reply for the event that failed.
        let answer = match answer_for_user(&state, &event.user_id, &event.text).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(user_id = %event.user_id, code = %e.code, error = %e.message, "webhook event failed");
                FALLBACK_REPLY.to_string()
            }
        };
        replies.push(WebhookReply {
            user_id: event.user_id,
            answer,
        });
    }

    Ok(Json(WebhookResponse { replies }))
}

/// Constant-shape HMAC check: recompute the body MAC and compare against
/// the hex signature via the `Mac` verifier rather than string equality.
fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /stats ============

#[derive(Serialize)]
struct StatsResponse {
    index: IndexStats,
    conversations: MemoryStats,
}

async fn handle_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, AppError> {
    let index = state
        .engine
        .store()
        .stats()
        .await
        .map_err(|e| internal(e.to_string()))?;

    Ok(Json(StatsResponse {
        index,
        conversations: state.memory.stats(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_verify_accepts_valid_signature() {
        let body = br#"{"events":[]}"#;
        let sig = sign("topsecret", body);
        assert!(verify_signature("topsecret", body, &sig));
    }

    #[test]
    fn test_verify_rejects_wrong_key_and_tampered_body() {
        let body = br#"{"events":[]}"#;
        let sig = sign("topsecret", body);
        assert!(!verify_signature("otherkey", body, &sig));
        assert!(!verify_signature("topsecret", b"tampered", &sig));
    }

    #[test]
    fn test_verify_rejects_non_hex_signature() {
        assert!(!verify_signature("topsecret", b"body", "not-hex!!"));
    }

    #[tokio::test]
    async fn test_webhook_answers_remaining_events_when_one_fails() {
        use crate::config::{Config, StorageConfig};

        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config {
            storage: StorageConfig {
                metadata_path: tmp.path().join("docqa.db"),
                vector_path: tmp.path().join("vectors.bin"),
            },
            chunking: Default::default(),
            retrieval: Default::default(),
            conversation: Default::default(),
            embedding: Default::default(),
            answer: Default::default(),
            source: Default::default(),
            server: Default::default(),
        };
        let memory = Arc::new(ConversationStore::new(Default::default()));
        let state = AppState {
            engine: Arc::new(RagEngine::open(config).await.unwrap()),
            memory: memory.clone(),
            webhook_secret: Some("topsecret".to_string()),
        };

        // First event has an empty user_id and cannot be answered; the
        // second must still get a real reply.
        let body = serde_json::json!({
            "events": [
                { "type": "message", "user_id": "", "text": "what is the plan" },
                { "type": "message", "user_id": "u1", "text": "what is the plan" }
            ]
        })
        .to_string();
        let sig = sign("topsecret", body.as_bytes());
        let mut headers = HeaderMap::new();
        headers.insert("X-Signature", sig.parse().unwrap());

        let Json(resp) = handle_webhook(State(state), headers, Bytes::from(body))
            .await
            .unwrap();

        assert_eq!(resp.replies.len(), 2);
        assert_eq!(resp.replies[0].answer, FALLBACK_REPLY);
        assert_eq!(resp.replies[1].user_id, "u1");
        assert_ne!(resp.replies[1].answer, FALLBACK_REPLY);
        assert!(!resp.replies[1].answer.is_empty());
        memory.shutdown().await;
    }

    #[test]
    fn test_webhook_payload_tolerates_missing_fields() {
        let payload: WebhookPayload = serde_json::from_str(r#"{}"#).unwrap();
        assert!(payload.events.is_empty());

        let payload: WebhookPayload = serde_json::from_str(
            r#"{"events":[{"type":"follow","user_id":"u1"}]}"#,
        )
        .unwrap();
        assert_eq!(payload.events.len(), 1);
        assert_eq!(payload.events[0].text, "");
    }
}
