//! HTTP API server.
//!
//! Serves retrieval, model listing, live lookup, chat history, and a
//! streaming chat endpoint for browser clients.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/api/models` | Configured models, id → label |
//! | `POST` | `/api/retrieve` | Scored context for a query |
//! | `POST` | `/rag` | One-line live lookup answer |
//! | `POST` | `/api/chat` | Run one chat turn, streamed as SSE |
//! | `GET`  | `/api/history/{username}` | A user's most recent conversations |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//! `POST /rag` keeps its own `{ "result": ... }` shape on failure.
//!
//! # Chat stream
//!
//! `POST /api/chat` answers with `text/event-stream`. Each event carries a
//! JSON body tagged with `type`:
//!
//! | Event | Body |
//! |-------|------|
//! | `thinking` | `{"type":"thinking","thinking":true}` |
//! | `delta` | `{"type":"delta","text":"Hal"}` |
//! | `replace` | `{"type":"replace","text":"Error: ..."}` |
//! | `done` | `{"type":"done","conversationId":"...","text":"...","mode":"stream"}` |

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use olive_core::models::{Conversation, Message, Role, ScoredResult};

use crate::chat::{AppContext, ChatSession};
use crate::config::Config;
use crate::live::NOT_FOUND_TEXT;
use crate::store::StoredChat;
use crate::view::{ChannelView, ViewEvent};

/// Body of the 500 reply from `POST /rag`.
pub const RAG_ERROR_TEXT: &str = "Terjadi kesalahan saat mencari informasi.";

/// Starts the HTTP server on `[server].bind` and runs until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let ctx = AppContext::from_config(config.clone()).await?;
    serve(ctx, &config.server.bind).await
}

/// Serve an already-built context on `bind`.
pub async fn serve(ctx: AppContext, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "olive server listening");
    axum::serve(listener, router(ctx)).await?;
    Ok(())
}

/// All routes, with CORS and request tracing applied.
pub fn router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/models", get(handle_models))
        .route("/api/retrieve", post(handle_retrieve))
        .route("/rag", post(handle_rag))
        .route("/api/chat", post(handle_chat))
        .route("/api/history/{username}", get(handle_history))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(ctx))
}

type AppState = Arc<AppContext>;

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

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %err, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: err.to_string(),
    }
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

// ============ GET /api/models ============

#[derive(Serialize)]
struct ModelsResponse {
    models: BTreeMap<String, String>,
}

async fn handle_models(State(ctx): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: ctx.config.models.clone(),
    })
}

// ============ POST /api/retrieve ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveRequest {
    #[serde(default)]
    q: String,
    #[serde(default)]
    top_k: Option<usize>,
}

#[derive(Serialize)]
struct RetrieveResponse {
    results: Vec<ScoredResult>,
}

/// A missing or empty `q` yields no results rather than an error. A
/// missing or zero `topK` uses `[retrieval].top_k`.
async fn handle_retrieve(
    State(ctx): State<AppState>,
    Json(req): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, AppError> {
    let results = ctx
        .retriever
        .retrieve(&req.q, req.top_k.filter(|k| *k > 0))
        .await
        .map_err(internal)?;
    Ok(Json(RetrieveResponse { results }))
}

// ============ POST /rag ============

#[derive(Deserialize)]
struct RagRequest {
    #[serde(default)]
    query: String,
}

#[derive(Serialize)]
struct RagResponse {
    result: String,
}

async fn handle_rag(
    State(ctx): State<AppState>,
    Json(req): Json<RagRequest>,
) -> (StatusCode, Json<RagResponse>) {
    let Some(live) = ctx.live.as_ref() else {
        return (
            StatusCode::OK,
            Json(RagResponse {
                result: NOT_FOUND_TEXT.to_string(),
            }),
        );
    };

    match live.summarize(&req.query).await {
        Ok(result) => (StatusCode::OK, Json(RagResponse { result })),
        Err(e) => {
            tracing::warn!(error = %e, "live lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RagResponse {
                    result: RAG_ERROR_TEXT.to_string(),
                }),
            )
        }
    }
}

// ============ GET /api/history/{username} ============

#[derive(Serialize)]
struct HistoryResponse {
    chats: Vec<StoredChat>,
}

async fn handle_history(
    State(ctx): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    let chats = ctx
        .store
        .history(&username, ctx.config.chat.history_limit)
        .await
        .map_err(internal)?;
    Ok(Json(HistoryResponse { chats }))
}

// ============ POST /api/chat ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatBody {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    mood: Option<String>,
    message: String,
    /// Prior messages for a conversation the server has not stored.
    #[serde(default)]
    history: Option<Vec<Message>>,
}

async fn handle_chat(
    State(ctx): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, AppError> {
    let message = body.message.trim().to_string();
    if message.is_empty() {
        return Err(bad_request("message must not be empty"));
    }

    let username = body.username.unwrap_or_default();
    let model = body
        .model
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| ctx.config.chat.default_model.clone());
    let mood = body
        .mood
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| ctx.config.chat.default_mood.clone());
    let history = body.history.unwrap_or_default();

    let mut session = ChatSession::new(username.clone(), model.clone(), mood.clone());

    match body.conversation_id.filter(|id| !id.is_empty()) {
        Some(id) => {
            let stored = if username.is_empty() {
                None
            } else {
                ctx.store.get_chat(&username, &id).await.map_err(internal)?
            };
            let conversation = match stored {
                Some(conversation) => conversation,
                None if history.is_empty() && !username.is_empty() => {
                    return Err(not_found(format!("conversation not found: {}", id)));
                }
                None => seeded_conversation(id, &history, &message, &model, &mood),
            };
            session.resume(conversation);
        }
        None if !history.is_empty() => {
            let id = uuid::Uuid::new_v4().to_string();
            session.resume(seeded_conversation(id, &history, &message, &model, &mood));
        }
        None => {}
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let view = Arc::new(ChannelView::new(tx.clone()));
    let turn_ctx = Arc::clone(&ctx);

    tokio::spawn(async move {
        match session.send(&turn_ctx, &message, view).await {
            Ok(outcome) => {
                session.flush().await;
                let conversation_id = session
                    .conversation()
                    .map(|c| c.id.clone())
                    .unwrap_or_default();
                let _ = tx.send(ViewEvent::Done {
                    conversation_id,
                    text: outcome.text,
                    mode: outcome.mode.to_string(),
                });
            }
            Err(e) => {
                let _ = tx.send(ViewEvent::Replace {
                    text: format!("Error: {}", e),
                });
            }
        }
    });

    let events = UnboundedReceiverStream::new(rx).map(|event| {
        let sse = Event::default().event(event.name());
        Ok::<Event, Infallible>(sse.json_data(&event).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to serialize chat event");
            Event::default().event("error").data(e.to_string())
        }))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// A conversation the client carried over, titled after its first user
/// message.
fn seeded_conversation(
    id: String,
    history: &[Message],
    message: &str,
    model: &str,
    mood: &str,
) -> Conversation {
    let first_prompt = history
        .iter()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or(message);
    let mut conversation = Conversation::new(id, first_prompt, model, mood);
    conversation.messages = history
        .iter()
        .filter(|m| m.role != Role::System)
        .cloned()
        .collect();
    conversation
}
