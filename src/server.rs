//! HTTP chat server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | One chat turn, JSON response |
//! | `POST` | `/chat/stream` | Same turn as Server-Sent Events |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Request body:
//!
//! ```json
//! { "message": "Is PS11752778 compatible with WDT780SAEM1?",
//!   "history": [{ "role": "user", "content": "..." }],
//!   "session_id": "optional" }
//! ```
//!
//! # Streaming
//!
//! `/chat/stream` emits `scope`, `message`, `sources` (JSON citations),
//! `product_cards` (JSON) and a terminal `done`. Redirected messages emit
//! only `scope`, `message` and `done`. The pipeline runs inside the event
//! stream, so a client disconnect drops it along with any outstanding
//! external calls for that request.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message must not be empty" } }
//! ```
//!
//! Only malformed requests are errors. Everything the engine hits at run
//! time degrades into a normal `200` answer.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted for the browser chat
//! widget.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use partselect_core::models::ChatMessage;

use crate::config::Config;
use crate::db;
use crate::pipeline::{ChatResponse, Engine};

/// Starts the chat server on `[server].bind`. Runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let engine = Engine::from_config(config, pool).await?;
    let app = router(engine);

    let bind_addr = &config.server.bind;
    println!("Chat server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// The application routes over a shared engine.
pub fn router(engine: Engine) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(handle_chat))
        .route("/chat/stream", post(handle_chat_stream))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(engine)
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

// ============ Request ============

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    message: String,
    #[serde(default)]
    history: Vec<ChatMessage>,
    #[serde(default)]
    session_id: Option<String>,
}

fn validate(payload: Result<Json<ChatRequest>, JsonRejection>) -> Result<ChatRequest, AppError> {
    let Json(req) = payload.map_err(|e| bad_request(e.body_text()))?;
    if req.message.trim().is_empty() {
        return Err(bad_request("message must not be empty"));
    }
    Ok(req)
}

// ============ POST /chat ============

async fn handle_chat(
    State(engine): State<Engine>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let req = validate(payload)?;
    info!(session = req.session_id.as_deref().unwrap_or("-"), "chat request");
    Ok(Json(engine.respond(&req.message, req.history).await))
}

// ============ POST /chat/stream ============

async fn handle_chat_stream(
    State(engine): State<Engine>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let req = validate(payload)?;
    info!(session = req.session_id.as_deref().unwrap_or("-"), "chat stream request");

    let events = stream::once(async move { engine.respond(&req.message, req.history).await })
        .flat_map(|response| stream::iter(response_events(&response)))
        .map(Ok::<_, Infallible>);
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// The event sequence for one response.
fn response_events(response: &ChatResponse) -> Vec<Event> {
    let mut events = vec![
        Event::default()
            .event("scope")
            .data(response.scope_label.as_str()),
        Event::default().event("message").data(&response.content),
    ];
    if response.scope_label.is_in_scope() {
        let sources = serde_json::to_string(&response.citations).unwrap_or_else(|_| "[]".into());
        let cards = serde_json::to_string(&response.product_cards).unwrap_or_else(|_| "[]".into());
        events.push(Event::default().event("sources").data(sources));
        events.push(Event::default().event("product_cards").data(cards));
    }
    events.push(Event::default().event("done").data("[DONE]"));
    events
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
