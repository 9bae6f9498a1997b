//! HTTP front end: `POST /messages` answers a question within a session.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Serialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::answerer::{AnswerPipeline, INVOCATION_FAILED, MESSAGE_REQUIRED};
use crate::session::{SessionId, SessionStore};

/// Shared handles for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<AnswerPipeline>,
    pub sessions: Arc<SessionStore>,
}

impl AppState {
    pub fn new(pipeline: Arc<AnswerPipeline>) -> Self {
        Self {
            pipeline,
            sessions: Arc::new(SessionStore::new()),
        }
    }
}

/// Fields of a `POST /messages` body, read one at a time so a malformed
/// `session_id` cannot discard a valid question.
#[derive(Debug, Default)]
struct MessageRequest {
    question: Option<String>,
    session_id: Option<String>,
}

impl MessageRequest {
    fn from_body(body: &[u8]) -> Self {
        let Ok(value) = serde_json::from_slice::<Value>(body) else {
            return Self::default();
        };
        let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_string);

        Self {
            question: field("question"),
            session_id: field("session_id"),
        }
    }
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    answer: String,
    #[serde(rename = "relevantLinksHtml")]
    relevant_links_html: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/messages", post(post_message))
        .route("/healthz", get(healthz))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves until Ctrl-C (or SIGTERM on Unix).
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(bind_addr = %listener.local_addr().unwrap_or(addr), "ragchat listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}

async fn post_message(State(state): State<AppState>, body: Bytes) -> Response {
    // Unparseable bodies are treated like a missing question.
    let request = MessageRequest::from_body(&body);

    let Some(question) = request.question.filter(|q| !q.trim().is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, MESSAGE_REQUIRED);
    };
    let session = request.session_id.map(SessionId::new).unwrap_or_default();

    let pipeline = Arc::clone(&state.pipeline);
    let sessions = Arc::clone(&state.sessions);
    let outcome = tokio::task::spawn_blocking(move || {
        pipeline.answer_in_session(&sessions, &session, &question)
    })
    .await;

    match outcome {
        Ok(Ok(result)) => Json(MessageResponse {
            answer: result.answer_text().to_string(),
            relevant_links_html: result.citation_html().to_string(),
        })
        .into_response(),
        Ok(Err(err)) if err.is_client_error() => {
            warn!(error = %err, "rejected message");
            error_response(StatusCode::BAD_REQUEST, err.user_message())
        }
        Ok(Err(err)) => {
            error!(error = %err, stage = %err.stage(), "failed to answer message");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.user_message())
        }
        Err(err) => {
            error!(error = %err, "answer task did not complete");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, INVOCATION_FAILED)
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutting down");
}
