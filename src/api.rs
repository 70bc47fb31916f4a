//! REST API Server for the scan advisor
//!
//! Exposes the advisory pipeline as a synchronous JSON endpoint and an
//! NDJSON streaming endpoint

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::AdvisorConfig;
use crate::error::AdvisorError;
use crate::pipeline::AdvisorPipeline;
use crate::request::ChatRequest;
use crate::stream::{EventSink, StreamEvent};

const STREAM_BUFFER: usize = 64;

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<AdvisorPipeline>,
    pub config: Arc<AdvisorConfig>,
}

/// =============================
/// Error Mapping
/// =============================

fn status_for(error: &AdvisorError) -> StatusCode {
    match error {
        AdvisorError::Validation(_) => StatusCode::BAD_REQUEST,
        AdvisorError::Cancelled => StatusCode::REQUEST_TIMEOUT,
        AdvisorError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

/// Malformed or wrongly typed bodies are validation errors like any other
fn parse_body(
    body: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> crate::Result<ChatRequest> {
    body.map(|Json(req)| req)
        .map_err(|rejection| AdvisorError::Validation(rejection.body_text()))
}

fn error_response(error: &AdvisorError) -> Response {
    let body = Json(serde_json::json!({ "error": error.to_string() }));
    (status_for(error), body).into_response()
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Synchronous Chat Endpoint
/// =============================

async fn chat_handler(
    State(state): State<ApiState>,
    body: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let turn = match parse_body(body).and_then(|req| req.validate(&state.config)) {
        Ok(turn) => turn,
        Err(e) => {
            info!("Rejected chat request: {}", e);
            return error_response(&e);
        }
    };
    let request_id = turn.request_id.clone();

    match state.pipeline.run(turn).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => {
            warn!(request_id = %request_id, "Chat turn failed: {}", e);
            error_response(&e)
        }
    }
}

/// =============================
/// Streaming Chat Endpoint
/// =============================

async fn chat_stream_handler(
    State(state): State<ApiState>,
    body: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let turn = match parse_body(body).and_then(|req| req.validate(&state.config)) {
        Ok(turn) => turn,
        Err(e) => {
            info!("Rejected stream request: {}", e);
            return error_response(&e);
        }
    };
    let request_id = turn.request_id.clone();

    let (tx, rx) = mpsc::channel::<StreamEvent>(STREAM_BUFFER);
    let pipeline = state.pipeline.clone();

    tokio::spawn(async move {
        let sink = EventSink::new(tx.clone());
        tokio::select! {
            result = pipeline.run_stream(turn, sink) => {
                if let Err(e) = result {
                    info!(request_id = %request_id, "Chat stream ended early: {}", e);
                }
            }
            _ = tx.closed() => {
                info!(request_id = %request_id, "Client disconnected, cancelling chat stream");
            }
        }
    });

    let body = ReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(event.to_line()));

    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(body),
    )
        .into_response()
}

/// =============================
/// Router
/// =============================

pub fn create_router(pipeline: Arc<AdvisorPipeline>, config: Arc<AdvisorConfig>) -> Router {
    let state = ApiState { pipeline, config };

    Router::new()
        .route("/health", get(health))
        .route("/station/ai/chat", post(chat_handler))
        .route("/station/ai/chat/stream", post(chat_stream_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    pipeline: Arc<AdvisorPipeline>,
    config: Arc<AdvisorConfig>,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let port = config.port;
    let router = create_router(pipeline, config);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
