//! HTTP server for the question-answering pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/llm_call` | Classify and answer a question |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! `POST /llm_call` accepts
//! `{input, db_path, table_descriptions_path, knowledge_pool_path}` (every
//! field optional; empty paths use the `[paths]` config) and returns
//! `{response, json_values}`.
//!
//! # Error Contract
//!
//! Failures keep the `{response, json_values}` shape so existing clients can
//! show `response` directly, and add an `error` object:
//!
//! ```json
//! { "response": "Something went wrong ...", "json_values": [],
//!   "error": { "code": "provider_timeout", "message": "provider call timed out after 60s" } }
//! ```
//!
//! Status codes: `bad_request` (400), `provider_timeout` (504),
//! `provider_error` (502), everything else 500.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::error::{ProviderError, QaError};
use crate::pipeline::{LlmRequest, LlmResponse, Pipeline, FAILURE_MESSAGE};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<Pipeline>,
    request_timeout: Duration,
}

/// Build the router with all routes and the CORS layer.
pub fn build_router(pipeline: Arc<Pipeline>, request_timeout: Duration) -> Router {
    let state = AppState {
        pipeline,
        request_timeout,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/llm_call", post(handle_llm_call))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Start the server on `[server].bind` and run until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = Arc::new(Pipeline::from_config(config)?);
    let app = build_router(
        pipeline,
        Duration::from_secs(config.server.request_timeout_secs),
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "server listening");
    println!("Listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    response: String,
    json_values: Vec<serde_json::Value>,
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
    /// Text shown to the user in `response`.
    response: String,
    /// Diagnostic detail.
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            response: self.response,
            json_values: Vec::new(),
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<QaError> for AppError {
    fn from(err: QaError) -> Self {
        let status = match &err {
            QaError::Provider(ProviderError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            QaError::Provider(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            code: err.code().to_string(),
            response: FAILURE_MESSAGE.to_string(),
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    let message = message.into();
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        response: message.clone(),
        message,
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

// ============ POST /llm_call ============

async fn handle_llm_call(
    State(state): State<AppState>,
    Json(request): Json<LlmRequest>,
) -> Result<Json<LlmResponse>, AppError> {
    if request.input.trim().is_empty() {
        return Err(bad_request("input must not be empty"));
    }

    let secs = state.request_timeout.as_secs();
    let result = tokio::time::timeout(state.request_timeout, state.pipeline.handle(&request))
        .await
        .unwrap_or(Err(QaError::Provider(ProviderError::Timeout { secs })));

    match result {
        Ok(response) => Ok(Json(response)),
        Err(err) => {
            error!(code = err.code(), error = %err, "request failed");
            Err(err.into())
        }
    }
}
