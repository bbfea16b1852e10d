use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::HOST;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use memeforge_contracts::memes::GeneratedFile;
use memeforge_contracts::runs::summary::now_utc_iso;
use memeforge_engine::cancel::CancelToken;
use memeforge_engine::error::EngineError;
use memeforge_engine::MemeEngine;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::api::{
    ClearTokenResponse, ErrorEnvelope, GenerateMemeBody, GenerateMemeResponse, HealthResponse,
    ServiceInfo,
};

#[derive(Clone)]
pub struct AppState {
    engine: Arc<MemeEngine>,
    request_timeout: Duration,
    public_url: Option<String>,
}

impl AppState {
    pub fn new(engine: Arc<MemeEngine>, request_timeout: Duration, public_url: Option<String>) -> Self {
        Self {
            engine,
            request_timeout,
            public_url: public_url.map(|url| url.trim_end_matches('/').to_string()),
        }
    }

    fn output_root(&self) -> PathBuf {
        self.engine.output_root().to_path_buf()
    }

    /// Origin used in image URLs: the configured public URL, else the
    /// request's `Host`.
    fn base_url(&self, headers: &HeaderMap) -> String {
        if let Some(url) = &self.public_url {
            return url.clone();
        }
        let host = headers
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .filter(|host| !host.is_empty())
            .unwrap_or("localhost");
        format!("http://{host}")
    }
}

pub fn router(state: AppState) -> Router {
    let static_memes = ServeDir::new(state.output_root());
    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health))
        .route("/api/v1/generate-meme", post(generate_meme))
        .route("/api/v1/clear-token", post(clear_token))
        .nest_service("/static/memes", static_memes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(addr: &str, state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %listener.local_addr()?, "Meme API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated abnormally")?;
    info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Could not listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Error envelope with its status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", message)
    }

    fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        if err.is_unavailable() {
            warn!("Meme generation unavailable: {err}");
            return Self::unavailable(format!(
                "Failed to generate memes. The service may be temporarily unavailable. ({err})"
            ));
        }
        error!("Meme generation failed: {err}");
        Self::internal(format!("An unexpected error occurred: {err}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope = ErrorEnvelope {
            success: false,
            error: self.message,
            error_code: self.code,
            timestamp: now_utc_iso(),
        };
        (self.status, Json(envelope)).into_response()
    }
}

async fn service_info() -> Json<ServiceInfo> {
    Json(ServiceInfo::current())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

async fn generate_meme(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<GenerateMemeBody>, JsonRejection>,
) -> Result<Json<GenerateMemeResponse>, ApiError> {
    let Json(body) = payload?;
    let request = body.validate().map_err(ApiError::validation)?;
    info!("Received meme generation request: {:?}", request.text);

    let cancel = CancelToken::with_timeout(state.request_timeout);
    let job_cancel = cancel.clone();
    let engine = Arc::clone(&state.engine);
    let job = tokio::task::spawn_blocking(move || engine.generate(&request, &job_cancel));
    let outcome = match tokio::time::timeout(state.request_timeout, job).await {
        Ok(Ok(result)) => result?,
        Ok(Err(join_err)) => {
            return Err(ApiError::internal(format!(
                "generation task failed: {join_err}"
            )))
        }
        Err(_) => {
            cancel.cancel();
            return Err(ApiError::unavailable(format!(
                "Meme generation timed out after {}s",
                state.request_timeout.as_secs()
            )));
        }
    };

    if outcome.rendered.is_empty() {
        error!("No memes were rendered for run {}", outcome.run_id);
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "GENERATION_FAILED",
            "Failed to generate any meme images",
        ));
    }

    let base_url = state.base_url(&headers);
    let output_root = state.output_root();
    let generated_files: Vec<GeneratedFile> = outcome
        .rendered
        .iter()
        .map(|meme| GeneratedFile::new(&meme.descriptor.id, &meme.path, &output_root, &base_url))
        .collect();
    let count = generated_files.len();
    let generation_time = outcome.elapsed.as_secs_f64();
    info!("Meme generation completed in {generation_time:.2} seconds");

    Ok(Json(GenerateMemeResponse {
        success: true,
        message: format!("Successfully generated {count} memes"),
        count,
        meme_list: generated_files
            .iter()
            .map(|file| file.image_url.clone())
            .collect(),
        run_id: outcome.upstream_run_id,
        meme_count: count,
        memes: outcome
            .rendered
            .into_iter()
            .map(|meme| meme.descriptor)
            .collect(),
        generated_files,
        output_directory: outcome.run_dir.to_string_lossy().replace('\\', "/"),
        generation_time,
        timestamp: now_utc_iso(),
    }))
}

async fn clear_token(State(state): State<AppState>) -> Result<Json<ClearTokenResponse>, ApiError> {
    let engine = Arc::clone(&state.engine);
    let cleared = tokio::task::spawn_blocking(move || engine.clear_token())
        .await
        .map_err(|err| ApiError::internal(format!("Failed to clear token: {err}")))?;
    let message = if cleared {
        "Authentication token cleared successfully"
    } else {
        "Failed to clear authentication token"
    };
    Ok(Json(ClearTokenResponse {
        success: cleared,
        message,
    }))
}
