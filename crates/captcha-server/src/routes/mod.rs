//! HTTP route handlers for captchad.

use std::time::Duration;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use captcha_common::CaptchaError;

use crate::state::AppState;

mod captcha;
mod health;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    Router::new()
        // Health & Status
        .route("/health", get(health::health_check))

        // JSON API
        .route("/api/captcha", post(captcha::new_captcha))
        .route("/api/verify", post(captcha::verify_captcha))
        .route("/api/collect", post(captcha::collect))

        // Media: /captcha/{id}.png, /captcha/{id}.wav
        .route("/captcha/{file}", get(captcha::serve_file))
        .route("/captcha/download/{file}", get(captcha::download_file))

        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))

        // Add shared state
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Handler error carrying the engine error's HTTP mapping
#[derive(Debug)]
pub struct ApiError(CaptchaError);

impl From<CaptchaError> for ApiError {
    fn from(e: CaptchaError) -> Self {
        Self(e)
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self(CaptchaError::Encoding(format!("render task failed: {}", e)))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, retryable = self.0.is_retryable(), "Request failed");
        }
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}
