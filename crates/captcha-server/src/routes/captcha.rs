//! Captcha issuing, media, and verification endpoints.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use captcha_common::{CaptchaError, CaptchaId, Language};

use super::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct NewCaptchaRequest {
    /// Digit count, defaults to the configured length
    #[serde(default)]
    length: Option<usize>,
    /// Embed the PNG as a data URI in the response
    #[serde(default)]
    inline: bool,
}

#[derive(Serialize)]
pub struct NewCaptchaResponse {
    id: CaptchaId,
    image_url: String,
    audio_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_data: Option<String>,
}

/// Register a new captcha
pub async fn new_captcha(
    State(state): State<AppState>,
    Json(payload): Json<NewCaptchaRequest>,
) -> Result<Json<NewCaptchaResponse>, ApiError> {
    let length = payload.length.unwrap_or(state.config.captcha.length);
    if length == 0 || length > state.config.captcha.max_length {
        return Err(CaptchaError::InvalidInput(format!(
            "length must be between 1 and {}",
            state.config.captcha.max_length
        ))
        .into());
    }

    let (width, height) = (state.config.image.width, state.config.image.height);
    let service = state.captcha.clone();
    let inline = payload.inline;

    let (id, png) = tokio::task::spawn_blocking(move || -> Result<_, CaptchaError> {
        let id = service.create(length)?;
        let png = if inline {
            Some(service.image(&id, width, height)?.encode_png()?)
        } else {
            None
        };
        Ok((id, png))
    })
    .await??;

    tracing::info!(id = %id, length, "Issued captcha");

    Ok(Json(NewCaptchaResponse {
        image_url: format!("/captcha/{}.png", id),
        audio_url: format!("/captcha/{}.wav", id),
        image_data: png.map(|bytes| format!("data:image/png;base64,{}", STANDARD.encode(bytes))),
        id,
    }))
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    id: String,
    /// Answer as typed by the user
    digits: String,
}

#[derive(Serialize)]
pub struct VerifyResponse {
    success: bool,
}

/// Check an answer. The id is consumed either way.
pub async fn verify_captcha(
    State(state): State<AppState>,
    Json(payload): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    // A malformed id can never match a stored captcha
    let Ok(id) = CaptchaId::parse(&payload.id) else {
        return Ok(Json(VerifyResponse { success: false }));
    };

    let service = state.captcha.clone();
    let success =
        tokio::task::spawn_blocking(move || service.verify_str(&id, &payload.digits)).await??;

    tracing::info!(success, "Verified captcha");
    Ok(Json(VerifyResponse { success }))
}

/// Trigger expiry collection in the background
pub async fn collect(State(state): State<AppState>) -> StatusCode {
    state.captcha.collect();
    StatusCode::ACCEPTED
}

#[derive(Deserialize)]
pub struct MediaQuery {
    /// Present (with any value) to regenerate the digits first
    reload: Option<String>,
    /// Audio language tag
    lang: Option<String>,
}

/// Serve `<id>.png` or `<id>.wav` inline
pub async fn serve_file(
    State(state): State<AppState>,
    Path(file): Path<String>,
    Query(query): Query<MediaQuery>,
) -> Result<Response, ApiError> {
    serve_media(state, &file, query, false).await
}

/// Serve `<id>.png` or `<id>.wav` as an attachment
pub async fn download_file(
    State(state): State<AppState>,
    Path(file): Path<String>,
    Query(query): Query<MediaQuery>,
) -> Result<Response, ApiError> {
    serve_media(state, &file, query, true).await
}

#[derive(Clone, Copy)]
enum MediaKind {
    Png,
    Wav,
}

fn parse_file_name(file: &str) -> Result<(CaptchaId, MediaKind), CaptchaError> {
    let (id, ext) = file.rsplit_once('.').ok_or(CaptchaError::NotFound)?;
    let kind = match ext {
        "png" => MediaKind::Png,
        "wav" => MediaKind::Wav,
        _ => return Err(CaptchaError::NotFound),
    };
    let id = CaptchaId::parse(id).map_err(|_| CaptchaError::NotFound)?;
    Ok((id, kind))
}

async fn serve_media(
    state: AppState,
    file: &str,
    query: MediaQuery,
    download: bool,
) -> Result<Response, ApiError> {
    let (id, kind) = parse_file_name(file)?;
    let lang = query
        .lang
        .as_deref()
        .map(Language::from_tag)
        .unwrap_or(state.default_lang);
    let reload = query.reload.is_some();
    let (width, height) = (state.config.image.width, state.config.image.height);
    let service = state.captcha.clone();

    let body = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, CaptchaError> {
        if reload && !service.reload(&id)? {
            return Err(CaptchaError::NotFound);
        }
        match kind {
            MediaKind::Png => service.image(&id, width, height)?.encode_png(),
            MediaKind::Wav => Ok(service.audio(&id, lang)?.encode_wav()),
        }
    })
    .await??;

    let len = body.len();
    let content_type = match (download, kind) {
        (true, _) => "application/octet-stream",
        (false, MediaKind::Png) => "image/png",
        (false, MediaKind::Wav) => "audio/x-wav",
    };

    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        body,
    )
        .into_response();

    // Audio players need the exact length up front
    if let MediaKind::Wav = kind {
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }

    Ok(response)
}
