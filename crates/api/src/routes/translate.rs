//! `GET /translate/subtitle/{subtitle_id}/{target_lang}?wait=bool` —
//! the reader half of C4 (spec §4.4, §6). A cache miss with no
//! in-flight computation means this request becomes the single-flight
//! owner and triggers the translation itself.
//!
//! Also `POST /translate` — a plain text-translation proxy (SPEC_FULL
//! supplement, grounded on `app/translate/routes.py::translate_text`)
//! for clients that already have text and just need a translation
//! without going through the subtitle cache.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PullQuery {
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PullStatus {
    Ready,
    Pending,
    NotFound,
}

#[derive(Debug, Serialize)]
pub struct PullResponse {
    pub status: PullStatus,
    pub translated_text: Option<String>,
}

pub async fn pull_subtitle_translation(
    State(state): State<AppState>,
    Path((subtitle_id, target_lang)): Path<(String, String)>,
    Query(query): Query<PullQuery>,
) -> Result<Json<PullResponse>, ApiError> {
    if let Some(text) = state
        .cache
        .get_translation(&subtitle_id, &target_lang, false)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
    {
        return Ok(Json(PullResponse {
            status: PullStatus::Ready,
            translated_text: Some(text),
        }));
    }

    let already_pending = state
        .cache
        .is_pending(&subtitle_id, &target_lang)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    if !already_pending {
        // No one is computing this yet — claim it and either do the
        // work inline (if the caller is waiting) or kick it off in
        // the background and answer `pending` immediately.
        let claimed = state
            .cache
            .mark_pending(&subtitle_id, &target_lang)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        if claimed {
            if let Some((original_text, source_lang)) = resolve_original(&state, &subtitle_id).await? {
                if query.wait {
                    let text = translate_and_store(&state, &subtitle_id, &source_lang, &target_lang, &original_text).await;
                    return Ok(Json(PullResponse {
                        status: PullStatus::Ready,
                        translated_text: Some(text),
                    }));
                }
                let state = state.clone();
                let subtitle_id_bg = subtitle_id.clone();
                let target_lang_bg = target_lang.clone();
                tokio::spawn(async move {
                    translate_and_store(&state, &subtitle_id_bg, &source_lang, &target_lang_bg, &original_text).await;
                });
                return Ok(Json(PullResponse {
                    status: PullStatus::Pending,
                    translated_text: None,
                }));
            }
            return Ok(Json(PullResponse {
                status: PullStatus::NotFound,
                translated_text: None,
            }));
        }
    }

    if !query.wait {
        return Ok(Json(PullResponse {
            status: PullStatus::Pending,
            translated_text: None,
        }));
    }

    let text = state
        .cache
        .get_translation(&subtitle_id, &target_lang, true)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(match text {
        Some(text) => PullResponse {
            status: PullStatus::Ready,
            translated_text: Some(text),
        },
        None => PullResponse {
            status: PullStatus::NotFound,
            translated_text: None,
        },
    }))
}

/// Finds the source text/language for a subtitle id, preferring the
/// (fast, TTL-bounded) cache and falling back to the durable row if
/// the cache entry already expired.
async fn resolve_original(state: &AppState, subtitle_id: &str) -> Result<Option<(String, String)>, ApiError> {
    if let Some(pair) = state
        .cache
        .get_original(subtitle_id)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
    {
        return Ok(Some(pair));
    }
    match state.subtitles.find_by_subtitle_id(subtitle_id).await? {
        Some(row) => Ok(Some((row.original_text, row.original_language))),
        None => Ok(None),
    }
}

async fn translate_and_store(
    state: &AppState,
    subtitle_id: &str,
    source_lang: &str,
    target_lang: &str,
    original_text: &str,
) -> String {
    match state.provider.translate_text(original_text, source_lang, target_lang, &[]).await {
        Ok(text) => {
            let _ = state.cache.store_translation(subtitle_id, target_lang, &text).await;
            let _ = state
                .subtitles
                .add_translation_if_absent(subtitle_id, target_lang, &text)
                .await;
            text
        }
        Err(_) => String::new(),
    }
}

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub text: String,
    pub source_language: String,
    pub target_language: String,
    /// Scopes the conversation-context window (terminology
    /// consistency across an utterance sequence); omitted for a
    /// one-off translation with no room context.
    pub room_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TranslateResponse {
    pub original_text: String,
    pub translated_text: String,
    pub source_language: String,
    pub target_language: String,
}

/// `POST /translate` (SPEC_FULL supplement). Authenticated the same
/// way as the transcript reader; same-language and empty-text requests
/// short-circuit per C1 contract (a) without invoking the provider.
pub async fn translate_text_proxy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TranslateRequest>,
) -> Result<Json<TranslateResponse>, ApiError> {
    let user_id = authenticate(&state, &headers)?;

    if !state.settings.supported_languages.iter().any(|l| l == &req.source_language) {
        return Err(ApiError::Validation(format!("unsupported language: {}", req.source_language)));
    }
    if !state.settings.supported_languages.iter().any(|l| l == &req.target_language) {
        return Err(ApiError::Validation(format!("unsupported language: {}", req.target_language)));
    }

    if req.source_language == req.target_language || req.text.trim().is_empty() {
        return Ok(Json(TranslateResponse {
            translated_text: req.text.clone(),
            original_text: req.text,
            source_language: req.source_language,
            target_language: req.target_language,
        }));
    }

    let context = state.translate_context.recent(req.room_id.as_deref(), &user_id.to_hex());
    let translated_text = state
        .provider
        .translate_text(&req.text, &req.source_language, &req.target_language, &context)
        .await
        .map_err(|err| ApiError::UpstreamApi(err.to_string()))?;
    state
        .translate_context
        .record(req.room_id.as_deref(), &user_id.to_hex(), &req.text, &translated_text);

    Ok(Json(TranslateResponse {
        original_text: req.text,
        translated_text,
        source_language: req.source_language,
        target_language: req.target_language,
    }))
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<bson::oid::ObjectId, ApiError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Auth("missing Authorization header".into()))?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Auth("expected a Bearer token".into()))?;
    crate::auth::verify_token(&state.settings.jwt_secret, &state.settings.jwt_algorithm, token)
        .map_err(|_| ApiError::Auth("invalid or expired token".into()))
}
