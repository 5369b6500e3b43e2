//! `GET /rooms/{room_id}/transcript?lang=?` — C9's reader half (spec
//! §4.9, §6). Authenticated, 404 on a missing room, 403 on a private
//! room read by anyone but its creator.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

const LIST_LIMIT: i64 = 5000;

#[derive(Debug, Deserialize)]
pub struct TranscriptQuery {
    pub lang: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TranscriptRow {
    pub id: String,
    pub seq: u64,
    pub speaker_id: String,
    pub speaker_display_name: String,
    pub text: String,
    pub language: String,
    pub is_translated: bool,
    pub timestamp: String,
}

pub async fn get_transcript(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<TranscriptQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<TranscriptRow>>, ApiError> {
    let caller_id = authenticate(&state, &headers)?;

    let room_id = ObjectId::parse_str(&room_id).map_err(|_| ApiError::NotFound("room not found".into()))?;
    let policy = state
        .room_policies
        .get(&room_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("room not found".into()))?;

    if policy.is_private && policy.creator_id != caller_id {
        return Err(ApiError::Forbidden("this room's transcript is private".into()));
    }

    let rows = state.subtitles.list_for_room(&room_id, LIST_LIMIT).await?;
    let out = rows
        .into_iter()
        .map(|row| {
            // Falls back to the original when the row predates the
            // requested language's translation, or when the request
            // asks for the original language itself (spec §4.9).
            let (text, is_translated) = match &query.lang {
                Some(lang) if lang != &row.original_language => match row.translations.get(lang) {
                    Some(translated) => (translated.clone(), true),
                    None => (row.original_text.clone(), false),
                },
                _ => (row.original_text.clone(), false),
            };
            TranscriptRow {
                id: row.subtitle_id,
                seq: row.seq,
                speaker_id: row.speaker_id.to_hex(),
                speaker_display_name: row.speaker_display_name,
                text,
                language: query.lang.clone().unwrap_or(row.original_language),
                is_translated,
                timestamp: row.created_at.to_chrono().to_rfc3339(),
            }
        })
        .collect();

    Ok(Json(out))
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<ObjectId, ApiError> {
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
