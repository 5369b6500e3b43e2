//! `/ws/room/{room_id}?token=...` — the bidirectional room channel
//! (spec §6). Handles the join handshake, inbound control JSON
//! (preference changes, speaking/mic signals), inbound binary frames
//! (VAD-segmented utterances, handed to C7), and cleanup on
//! disconnect.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use bson::oid::ObjectId;
use futures::{SinkExt, StreamExt};
use lams_services::{apply_preference_update, AudioMode as RuntimeAudioMode, Participant, PreferenceUpdateError};
use lams_db::models::AudioMode as PolicyAudioMode;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::state::AppState;

const CLOSE_INVALID_TOKEN: u16 = 4001;
const CLOSE_ROOM_MISSING: u16 = 4004;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundMessage {
    PreferenceChange {
        audio_mode: Option<String>,
        subtitle_enabled: Option<bool>,
        target_language: Option<String>,
    },
    SpeakingStart,
    SpeakingEnd,
    MicOn,
    MicOff,
}

pub async fn ws_upgrade(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let Ok(user_id) = crate::auth::verify_token(&state.settings.jwt_secret, &state.settings.jwt_algorithm, &params.token)
    else {
        return ws.on_upgrade(move |socket| reject_with_close(socket, CLOSE_INVALID_TOKEN, "invalid token"));
    };
    let Ok(room_id) = ObjectId::parse_str(&room_id) else {
        return ws.on_upgrade(move |socket| reject_with_close(socket, CLOSE_ROOM_MISSING, "room missing"));
    };

    let Ok(Some(policy)) = state.room_policies.get(&room_id).await else {
        return ws.on_upgrade(move |socket| reject_with_close(socket, CLOSE_ROOM_MISSING, "room missing"));
    };
    if !policy.is_active {
        return ws.on_upgrade(move |socket| reject_with_close(socket, CLOSE_ROOM_MISSING, "room inactive"));
    }
    let Ok(user) = state.users.find_by_id(&user_id).await else {
        return ws.on_upgrade(move |socket| reject_with_close(socket, CLOSE_INVALID_TOKEN, "user missing"));
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, room_id, user_id, user.display_name, user.native_language))
}

/// Per spec §6, close codes are delivered over the WS handshake
/// itself rather than as an HTTP status, so the reject path has to
/// complete the upgrade and immediately send a close frame.
async fn reject_with_close(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(axum::extract::ws::CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    room_id: ObjectId,
    user_id: ObjectId,
    display_name: String,
    native_language: String,
) {
    let (sender, mut receiver) = socket.split();
    let room = state.rooms.get_or_create(room_id);

    let participant = Participant::new(user_id, display_name, native_language);
    {
        let mut rs = room.state.lock().await;
        rs.join(participant.clone());
    }
    state.hub.connect(room_id, user_id, sender);
    info!(%room_id, %user_id, "participant joined room");

    // First server-to-client frame: policy + participant snapshot.
    send_room_state(&state, room_id, user_id).await;
    state
        .hub
        .broadcast_json(
            room_id,
            json!({
                "type": "user_joined",
                "user_id": user_id.to_hex(),
                "display_name": participant.display_name,
            }),
            Some(user_id),
        )
        .await;

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => handle_inbound_json(&state, room_id, user_id, &text).await,
            Ok(Message::Binary(bytes)) => {
                let orchestrator = state.orchestrator.clone();
                let audio = bytes.to_vec();
                tokio::spawn(async move {
                    orchestrator.process_utterance(room_id, user_id, audio).await;
                });
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(%err, %room_id, %user_id, "websocket receive error");
                break;
            }
        }
    }

    state.hub.disconnect(&room_id, &user_id);
    let room_empty = {
        let mut rs = room.state.lock().await;
        rs.leave(&user_id)
    };
    state
        .hub
        .broadcast_json(room_id, json!({"type": "user_left", "user_id": user_id.to_hex()}), None)
        .await;

    if room_empty {
        state.orchestrator.end_session_if_open(room_id).await;
        state.rooms.dispose_if_empty(&room_id).await;
        info!(%room_id, "room disposed, all participants left");
    }
}

async fn send_room_state(state: &AppState, room_id: ObjectId, user_id: ObjectId) {
    let Ok(Some(policy)) = state.room_policies.get(&room_id).await else {
        return;
    };
    let room = state.rooms.get_or_create(room_id);
    let rs = room.state.lock().await;
    let participants: Vec<_> = rs
        .participants
        .values()
        .map(|p| {
            json!({
                "user_id": p.user_id.to_hex(),
                "display_name": p.display_name,
                "native_language": p.native_language,
                "audio_mode": audio_mode_str(p.audio_mode),
                "subtitle_enabled": p.subtitle_enabled,
                "target_language": p.target_language,
                "mic_on": p.mic_on,
            })
        })
        .collect();
    let me = rs.participants.get(&user_id);
    let message = json!({
        "type": "room_state",
        "room_id": room_id.to_hex(),
        "allowed_languages": policy.allowed_languages,
        "default_audio_mode": match policy.default_audio_mode {
            PolicyAudioMode::Original => "original",
            PolicyAudioMode::Translated => "translated",
        },
        "allow_mode_switch": policy.allow_mode_switch,
        "active_speaker": rs.active_speaker.map(|id| id.to_hex()),
        "participants": participants,
        "you": me.map(|p| json!({
            "audio_mode": audio_mode_str(p.audio_mode),
            "subtitle_enabled": p.subtitle_enabled,
            "target_language": p.target_language,
        })),
    });
    drop(rs);
    state.hub.send_json(room_id, user_id, message).await;
}

fn audio_mode_str(mode: RuntimeAudioMode) -> &'static str {
    match mode {
        RuntimeAudioMode::Original => "original",
        RuntimeAudioMode::Translated => "translated",
    }
}

async fn handle_inbound_json(state: &AppState, room_id: ObjectId, user_id: ObjectId, text: &str) {
    let parsed: Result<InboundMessage, _> = serde_json::from_str(text);
    let Ok(message) = parsed else {
        state
            .hub
            .send_json(room_id, user_id, json!({"type": "error", "message": "unrecognized message"}))
            .await;
        return;
    };

    let room = state.rooms.get_or_create(room_id);
    match message {
        InboundMessage::PreferenceChange {
            audio_mode,
            subtitle_enabled,
            target_language,
        } => {
            let Ok(Some(policy)) = state.room_policies.get(&room_id).await else {
                return;
            };
            if audio_mode.is_some() && !policy.allow_mode_switch {
                state
                    .hub
                    .send_json(
                        room_id,
                        user_id,
                        json!({"type": "error", "message": "mode switching is disabled for this room"}),
                    )
                    .await;
                return;
            }
            let requested_mode = audio_mode.as_deref().map(|m| match m {
                "translated" => RuntimeAudioMode::Translated,
                _ => RuntimeAudioMode::Original,
            });
            let result = {
                let mut rs = room.state.lock().await;
                apply_preference_update(
                    &mut rs,
                    &user_id,
                    &policy.allowed_languages,
                    requested_mode,
                    subtitle_enabled,
                    target_language,
                )
            };
            match result {
                Ok(updated) => {
                    state
                        .hub
                        .send_json(
                            room_id,
                            user_id,
                            json!({
                                "type": "preference_updated",
                                "audio_mode": audio_mode_str(updated.audio_mode),
                                "subtitle_enabled": updated.subtitle_enabled,
                                "target_language": updated.target_language,
                            }),
                        )
                        .await;
                    state
                        .hub
                        .broadcast_json(
                            room_id,
                            json!({
                                "type": "user_preference_changed",
                                "user_id": user_id.to_hex(),
                                "audio_mode": audio_mode_str(updated.audio_mode),
                                "subtitle_enabled": updated.subtitle_enabled,
                                "target_language": updated.target_language,
                            }),
                            Some(user_id),
                        )
                        .await;
                }
                Err(PreferenceUpdateError::LanguageNotAllowed) => {
                    state
                        .hub
                        .send_json(room_id, user_id, json!({"type": "error", "message": "target_language not allowed"}))
                        .await;
                }
                Err(PreferenceUpdateError::UnknownParticipant) => {}
            }
        }
        InboundMessage::SpeakingStart => {
            room.state.lock().await.set_active_speaker(Some(user_id));
            state
                .hub
                .broadcast_json(room_id, json!({"type": "speaking_start", "user_id": user_id.to_hex()}), None)
                .await;
        }
        InboundMessage::SpeakingEnd => {
            let mut rs = room.state.lock().await;
            if rs.active_speaker == Some(user_id) {
                rs.set_active_speaker(None);
            }
            drop(rs);
            state
                .hub
                .broadcast_json(room_id, json!({"type": "speaking_end", "user_id": user_id.to_hex()}), None)
                .await;
        }
        InboundMessage::MicOn => set_mic_and_broadcast(state, &room, room_id, user_id, true).await,
        InboundMessage::MicOff => set_mic_and_broadcast(state, &room, room_id, user_id, false).await,
    }
}

async fn set_mic_and_broadcast(
    state: &AppState,
    room: &Arc<lams_services::RoomHandle>,
    room_id: ObjectId,
    user_id: ObjectId,
    mic_on: bool,
) {
    let changed = room.state.lock().await.set_mic(&user_id, mic_on);
    if changed {
        state
            .hub
            .broadcast_json(
                room_id,
                json!({"type": "mic_status_changed", "user_id": user_id.to_hex(), "mic_on": mic_on}),
                None,
            )
            .await;
    }
}

