//! The Connection Hub (C8): a per-room table of active connections,
//! each with its own outbound send path so one slow listener can
//! never block fan-out to the rest of the room. This is the concrete
//! `RoomTransport` the pipeline orchestrator drives; it also owns the
//! control-message broadcast primitives the WS handler uses directly
//! for join/leave/preference/mic events that don't go through C7.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::Message;
use bson::oid::ObjectId;
use dashmap::DashMap;
use futures::stream::SplitSink;
use lams_services::{OutboundEvent, QosLevel, RoomTransport};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::warn;

use axum::extract::ws::WebSocket;

/// Bound on a connection's outbound queue. A listener whose consumer
/// can't keep up gets frames dropped (audio first, then stale
/// subtitles) rather than backpressuring the orchestrator (spec §5
/// Backpressure) — the channel itself is the queue; `try_send`
/// failing means "this connection is saturated."
const SEND_QUEUE_DEPTH: usize = 64;

/// Per-connection send timeout; a peer that doesn't drain its socket
/// within this window is dropped (spec §4.8).
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

enum Outbound {
    Json(String),
    Binary(Vec<u8>),
}

#[derive(Clone)]
struct Connection {
    tx: mpsc::Sender<Outbound>,
}

pub struct ConnectionHub {
    rooms: DashMap<ObjectId, DashMap<ObjectId, Connection>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self { rooms: DashMap::new() }
    }

    /// Registers a connection and spawns its dedicated writer task,
    /// which owns the `SplitSink` half of the socket and drains the
    /// bounded queue in FIFO order — the per-connection ordering
    /// guarantee spec §5 requires. Returns the disconnect guard: drop
    /// it (or call `disconnect` explicitly) to tear the entry down.
    pub fn connect(
        &self,
        room_id: ObjectId,
        user_id: ObjectId,
        mut sink: SplitSink<WebSocket, Message>,
    ) {
        use futures::SinkExt;
        let (tx, mut rx) = mpsc::channel::<Outbound>(SEND_QUEUE_DEPTH);
        self.rooms
            .entry(room_id)
            .or_default()
            .insert(user_id, Connection { tx });

        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                let msg = match item {
                    Outbound::Json(text) => Message::text(text),
                    Outbound::Binary(bytes) => Message::binary(bytes),
                };
                match tokio::time::timeout(SEND_TIMEOUT, sink.send(msg)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        warn!(%err, %user_id, "send failed, closing connection");
                        break;
                    }
                    Err(_) => {
                        warn!(%user_id, "send timed out, closing connection");
                        break;
                    }
                }
            }
            let _ = sink.close().await;
        });
    }

    pub fn disconnect(&self, room_id: &ObjectId, user_id: &ObjectId) {
        if let Some(conns) = self.rooms.get(room_id) {
            conns.remove(user_id);
        }
    }

    pub fn room_is_empty(&self, room_id: &ObjectId) -> bool {
        self.rooms.get(room_id).map(|c| c.is_empty()).unwrap_or(true)
    }

    pub async fn send_json(&self, room_id: ObjectId, user_id: ObjectId, message: serde_json::Value) {
        let Some(conns) = self.rooms.get(&room_id) else { return };
        let Some(conn) = conns.get(&user_id) else { return };
        let text = message.to_string();
        // `try_send`: a saturated listener drops the frame rather than
        // stalling the caller (spec §5).
        if conn.tx.try_send(Outbound::Json(text)).is_err() {
            warn!(%room_id, %user_id, "outbound queue saturated, dropping control message");
        }
    }

    pub async fn send_bytes(&self, room_id: ObjectId, user_id: ObjectId, payload: Vec<u8>) {
        let Some(conns) = self.rooms.get(&room_id) else { return };
        let Some(conn) = conns.get(&user_id) else { return };
        if conn.tx.try_send(Outbound::Binary(payload)).is_err() {
            warn!(%room_id, %user_id, "outbound queue saturated, dropping audio frame");
        }
    }

    pub async fn broadcast_json(&self, room_id: ObjectId, message: serde_json::Value, exclude: Option<ObjectId>) {
        let Some(conns) = self.rooms.get(&room_id) else { return };
        let targets: Vec<ObjectId> = conns
            .iter()
            .map(|e| *e.key())
            .filter(|id| Some(*id) != exclude)
            .collect();
        drop(conns);
        for target in targets {
            self.send_json(room_id, target, message.clone()).await;
        }
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoomTransport for ConnectionHub {
    async fn send_audio(&self, room_id: ObjectId, user_id: ObjectId, audio: &[u8]) {
        self.send_bytes(room_id, user_id, audio.to_vec()).await;
    }

    async fn send_event(&self, room_id: ObjectId, user_id: ObjectId, event: OutboundEvent) {
        let message = match event {
            OutboundEvent::Subtitle(s) => json!({
                "type": "subtitle",
                "id": s.id,
                "seq": s.seq,
                "speaker_id": s.speaker_id.to_hex(),
                "text": s.text,
                "lang": s.lang,
                "is_translated": s.is_translated,
                "translation_failed": s.translation_failed,
            }),
            OutboundEvent::QosWarning { lang, level } => json!({
                "type": "qos_warning",
                "lang": lang,
                "level": match level {
                    QosLevel::Light => "light",
                    QosLevel::Moderate => "moderate",
                    QosLevel::Severe => "severe",
                },
            }),
        };
        self.send_json(room_id, user_id, message).await;
    }
}

pub type SharedHub = Arc<ConnectionHub>;
