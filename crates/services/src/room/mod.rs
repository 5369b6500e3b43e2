//! Ephemeral, per-room runtime state: who's connected, who's
//! speaking, and the monotonic subtitle sequence counter. None of
//! this is persisted — a room's durable footprint is its
//! `RoomPolicy` plus the `MeetingSession`/`Subtitle` rows the
//! pipeline writes as a side effect of processing utterances.

use std::collections::HashMap;
use std::sync::Arc;

use bson::{oid::ObjectId, DateTime};
use dashmap::DashMap;
use lams_ai::QosMonitor;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMode {
    Original,
    Translated,
}

#[derive(Debug, Clone)]
pub struct Participant {
    pub user_id: ObjectId,
    pub display_name: String,
    pub native_language: String,
    pub audio_mode: AudioMode,
    pub subtitle_enabled: bool,
    pub target_language: String,
    pub joined_at: DateTime,
    pub mic_on: bool,
}

impl Participant {
    pub fn new(user_id: ObjectId, display_name: String, native_language: String) -> Self {
        Self {
            target_language: native_language.clone(),
            user_id,
            display_name,
            native_language,
            audio_mode: AudioMode::Original,
            subtitle_enabled: true,
            joined_at: DateTime::now(),
            mic_on: true,
        }
    }
}

/// The mutable state one room carries while it has at least one
/// connected participant.
pub struct RoomRuntimeState {
    pub room_id: ObjectId,
    pub session_id: Option<ObjectId>,
    pub participants: HashMap<ObjectId, Participant>,
    pub active_speaker: Option<ObjectId>,
    pub subtitle_seq: u64,
    /// The last recognized text per speaker, used to drop consecutive
    /// duplicate recognitions (a provider re-emitting the tail of a
    /// clip it already transcribed) before they reach the pipeline.
    pub last_text_by_speaker: HashMap<ObjectId, String>,
}

impl RoomRuntimeState {
    pub fn new(room_id: ObjectId) -> Self {
        Self {
            room_id,
            session_id: None,
            participants: HashMap::new(),
            active_speaker: None,
            subtitle_seq: 0,
            last_text_by_speaker: HashMap::new(),
        }
    }

    pub fn next_seq(&mut self) -> u64 {
        self.subtitle_seq += 1;
        self.subtitle_seq
    }

    /// True if `text` is a near-duplicate of the last thing this
    /// speaker said — an exact match after trimming, which is the
    /// common case for a provider re-transcribing an overlapping tail
    /// of audio across two consecutive VAD segments.
    pub fn is_duplicate(&self, speaker_id: &ObjectId, text: &str) -> bool {
        self.last_text_by_speaker
            .get(speaker_id)
            .is_some_and(|prev| prev.trim() == text.trim())
    }

    pub fn record_speaker_text(&mut self, speaker_id: ObjectId, text: String) {
        self.last_text_by_speaker.insert(speaker_id, text);
    }

    pub fn listeners_by_target_language(&self) -> HashMap<String, Vec<ObjectId>> {
        let mut buckets: HashMap<String, Vec<ObjectId>> = HashMap::new();
        for participant in self.participants.values() {
            if participant.audio_mode == AudioMode::Translated {
                buckets
                    .entry(participant.target_language.clone())
                    .or_default()
                    .push(participant.user_id);
            }
        }
        buckets
    }

    pub fn original_audio_listeners(&self) -> Vec<ObjectId> {
        self.participants
            .values()
            .filter(|p| p.audio_mode == AudioMode::Original)
            .map(|p| p.user_id)
            .collect()
    }

    pub fn subtitle_listeners(&self) -> Vec<ObjectId> {
        self.participants
            .values()
            .filter(|p| p.subtitle_enabled)
            .map(|p| p.user_id)
            .collect()
    }

    /// Idempotent with respect to participant identity: joining twice
    /// with the same `user_id` just replaces the prior record (spec
    /// §4.5), which matters for a client that reconnects without a
    /// clean disconnect first.
    pub fn join(&mut self, participant: Participant) {
        self.participants.insert(participant.user_id, participant);
    }

    /// Removes a participant; returns true if the room is now empty,
    /// the trigger for `RoomRegistry::dispose_if_empty` to tear the
    /// room's runtime state down (spec §4.5).
    pub fn leave(&mut self, user_id: &ObjectId) -> bool {
        self.participants.remove(user_id);
        if self.active_speaker == Some(*user_id) {
            self.active_speaker = None;
        }
        self.last_text_by_speaker.remove(user_id);
        self.participants.is_empty()
    }

    pub fn set_active_speaker(&mut self, user_id: Option<ObjectId>) {
        self.active_speaker = user_id;
    }

    pub fn set_mic(&mut self, user_id: &ObjectId, mic_on: bool) -> bool {
        match self.participants.get_mut(user_id) {
            Some(p) => {
                p.mic_on = mic_on;
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum PreferenceUpdateError {
    UnknownParticipant,
    LanguageNotAllowed,
}

/// Validates and applies a preference-change request (spec §4.5
/// `update_preference`, §6 inbound `preference_change`). Returns the
/// updated participant on success so the caller can broadcast it.
pub fn apply_preference_update(
    state: &mut RoomRuntimeState,
    user_id: &ObjectId,
    allowed_languages: &[String],
    audio_mode: Option<AudioMode>,
    subtitle_enabled: Option<bool>,
    target_language: Option<String>,
) -> Result<Participant, PreferenceUpdateError> {
    if let Some(ref lang) = target_language {
        if !allowed_languages.iter().any(|l| l == lang) {
            return Err(PreferenceUpdateError::LanguageNotAllowed);
        }
    }
    let participant = state
        .participants
        .get_mut(user_id)
        .ok_or(PreferenceUpdateError::UnknownParticipant)?;
    if let Some(mode) = audio_mode {
        participant.audio_mode = mode;
    }
    if let Some(enabled) = subtitle_enabled {
        participant.subtitle_enabled = enabled;
    }
    if let Some(lang) = target_language {
        participant.target_language = lang;
    }
    Ok(participant.clone())
}

/// One active room's state plus the per-room QoS history. Held behind
/// a single `Mutex` so that processing an utterance serializes with
/// every other mutation of the room (joins, leaves, preference
/// changes) — there is exactly one writer in flight per room at any
/// moment.
pub struct RoomHandle {
    pub state: Mutex<RoomRuntimeState>,
    pub qos: Mutex<QosMonitor>,
}

impl RoomHandle {
    fn new(room_id: ObjectId, max_latency_ms: u64, max_jitter_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RoomRuntimeState::new(room_id)),
            qos: Mutex::new(QosMonitor::new(max_latency_ms, max_jitter_ms)),
        })
    }
}

/// Registry of active rooms. A room exists here only while it has at
/// least one connected participant; `RoomRegistry::leave` removes the
/// entry once the last participant disconnects, discarding
/// `subtitle_seq` and dedup state along with it, per spec.
pub struct RoomRegistry {
    rooms: DashMap<ObjectId, Arc<RoomHandle>>,
    max_latency_ms: u64,
    max_jitter_ms: u64,
}

impl RoomRegistry {
    pub fn new(max_latency_ms: u64, max_jitter_ms: u64) -> Self {
        Self {
            rooms: DashMap::new(),
            max_latency_ms,
            max_jitter_ms,
        }
    }

    pub fn get_or_create(&self, room_id: ObjectId) -> Arc<RoomHandle> {
        self.rooms
            .entry(room_id)
            .or_insert_with(|| RoomHandle::new(room_id, self.max_latency_ms, self.max_jitter_ms))
            .clone()
    }

    pub fn get(&self, room_id: &ObjectId) -> Option<Arc<RoomHandle>> {
        self.rooms.get(room_id).map(|r| r.clone())
    }

    /// Removes the room's entry if it has no participants left.
    /// Returns true if the room was disposed.
    pub async fn dispose_if_empty(&self, room_id: &ObjectId) -> bool {
        let Some(handle) = self.rooms.get(room_id).map(|r| r.clone()) else {
            return false;
        };
        let empty = handle.state.lock().await.participants.is_empty();
        if empty {
            self.rooms.remove(room_id);
        }
        empty
    }

    pub fn active_room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid() -> ObjectId {
        ObjectId::new()
    }

    #[test]
    fn listener_bucketing_groups_by_target_language() {
        let mut state = RoomRuntimeState::new(oid());
        let mut a = Participant::new(oid(), "Alice".into(), "en".into());
        a.audio_mode = AudioMode::Translated;
        a.target_language = "ja".into();
        let mut b = Participant::new(oid(), "Bob".into(), "en".into());
        b.audio_mode = AudioMode::Translated;
        b.target_language = "ja".into();
        let mut c = Participant::new(oid(), "Cy".into(), "en".into());
        c.audio_mode = AudioMode::Translated;
        c.target_language = "zh".into();
        state.participants.insert(a.user_id, a);
        state.participants.insert(b.user_id, b);
        state.participants.insert(c.user_id, c);

        let buckets = state.listeners_by_target_language();
        assert_eq!(buckets.get("ja").map(|v| v.len()), Some(2));
        assert_eq!(buckets.get("zh").map(|v| v.len()), Some(1));
    }

    #[test]
    fn duplicate_detection_is_exact_after_trim() {
        let mut state = RoomRuntimeState::new(oid());
        let speaker = oid();
        state.record_speaker_text(speaker, "hello there".to_string());
        assert!(state.is_duplicate(&speaker, "  hello there  "));
        assert!(!state.is_duplicate(&speaker, "hello there again"));
    }

    #[tokio::test]
    async fn registry_disposes_empty_rooms() {
        let registry = RoomRegistry::new(1200, 200);
        let room_id = oid();
        let handle = registry.get_or_create(room_id);
        assert!(!registry.dispose_if_empty(&room_id).await);

        handle.state.lock().await.participants.insert(
            oid(),
            Participant::new(oid(), "Alice".into(), "en".into()),
        );
        assert!(!registry.dispose_if_empty(&room_id).await);

        handle.state.lock().await.participants.clear();
        assert!(registry.dispose_if_empty(&room_id).await);
        assert_eq!(registry.active_room_count(), 0);
    }
}
