//! Trait seams for the two DAOs the pipeline orchestrator (C7) writes
//! through. Mirrors the `RoomTransport` seam in `pipeline.rs`: C7 is
//! generic/`dyn`-dispatched over persistence the same way it is over
//! transport, so the dual-path algorithm can be exercised in tests
//! against an in-memory fake instead of a live MongoDB.

use std::collections::HashMap;

use async_trait::async_trait;
use bson::oid::ObjectId;
use lams_db::models::{MeetingSession, Subtitle};

use super::base::DaoResult;
use super::{MeetingSessionDao, SubtitleDao};

#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    async fn find_active(&self, room_id: &ObjectId) -> DaoResult<Option<MeetingSession>>;
    async fn open(&self, room_id: &ObjectId) -> DaoResult<MeetingSession>;
    async fn close(&self, session_id: &ObjectId) -> DaoResult<()>;
    async fn increment_utterance_count(&self, session_id: &ObjectId) -> DaoResult<()>;
}

#[async_trait]
impl SessionStore for MeetingSessionDao {
    async fn find_active(&self, room_id: &ObjectId) -> DaoResult<Option<MeetingSession>> {
        MeetingSessionDao::find_active(self, room_id).await
    }

    async fn open(&self, room_id: &ObjectId) -> DaoResult<MeetingSession> {
        MeetingSessionDao::open(self, room_id).await
    }

    async fn close(&self, session_id: &ObjectId) -> DaoResult<()> {
        MeetingSessionDao::close(self, session_id).await
    }

    async fn increment_utterance_count(&self, session_id: &ObjectId) -> DaoResult<()> {
        MeetingSessionDao::increment_utterance_count(self, session_id).await
    }
}

/// The subset of `SubtitleDao` the orchestrator's persistence step
/// (spec §4.7 step 10) and background fill (step 9) need.
#[async_trait]
pub trait SubtitleStore: Send + Sync + 'static {
    #[allow(clippy::too_many_arguments)]
    async fn append(
        &self,
        subtitle_id: &str,
        room_id: &ObjectId,
        session_id: Option<ObjectId>,
        seq: u64,
        speaker_id: &ObjectId,
        speaker_display_name: &str,
        original_language: &str,
        original_text: &str,
        translations: HashMap<String, String>,
    ) -> DaoResult<Subtitle>;

    async fn add_translation_if_absent(&self, subtitle_id: &str, lang: &str, text: &str) -> DaoResult<()>;
}

#[async_trait]
impl SubtitleStore for SubtitleDao {
    async fn append(
        &self,
        subtitle_id: &str,
        room_id: &ObjectId,
        session_id: Option<ObjectId>,
        seq: u64,
        speaker_id: &ObjectId,
        speaker_display_name: &str,
        original_language: &str,
        original_text: &str,
        translations: HashMap<String, String>,
    ) -> DaoResult<Subtitle> {
        SubtitleDao::append(
            self,
            subtitle_id,
            room_id,
            session_id,
            seq,
            speaker_id,
            speaker_display_name,
            original_language,
            original_text,
            translations,
        )
        .await
    }

    async fn add_translation_if_absent(&self, subtitle_id: &str, lang: &str, text: &str) -> DaoResult<()> {
        SubtitleDao::add_translation_if_absent(self, subtitle_id, lang, text).await
    }
}
