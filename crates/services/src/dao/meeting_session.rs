use bson::{doc, oid::ObjectId, DateTime};
use lams_db::models::MeetingSession;
use mongodb::Database;

use super::base::{BaseDao, DaoError, DaoResult};

#[derive(Clone)]
pub struct MeetingSessionDao {
    base: BaseDao<MeetingSession>,
}

impl MeetingSessionDao {
    pub fn new(db: &Database) -> Self {
        Self {
            base: BaseDao::new(db, MeetingSession::COLLECTION),
        }
    }

    pub async fn find_active(&self, room_id: &ObjectId) -> DaoResult<Option<MeetingSession>> {
        self.base
            .find_one(doc! { "room_id": room_id, "is_active": true })
            .await
    }

    /// Opens a new session for a room. Relies on the caller (the
    /// room actor) already holding exclusive access to this room's
    /// state; the unique partial index on `(room_id) WHERE is_active`
    /// is a crash-recovery backstop, not the primary race guard, so a
    /// `DuplicateKey` here indicates a real bug in the caller rather
    /// than a condition to retry around.
    pub async fn open(&self, room_id: &ObjectId) -> DaoResult<MeetingSession> {
        let now = DateTime::now();
        let session = MeetingSession {
            id: None,
            room_id: *room_id,
            is_active: true,
            opened_at: now,
            closed_at: None,
            utterance_count: 0,
        };
        let id = self.base.insert(&session).await.map_err(|e| match e {
            DaoError::DuplicateKey => DaoError::Validation(
                "a session is already active for this room; caller must serialize opens per room".into(),
            ),
            other => other,
        })?;
        Ok(MeetingSession { id: Some(id), ..session })
    }

    pub async fn close(&self, session_id: &ObjectId) -> DaoResult<()> {
        self.base
            .update_one(
                doc! { "_id": session_id },
                doc! { "$set": { "is_active": false, "closed_at": DateTime::now() } },
            )
            .await
    }

    pub async fn increment_utterance_count(&self, session_id: &ObjectId) -> DaoResult<()> {
        self.base
            .update_one(doc! { "_id": session_id }, doc! { "$inc": { "utterance_count": 1i64 } })
            .await
    }
}
