use bson::{doc, oid::ObjectId, DateTime};
use lams_db::models::{AudioMode, RoomPolicy};
use mongodb::Database;

use super::base::{BaseDao, DaoResult};

#[derive(Clone)]
pub struct RoomPolicyDao {
    base: BaseDao<RoomPolicy>,
}

impl RoomPolicyDao {
    pub fn new(db: &Database) -> Self {
        Self {
            base: BaseDao::new(db, RoomPolicy::COLLECTION),
        }
    }

    pub async fn get(&self, room_id: &ObjectId) -> DaoResult<Option<RoomPolicy>> {
        self.base.find_one(doc! { "room_id": room_id }).await
    }

    /// Used only by test fixtures and local dev bootstrap — room
    /// creation itself is out of this system's scope (spec §1); the
    /// coordinator otherwise only ever reads a policy that some
    /// external room-CRUD service already wrote.
    pub async fn create_default(
        &self,
        room_id: &ObjectId,
        name: &str,
        creator_id: &ObjectId,
        allowed_languages: &[String],
    ) -> DaoResult<RoomPolicy> {
        let now = DateTime::now();
        let policy = RoomPolicy {
            id: None,
            room_id: *room_id,
            name: name.to_string(),
            creator_id: *creator_id,
            allowed_languages: allowed_languages.to_vec(),
            default_audio_mode: AudioMode::Original,
            allow_mode_switch: true,
            is_private: false,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let id = self.base.insert(&policy).await?;
        Ok(RoomPolicy { id: Some(id), ..policy })
    }
}
