use std::collections::HashMap;

use bson::{doc, oid::ObjectId, DateTime};
use lams_db::models::Subtitle;
use mongodb::Database;

use super::base::{BaseDao, DaoResult};

#[derive(Clone)]
pub struct SubtitleDao {
    base: BaseDao<Subtitle>,
}

#[allow(clippy::too_many_arguments)]
impl SubtitleDao {
    pub fn new(db: &Database) -> Self {
        Self {
            base: BaseDao::new(db, Subtitle::COLLECTION),
        }
    }

    pub async fn append(
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
        let subtitle = Subtitle {
            id: None,
            subtitle_id: subtitle_id.to_string(),
            room_id: *room_id,
            session_id,
            seq,
            speaker_id: *speaker_id,
            speaker_display_name: speaker_display_name.to_string(),
            original_text: original_text.to_string(),
            original_language: original_language.to_string(),
            translations,
            created_at: DateTime::now(),
        };
        let id = self.base.insert(&subtitle).await?;
        Ok(Subtitle { id: Some(id), ..subtitle })
    }

    pub async fn find_by_subtitle_id(&self, subtitle_id: &str) -> DaoResult<Option<Subtitle>> {
        self.base.find_one(doc! { "subtitle_id": subtitle_id }).await
    }

    /// Adds a background-fill translation to an already-persisted row
    /// without disturbing any translation already recorded for that
    /// language (spec §3: "entries never change").
    pub async fn add_translation_if_absent(&self, subtitle_id: &str, lang: &str, text: &str) -> DaoResult<()> {
        let field = format!("translations.{lang}");
        let result = self
            .base
            .collection()
            .update_one(
                doc! { "subtitle_id": subtitle_id, field.clone(): { "$exists": false } },
                doc! { "$set": { field: text } },
            )
            .await?;
        let _ = result;
        Ok(())
    }

    /// Ordered by `seq` ascending, matching the per-room monotonic
    /// sequence subtitles are allocated under (spec §4.9).
    pub async fn list_for_room(&self, room_id: &ObjectId, limit: i64) -> DaoResult<Vec<Subtitle>> {
        let cursor = self
            .base
            .collection()
            .find(doc! { "room_id": room_id })
            .sort(doc! { "seq": 1 })
            .limit(limit)
            .await?;
        use futures::TryStreamExt;
        Ok(cursor.try_collect().await?)
    }
}
