use std::collections::HashMap;

use bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

/// One recognized utterance, persisted in the speaker's source
/// language plus whatever translations had landed by the time step 10
/// of the pipeline wrote this row. `subtitle_id` is the UUID minted
/// at fan-out time (spec §4.7 step 6) — it, not the Mongo `_id`, is
/// the identity the subtitle cache and the translation pull API key
/// off of, so a row can be found by either.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtitle {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub subtitle_id: String,
    pub room_id: ObjectId,
    /// Nullable: older rows written before session tracking existed,
    /// or rows written while no session could be opened, keep this
    /// `None` rather than force a backfill.
    pub session_id: Option<ObjectId>,
    pub seq: u64,
    pub speaker_id: ObjectId,
    pub speaker_display_name: String,
    pub original_text: String,
    pub original_language: String,
    /// Augmented by background fills after the row is written;
    /// existing entries are never overwritten once present (§3).
    #[serde(default)]
    pub translations: HashMap<String, String>,
    pub created_at: DateTime,
}

impl Subtitle {
    pub const COLLECTION: &'static str = "subtitles";
}
