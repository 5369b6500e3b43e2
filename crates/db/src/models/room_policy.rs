use bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

/// Durable, rarely-changing configuration for a room: which languages
/// it supports, what a newly joined participant defaults to, and who
/// may read its transcript. Kept separate from the ephemeral per-room
/// runtime state (active speaker, subtitle sequence, connected
/// participants), which never touches Mongo — see
/// `lams_services::room::RoomRuntimeState`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomPolicy {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub room_id: ObjectId,
    pub name: String,
    pub creator_id: ObjectId,
    #[serde(default)]
    pub allowed_languages: Vec<String>,
    pub default_audio_mode: AudioMode,
    #[serde(default = "default_true")]
    pub allow_mode_switch: bool,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl RoomPolicy {
    pub const COLLECTION: &'static str = "room_policies";
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioMode {
    Original,
    Translated,
}

impl Default for AudioMode {
    fn default() -> Self {
        AudioMode::Original
    }
}
