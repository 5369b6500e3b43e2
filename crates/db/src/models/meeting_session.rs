use bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

/// One meeting occupancy window for a room: opens when the first
/// utterance arrives in an empty room and closes when the last
/// participant leaves. At most one session per room may have
/// `is_active = true` — enforced in-process by the room actor
/// (`lams_services::room::RoomActor`) and backstopped by a unique
/// partial index for crash recovery, see `ensure_indexes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingSession {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub room_id: ObjectId,
    pub is_active: bool,
    pub opened_at: DateTime,
    pub closed_at: Option<DateTime>,
    #[serde(default)]
    pub utterance_count: u64,
}

impl MeetingSession {
    pub const COLLECTION: &'static str = "meeting_sessions";
}
