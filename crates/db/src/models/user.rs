use bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

/// Minimal account record. Full account management (registration,
/// password reset, roles) is out of this system's scope; this model
/// exists only so the coordinator can resolve a participant's display
/// name and native language from a join token's subject claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub email: String,
    pub display_name: String,
    #[serde(default = "default_native_language")]
    pub native_language: String,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl User {
    pub const COLLECTION: &'static str = "users";
}

fn default_native_language() -> String {
    "ja".to_string()
}
