use bson::{doc, oid::ObjectId};
use lams_db::models::User;
use mongodb::Database;

use super::base::{BaseDao, DaoResult};

/// Minimal read access to account records; this system does not own
/// registration or authentication, only display-name/native-language
/// lookups for participants joining a room.
#[derive(Clone)]
pub struct UserDao {
    base: BaseDao<User>,
}

impl UserDao {
    pub fn new(db: &Database) -> Self {
        Self {
            base: BaseDao::new(db, User::COLLECTION),
        }
    }

    pub async fn find_by_id(&self, id: &ObjectId) -> DaoResult<User> {
        self.base.find_by_id(id).await
    }

    pub async fn find_by_email(&self, email: &str) -> DaoResult<Option<User>> {
        self.base.find_one(doc! { "email": email }).await
    }
}
