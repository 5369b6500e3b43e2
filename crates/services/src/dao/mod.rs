pub mod base;
pub mod meeting_session;
pub mod room_policy;
pub mod store;
pub mod subtitle;
pub mod user;

pub use base::{BaseDao, DaoError, DaoResult, PaginatedResult, PaginationParams};
pub use meeting_session::MeetingSessionDao;
pub use room_policy::RoomPolicyDao;
pub use store::{SessionStore, SubtitleStore};
pub use subtitle::SubtitleDao;
pub use user::UserDao;
