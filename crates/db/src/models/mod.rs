pub mod meeting_session;
pub mod room_policy;
pub mod subtitle;
pub mod user;

pub use meeting_session::MeetingSession;
pub use room_policy::{AudioMode, RoomPolicy};
pub use subtitle::Subtitle;
pub use user::User;
