pub mod cache;
pub mod context;
pub mod dao;
pub mod pipeline;
pub mod room;

pub use context::TranslationContextStore;
pub use pipeline::{OutboundEvent, PipelineOrchestrator, QosLevel, RoomTransport, SubtitleEvent};
pub use room::{
    apply_preference_update, AudioMode, Participant, PreferenceUpdateError, RoomHandle, RoomRegistry, RoomRuntimeState,
};
