use std::sync::Arc;

use lams_ai::AiProvider;
use lams_config::Settings;
use lams_services::cache::SubtitleCache;
use lams_services::dao::{MeetingSessionDao, RoomPolicyDao, SubtitleDao, UserDao};
use lams_services::{PipelineOrchestrator, RoomRegistry, TranslationContextStore};

use crate::ws::hub::ConnectionHub;

pub type Orchestrator = PipelineOrchestrator<ConnectionHub>;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub hub: Arc<ConnectionHub>,
    pub rooms: Arc<RoomRegistry>,
    pub cache: Arc<dyn SubtitleCache>,
    pub provider: Arc<dyn AiProvider>,
    pub orchestrator: Arc<Orchestrator>,
    pub room_policies: RoomPolicyDao,
    pub meeting_sessions: MeetingSessionDao,
    pub subtitles: SubtitleDao,
    pub users: UserDao,
    pub translate_context: Arc<TranslationContextStore>,
}
