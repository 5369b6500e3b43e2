//! Process entry point: loads configuration, connects to MongoDB,
//! wires the AI provider, cache backend, room registry, connection
//! hub and pipeline orchestrator into one `AppState`, then serves the
//! HTTP/WS router.

use std::sync::Arc;

use lams_services::cache::{InProcessCache, RedisCache, SubtitleCache};
use lams_services::dao::{MeetingSessionDao, RoomPolicyDao, SubtitleDao, UserDao};
use lams_services::{PipelineOrchestrator, RoomRegistry, TranslationContextStore};

use lams_api::state::AppState;
use lams_api::ws::hub::ConnectionHub;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .json()
        .init();

    let settings = Arc::new(lams_config::load()?);

    let client = mongodb::Client::with_uri_str(&settings.mongo_url).await?;
    let db = client.database(&settings.mongo_db_name);
    lams_db::indexes::ensure_indexes(&db).await?;

    let provider = lams_ai::build_provider(&settings)?;

    let cache: Arc<dyn SubtitleCache> = match &settings.redis_url {
        Some(url) => Arc::new(RedisCache::new(url)?),
        None => Arc::new(InProcessCache::new()),
    };

    let rooms = Arc::new(RoomRegistry::new(settings.max_latency_ms, settings.max_jitter_ms));
    let hub = Arc::new(ConnectionHub::new());

    let sessions = MeetingSessionDao::new(&db);
    let subtitles = SubtitleDao::new(&db);
    let room_policies = RoomPolicyDao::new(&db);
    let users = UserDao::new(&db);

    let orchestrator = Arc::new(PipelineOrchestrator::new(
        provider.clone(),
        cache.clone(),
        Arc::new(sessions.clone()),
        Arc::new(subtitles.clone()),
        rooms.clone(),
        hub.clone(),
    ));

    let state = AppState {
        settings: settings.clone(),
        hub,
        rooms,
        cache,
        provider,
        orchestrator,
        room_policies,
        meeting_sessions: sessions,
        subtitles,
        users,
        translate_context: Arc::new(TranslationContextStore::new()),
    };

    let router = lams_api::build_router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!(addr = %settings.bind_addr, "listening");
    axum::serve(listener, router).await?;
    Ok(())
}
