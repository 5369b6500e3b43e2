pub mod auth;
pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

use axum::{
    routing::{get, post},
    Router,
};
use state::AppState;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

/// Builds the CORS layer from `settings.cors_origins` (spec §6
/// configuration). A bare `*` keeps the wide-open default for local
/// dev; anything else is taken as an explicit allow-list.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(parsed)
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.settings.cors_origins);

    let rooms = Router::new().route("/{room_id}/transcript", get(routes::transcript::get_transcript));

    let translate = Router::new()
        .route("/", post(routes::translate::translate_text_proxy))
        .route(
            "/subtitle/{subtitle_id}/{target_lang}",
            get(routes::translate::pull_subtitle_translation),
        );

    // Compose API
    let api = Router::new().nest("/rooms", rooms).nest("/translate", translate);

    // Health check
    let health = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api)
        .merge(health)
        .route("/ws/room/{room_id}", get(ws::handler::ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
