//! HTTP surface of ChatRelay.

pub mod api;
pub mod auth;
pub mod config;

use api::{conversations::*, relay::*, state::AppState};
use auth::{AuthConfig, auth_middleware};
use axum::{
    Router, middleware,
    http::{Method, header},
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(serde::Serialize)]
struct Health {
    status: String,
}

async fn health() -> axum::Json<Health> {
    axum::Json(Health {
        status: "chatrelay is working!".to_string(),
    })
}

/// Initialize the tracing subscriber.
///
/// `CHATRELAY_LOG_JSON=1` switches to JSON lines.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,chatrelay_server=debug,chatrelay_core=debug".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    if std::env::var("CHATRELAY_LOG_JSON").is_ok_and(|value| value == "1") {
        builder.json().init();
    } else {
        builder.init();
    }
}

pub fn build_router(state: AppState, auth: AuthConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static(auth::OWNER_HEADER),
        ]);

    let api = Router::new()
        .route(
            "/api/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route("/api/conversations/{id}/turns", get(list_turns))
        .route("/api/conversations/{id}/messages", post(send_message))
        .route_layer(middleware::from_fn_with_state(auth, auth_middleware));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
