#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::Context;
use chatrelay_ai::OpenAIClient;
use chatrelay_core::{AppCore, paths};
use chatrelay_server::{
    api::state::ServerState, auth::AuthConfig, build_router, config::ServerConfig, init_tracing,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting ChatRelay server");

    let config = ServerConfig::load()?;

    let llm = Arc::new(
        OpenAIClient::new(config.upstream_api_key.clone())
            .with_base_url(config.upstream_base_url.clone())
            .with_connect_timeout(config.relay.connect_timeout)
            .with_request_timeout(config.relay.read_timeout),
    );

    let core = if config.in_memory {
        AppCore::in_memory(llm, config.relay.clone())
    } else {
        let db_path = match &config.db_path {
            Some(path) => path.clone(),
            None => paths::ensure_database_path_string()
                .context("Failed to determine ChatRelay database path")?,
        };
        AppCore::new(&db_path, llm, config.relay.clone())
            .await
            .context("Failed to initialize app core")?
    };

    let auth = AuthConfig::new(config.jwt_secret.as_deref());
    if auth.is_development() {
        tracing::warn!("No JWT secret configured, trusting the x-owner-id header");
    }

    let state = Arc::new(ServerState {
        core,
        default_model: config.default_model.clone(),
    });
    let app = build_router(state, auth);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    tracing::info!("ChatRelay running on http://{}", addr);

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;
    Ok(())
}
