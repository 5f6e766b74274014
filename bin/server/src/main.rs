use persona_studio_ai::{ActionDispatcher, GeminiBackend, Invoker};
use persona_studio_server::{
    app::{AppState, router},
    config::ServerConfig,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!(model = %config.gemini.model, "Loaded configuration");

    let policy = config.retry.policy().expect("invalid retry configuration");

    let pool = config.gemini.credential_pool();
    if pool.is_empty() {
        tracing::warn!(
            "No Gemini API key configured; AI requests will fail until GEMINI__API_KEY is set"
        );
    } else {
        tracing::info!(credentials = pool.len(), "Enrolled API credentials");
    }

    let backend =
        GeminiBackend::new(config.gemini.backend_config()).expect("failed to build Gemini client");
    let dispatcher = ActionDispatcher::new(Invoker::new(pool, policy), Arc::new(backend));

    let app = router(AppState::new(dispatcher));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
