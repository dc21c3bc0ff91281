use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ito::{
    api, auth,
    clock::SystemClock,
    config::{GameRules, ServerConfig},
    questions::QuestionPool,
    state::AppState,
    store::MemoryStore,
    watcher, ws,
};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ito=debug,tower_http=debug,axum=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ITO server...");

    let config = ServerConfig::from_env();
    let rules = GameRules::from_env();
    let auth_config = Arc::new(auth::AuthConfig::from_env());
    let questions = QuestionPool::from_env().await;

    let state = Arc::new(AppState::new(
        Arc::new(MemoryStore::new()),
        Arc::new(questions),
        Arc::new(SystemClock),
        rules,
    ));

    if let Some(path) = &config.state_file {
        match watcher::load_snapshot(&state, path).await {
            Ok(true) => {}
            Ok(false) => tracing::info!(path = %path.display(), "No snapshot yet, starting empty"),
            Err(e) => {
                tracing::error!(path = %path.display(), "Failed to restore snapshot: {}", e);
                return;
            }
        }
        watcher::spawn_snapshot_writer(state.clone(), path.clone(), config.snapshot_interval);
    }

    // Resolves rounds and ends reveal pauses nobody's client advanced
    watcher::spawn_deadline_watcher(state.clone());

    // Protected admin routes (with HTTP Basic Auth)
    let admin_routes = Router::new()
        .route("/api/state/export", get(api::export_state))
        .route("/api/state/import", post(api::import_state))
        .layer(middleware::from_fn_with_state(
            auth_config.clone(),
            auth::admin_auth_middleware,
        ));

    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/health", get(api::health))
        .merge(admin_routes)
        .fallback_service(ServeDir::new(&config.static_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let listener = match tokio::net::TcpListener::bind(config.addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %config.addr, "Failed to bind: {}", e);
            return;
        }
    };
    tracing::info!("Listening on http://{}", config.addr);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        tracing::info!("Shutting down...");
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!("Server error: {}", e);
    }

    if let Some(path) = &config.state_file {
        if let Err(e) = watcher::save_snapshot(&state, path).await {
            tracing::error!(path = %path.display(), "Final snapshot failed: {}", e);
        }
    }
}
