mod handlers;
mod language_config;
mod metrics;
mod routes;

use anyhow::Context;
use axum::Router;
use codeversus_common::store::ProblemStore;
use language_config::LanguageRegistry;
use redis::aio::ConnectionManager;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub redis: ConnectionManager,
    pub problems: Arc<ProblemStore>,
    pub languages: LanguageRegistry,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if env_or("LOG_FORMAT", "text") == "json" {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("CodeVersus API booting...");

    let languages_path = PathBuf::from(env_or("LANGUAGES_CONFIG", "config/languages.json"));
    let languages = LanguageRegistry::load_from_file(&languages_path)?;
    info!(languages = ?languages.enabled_languages(), "Loaded language registry");

    let problems_dir = PathBuf::from(env_or("PROBLEMS_DIR", "problems"));
    let problems = ProblemStore::load(&problems_dir)
        .with_context(|| format!("Failed to load problems from {}", problems_dir.display()))?;
    if problems.is_empty() {
        warn!(dir = %problems_dir.display(), "No problems published");
    }
    info!(problems = problems.len(), "Loaded problem content");

    // Connect to Redis
    let redis_url = env_or("REDIS_URL", "redis://127.0.0.1:6379");
    let client = redis::Client::open(redis_url.as_str()).context("Failed to create Redis client")?;
    let redis_conn = ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;

    info!("Connected to Redis: {}", redis_url);

    let state = Arc::new(AppState {
        redis: redis_conn,
        problems: Arc::new(problems),
        languages,
    });

    // Build router
    let app = Router::new().merge(routes::routes()).with_state(state);

    // Start server
    let addr = env_or("API_ADDR", "0.0.0.0:3000");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);
    info!("Ready to accept submissions");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
