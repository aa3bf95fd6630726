use shareline::{
    AppState,
    config::{AppConfig, Env},
    create_router,
    repository::{RepositoryState, SqliteRepository},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Entry point: configuration, logging, database and the HTTP server, in that order.
/// Any startup failure is reported and the process exits non-zero.
#[tokio::main]
async fn main() {
    if let Err(message) = run().await {
        eprintln!("FATAL: {message}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    // 1. Configuration (fail-fast on missing production secrets)
    dotenv::dotenv().ok();
    let config = AppConfig::load().map_err(|e| format!("configuration error: {e}"))?;

    // 2. Logging filter. RUST_LOG wins over the local default.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "shareline=debug,tower_http=info,axum=trace".into());

    // 3. Pretty output locally, JSON for log aggregation in production.
    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);
    if config.auth_bypass {
        tracing::warn!("x-user-id header bypass is enabled; never expose this instance");
    }

    // 4. Database. Migrations run on connect.
    let repo = SqliteRepository::connect(&config.db_url)
        .await
        .map_err(|e| format!("failed to open database {}: {e}", config.db_url))?;
    let repo = Arc::new(repo) as RepositoryState;

    // 5. Router and server
    let bind_addr = config.bind_addr.clone();
    let app = create_router(AppState { repo, config });

    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| format!("failed to bind {bind_addr}: {e}"))?;

    tracing::info!("Listening on {}", bind_addr);
    tracing::info!("API Documentation (Swagger UI) available at /swagger-ui");

    axum::serve(listener, app)
        .await
        .map_err(|e| format!("server error: {e}"))
}
