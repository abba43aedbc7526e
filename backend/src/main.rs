use anyhow::Context;
use khana_pina_server::{
    AppState,
    auth::{JwtTokenService, TokenServiceState},
    config::{AppConfig, Env},
    create_router,
    repository::{InMemoryRepository, PostgresRepository, RepositoryState},
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Entry point: configuration, logging, database, token service, HTTP server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Configuration & Environment Loading (fail fast)
    dotenv::dotenv().ok();
    let config = AppConfig::load().context("invalid configuration")?;

    // 2. Logging: RUST_LOG wins, otherwise verbose for this crate.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "khana_pina_server=debug,tower_http=info".into());

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

    // 3. Document store
    let repo: RepositoryState = match &config.db_url {
        Some(db_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(db_url)
                .await
                .context("failed to connect to Postgres, check DB_URI")?;
            let repo = PostgresRepository::new(pool);
            repo.ensure_schema()
                .await
                .context("failed to create collection tables")?;
            Arc::new(repo)
        }
        None => {
            tracing::warn!("DB_URI not set, using the in-memory store; data is lost on exit");
            Arc::new(InMemoryRepository::new())
        }
    };

    repo.ping().await.context("database ping failed")?;
    tracing::info!("Pinged the database, connection is healthy");

    // 4. Unified State Assembly
    let tokens: TokenServiceState = Arc::new(JwtTokenService::from_config(&config));
    let port = config.port;
    let app_state = AppState {
        repo,
        tokens,
        config,
    };

    // 5. Router and Server Startup
    let app = create_router(app_state);
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("Khana-Pina server listening on {}", addr);
    tracing::info!("API Documentation (Swagger UI) available at: http://localhost:{}/swagger-ui", port);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
