// src/main.rs

use std::{process, sync::Arc, time::Duration};

use quizbank::{
    config::Config,
    handlers::auth::seed_admin_user,
    repository::PgRepository,
    routes,
    services::enrichment::ReasoningClient,
    state::AppState,
};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DB_CONNECT_RETRIES: u32 = 5;

#[tokio::main]
async fn main() {
    // Load configuration from environment (.env is read if present)
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::new(&config.rust_log);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    // Initialize Tracing (Logging)
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    if let Err(e) = run(config).await {
        tracing::error!("Server stopped: {}", e);
        process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let pool = connect_with_retry(&config.database_url).await?;
    tracing::info!("Database connected...");

    // Run Migrations Automatically
    tracing::info!("Running migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Migrations applied successfully.");

    let repo = Arc::new(PgRepository::new(pool));

    // Seed Admin User
    if let Err(e) = seed_admin_user(repo.as_ref(), &config).await {
        tracing::error!("Failed to seed admin user: {}", e);
    }

    if config.ai.api_key.is_none() {
        tracing::warn!("AI_API_KEY is not set, question enrichment will be unavailable");
    }
    let enricher = Arc::new(ReasoningClient::new(&config.ai)?);

    let addr = config.bind_addr;
    let state = AppState::new(repo, enricher, config);
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn connect_with_retry(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let mut retry_count = 0;
    loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(e) if retry_count >= DB_CONNECT_RETRIES => return Err(e),
            Err(e) => {
                retry_count += 1;
                tracing::warn!(
                    "Database not ready ({}), retrying in 2s... (Attempt {})",
                    e,
                    retry_count
                );
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}
