//! Agora - social network backend

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agora::{
    auth::{SqliteKeyStore, TokenService},
    clock::SystemClock,
    config::{Args, LogFormat},
    db::Database,
    server::{self, AppState},
    services::{spawn_logging_listener, EventBus, Services},
    snowflake::IdGenerator,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("agora={},info", args.log_level).into());
    let registry = tracing_subscriber::registry().with(filter);
    match args.log_format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Agora");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Database: {}", args.database_path.display());
    info!("Session TTL: {}s", args.session_ttl_seconds);
    info!("Lock wait timeout: {}ms", args.lock_wait_timeout_ms);
    info!("Request timeout: {}ms", args.request_timeout_ms);
    info!("======================================");

    let db = Database::open(&args.database_path, args.lock_wait_timeout())?;
    info!("Database ready at {}", db.path().display());

    let clock = Arc::new(SystemClock);
    let ids = Arc::new(IdGenerator::new(args.node_id, clock.clone())?);

    let tokens = Arc::new(
        TokenService::provision(
            Arc::new(SqliteKeyStore::new(db.clone())),
            ids.clone(),
            clock.clone(),
            args.session_ttl(),
        )
        .await?,
    );
    info!("Token signing key {} published", tokens.active_key_id()?);

    let events = Arc::new(EventBus::new());
    spawn_logging_listener(Arc::clone(&events));

    if let Some(interval) = args.key_rotation_interval() {
        spawn_key_rotation_task(Arc::clone(&tokens), interval);
        info!("Key rotation enabled every {}s", interval.as_secs());
    }

    let services = Services::new(db, tokens, ids, clock, events);
    let state = Arc::new(AppState::new(args, services));

    tokio::select! {
        result = server::run(state) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }

    Ok(())
}

/// Rotate the signing key on a fixed interval, then drop keys that can no
/// longer back an unexpired token
fn spawn_key_rotation_task(tokens: Arc<TokenService>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            if let Err(e) = tokens.rotate().await {
                warn!("Key rotation failed: {}", e);
                continue;
            }
            if let Err(e) = tokens.retire_stale_keys(interval).await {
                warn!("Retiring stale keys failed: {}", e);
            }
        }
    });
}
