// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lemonbase API server binary.
//!
//! Starts the engine runtime (store, services, background workers) and
//! serves the HTTP contract. With `LEMONBASE_DATABASE_URL` set the engine
//! persists to PostgreSQL; without it, a volatile in-memory store backs a
//! development deployment.

use std::sync::Arc;

use tracing::{info, warn};

use lemonbase_core::config::EngineConfig;
use lemonbase_core::provisioner::{MockProvisioner, Provisioner};
use lemonbase_core::runtime::EngineRuntime;
use lemonbase_core::store::{MemoryStore, PostgresStore, Store};
use lemonbase_server::config::Config;
use lemonbase_server::{AppState, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lemonbase_server=info,lemonbase_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    let config = Config::from_env()?;
    let engine_config = EngineConfig::from_env()?;

    info!(
        listen_addr = %config.listen_addr,
        positions = engine_config.position_count,
        "Starting lemonbase server"
    );

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await?;
            PostgresStore::migrate(&pool)
                .await
                .map_err(|e| anyhow::anyhow!("migration failed: {}", e))?;
            info!("Connected to database, schema verified");
            Arc::new(PostgresStore::new(pool))
        }
        None => {
            warn!("LEMONBASE_DATABASE_URL not set; using in-memory store (state is volatile)");
            Arc::new(MemoryStore::new())
        }
    };

    // The cluster orchestrator integration deploys separately; this binary
    // ships the mock backend, which fabricates endpoints after a short delay.
    let provisioner: Arc<dyn Provisioner> = Arc::new(
        MockProvisioner::succeeding().with_latency(std::time::Duration::from_secs(2)),
    );
    info!(provisioner_type = provisioner.provisioner_type(), "Provisioner initialized");

    let runtime = EngineRuntime::builder()
        .store(store)
        .provisioner(provisioner)
        .config(engine_config)
        .build()?
        .start()
        .await?;

    let state = AppState::new(runtime.engine().clone());
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Server ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    runtime.shutdown().await;
    info!("Lemonbase server shut down");

    Ok(())
}
