// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker for quiz-attempt and harvest-window timeouts.
//!
//! Clients cannot be trusted to call back: a browser closed mid-quiz would
//! otherwise leave an attempt Started forever, and an unclicked harvest
//! window would leave its position Reserved forever. The sweeper enforces
//! both wall-clock deadlines server-side:
//!
//! - Started attempts past their answer deadline become Timeout.
//! - Reserved positions past their window expiry return to Available, and
//!   the backing attempts are marked WindowExpired.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::store::Store;

/// Attempt sweeper configuration.
#[derive(Debug, Clone)]
pub struct AttemptSweeperConfig {
    /// How often to sweep. Short, because harvest windows are seconds long.
    pub poll_interval: Duration,
}

impl Default for AttemptSweeperConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Sweeper that runs as a background task.
pub struct AttemptSweeper {
    store: Arc<dyn Store>,
    config: AttemptSweeperConfig,
    shutdown: Arc<Notify>,
}

impl AttemptSweeper {
    /// Create a new attempt sweeper.
    pub fn new(store: Arc<dyn Store>, config: AttemptSweeperConfig) -> Self {
        Self {
            store,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the sweep loop.
    pub async fn run(self) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Attempt sweeper started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Attempt sweeper shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    self.sweep().await;
                }
            }
        }
    }

    /// One sweep pass.
    async fn sweep(&self) {
        let now = Utc::now();

        match self.store.timeout_overdue_attempts(now).await {
            Ok(0) => {}
            Ok(count) => info!(count, "Timed out overdue quiz attempts"),
            Err(e) => error!(error = %e, "Failed to time out overdue attempts"),
        }

        match self.store.expire_harvest_windows(now).await {
            Ok(0) => debug!("No harvest windows to expire"),
            Ok(count) => info!(count, "Expired harvest windows, positions returned"),
            Err(e) => error!(error = %e, "Failed to expire harvest windows"),
        }
    }
}
