// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Regrowth scheduler for the lemon grove.
//!
//! Periodically schedules regrowth for freshly harvested (Empty) positions
//! and promotes Growing positions whose ripening time has passed back to
//! Available, assigning each a fresh random question.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, error, info};

use crate::grove::Grove;

/// Regrowth scheduler configuration.
#[derive(Debug, Clone)]
pub struct RegrowthSchedulerConfig {
    /// How often to poll for due positions.
    pub poll_interval: Duration,
}

impl Default for RegrowthSchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
        }
    }
}

/// Regrowth scheduler that runs as a background task.
pub struct RegrowthScheduler {
    grove: Grove,
    config: RegrowthSchedulerConfig,
    shutdown: Arc<Notify>,
}

impl RegrowthScheduler {
    /// Create a new regrowth scheduler.
    pub fn new(grove: Grove, config: RegrowthSchedulerConfig) -> Self {
        Self {
            grove,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the regrowth loop.
    pub async fn run(self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Regrowth scheduler started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Regrowth scheduler shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match self.grove.tick_regrowth(Utc::now()).await {
                        Ok(promoted) if !promoted.is_empty() => {
                            info!(count = promoted.len(), positions = ?promoted, "Lemons regrown");
                        }
                        Ok(_) => debug!("No positions due for regrowth"),
                        Err(e) => error!(error = %e, "Regrowth pass failed"),
                    }
                }
            }
        }
    }
}
