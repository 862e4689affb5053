// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hourly billing worker.
//!
//! Charges every Running instance its hourly maintenance fee. Owners whose
//! balance cannot cover the charge get the instance Stopped with a reason -
//! never deleted - so topping up and restarting recovers it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{error, info};

use crate::lifecycle::InstanceManager;

/// Billing worker configuration.
#[derive(Debug, Clone)]
pub struct BillingWorkerConfig {
    /// How often to run a billing pass.
    pub interval: Duration,
}

impl Default for BillingWorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
        }
    }
}

/// Billing worker that runs as a background task.
pub struct BillingWorker {
    instances: Arc<InstanceManager>,
    config: BillingWorkerConfig,
    shutdown: Arc<Notify>,
}

impl BillingWorker {
    /// Create a new billing worker.
    pub fn new(instances: Arc<InstanceManager>, config: BillingWorkerConfig) -> Self {
        Self {
            instances,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the billing loop. One pass runs at startup, then every interval.
    pub async fn run(self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Billing worker started"
        );

        self.pass().await;

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("Billing worker shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    self.pass().await;
                }
            }
        }
    }

    /// One billing pass.
    async fn pass(&self) {
        match self.instances.bill_running(Utc::now()).await {
            Ok(summary) => {
                if summary.charged > 0 || summary.stopped > 0 {
                    info!(
                        charged = summary.charged,
                        stopped = summary.stopped,
                        "Billing pass complete"
                    );
                }
            }
            Err(e) => error!(error = %e, "Billing pass failed"),
        }
    }
}
