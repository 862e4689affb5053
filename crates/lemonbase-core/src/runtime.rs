// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for the lemonbase engine.
//!
//! [`EngineRuntime`] wires the services and background workers together so
//! the engine can be embedded in an existing tokio application (the HTTP
//! server, tests) instead of managed piecemeal.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lemonbase_core::provisioner::MockProvisioner;
//! use lemonbase_core::runtime::EngineRuntime;
//! use lemonbase_core::store::MemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = EngineRuntime::builder()
//!         .store(Arc::new(MemoryStore::new()))
//!         .provisioner(Arc::new(MockProvisioner::succeeding()))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     let engine = runtime.engine().clone();
//!     // ... serve requests through `engine` ...
//!
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::attempt_sweeper::{AttemptSweeper, AttemptSweeperConfig};
use crate::billing_worker::{BillingWorker, BillingWorkerConfig};
use crate::capacity::CapacityManager;
use crate::config::EngineConfig;
use crate::error::Error;
use crate::grove::Grove;
use crate::harvest::HarvestArbiter;
use crate::ledger::{Account, Ledger};
use crate::lifecycle::InstanceManager;
use crate::provisioner::Provisioner;
use crate::questions;
use crate::quiz::QuizEngine;
use crate::regrowth_scheduler::{RegrowthScheduler, RegrowthSchedulerConfig};
use crate::store::Store;

/// Handle bundling every engine service, cloned into request handlers.
#[derive(Clone)]
pub struct Engine {
    /// The persistence backend.
    pub store: Arc<dyn Store>,
    /// Credit ledger.
    pub ledger: Ledger,
    /// Lemon position pool.
    pub grove: Grove,
    /// Quiz challenge engine.
    pub quiz: QuizEngine,
    /// Harvest arbiter.
    pub harvest: HarvestArbiter,
    /// Resource admission controller.
    pub capacity: Arc<CapacityManager>,
    /// Instance lifecycle manager.
    pub instances: Arc<InstanceManager>,
    /// Engine policy configuration.
    pub config: EngineConfig,
}

impl Engine {
    /// Register an account and credit the welcome bonus.
    ///
    /// The OTP/email verification handshake happens upstream; this is the
    /// post-verification hook that materializes the account.
    pub async fn register_account(&self, email: &str) -> crate::error::Result<Account> {
        let email = email.trim().to_ascii_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(Error::InvalidParameter {
                field: "email",
                message: "must be an email address".to_string(),
            });
        }

        let account = self.store.create_account(&email).await?;
        self.ledger
            .grant_welcome_bonus(account.id, self.config.welcome_bonus)
            .await?;
        info!(account_id = %account.id, "Account registered");

        self.store
            .account(account.id)
            .await?
            .ok_or(Error::AccountNotFound {
                account_id: account.id,
            })
    }

    /// Look up an account by id.
    pub async fn account(&self, account_id: uuid::Uuid) -> crate::error::Result<Account> {
        self.store
            .account(account_id)
            .await?
            .ok_or(Error::AccountNotFound { account_id })
    }
}

/// Builder for creating an [`EngineRuntime`].
pub struct EngineRuntimeBuilder {
    store: Option<Arc<dyn Store>>,
    provisioner: Option<Arc<dyn Provisioner>>,
    config: EngineConfig,
    spawn_workers: bool,
}

impl Default for EngineRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            provisioner: None,
            config: EngineConfig::default(),
            spawn_workers: true,
        }
    }
}

impl EngineRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the persistence backend (required).
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the provisioning backend (required).
    pub fn provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    /// Set the engine policy configuration.
    ///
    /// Default: [`EngineConfig::default()`].
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Skip spawning the background workers.
    ///
    /// Tests drive regrowth, sweeps, and billing passes directly for
    /// deterministic timing.
    pub fn without_workers(mut self) -> Self {
        self.spawn_workers = false;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<EngineRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let provisioner = self
            .provisioner
            .ok_or_else(|| anyhow::anyhow!("provisioner is required"))?;

        Ok(EngineRuntimeConfig {
            store,
            provisioner,
            config: self.config,
            spawn_workers: self.spawn_workers,
        })
    }
}

/// Configuration for an [`EngineRuntime`].
pub struct EngineRuntimeConfig {
    store: Arc<dyn Store>,
    provisioner: Arc<dyn Provisioner>,
    config: EngineConfig,
    spawn_workers: bool,
}

impl EngineRuntimeConfig {
    /// Seed the store, wire the services, and spawn the workers.
    pub async fn start(self) -> Result<EngineRuntime> {
        // Seed the question bank and the position set. Both are idempotent.
        self.store
            .seed_questions(&questions::seed_bank())
            .await
            .map_err(|e| anyhow::anyhow!("failed to seed questions: {}", e))?;

        let ledger = Ledger::new(self.store.clone(), self.config.max_stored_lemons);
        let grove = Grove::new(self.store.clone(), self.config.clone());
        grove
            .seed()
            .await
            .map_err(|e| anyhow::anyhow!("failed to seed positions: {}", e))?;

        let quiz = QuizEngine::new(self.store.clone(), self.config.clone());
        let harvest = HarvestArbiter::new(self.store.clone(), self.config.clone());
        let capacity = Arc::new(CapacityManager::new(
            self.store.clone(),
            self.config.capacity,
        ));
        let instances = Arc::new(InstanceManager::new(
            self.store.clone(),
            capacity.clone(),
            self.provisioner.clone(),
            self.config.clone(),
        ));

        let engine = Engine {
            store: self.store,
            ledger,
            grove: grove.clone(),
            quiz,
            harvest,
            capacity,
            instances: instances.clone(),
            config: self.config.clone(),
        };

        let mut workers = Vec::new();
        if self.spawn_workers {
            let regrowth = RegrowthScheduler::new(
                grove,
                RegrowthSchedulerConfig {
                    poll_interval: self.config.regrowth_poll_interval,
                },
            );
            let sweeper = AttemptSweeper::new(
                engine.store.clone(),
                AttemptSweeperConfig {
                    poll_interval: self.config.sweep_poll_interval,
                },
            );
            let billing = BillingWorker::new(
                instances,
                BillingWorkerConfig {
                    interval: self.config.billing_interval,
                },
            );

            for (shutdown, handle) in [
                (regrowth.shutdown_handle(), tokio::spawn(regrowth.run())),
                (sweeper.shutdown_handle(), tokio::spawn(sweeper.run())),
                (billing.shutdown_handle(), tokio::spawn(billing.run())),
            ] {
                workers.push(WorkerHandle { shutdown, handle });
            }
        }

        info!(workers = workers.len(), "EngineRuntime started");
        Ok(EngineRuntime { engine, workers })
    }
}

struct WorkerHandle {
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// A running lemonbase engine.
///
/// Owns the background workers (regrowth scheduler, attempt sweeper, billing
/// worker). Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct EngineRuntime {
    engine: Engine,
    workers: Vec<WorkerHandle>,
}

impl EngineRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> EngineRuntimeBuilder {
        EngineRuntimeBuilder::new()
    }

    /// Get the service handle for request handlers.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Check if all workers are still running.
    pub fn is_running(&self) -> bool {
        self.workers.iter().all(|w| !w.handle.is_finished())
    }

    /// Gracefully shut down the workers.
    pub async fn shutdown(self) {
        info!("EngineRuntime shutting down...");
        for worker in &self.workers {
            worker.shutdown.notify_one();
        }
        for worker in self.workers {
            if let Err(e) = worker.handle.await {
                error!("Worker task panicked: {}", e);
            }
        }
        info!("EngineRuntime shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioner::MockProvisioner;
    use crate::store::MemoryStore;

    #[test]
    fn build_fails_without_store() {
        let result = EngineRuntimeBuilder::new()
            .provisioner(Arc::new(MockProvisioner::succeeding()))
            .build();
        assert!(result.is_err());
        if let Err(err) = result {
            assert!(err.to_string().contains("store is required"));
        }
    }

    #[test]
    fn build_fails_without_provisioner() {
        let result = EngineRuntimeBuilder::new()
            .store(Arc::new(MemoryStore::new()))
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn start_seeds_positions_and_questions() {
        let runtime = EngineRuntime::builder()
            .store(Arc::new(MemoryStore::new()))
            .provisioner(Arc::new(MockProvisioner::succeeding()))
            .without_workers()
            .build()
            .expect("build")
            .start()
            .await
            .expect("start");

        let engine = runtime.engine();
        let positions = engine.grove.snapshot().await.expect("snapshot");
        assert_eq!(positions.len(), 10);
        assert!(positions.iter().all(|p| p.question_id.is_some()));

        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn workers_spawn_and_shut_down() {
        let runtime = EngineRuntime::builder()
            .store(Arc::new(MemoryStore::new()))
            .provisioner(Arc::new(MockProvisioner::succeeding()))
            .build()
            .expect("build")
            .start()
            .await
            .expect("start");

        assert!(runtime.is_running());
        runtime.shutdown().await;
    }
}
