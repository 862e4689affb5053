// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock provisioner for development and tests.
//!
//! Resolves after a configurable latency with a fabricated endpoint, a
//! configured failure, or never (manual mode, for tests that drive
//! `on_provision_result` themselves).

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::{
    ProvisionRequest, ProvisionedEndpoint, Provisioner, ProvisionerError, Result,
};
use crate::lifecycle::DbType;

/// How the mock resolves provisioning requests.
#[derive(Debug, Clone)]
enum MockBehavior {
    /// Resolve successfully after the latency.
    Succeed,
    /// Fail with the given reason after the latency.
    Fail(String),
    /// Never resolve; the test settles the instance itself.
    Manual,
}

/// A provisioner that fabricates outcomes.
pub struct MockProvisioner {
    behavior: MockBehavior,
    latency: Duration,
    provisioned: Mutex<Vec<Uuid>>,
    torn_down: Mutex<Vec<Uuid>>,
}

impl MockProvisioner {
    /// A mock that provisions every instance successfully.
    pub fn succeeding() -> Self {
        Self {
            behavior: MockBehavior::Succeed,
            latency: Duration::from_millis(10),
            provisioned: Mutex::new(Vec::new()),
            torn_down: Mutex::new(Vec::new()),
        }
    }

    /// A mock that fails every instance with the given reason.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            behavior: MockBehavior::Fail(reason.into()),
            latency: Duration::from_millis(10),
            provisioned: Mutex::new(Vec::new()),
            torn_down: Mutex::new(Vec::new()),
        }
    }

    /// A mock that never resolves, leaving instances Provisioning until the
    /// caller settles them.
    pub fn manual() -> Self {
        Self {
            behavior: MockBehavior::Manual,
            latency: Duration::ZERO,
            provisioned: Mutex::new(Vec::new()),
            torn_down: Mutex::new(Vec::new()),
        }
    }

    /// Override the simulated backend latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Instances this mock has been asked to provision.
    pub fn provisioned(&self) -> Vec<Uuid> {
        self.provisioned.lock().expect("mock lock poisoned").clone()
    }

    /// Instances this mock has been asked to tear down.
    pub fn torn_down(&self) -> Vec<Uuid> {
        self.torn_down.lock().expect("mock lock poisoned").clone()
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    fn provisioner_type(&self) -> &'static str {
        "mock"
    }

    async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionedEndpoint> {
        self.provisioned
            .lock()
            .expect("mock lock poisoned")
            .push(request.external_id);

        match &self.behavior {
            MockBehavior::Manual => std::future::pending().await,
            MockBehavior::Succeed => {
                tokio::time::sleep(self.latency).await;
                let port = match request.db_type {
                    DbType::MongoDb => 27017,
                    DbType::Redis => 6379,
                };
                Ok(ProvisionedEndpoint {
                    host: format!("{}.mock.lemonbase.internal", request.external_id),
                    port,
                })
            }
            MockBehavior::Fail(reason) => {
                tokio::time::sleep(self.latency).await;
                Err(ProvisionerError::Failed(reason.clone()))
            }
        }
    }

    async fn teardown(&self, external_id: Uuid) -> Result<()> {
        self.torn_down
            .lock()
            .expect("mock lock poisoned")
            .push(external_id);
        Ok(())
    }
}
