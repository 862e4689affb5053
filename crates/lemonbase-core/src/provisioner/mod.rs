// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioner trait definitions.
//!
//! Defines the abstract interface to the database-provisioning backend (a
//! cluster orchestrator in production). Provisioners are pure execution
//! engines - they do NOT touch the store. Status transitions and ledger
//! refunds are handled by the instance lifecycle manager when the outcome
//! arrives.

pub mod mock;

pub use self::mock::MockProvisioner;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::lifecycle::{DbMode, DbType, ResourceSpec};

/// Errors from provisioner operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProvisionerError {
    /// The backend rejected the request.
    #[error("Provisioning rejected: {0}")]
    Rejected(String),

    /// The backend failed while bringing the instance up.
    #[error("Provisioning failed: {0}")]
    Failed(String),

    /// Teardown of backend resources failed.
    #[error("Teardown failed: {0}")]
    TeardownFailed(String),
}

/// Result type for provisioner operations.
pub type Result<T> = std::result::Result<T, ProvisionerError>;

/// Everything the backend needs to bring an instance up.
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    /// Instance identifier; backend resources are labeled with it.
    pub external_id: Uuid,
    /// Owner account, for namespacing.
    pub owner_account_id: Uuid,
    /// Instance name.
    pub name: String,
    /// Database engine to provision.
    pub db_type: DbType,
    /// Deployment mode.
    pub mode: DbMode,
    /// Resources to allocate.
    pub resources: ResourceSpec,
}

/// Connection endpoint of a successfully provisioned instance.
#[derive(Debug, Clone)]
pub struct ProvisionedEndpoint {
    /// Host clients connect to.
    pub host: String,
    /// Port clients connect to.
    pub port: i32,
}

/// Trait for database-provisioning backends.
///
/// `provision` resolves when the backend has finished bringing the instance
/// up (or failed trying); the lifecycle manager awaits it from a spawned task
/// and feeds the outcome to `on_provision_result`, so instance creation never
/// blocks on the backend.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Provisioner type identifier (e.g., "k8s", "mock").
    fn provisioner_type(&self) -> &'static str;

    /// Bring an instance up. Resolves with the connection endpoint on
    /// success.
    async fn provision(&self, request: &ProvisionRequest) -> Result<ProvisionedEndpoint>;

    /// Tear down the backend resources of an instance. Idempotent: tearing
    /// down an unknown instance succeeds.
    async fn teardown(&self, external_id: Uuid) -> Result<()>;
}
