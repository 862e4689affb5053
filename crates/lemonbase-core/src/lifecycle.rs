// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database instance lifecycle.
//!
//! Instances move through a provisioning state machine:
//!
//! ```text
//!   Provisioning ──► Running ◄──► Stopped
//!        │              │            │
//!        ▼              ▼            ▼
//!      Error         Deleting ──► (removed)
//! ```
//!
//! Creation debits the ledger (creation cost + first hour) and reserves
//! capacity before the row is inserted; a failed provisioning refunds the
//! full debit and frees the capacity. The hourly billing sweep charges
//! running instances and stops - never deletes - the ones whose owner cannot
//! pay.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::capacity::CapacityManager;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::presets;
use crate::provisioner::{ProvisionRequest, Provisioner, ProvisionedEndpoint, ProvisionerError};
use crate::store::Store;

/// Database engines on offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbType {
    /// MongoDB document store.
    #[serde(rename = "mongodb")]
    MongoDb,
    /// Redis key-value store.
    Redis,
}

impl DbType {
    /// Stable string form used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MongoDb => "mongodb",
            Self::Redis => "redis",
        }
    }

    /// Parse the storage string form.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "mongodb" => Ok(Self::MongoDb),
            "redis" => Ok(Self::Redis),
            other => Err(Error::InvalidParameter {
                field: "type",
                message: format!("unknown database type '{}'", other),
            }),
        }
    }

    /// The mode used when a custom request does not name one.
    pub fn default_mode(&self) -> DbMode {
        match self {
            Self::MongoDb => DbMode::Standalone,
            Self::Redis => DbMode::Basic,
        }
    }
}

/// Deployment modes, per engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbMode {
    /// Single MongoDB node.
    Standalone,
    /// MongoDB replica set.
    ReplicaSet,
    /// Sharded MongoDB cluster.
    Sharded,
    /// Single Redis node.
    Basic,
    /// Redis with sentinel failover.
    Sentinel,
    /// Redis cluster.
    Cluster,
}

impl DbMode {
    /// Stable string form used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::ReplicaSet => "replica_set",
            Self::Sharded => "sharded",
            Self::Basic => "basic",
            Self::Sentinel => "sentinel",
            Self::Cluster => "cluster",
        }
    }

    /// Parse the storage string form.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "standalone" => Ok(Self::Standalone),
            "replica_set" => Ok(Self::ReplicaSet),
            "sharded" => Ok(Self::Sharded),
            "basic" => Ok(Self::Basic),
            "sentinel" => Ok(Self::Sentinel),
            "cluster" => Ok(Self::Cluster),
            other => Err(Error::InvalidParameter {
                field: "mode",
                message: format!("unknown mode '{}'", other),
            }),
        }
    }

    /// Whether this mode belongs to the given engine.
    pub fn valid_for(&self, db_type: DbType) -> bool {
        match db_type {
            DbType::MongoDb => {
                matches!(self, Self::Standalone | Self::ReplicaSet | Self::Sharded)
            }
            DbType::Redis => matches!(self, Self::Basic | Self::Sentinel | Self::Cluster),
        }
    }
}

/// Size classes, derived from the resource spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbSize {
    /// Up to 256 MB / 0.25 vCPU.
    Tiny,
    /// Up to 512 MB / 1 vCPU.
    Small,
    /// Up to 2 GB / 2 vCPU.
    Medium,
    /// Everything above.
    Large,
}

impl DbSize {
    /// Stable string form used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tiny => "tiny",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }

    /// Parse the storage string form.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "tiny" => Ok(Self::Tiny),
            "small" => Ok(Self::Small),
            "medium" => Ok(Self::Medium),
            "large" => Ok(Self::Large),
            other => Err(Error::Other(format!("unknown size '{}'", other))),
        }
    }
}

/// CPU/memory/disk of one instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// vCPUs.
    pub cpu: f64,
    /// Memory in MB.
    #[serde(rename = "memory")]
    pub memory_mb: i64,
    /// Disk in GB.
    #[serde(rename = "disk")]
    pub disk_gb: i64,
}

impl ResourceSpec {
    /// Derive the size class.
    pub fn size(&self) -> DbSize {
        if self.memory_mb <= 256 && self.cpu <= 0.25 {
            DbSize::Tiny
        } else if self.memory_mb <= 512 && self.cpu <= 1.0 {
            DbSize::Small
        } else if self.memory_mb <= 2048 && self.cpu <= 2.0 {
            DbSize::Medium
        } else {
            DbSize::Large
        }
    }
}

/// What an instance costs in lemons.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LemonCost {
    /// One-off debit at creation.
    pub creation_cost: i64,
    /// Hourly maintenance debit while Running.
    pub hourly_lemons: i64,
}

/// Cost of a custom resource spec.
///
/// Memory drives the base rate (Redis: 1 lemon per 512 MB; MongoDB: 3 lemons
/// per GB), with surcharges for CPU above 1 vCPU and disk above 10 GB, floored
/// at 1 lemon per hour. Creation costs ten hours up front.
pub fn custom_cost(db_type: DbType, resources: &ResourceSpec) -> LemonCost {
    let mut base = match db_type {
        DbType::Redis => resources.memory_mb / 512,
        DbType::MongoDb => resources.memory_mb / 1024 * 3,
    };

    if resources.cpu > 1.0 {
        base += ((resources.cpu - 1.0).ceil() as i64) * 2;
    }
    if resources.disk_gb > 10 {
        base += (resources.disk_gb - 10) / 10;
    }
    if base < 1 {
        base = 1;
    }

    LemonCost {
        creation_cost: base * 10,
        hourly_lemons: base,
    }
}

/// Provisioning state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Backend is bringing the instance up.
    Provisioning,
    /// Serving traffic and accruing hourly charges.
    Running,
    /// Halted; no charges, restartable.
    Stopped,
    /// Operator-initiated maintenance.
    Maintenance,
    /// Provisioning or runtime failure; terminal unless retried manually.
    Error,
    /// Teardown in progress.
    Deleting,
}

impl InstanceStatus {
    /// Stable string form used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Maintenance => "maintenance",
            Self::Error => "error",
            Self::Deleting => "deleting",
        }
    }

    /// Parse the storage string form.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "provisioning" => Ok(Self::Provisioning),
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "maintenance" => Ok(Self::Maintenance),
            "error" => Ok(Self::Error),
            "deleting" => Ok(Self::Deleting),
            other => Err(Error::Other(format!("unknown instance status '{}'", other))),
        }
    }

    /// Whether the state machine allows moving to `target`.
    pub fn can_transition_to(&self, target: InstanceStatus) -> bool {
        use InstanceStatus::*;
        match self {
            Provisioning => matches!(target, Running | Error | Deleting),
            Running => matches!(target, Stopped | Maintenance | Error | Deleting),
            Stopped => matches!(target, Running | Error | Deleting),
            Maintenance => matches!(target, Running),
            Error => matches!(target, Deleting),
            Deleting => false,
        }
    }

    /// Whether instances in this state occupy cluster capacity.
    pub fn occupies_capacity(&self) -> bool {
        matches!(self, Self::Provisioning | Self::Running | Self::Stopped | Self::Maintenance)
    }
}

/// A database instance record.
#[derive(Debug, Clone)]
pub struct Instance {
    /// Public instance identifier.
    pub external_id: Uuid,
    /// Owning account.
    pub owner_account_id: Uuid,
    /// Instance name, unique per owner.
    pub name: String,
    /// Database engine.
    pub db_type: DbType,
    /// Deployment mode.
    pub mode: DbMode,
    /// Size class derived from resources.
    pub size: DbSize,
    /// Allocated resources.
    pub resources: ResourceSpec,
    /// Lemon cost.
    pub cost: LemonCost,
    /// Current lifecycle status.
    pub status: InstanceStatus,
    /// Human-readable reason for the current status.
    pub status_reason: String,
    /// Connection host, once Running.
    pub endpoint: Option<String>,
    /// Connection port, once Running.
    pub port: Option<i32>,
    /// Preset this instance was created from, if any.
    pub created_from_preset: Option<String>,
    /// When the instance was created.
    pub created_at: DateTime<Utc>,
    /// When the instance was last modified.
    pub updated_at: DateTime<Utc>,
    /// When the last hourly charge was taken.
    pub last_billed_at: Option<DateTime<Utc>>,
    /// When the instance was stopped, while Stopped.
    pub stopped_at: Option<DateTime<Utc>>,
}

/// How a create request names its shape: a preset id, or a custom spec.
///
/// Both resolve to one canonical (type, mode, resources, cost) before
/// admission, so nothing downstream branches on which form was used.
#[derive(Debug, Clone)]
pub enum InstanceSource {
    /// Use a preset from the catalog.
    Preset {
        /// Catalog preset id.
        preset_id: String,
    },
    /// Custom shape.
    Custom {
        /// Database engine.
        db_type: DbType,
        /// Deployment mode; the engine default when absent.
        mode: Option<DbMode>,
        /// Requested resources.
        resources: ResourceSpec,
    },
}

/// An instance creation request, already parsed by the API layer.
#[derive(Debug, Clone)]
pub struct CreateInstance {
    /// Instance name (3-50 characters, unique per owner).
    pub name: String,
    /// Preset or custom shape.
    pub source: InstanceSource,
}

/// The canonical shape a request resolves to.
#[derive(Debug, Clone)]
struct ResolvedShape {
    db_type: DbType,
    mode: DbMode,
    resources: ResourceSpec,
    cost: LemonCost,
    preset_id: Option<String>,
}

/// Counters reported by one billing pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct BillingSummary {
    /// Instances successfully charged.
    pub charged: u64,
    /// Instances stopped for insufficient balance.
    pub stopped: u64,
}

/// The instance lifecycle service.
pub struct InstanceManager {
    store: Arc<dyn Store>,
    capacity: Arc<CapacityManager>,
    provisioner: Arc<dyn Provisioner>,
    config: EngineConfig,
}

impl InstanceManager {
    /// Create a lifecycle manager over the given collaborators.
    pub fn new(
        store: Arc<dyn Store>,
        capacity: Arc<CapacityManager>,
        provisioner: Arc<dyn Provisioner>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            capacity,
            provisioner,
            config,
        }
    }

    /// Create an instance: resolve the shape, admit, debit, insert, and hand
    /// off to the provisioning backend.
    ///
    /// The quota/name/balance checks and the debit+insert are one atomic
    /// store operation, so a rejected request leaves no partial state. The
    /// call returns as soon as the row exists; the instance stays
    /// Provisioning until the backend reports back.
    pub async fn create(self: &Arc<Self>, account_id: Uuid, request: CreateInstance) -> Result<Instance> {
        if request.name.len() < 3 || request.name.len() > 50 {
            return Err(Error::InvalidParameter {
                field: "name",
                message: "must be 3-50 characters".to_string(),
            });
        }
        self.store
            .account(account_id)
            .await?
            .ok_or(Error::AccountNotFound { account_id })?;

        let shape = self.resolve_shape(&request.source)?;
        let total_cost = shape.cost.creation_cost + shape.cost.hourly_lemons;

        // Hold the admission token across the debit+insert so a concurrent
        // create cannot pass the headroom check against the same capacity.
        let token = self.capacity.reserve(&shape.resources).await?;

        let now = Utc::now();
        let instance = Instance {
            external_id: Uuid::new_v4(),
            owner_account_id: account_id,
            name: request.name,
            db_type: shape.db_type,
            mode: shape.mode,
            size: shape.resources.size(),
            resources: shape.resources,
            cost: shape.cost,
            status: InstanceStatus::Provisioning,
            status_reason: "Waiting for the provisioning backend".to_string(),
            endpoint: None,
            port: None,
            created_from_preset: shape.preset_id,
            created_at: now,
            updated_at: now,
            last_billed_at: None,
            stopped_at: None,
        };

        let instance = match self
            .store
            .create_instance_charged(instance, total_cost, self.config.max_instances_per_account)
            .await
        {
            Ok(instance) => {
                self.capacity.commit(token).await;
                instance
            }
            Err(e) => {
                self.capacity.rollback(token).await;
                return Err(e);
            }
        };

        tracing::info!(
            instance_id = %instance.external_id,
            account_id = %account_id,
            db_type = instance.db_type.as_str(),
            creation_cost = instance.cost.creation_cost,
            "Instance created, provisioning"
        );

        self.spawn_provisioning(&instance);
        Ok(instance)
    }

    /// Feed a provisioning outcome into the state machine.
    ///
    /// Success moves Provisioning to Running and records the endpoint;
    /// failure moves it to Error and refunds the full creation debit. An
    /// outcome for an instance that already left Provisioning (swept,
    /// deleted) is ignored.
    pub async fn on_provision_result(
        &self,
        external_id: Uuid,
        outcome: std::result::Result<ProvisionedEndpoint, ProvisionerError>,
    ) -> Result<()> {
        let Some(instance) = self.store.instance(external_id).await? else {
            tracing::warn!(instance_id = %external_id, "Provisioning result for unknown instance");
            return Ok(());
        };
        if instance.status != InstanceStatus::Provisioning {
            tracing::warn!(
                instance_id = %external_id,
                status = instance.status.as_str(),
                "Ignoring provisioning result for non-provisioning instance"
            );
            return Ok(());
        }

        match outcome {
            Ok(endpoint) => {
                self.store
                    .set_instance_endpoint(external_id, &endpoint.host, endpoint.port)
                    .await?;
                self.store
                    .update_instance_status(
                        external_id,
                        InstanceStatus::Running,
                        "Provisioned",
                    )
                    .await?;
                // The first hour was debited at creation.
                self.store.set_instance_billed(external_id, Utc::now()).await?;
                tracing::info!(
                    instance_id = %external_id,
                    host = %endpoint.host,
                    port = endpoint.port,
                    "Instance running"
                );
            }
            Err(e) => {
                let refund = instance.cost.creation_cost + instance.cost.hourly_lemons;
                self.store
                    .fail_instance_with_refund(external_id, &e.to_string(), refund)
                    .await?;
                tracing::warn!(
                    instance_id = %external_id,
                    error = %e,
                    refund,
                    "Provisioning failed, creation debit refunded"
                );
            }
        }
        Ok(())
    }

    /// Fetch one instance, scoped to its owner.
    pub async fn get(&self, account_id: Uuid, external_id: Uuid) -> Result<Instance> {
        let instance = self
            .store
            .instance(external_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                resource: "instance",
                id: external_id.to_string(),
            })?;
        if instance.owner_account_id != account_id {
            // Do not leak other owners' instance ids.
            return Err(Error::NotFound {
                resource: "instance",
                id: external_id.to_string(),
            });
        }
        Ok(instance)
    }

    /// All instances owned by an account, newest first.
    pub async fn list(&self, account_id: Uuid) -> Result<Vec<Instance>> {
        self.store.instances_for_owner(account_id).await
    }

    /// Delete an instance: tear down backend resources and remove the row.
    ///
    /// No refund for consumed running time.
    pub async fn delete(&self, account_id: Uuid, external_id: Uuid) -> Result<()> {
        let instance = self
            .store
            .instance(external_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                resource: "instance",
                id: external_id.to_string(),
            })?;
        if instance.owner_account_id != account_id {
            return Err(Error::NotOwner);
        }
        if instance.status == InstanceStatus::Deleting {
            return Err(Error::NotFound {
                resource: "instance",
                id: external_id.to_string(),
            });
        }

        self.store
            .update_instance_status(external_id, InstanceStatus::Deleting, "Deletion requested")
            .await?;

        if let Err(e) = self.provisioner.teardown(external_id).await {
            // Backend teardown failures must not strand the row.
            tracing::error!(instance_id = %external_id, error = %e, "Backend teardown failed");
        }

        self.store.remove_instance(external_id).await?;
        tracing::info!(instance_id = %external_id, "Instance deleted");
        Ok(())
    }

    /// Stop a running instance. No further hourly charges accrue.
    pub async fn stop(&self, account_id: Uuid, external_id: Uuid) -> Result<()> {
        let instance = self.get(account_id, external_id).await?;
        if !instance.status.can_transition_to(InstanceStatus::Stopped) {
            return Err(Error::InvalidStateTransition {
                from: instance.status.as_str().to_string(),
                to: InstanceStatus::Stopped.as_str().to_string(),
            });
        }
        self.store
            .update_instance_status(external_id, InstanceStatus::Stopped, "Stopped by owner")
            .await?;
        tracing::info!(instance_id = %external_id, "Instance stopped");
        Ok(())
    }

    /// Restart a stopped instance, charging one hour up front.
    pub async fn start(&self, account_id: Uuid, external_id: Uuid) -> Result<()> {
        let instance = self.get(account_id, external_id).await?;
        if instance.status != InstanceStatus::Stopped {
            return Err(Error::InvalidStateTransition {
                from: instance.status.as_str().to_string(),
                to: InstanceStatus::Running.as_str().to_string(),
            });
        }

        // Charge before flipping the status so a broke owner cannot get a
        // free hour.
        self.store
            .charge_instance_maintenance(external_id, instance.cost.hourly_lemons, Utc::now())
            .await?;
        self.store
            .update_instance_status(external_id, InstanceStatus::Running, "Restarted by owner")
            .await?;
        tracing::info!(instance_id = %external_id, "Instance restarted");
        Ok(())
    }

    /// One pass of the hourly billing sweep.
    ///
    /// Charges every Running instance whose last charge is older than the
    /// configured gap; owners who cannot pay get the instance Stopped with a
    /// reason, never deleted.
    pub async fn bill_running(&self, now: DateTime<Utc>) -> Result<BillingSummary> {
        let min_gap = chrono::Duration::from_std(self.config.billing_min_gap)
            .map_err(|e| Error::Other(format!("invalid billing gap: {}", e)))?;

        let mut summary = BillingSummary::default();
        for instance in self.store.running_instances().await? {
            if instance.cost.hourly_lemons == 0 {
                continue;
            }
            if let Some(last) = instance.last_billed_at {
                if now - last < min_gap {
                    continue;
                }
            }

            match self
                .store
                .charge_instance_maintenance(instance.external_id, instance.cost.hourly_lemons, now)
                .await
            {
                Ok(()) => {
                    summary.charged += 1;
                    tracing::debug!(
                        instance_id = %instance.external_id,
                        amount = instance.cost.hourly_lemons,
                        "Maintenance charged"
                    );
                }
                Err(Error::InsufficientBalance { .. }) => {
                    self.store
                        .update_instance_status(
                            instance.external_id,
                            InstanceStatus::Stopped,
                            "Stopped: insufficient lemons for maintenance",
                        )
                        .await?;
                    summary.stopped += 1;
                    tracing::info!(
                        instance_id = %instance.external_id,
                        account_id = %instance.owner_account_id,
                        "Instance stopped for insufficient balance"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        instance_id = %instance.external_id,
                        error = %e,
                        "Maintenance charge failed"
                    );
                }
            }
        }
        Ok(summary)
    }

    fn resolve_shape(&self, source: &InstanceSource) -> Result<ResolvedShape> {
        match source {
            InstanceSource::Preset { preset_id } => {
                let preset = presets::find(preset_id).ok_or_else(|| Error::NotFound {
                    resource: "preset",
                    id: preset_id.clone(),
                })?;
                Ok(ResolvedShape {
                    db_type: preset.db_type,
                    mode: preset.mode,
                    resources: preset.resources,
                    cost: preset.cost,
                    preset_id: Some(preset.id.to_string()),
                })
            }
            InstanceSource::Custom {
                db_type,
                mode,
                resources,
            } => {
                if resources.cpu <= 0.0 || resources.memory_mb <= 0 || resources.disk_gb <= 0 {
                    return Err(Error::InvalidParameter {
                        field: "resources",
                        message: "cpu, memory, and disk must be positive".to_string(),
                    });
                }
                let mode = mode.unwrap_or_else(|| db_type.default_mode());
                if !mode.valid_for(*db_type) {
                    return Err(Error::InvalidParameter {
                        field: "mode",
                        message: format!(
                            "mode '{}' is not valid for {}",
                            mode.as_str(),
                            db_type.as_str()
                        ),
                    });
                }
                Ok(ResolvedShape {
                    db_type: *db_type,
                    mode,
                    resources: *resources,
                    cost: custom_cost(*db_type, resources),
                    preset_id: None,
                })
            }
        }
    }

    fn spawn_provisioning(self: &Arc<Self>, instance: &Instance) {
        let manager = Arc::clone(self);
        let request = ProvisionRequest {
            external_id: instance.external_id,
            owner_account_id: instance.owner_account_id,
            name: instance.name.clone(),
            db_type: instance.db_type,
            mode: instance.mode,
            resources: instance.resources,
        };
        tokio::spawn(async move {
            let outcome = manager.provisioner.provision(&request).await;
            if let Err(e) = manager
                .on_provision_result(request.external_id, outcome)
                .await
            {
                tracing::error!(
                    instance_id = %request.external_id,
                    error = %e,
                    "Failed to record provisioning result"
                );
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_classes_follow_resource_thresholds() {
        let tiny = ResourceSpec { cpu: 0.1, memory_mb: 256, disk_gb: 1 };
        let small = ResourceSpec { cpu: 0.5, memory_mb: 512, disk_gb: 5 };
        let medium = ResourceSpec { cpu: 2.0, memory_mb: 2048, disk_gb: 20 };
        let large = ResourceSpec { cpu: 4.0, memory_mb: 8192, disk_gb: 100 };

        assert_eq!(tiny.size(), DbSize::Tiny);
        assert_eq!(small.size(), DbSize::Small);
        assert_eq!(medium.size(), DbSize::Medium);
        assert_eq!(large.size(), DbSize::Large);
    }

    #[test]
    fn custom_cost_scales_with_memory_cpu_and_disk() {
        // 2 GB MongoDB with extra CPU and disk:
        // base 6 (memory) + 2 (1 extra vCPU) + 1 (10 extra GB) = 9.
        let cost = custom_cost(
            DbType::MongoDb,
            &ResourceSpec { cpu: 2.0, memory_mb: 2048, disk_gb: 20 },
        );
        assert_eq!(cost.hourly_lemons, 9);
        assert_eq!(cost.creation_cost, 90);

        // Tiny Redis floors at 1 lemon per hour.
        let cost = custom_cost(
            DbType::Redis,
            &ResourceSpec { cpu: 0.1, memory_mb: 256, disk_gb: 1 },
        );
        assert_eq!(cost.hourly_lemons, 1);
        assert_eq!(cost.creation_cost, 10);
    }

    #[test]
    fn status_machine_allows_only_documented_edges() {
        use InstanceStatus::*;
        assert!(Provisioning.can_transition_to(Running));
        assert!(Provisioning.can_transition_to(Error));
        assert!(Running.can_transition_to(Stopped));
        assert!(Stopped.can_transition_to(Running));
        assert!(Error.can_transition_to(Deleting));

        assert!(!Error.can_transition_to(Running));
        assert!(!Deleting.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Provisioning));
    }

    #[test]
    fn modes_are_engine_scoped() {
        assert!(DbMode::Standalone.valid_for(DbType::MongoDb));
        assert!(!DbMode::Standalone.valid_for(DbType::Redis));
        assert!(DbMode::Sentinel.valid_for(DbType::Redis));
        assert!(!DbMode::Sentinel.valid_for(DbType::MongoDb));
    }

    #[test]
    fn error_and_deleting_do_not_occupy_capacity() {
        assert!(InstanceStatus::Provisioning.occupies_capacity());
        assert!(InstanceStatus::Running.occupies_capacity());
        assert!(InstanceStatus::Stopped.occupies_capacity());
        assert!(!InstanceStatus::Error.occupies_capacity());
        assert!(!InstanceStatus::Deleting.occupies_capacity());
    }
}
