// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Resource admission control.
//!
//! Tracks cluster CPU/memory headroom and decides whether a requested
//! instance size can be admitted. A reservation token is held between the
//! headroom check and the instance-row insert so two concurrent creations
//! cannot both pass the check against the same headroom; the token is
//! committed once the row exists (the row then carries the usage) or rolled
//! back on failure. Error and Deleting instances do not count against
//! capacity.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::CapacityConfig;
use crate::error::{Error, Result};
use crate::lifecycle::ResourceSpec;
use crate::store::Store;

/// Per-tier admission thresholds, matching the preset catalog's smallest
/// shapes.
const TINY_CPU: f64 = 0.1;
/// Memory threshold for the tiny tier, in MB.
const TINY_MEMORY_MB: i64 = 256;
/// CPU threshold for the small tier.
const SMALL_CPU: f64 = 0.25;
/// Memory threshold for the small tier, in MB.
const SMALL_MEMORY_MB: i64 = 512;
/// CPU threshold for the medium tier.
const MEDIUM_CPU: f64 = 0.5;
/// Memory threshold for the medium tier, in MB.
const MEDIUM_MEMORY_MB: i64 = 1024;

/// An in-flight admission reservation.
///
/// Dropping the token without committing does not free the headroom; callers
/// must `commit` or `rollback` explicitly.
#[derive(Debug)]
pub struct CapacityToken(Uuid);

/// A CPU/memory pair, used for totals and usage figures.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityFigure {
    /// vCPUs.
    pub cpu: f64,
    /// Memory in MB.
    pub memory: i64,
}

/// Resource usage of one instance, for the status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceUsage {
    /// Instance identifier.
    pub instance_id: Uuid,
    /// Instance name.
    pub instance_name: String,
    /// Resources the instance occupies.
    pub resources: CapacityFigure,
    /// Instance status string.
    pub status: String,
}

/// Cluster capacity snapshot for `GET /system/resources`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacitySnapshot {
    /// Total cluster resources.
    pub total: CapacityFigure,
    /// Resources held back for the system.
    pub reserved: CapacityFigure,
    /// Resources available to instances (total minus system reserve).
    pub available: CapacityFigure,
    /// Resources occupied by live instances and in-flight admissions.
    pub used: CapacityFigure,
    /// Per-instance usage breakdown.
    pub instances: Vec<InstanceUsage>,
    /// Number of instances counting against capacity.
    pub active_count: i64,
    /// Whether a tiny instance can currently be admitted.
    pub can_create_tiny: bool,
    /// Whether a small instance can currently be admitted.
    pub can_create_small: bool,
    /// Whether a medium instance can currently be admitted.
    pub can_create_medium: bool,
}

/// The admission control service.
pub struct CapacityManager {
    store: Arc<dyn Store>,
    config: CapacityConfig,
    reservations: Mutex<HashMap<Uuid, ResourceSpec>>,
}

impl CapacityManager {
    /// Create an admission controller over the given store.
    pub fn new(store: Arc<dyn Store>, config: CapacityConfig) -> Self {
        Self {
            store,
            config,
            reservations: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve headroom for a pending instance creation.
    ///
    /// Fails `InsufficientCapacity` with the exhausted dimension named. The
    /// check and the token insert happen under one lock, so concurrent
    /// reservations serialize.
    pub async fn reserve(&self, spec: &ResourceSpec) -> Result<CapacityToken> {
        let mut reservations = self.reservations.lock().await;
        let (used_cpu, used_memory) = self.used_with(&reservations).await?;

        let free_cpu = self.config.available_cpu() - used_cpu;
        let free_memory = self.config.available_memory_mb() - used_memory;

        if spec.cpu > free_cpu {
            return Err(Error::InsufficientCapacity {
                reason: format!(
                    "CPU exhausted (free: {:.2} vCPU, requested: {:.2} vCPU)",
                    free_cpu.max(0.0),
                    spec.cpu
                ),
            });
        }
        if spec.memory_mb > free_memory {
            return Err(Error::InsufficientCapacity {
                reason: format!(
                    "memory exhausted (free: {} MB, requested: {} MB)",
                    free_memory.max(0),
                    spec.memory_mb
                ),
            });
        }

        let token = Uuid::new_v4();
        reservations.insert(token, *spec);
        Ok(CapacityToken(token))
    }

    /// Drop a token after the instance row exists; the row now carries the
    /// usage.
    pub async fn commit(&self, token: CapacityToken) {
        self.reservations.lock().await.remove(&token.0);
    }

    /// Drop a token after a failed creation, freeing the headroom.
    pub async fn rollback(&self, token: CapacityToken) {
        self.reservations.lock().await.remove(&token.0);
    }

    /// Cluster capacity snapshot for the status endpoint.
    pub async fn snapshot(&self) -> Result<CapacitySnapshot> {
        let reservations = self.reservations.lock().await;
        let instances = self.store.active_instances().await?;

        let mut used_cpu: f64 = reservations.values().map(|s| s.cpu).sum();
        let mut used_memory: i64 = reservations.values().map(|s| s.memory_mb).sum();
        let mut usages = Vec::with_capacity(instances.len());
        for instance in &instances {
            used_cpu += instance.resources.cpu;
            used_memory += instance.resources.memory_mb;
            usages.push(InstanceUsage {
                instance_id: instance.external_id,
                instance_name: instance.name.clone(),
                resources: CapacityFigure {
                    cpu: instance.resources.cpu,
                    memory: instance.resources.memory_mb,
                },
                status: instance.status.as_str().to_string(),
            });
        }

        let free_cpu = self.config.available_cpu() - used_cpu;
        let free_memory = self.config.available_memory_mb() - used_memory;

        Ok(CapacitySnapshot {
            total: CapacityFigure {
                cpu: self.config.total_cpu,
                memory: self.config.total_memory_mb,
            },
            reserved: CapacityFigure {
                cpu: self.config.system_reserved_cpu,
                memory: self.config.system_reserved_memory_mb,
            },
            available: CapacityFigure {
                cpu: self.config.available_cpu(),
                memory: self.config.available_memory_mb(),
            },
            used: CapacityFigure {
                cpu: used_cpu,
                memory: used_memory,
            },
            active_count: instances.len() as i64,
            instances: usages,
            can_create_tiny: free_cpu >= TINY_CPU && free_memory >= TINY_MEMORY_MB,
            can_create_small: free_cpu >= SMALL_CPU && free_memory >= SMALL_MEMORY_MB,
            can_create_medium: free_cpu >= MEDIUM_CPU && free_memory >= MEDIUM_MEMORY_MB,
        })
    }

    /// Usage across live instances plus the given in-flight reservations.
    async fn used_with(
        &self,
        reservations: &HashMap<Uuid, ResourceSpec>,
    ) -> Result<(f64, i64)> {
        let instances = self.store.active_instances().await?;
        let cpu = instances.iter().map(|i| i.resources.cpu).sum::<f64>()
            + reservations.values().map(|s| s.cpu).sum::<f64>();
        let memory = instances.iter().map(|i| i.resources.memory_mb).sum::<i64>()
            + reservations.values().map(|s| s.memory_mb).sum::<i64>();
        Ok((cpu, memory))
    }
}
