// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The preset catalog.
//!
//! Presets are curated instance shapes users pick instead of a custom spec.
//! The catalog is fixed; costs are derived from the same formula as custom
//! shapes so the two paths can never disagree on pricing.

use serde::Serialize;

use crate::lifecycle::{DbMode, DbSize, DbType, LemonCost, ResourceSpec, custom_cost};

/// A curated instance shape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    /// Catalog identifier.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Database engine.
    #[serde(rename = "type")]
    pub db_type: DbType,
    /// Deployment mode.
    pub mode: DbMode,
    /// Size class.
    pub size: DbSize,
    /// Resources the preset allocates.
    pub resources: ResourceSpec,
    /// Lemon cost.
    pub cost: LemonCost,
    /// Short description for the catalog UI.
    pub description: &'static str,
    /// Display ordering.
    pub sort_order: i32,
}

fn preset(
    id: &'static str,
    name: &'static str,
    db_type: DbType,
    mode: DbMode,
    resources: ResourceSpec,
    description: &'static str,
    sort_order: i32,
) -> Preset {
    Preset {
        id,
        name,
        db_type,
        mode,
        size: resources.size(),
        cost: custom_cost(db_type, &resources),
        resources,
        description,
        sort_order,
    }
}

/// The full catalog, in display order.
pub fn catalog() -> Vec<Preset> {
    vec![
        preset(
            "redis-cache-tiny",
            "Tiny Redis Cache",
            DbType::Redis,
            DbMode::Basic,
            ResourceSpec { cpu: 0.1, memory_mb: 256, disk_gb: 1 },
            "A small in-memory cache for sessions and hot keys.",
            1,
        ),
        preset(
            "redis-small",
            "Small Redis",
            DbType::Redis,
            DbMode::Basic,
            ResourceSpec { cpu: 0.25, memory_mb: 512, disk_gb: 5 },
            "General-purpose Redis with room for queues and counters.",
            2,
        ),
        preset(
            "mongo-starter",
            "Starter MongoDB",
            DbType::MongoDb,
            DbMode::Standalone,
            ResourceSpec { cpu: 0.5, memory_mb: 1024, disk_gb: 10 },
            "A standalone document store for side projects.",
            3,
        ),
        preset(
            "mongo-medium",
            "Medium MongoDB",
            DbType::MongoDb,
            DbMode::Standalone,
            ResourceSpec { cpu: 1.0, memory_mb: 2048, disk_gb: 20 },
            "More memory and disk for growing collections.",
            4,
        ),
    ]
}

/// Look up a preset by id.
pub fn find(id: &str) -> Option<Preset> {
    catalog().into_iter().find(|p| p.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_ids_are_unique_and_findable() {
        let catalog = catalog();
        for preset in &catalog {
            assert_eq!(find(preset.id).map(|p| p.id), Some(preset.id));
        }
        let mut ids: Vec<_> = catalog.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), catalog.len());
    }

    #[test]
    fn preset_costs_match_the_custom_formula() {
        for preset in catalog() {
            let expected = custom_cost(preset.db_type, &preset.resources);
            assert_eq!(preset.cost.creation_cost, expected.creation_cost);
            assert_eq!(preset.cost.hourly_lemons, expected.hourly_lemons);
        }
    }

    #[test]
    fn preset_modes_match_their_engine() {
        for preset in catalog() {
            assert!(preset.mode.valid_for(preset.db_type));
        }
    }
}
