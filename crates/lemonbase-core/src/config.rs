// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine policy configuration.
//!
//! Harvest amounts, cooldowns, window lengths, and capacity totals are policy
//! constants, not contract. Defaults mirror the production deployment; every
//! value can be overridden through `LEMONBASE_*` environment variables.

use std::time::Duration;

/// Engine configuration: harvest rules, quiz timing, capacity totals, and
/// worker cadence.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of lemon positions on the shared tree.
    pub position_count: i32,
    /// Lemons credited per harvest before storage-cap clipping.
    pub harvest_base_amount: i64,
    /// Maximum lemons an account can store.
    pub max_stored_lemons: i64,
    /// Lemons credited on account registration.
    pub welcome_bonus: i64,
    /// Per-account cooldown after a successful harvest.
    pub harvest_cooldown: Duration,
    /// Length of the harvest window opened by a correct answer.
    pub harvest_window: Duration,
    /// Grace added to a question's time limit before the sweeper times the
    /// attempt out (covers network latency on submission).
    pub attempt_grace: Duration,
    /// How long a harvested position takes to regrow.
    pub regrowth_interval: Duration,
    /// How often the regrowth scheduler polls for due positions.
    pub regrowth_poll_interval: Duration,
    /// How often the attempt sweeper polls for overdue attempts and expired
    /// harvest windows.
    pub sweep_poll_interval: Duration,
    /// How often the billing worker runs.
    pub billing_interval: Duration,
    /// Minimum gap since the last charge before an instance is billed again.
    pub billing_min_gap: Duration,
    /// Maximum concurrent non-deleted instances per account.
    pub max_instances_per_account: i64,
    /// Cluster capacity available to instances.
    pub capacity: CapacityConfig,
}

/// Cluster-wide capacity totals.
///
/// Defaults correspond to a single m5a.large worker: 2 vCPU / 8 GB with
/// 0.5 vCPU / 1.5 GB held back for the system.
#[derive(Debug, Clone, Copy)]
pub struct CapacityConfig {
    /// Total vCPUs on the cluster.
    pub total_cpu: f64,
    /// Total memory in MB.
    pub total_memory_mb: i64,
    /// vCPUs reserved for the system.
    pub system_reserved_cpu: f64,
    /// Memory in MB reserved for the system.
    pub system_reserved_memory_mb: i64,
}

impl CapacityConfig {
    /// vCPUs available to instances.
    pub fn available_cpu(&self) -> f64 {
        self.total_cpu - self.system_reserved_cpu
    }

    /// Memory in MB available to instances.
    pub fn available_memory_mb(&self) -> i64 {
        self.total_memory_mb - self.system_reserved_memory_mb
    }
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            total_cpu: 2.0,
            total_memory_mb: 8192,
            system_reserved_cpu: 0.5,
            system_reserved_memory_mb: 1536,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            position_count: 10,
            harvest_base_amount: 5,
            max_stored_lemons: 500,
            welcome_bonus: 30,
            harvest_cooldown: Duration::from_secs(6 * 3600),
            harvest_window: Duration::from_secs(5),
            attempt_grace: Duration::from_secs(3),
            regrowth_interval: Duration::from_secs(30 * 60),
            regrowth_poll_interval: Duration::from_secs(15),
            sweep_poll_interval: Duration::from_secs(1),
            billing_interval: Duration::from_secs(3600),
            billing_min_gap: Duration::from_secs(50 * 60),
            max_instances_per_account: 2,
            capacity: CapacityConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `LEMONBASE_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(n) = env_parse::<i32>("LEMONBASE_POSITION_COUNT")? {
            if n <= 0 {
                return Err(ConfigError::InvalidValue("LEMONBASE_POSITION_COUNT"));
            }
            config.position_count = n;
        }
        if let Some(n) = env_parse::<i64>("LEMONBASE_HARVEST_BASE_AMOUNT")? {
            config.harvest_base_amount = n;
        }
        if let Some(n) = env_parse::<i64>("LEMONBASE_MAX_STORED_LEMONS")? {
            config.max_stored_lemons = n;
        }
        if let Some(n) = env_parse::<i64>("LEMONBASE_WELCOME_BONUS")? {
            config.welcome_bonus = n;
        }
        if let Some(secs) = env_parse::<u64>("LEMONBASE_HARVEST_COOLDOWN_SECS")? {
            config.harvest_cooldown = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("LEMONBASE_HARVEST_WINDOW_SECS")? {
            config.harvest_window = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("LEMONBASE_REGROWTH_INTERVAL_SECS")? {
            config.regrowth_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("LEMONBASE_BILLING_INTERVAL_SECS")? {
            config.billing_interval = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse::<i64>("LEMONBASE_MAX_INSTANCES_PER_ACCOUNT")? {
            config.max_instances_per_account = n;
        }
        if let Some(cpu) = env_parse::<f64>("LEMONBASE_TOTAL_CPU")? {
            config.capacity.total_cpu = cpu;
        }
        if let Some(mb) = env_parse::<i64>("LEMONBASE_TOTAL_MEMORY_MB")? {
            config.capacity.total_memory_mb = mb;
        }

        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key)),
        Err(_) => Ok(None),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable holds a value that does not parse.
    #[error("Invalid value for environment variable {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.position_count, 10);
        assert_eq!(config.harvest_base_amount, 5);
        assert_eq!(config.max_stored_lemons, 500);
        assert_eq!(config.harvest_cooldown, Duration::from_secs(21_600));
        assert_eq!(config.harvest_window, Duration::from_secs(5));
        assert_eq!(config.max_instances_per_account, 2);
    }

    #[test]
    fn capacity_headroom_subtracts_system_reserve() {
        let capacity = CapacityConfig::default();
        assert!((capacity.available_cpu() - 1.5).abs() < f64::EPSILON);
        assert_eq!(capacity.available_memory_mb(), 6656);
    }
}
