// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Harvest arbiter.
//!
//! Resolves the final click of the harvest flow: the caller must hold the
//! live reservation created by their correct answer, and the click must land
//! before the window expires. The credit and the position release are applied
//! by the store as one atomic unit, so lemons are never credited for a
//! position that silently stays Reserved, and vice versa.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::quiz::{AttemptStatus, HarvestPhase};
use crate::store::{HarvestSettlement, Store};

/// Whether an account may start a harvest right now.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestAvailability {
    /// True outside the post-harvest cooldown.
    pub can_harvest: bool,
    /// Seconds until the cooldown ends; zero when harvestable.
    pub wait_seconds: i64,
}

/// Result of a successful harvest.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestReceipt {
    /// Lemons credited (the base amount, clipped at the storage cap).
    pub harvest_amount: i64,
    /// Balance after the credit.
    pub new_balance: i64,
    /// The ledger transaction recording the credit.
    pub transaction_id: Uuid,
    /// When the account may harvest again.
    pub next_harvest_time: DateTime<Utc>,
}

/// The harvest arbitration service.
#[derive(Clone)]
pub struct HarvestArbiter {
    store: Arc<dyn Store>,
    config: EngineConfig,
}

impl HarvestArbiter {
    /// Create an arbiter over the given store.
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Cooldown check for the harvestable endpoint.
    pub async fn availability(&self, account_id: Uuid) -> Result<HarvestAvailability> {
        let account = self
            .store
            .account(account_id)
            .await?
            .ok_or(Error::AccountNotFound { account_id })?;

        let Some(last) = account.last_harvest_at else {
            return Ok(HarvestAvailability {
                can_harvest: true,
                wait_seconds: 0,
            });
        };

        let cooldown = Duration::from_std(self.config.harvest_cooldown)
            .map_err(|e| Error::Other(format!("invalid cooldown: {}", e)))?;
        let until = last + cooldown;
        let now = Utc::now();
        if now < until {
            Ok(HarvestAvailability {
                can_harvest: false,
                wait_seconds: (until - now).num_seconds().max(1),
            })
        } else {
            Ok(HarvestAvailability {
                can_harvest: true,
                wait_seconds: 0,
            })
        }
    }

    /// Claim a reserved position.
    ///
    /// Exactly one of any number of competing claims on a position succeeds;
    /// the rest fail with `AlreadyHarvested`, `NotReserver`, or
    /// `WindowExpired` and no credit. On success the store applies the
    /// position release, the harvest credit, and `last_harvest_at` together.
    pub async fn harvest(
        &self,
        account_id: Uuid,
        position_id: i32,
        attempt_id: Uuid,
    ) -> Result<HarvestReceipt> {
        let attempt = self
            .store
            .attempt(attempt_id)
            .await?
            .ok_or(Error::AttemptNotFound { attempt_id })?;
        if attempt.account_id != account_id {
            return Err(Error::NotOwner);
        }
        if attempt.position_id != position_id {
            return Err(Error::InvalidParameter {
                field: "positionId",
                message: "attempt is for a different position".to_string(),
            });
        }
        if attempt.status != AttemptStatus::DoneCorrect {
            return Err(Error::InvalidParameter {
                field: "attemptId",
                message: "quiz was not passed".to_string(),
            });
        }
        match attempt.harvest_phase {
            HarvestPhase::Window => {}
            HarvestPhase::Harvested | HarvestPhase::Lost => return Err(Error::AlreadyHarvested),
            HarvestPhase::WindowExpired | HarvestPhase::None => return Err(Error::WindowExpired),
        }

        let now = Utc::now();
        let outcome = self
            .store
            .settle_harvest(HarvestSettlement {
                position_id,
                account_id,
                attempt_id,
                base_amount: self.config.harvest_base_amount,
                storage_cap: self.config.max_stored_lemons,
                now,
            })
            .await?;

        let cooldown = Duration::from_std(self.config.harvest_cooldown)
            .map_err(|e| Error::Other(format!("invalid cooldown: {}", e)))?;

        tracing::info!(
            account_id = %account_id,
            position_id,
            amount = outcome.amount,
            new_balance = outcome.new_balance,
            "Lemon harvested"
        );

        Ok(HarvestReceipt {
            harvest_amount: outcome.amount,
            new_balance: outcome.new_balance,
            transaction_id: outcome.transaction_id,
            next_harvest_time: now + cooldown,
        })
    }
}
