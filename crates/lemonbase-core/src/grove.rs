// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The lemon grove: a fixed pool of harvest positions on the shared tree.
//!
//! Positions cycle `Available -> Reserved -> Empty -> Growing -> Available`.
//! Reservation is a compare-and-swap: among any number of concurrent callers
//! racing one Available position, exactly one wins. Losing the race is not a
//! fault at this layer; callers report `PositionNotAvailable` to the losing
//! attempt and the attempt keeps its quiz score.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::store::Store;

/// Lifecycle state of a lemon position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionState {
    /// Just harvested; regrowth has not been scheduled yet.
    Empty,
    /// Regrowing; becomes Available at `next_regrowth_at`.
    Growing,
    /// Carrying a ripe lemon, open to reservation.
    Available,
    /// Held by exactly one live harvest window.
    Reserved,
}

impl PositionState {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Growing => "growing",
            Self::Available => "available",
            Self::Reserved => "reserved",
        }
    }

    /// Parse the storage string form.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "empty" => Ok(Self::Empty),
            "growing" => Ok(Self::Growing),
            "available" => Ok(Self::Available),
            "reserved" => Ok(Self::Reserved),
            other => Err(Error::Other(format!("unknown position state '{}'", other))),
        }
    }
}

/// One harvest slot on the shared tree.
#[derive(Debug, Clone)]
pub struct Position {
    /// Slot index, `0..position_count`.
    pub position_id: i32,
    /// Current lifecycle state.
    pub state: PositionState,
    /// Account holding the live reservation, while Reserved.
    pub reserved_by: Option<Uuid>,
    /// Quiz attempt that opened the reservation, while Reserved.
    pub reserved_attempt: Option<Uuid>,
    /// When the reservation lapses, while Reserved.
    pub reservation_expires_at: Option<DateTime<Utc>>,
    /// When the position last became Available.
    pub available_since: Option<DateTime<Utc>>,
    /// When a Growing position ripens.
    pub next_regrowth_at: Option<DateTime<Utc>>,
    /// Question currently assigned to this position.
    pub question_id: Option<Uuid>,
}

/// Public snapshot of the grove for the global status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroveStatus {
    /// Positions currently open to harvest.
    pub available_positions: Vec<i32>,
    /// Total lemons harvested by everyone, ever.
    pub total_harvested: i64,
    /// When the next lemon ripens; absent when all positions are Available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_regrowth_time: Option<DateTime<Utc>>,
}

/// The position pool service.
#[derive(Clone)]
pub struct Grove {
    store: Arc<dyn Store>,
    config: EngineConfig,
}

impl Grove {
    /// Create a grove over the given store.
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Seed the fixed position set and assign a question to every position.
    ///
    /// Idempotent: positions that already exist are left untouched.
    pub async fn seed(&self) -> Result<()> {
        self.store.seed_positions(self.config.position_count).await?;
        for position in self.store.positions().await? {
            if position.question_id.is_none() {
                let question = self.store.random_question().await?;
                self.store
                    .assign_question(position.position_id, question.question_id)
                    .await?;
            }
        }
        Ok(())
    }

    /// Current state of every position.
    pub async fn snapshot(&self) -> Result<Vec<Position>> {
        self.store.positions().await
    }

    /// Public grove status for the frontend tree.
    pub async fn status(&self) -> Result<GroveStatus> {
        let positions = self.store.positions().await?;
        let available_positions: Vec<i32> = positions
            .iter()
            .filter(|p| p.state == PositionState::Available)
            .map(|p| p.position_id)
            .collect();

        let next_regrowth_time = if available_positions.len() as i32 >= self.config.position_count {
            None
        } else {
            self.store.next_regrowth_at().await?
        };

        Ok(GroveStatus {
            available_positions,
            total_harvested: self.store.total_harvested().await?,
            next_regrowth_time,
        })
    }

    /// Look up one position.
    pub async fn position(&self, position_id: i32) -> Result<Position> {
        self.store
            .position(position_id)
            .await?
            .ok_or(Error::NotFound {
                resource: "position",
                id: position_id.to_string(),
            })
    }

    /// Atomically reserve an Available position for a harvest window.
    ///
    /// Fails `PositionNotAvailable` when the position is in any other state,
    /// including when a concurrent caller reserved it first.
    pub async fn try_reserve(
        &self,
        position_id: i32,
        account_id: Uuid,
        attempt_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<Position> {
        self.store
            .try_reserve_position(position_id, account_id, attempt_id, expires_at)
            .await
    }

    /// Return a reservation without harvesting (caller gave up or lost).
    ///
    /// Only the reserving account can return; a stale return after the
    /// position moved on is a no-op.
    pub async fn release(&self, position_id: i32, account_id: Uuid) -> Result<()> {
        self.store.return_position(position_id, account_id).await
    }

    /// Schedule regrowth for harvested positions and promote ripe ones.
    ///
    /// Returns the ids of positions that became Available this pass. Called
    /// periodically by the regrowth scheduler; each promoted position gets a
    /// fresh random question.
    pub async fn tick_regrowth(&self, now: DateTime<Utc>) -> Result<Vec<i32>> {
        let regrow_at = now
            + chrono::Duration::from_std(self.config.regrowth_interval)
                .map_err(|e| Error::Other(format!("invalid regrowth interval: {}", e)))?;
        self.store.schedule_regrowth(regrow_at).await?;

        let promoted = self.store.regrow_due_positions(now).await?;
        for position_id in &promoted {
            let question = self.store.random_question().await?;
            self.store
                .assign_question(*position_id, question.question_id)
                .await?;
        }
        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_state_round_trips_through_storage_form() {
        for state in [
            PositionState::Empty,
            PositionState::Growing,
            PositionState::Available,
            PositionState::Reserved,
        ] {
            assert_eq!(PositionState::parse(state.as_str()).unwrap(), state);
        }
        assert!(PositionState::parse("ripe").is_err());
    }
}
