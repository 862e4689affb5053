// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Credit ledger: accounts and lemon transactions.
//!
//! Every balance change in the system flows through [`Ledger::apply`]. The
//! store executes the balance check, the transaction append, and the cached
//! balance update as one atomic unit, so the invariant
//! `lemon_balance == total_earned - total_spent` holds after any sequence of
//! concurrent operations. Transactions are immutable once written;
//! `balance_after` forms an auditable chain per account.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::Store;

/// Everything that can move a lemon balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Signup bonus credited on registration.
    WelcomeBonus,
    /// Credit from harvesting a lemon position.
    Harvest,
    /// Debit for creating a database instance (creation cost + first hour).
    InstanceCreate,
    /// Hourly maintenance debit for a running instance.
    InstanceMaintain,
    /// Refund of the creation debit after a failed provisioning.
    InstanceCreateRefund,
}

impl ActionType {
    /// Stable string form used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WelcomeBonus => "welcome_bonus",
            Self::Harvest => "harvest",
            Self::InstanceCreate => "instance_create",
            Self::InstanceMaintain => "instance_maintain",
            Self::InstanceCreateRefund => "instance_create_refund",
        }
    }

    /// Parse the storage string form.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "welcome_bonus" => Ok(Self::WelcomeBonus),
            "harvest" => Ok(Self::Harvest),
            "instance_create" => Ok(Self::InstanceCreate),
            "instance_maintain" => Ok(Self::InstanceMaintain),
            "instance_create_refund" => Ok(Self::InstanceCreateRefund),
            other => Err(Error::Other(format!("unknown action type '{}'", other))),
        }
    }
}

/// An account holding lemons.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Unique account identifier.
    pub id: Uuid,
    /// Account email, unique.
    pub email: String,
    /// Cached balance; always equals `total_earned - total_spent`.
    pub lemon_balance: i64,
    /// Lifetime lemons credited.
    pub total_earned: i64,
    /// Lifetime lemons debited.
    pub total_spent: i64,
    /// When the account last harvested, if ever.
    pub last_harvest_at: Option<DateTime<Utc>>,
    /// When the account was created.
    pub joined_at: DateTime<Utc>,
}

/// An immutable lemon transaction.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Unique transaction identifier.
    pub id: Uuid,
    /// Account whose balance changed.
    pub account_id: Uuid,
    /// What caused the change.
    pub action: ActionType,
    /// Signed amount: positive credits, negative debits.
    pub amount: i64,
    /// The account balance as of this transaction.
    pub balance_after: i64,
    /// Instance this transaction relates to, if any.
    pub instance_id: Option<Uuid>,
    /// Free-form context for the audit trail.
    pub note: String,
    /// When the transaction was written.
    pub created_at: DateTime<Utc>,
}

/// A balance change to be applied through the ledger.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    /// Account to apply the change to.
    pub account_id: Uuid,
    /// What caused the change.
    pub action: ActionType,
    /// Signed amount: positive credits, negative debits.
    pub amount: i64,
    /// Instance the change relates to, if any.
    pub instance_id: Option<Uuid>,
    /// Free-form context for the audit trail.
    pub note: String,
}

/// The single choke point for balance changes.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn Store>,
    max_stored_lemons: i64,
}

impl Ledger {
    /// Create a ledger over the given store.
    pub fn new(store: Arc<dyn Store>, max_stored_lemons: i64) -> Self {
        Self {
            store,
            max_stored_lemons,
        }
    }

    /// Apply a balance change.
    ///
    /// Debits fail `InsufficientBalance` when they would drive the balance
    /// below zero. Credits fail `StorageFull` when they would exceed the
    /// storage cap; refunds are exempt so a failed provisioning can always be
    /// made whole.
    pub async fn apply(&self, entry: LedgerEntry) -> Result<Transaction> {
        let cap = match entry.action {
            ActionType::InstanceCreateRefund => None,
            _ => Some(self.max_stored_lemons),
        };
        self.store.apply_transaction(entry, cap).await
    }

    /// Credit the signup bonus to a freshly registered account.
    pub async fn grant_welcome_bonus(&self, account_id: Uuid, amount: i64) -> Result<Transaction> {
        self.apply(LedgerEntry {
            account_id,
            action: ActionType::WelcomeBonus,
            amount,
            instance_id: None,
            note: "signup bonus".to_string(),
        })
        .await
    }

    /// Current balance for an account.
    pub async fn balance(&self, account_id: Uuid) -> Result<i64> {
        let account = self
            .store
            .account(account_id)
            .await?
            .ok_or(Error::AccountNotFound { account_id })?;
        Ok(account.lemon_balance)
    }

    /// Transaction history for an account, newest first.
    pub async fn transactions(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>> {
        self.store
            .transactions_for_account(account_id, limit, offset)
            .await
    }

    /// Total lemons harvested across all accounts.
    pub async fn total_harvested(&self) -> Result<i64> {
        self.store.total_harvested().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_type_round_trips_through_storage_form() {
        for action in [
            ActionType::WelcomeBonus,
            ActionType::Harvest,
            ActionType::InstanceCreate,
            ActionType::InstanceMaintain,
            ActionType::InstanceCreateRefund,
        ] {
            assert_eq!(ActionType::parse(action.as_str()).unwrap(), action);
        }
    }

    #[test]
    fn unknown_action_type_is_rejected() {
        assert!(ActionType::parse("teleport").is_err());
    }
}
