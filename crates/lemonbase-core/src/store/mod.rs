// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence interfaces and backends.
//!
//! The [`Store`] trait is the engine's atomicity boundary: every method is
//! one atomic unit with respect to concurrent callers. The Postgres backend
//! gets this from SQL transactions and row locks; the in-memory backend from
//! a single state mutex. Services above the store never compose two store
//! calls and assume nothing changed in between.

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryStore;
pub use self::postgres::PostgresStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::grove::Position;
use crate::ledger::{Account, LedgerEntry, Transaction};
use crate::lifecycle::{Instance, InstanceStatus};
use crate::questions::Question;
use crate::quiz::{Attempt, AttemptStatus};

/// Inputs to the atomic harvest settlement.
#[derive(Debug, Clone)]
pub struct HarvestSettlement {
    /// Position being claimed.
    pub position_id: i32,
    /// Account claiming it.
    pub account_id: Uuid,
    /// Attempt whose window backs the claim.
    pub attempt_id: Uuid,
    /// Lemons to credit before storage-cap clipping.
    pub base_amount: i64,
    /// Storage cap; the credit is clipped to the remaining headroom.
    pub storage_cap: i64,
    /// Settlement wall-clock time.
    pub now: DateTime<Utc>,
}

/// Result of a successful harvest settlement.
#[derive(Debug, Clone)]
pub struct HarvestOutcome {
    /// Lemons actually credited after clipping.
    pub amount: i64,
    /// Balance after the credit.
    pub new_balance: i64,
    /// The ledger transaction that recorded the credit.
    pub transaction_id: Uuid,
}

/// Persistence interface used by the engine services.
///
/// Every method is atomic. Methods that enforce a business invariant
/// (`apply_transaction`, `try_reserve_position`, `settle_harvest`,
/// `create_attempt`, `finalize_attempt`, `create_instance_charged`,
/// `charge_instance_maintenance`) perform their checks inside the same
/// atomic unit as their writes.
#[async_trait]
pub trait Store: Send + Sync {
    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    /// Create an account with a zero balance. Fails `NameConflict` when the
    /// email is taken.
    async fn create_account(&self, email: &str) -> Result<Account>;

    /// Look up an account by id.
    async fn account(&self, account_id: Uuid) -> Result<Option<Account>>;

    /// Look up an account by email.
    async fn account_by_email(&self, email: &str) -> Result<Option<Account>>;

    // ------------------------------------------------------------------
    // Ledger
    // ------------------------------------------------------------------

    /// Apply a balance change: check, append, and update the cached balance
    /// atomically. Debits that would overdraw fail `InsufficientBalance`;
    /// credits past `cap` (when given) fail `StorageFull`.
    async fn apply_transaction(
        &self,
        entry: LedgerEntry,
        cap: Option<i64>,
    ) -> Result<Transaction>;

    /// Transaction history for an account, newest first.
    async fn transactions_for_account(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>>;

    /// Total lemons ever credited by harvests, across all accounts.
    async fn total_harvested(&self) -> Result<i64>;

    // ------------------------------------------------------------------
    // Positions
    // ------------------------------------------------------------------

    /// Ensure positions `0..count` exist, creating missing ones as Available.
    async fn seed_positions(&self, count: i32) -> Result<()>;

    /// All positions, ordered by id.
    async fn positions(&self) -> Result<Vec<Position>>;

    /// One position.
    async fn position(&self, position_id: i32) -> Result<Option<Position>>;

    /// Compare-and-swap Available -> Reserved. Exactly one of any number of
    /// concurrent callers wins; the rest fail `PositionNotAvailable`.
    async fn try_reserve_position(
        &self,
        position_id: i32,
        account_id: Uuid,
        attempt_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<Position>;

    /// Return a reservation held by `account_id` to Available. A stale
    /// return (position moved on) is a no-op.
    async fn return_position(&self, position_id: i32, account_id: Uuid) -> Result<()>;

    /// Atomically settle a harvest: verify the live reservation and window,
    /// clip the credit at the cap, move the position to Empty, append the
    /// harvest transaction, update the balance and `last_harvest_at`, and
    /// mark the attempt Harvested. See [`HarvestSettlement`].
    async fn settle_harvest(&self, settlement: HarvestSettlement) -> Result<HarvestOutcome>;

    /// Move every Empty position to Growing, ripening at `regrow_at`.
    /// Returns the scheduled position ids.
    async fn schedule_regrowth(&self, regrow_at: DateTime<Utc>) -> Result<Vec<i32>>;

    /// Promote Growing positions whose ripening time has passed to
    /// Available. Returns the promoted position ids.
    async fn regrow_due_positions(&self, now: DateTime<Utc>) -> Result<Vec<i32>>;

    /// Assign a question to a position.
    async fn assign_question(&self, position_id: i32, question_id: Uuid) -> Result<()>;

    /// Earliest pending ripening time, if any position is Growing.
    async fn next_regrowth_at(&self) -> Result<Option<DateTime<Utc>>>;

    /// Return every Reserved position whose window has lapsed to Available
    /// and mark the backing attempts WindowExpired. Returns how many windows
    /// were expired.
    async fn expire_harvest_windows(&self, now: DateTime<Utc>) -> Result<u64>;

    // ------------------------------------------------------------------
    // Questions
    // ------------------------------------------------------------------

    /// Load questions into the bank. Existing questions are kept.
    async fn seed_questions(&self, questions: &[Question]) -> Result<()>;

    /// Look up one question.
    async fn question(&self, question_id: Uuid) -> Result<Option<Question>>;

    /// A uniformly random question from the bank. Fails when the bank is
    /// empty.
    async fn random_question(&self) -> Result<Question>;

    // ------------------------------------------------------------------
    // Quiz attempts
    // ------------------------------------------------------------------

    /// Insert a Started attempt. Fails `AlreadyAttempting` when the account
    /// already has a live one; the check and insert are atomic.
    async fn create_attempt(&self, attempt: Attempt) -> Result<Attempt>;

    /// Look up one attempt.
    async fn attempt(&self, attempt_id: Uuid) -> Result<Option<Attempt>>;

    /// Move a Started attempt to a terminal status. Fails
    /// `AttemptAlreadyTerminal` when it already is one; terminal transitions
    /// happen exactly once.
    async fn finalize_attempt(
        &self,
        attempt_id: Uuid,
        status: AttemptStatus,
        selected_option: i32,
        submitted_at: DateTime<Utc>,
    ) -> Result<Attempt>;

    /// Record the harvest window opened for a correct answer.
    async fn open_harvest_window(
        &self,
        attempt_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Record that the attempt lost the reservation race.
    async fn mark_harvest_lost(&self, attempt_id: Uuid) -> Result<()>;

    /// Time out every Started attempt past its answer deadline. Returns how
    /// many were timed out.
    async fn timeout_overdue_attempts(&self, now: DateTime<Utc>) -> Result<u64>;

    // ------------------------------------------------------------------
    // Instances
    // ------------------------------------------------------------------

    /// Atomically check the owner quota, name uniqueness, and balance, debit
    /// the creation cost, and insert the Provisioning row. A failed check
    /// leaves no partial state.
    async fn create_instance_charged(
        &self,
        instance: Instance,
        total_cost: i64,
        max_per_account: i64,
    ) -> Result<Instance>;

    /// Look up one instance.
    async fn instance(&self, external_id: Uuid) -> Result<Option<Instance>>;

    /// All instances owned by an account, newest first.
    async fn instances_for_owner(&self, owner_account_id: Uuid) -> Result<Vec<Instance>>;

    /// Instances occupying cluster capacity (Provisioning/Running/Stopped/
    /// Maintenance).
    async fn active_instances(&self) -> Result<Vec<Instance>>;

    /// Running instances, for the billing sweep.
    async fn running_instances(&self) -> Result<Vec<Instance>>;

    /// Set an instance's status and reason.
    async fn update_instance_status(
        &self,
        external_id: Uuid,
        status: InstanceStatus,
        reason: &str,
    ) -> Result<()>;

    /// Record the connection endpoint reported by the backend.
    async fn set_instance_endpoint(
        &self,
        external_id: Uuid,
        host: &str,
        port: i32,
    ) -> Result<()>;

    /// Record when the instance was last billed.
    async fn set_instance_billed(&self, external_id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Atomically move an instance to Error and refund the creation debit.
    async fn fail_instance_with_refund(
        &self,
        external_id: Uuid,
        reason: &str,
        refund: i64,
    ) -> Result<()>;

    /// Atomically debit one maintenance charge and stamp `last_billed_at`.
    /// Fails `InsufficientBalance` without charging.
    async fn charge_instance_maintenance(
        &self,
        external_id: Uuid,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Remove an instance row.
    async fn remove_instance(&self, external_id: Uuid) -> Result<()>;

    // ------------------------------------------------------------------
    // Health
    // ------------------------------------------------------------------

    /// Whether the backend is reachable.
    async fn health_check(&self) -> Result<bool>;
}
