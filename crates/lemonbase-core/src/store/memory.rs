// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory store backend.
//!
//! Backs development deployments and the hermetic test suite. A single state
//! mutex makes every trait method one atomic unit, which is exactly the
//! contract the Postgres backend provides through SQL transactions.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{HarvestOutcome, HarvestSettlement, Store};
use crate::error::{Error, Result};
use crate::grove::{Position, PositionState};
use crate::ledger::{Account, ActionType, LedgerEntry, Transaction};
use crate::lifecycle::{Instance, InstanceStatus};
use crate::questions::Question;
use crate::quiz::{Attempt, AttemptStatus, HarvestPhase};

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<Uuid, Account>,
    transactions: Vec<Transaction>,
    positions: HashMap<i32, Position>,
    questions: HashMap<Uuid, Question>,
    attempts: HashMap<Uuid, Attempt>,
    instances: HashMap<Uuid, Instance>,
}

/// A store holding everything in process memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Apply a balance change to an account under the state lock.
fn apply_locked(
    state: &mut MemoryState,
    entry: LedgerEntry,
    cap: Option<i64>,
) -> Result<Transaction> {
    let account = state
        .accounts
        .get_mut(&entry.account_id)
        .ok_or(Error::AccountNotFound {
            account_id: entry.account_id,
        })?;

    let new_balance = account.lemon_balance + entry.amount;
    if entry.amount < 0 && new_balance < 0 {
        return Err(Error::InsufficientBalance {
            required: -entry.amount,
            missing: -new_balance,
        });
    }
    if entry.amount > 0 {
        if let Some(cap) = cap {
            if new_balance > cap {
                return Err(Error::StorageFull { cap });
            }
        }
    }

    account.lemon_balance = new_balance;
    if entry.amount >= 0 {
        account.total_earned += entry.amount;
    } else {
        account.total_spent += -entry.amount;
    }

    let tx = Transaction {
        id: Uuid::new_v4(),
        account_id: entry.account_id,
        action: entry.action,
        amount: entry.amount,
        balance_after: new_balance,
        instance_id: entry.instance_id,
        note: entry.note,
        created_at: Utc::now(),
    };
    state.transactions.push(tx.clone());
    Ok(tx)
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_account(&self, email: &str) -> Result<Account> {
        let mut state = self.state.lock().await;
        if state.accounts.values().any(|a| a.email == email) {
            return Err(Error::NameConflict {
                name: email.to_string(),
            });
        }
        let account = Account {
            id: Uuid::new_v4(),
            email: email.to_string(),
            lemon_balance: 0,
            total_earned: 0,
            total_spent: 0,
            last_harvest_at: None,
            joined_at: Utc::now(),
        };
        state.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn account(&self, account_id: Uuid) -> Result<Option<Account>> {
        Ok(self.state.lock().await.accounts.get(&account_id).cloned())
    }

    async fn account_by_email(&self, email: &str) -> Result<Option<Account>> {
        Ok(self
            .state
            .lock()
            .await
            .accounts
            .values()
            .find(|a| a.email == email)
            .cloned())
    }

    async fn apply_transaction(
        &self,
        entry: LedgerEntry,
        cap: Option<i64>,
    ) -> Result<Transaction> {
        let mut state = self.state.lock().await;
        apply_locked(&mut state, entry, cap)
    }

    async fn transactions_for_account(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>> {
        let state = self.state.lock().await;
        let mut txs: Vec<Transaction> = state
            .transactions
            .iter()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect();
        txs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(txs
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn total_harvested(&self) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.action == ActionType::Harvest)
            .map(|t| t.amount)
            .sum())
    }

    async fn seed_positions(&self, count: i32) -> Result<()> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        for position_id in 0..count {
            state.positions.entry(position_id).or_insert(Position {
                position_id,
                state: PositionState::Available,
                reserved_by: None,
                reserved_attempt: None,
                reservation_expires_at: None,
                available_since: Some(now),
                next_regrowth_at: None,
                question_id: None,
            });
        }
        Ok(())
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        let state = self.state.lock().await;
        let mut positions: Vec<Position> = state.positions.values().cloned().collect();
        positions.sort_by_key(|p| p.position_id);
        Ok(positions)
    }

    async fn position(&self, position_id: i32) -> Result<Option<Position>> {
        Ok(self.state.lock().await.positions.get(&position_id).cloned())
    }

    async fn try_reserve_position(
        &self,
        position_id: i32,
        account_id: Uuid,
        attempt_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<Position> {
        let mut state = self.state.lock().await;
        let position = state
            .positions
            .get_mut(&position_id)
            .ok_or(Error::PositionNotAvailable { position_id })?;
        if position.state != PositionState::Available {
            return Err(Error::PositionNotAvailable { position_id });
        }
        position.state = PositionState::Reserved;
        position.reserved_by = Some(account_id);
        position.reserved_attempt = Some(attempt_id);
        position.reservation_expires_at = Some(expires_at);
        Ok(position.clone())
    }

    async fn return_position(&self, position_id: i32, account_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(position) = state.positions.get_mut(&position_id) {
            if position.state == PositionState::Reserved
                && position.reserved_by == Some(account_id)
            {
                position.state = PositionState::Available;
                position.reserved_by = None;
                position.reserved_attempt = None;
                position.reservation_expires_at = None;
            }
        }
        Ok(())
    }

    async fn settle_harvest(&self, settlement: HarvestSettlement) -> Result<HarvestOutcome> {
        let mut state = self.state.lock().await;

        let position = state
            .positions
            .get(&settlement.position_id)
            .ok_or(Error::PositionNotAvailable {
                position_id: settlement.position_id,
            })?
            .clone();

        match position.state {
            PositionState::Reserved => {
                if position.reserved_by != Some(settlement.account_id) {
                    return Err(Error::NotReserver);
                }
                let expired = position
                    .reservation_expires_at
                    .is_none_or(|at| at <= settlement.now);
                if expired {
                    let p = state
                        .positions
                        .get_mut(&settlement.position_id)
                        .expect("position vanished under lock");
                    p.state = PositionState::Available;
                    p.reserved_by = None;
                    p.reserved_attempt = None;
                    p.reservation_expires_at = None;
                    if let Some(attempt) = state.attempts.get_mut(&settlement.attempt_id) {
                        attempt.harvest_phase = HarvestPhase::WindowExpired;
                    }
                    return Err(Error::WindowExpired);
                }
            }
            PositionState::Empty | PositionState::Growing => {
                return Err(Error::AlreadyHarvested);
            }
            PositionState::Available => return Err(Error::WindowExpired),
        }

        let balance = state
            .accounts
            .get(&settlement.account_id)
            .ok_or(Error::AccountNotFound {
                account_id: settlement.account_id,
            })?
            .lemon_balance;
        let amount = settlement
            .base_amount
            .min(settlement.storage_cap - balance);
        if amount <= 0 {
            let p = state
                .positions
                .get_mut(&settlement.position_id)
                .expect("position vanished under lock");
            p.state = PositionState::Available;
            p.reserved_by = None;
            p.reserved_attempt = None;
            p.reservation_expires_at = None;
            return Err(Error::StorageFull {
                cap: settlement.storage_cap,
            });
        }

        let tx = apply_locked(
            &mut state,
            LedgerEntry {
                account_id: settlement.account_id,
                action: ActionType::Harvest,
                amount,
                instance_id: None,
                note: format!("harvested position {}", settlement.position_id),
            },
            Some(settlement.storage_cap),
        )?;

        let account = state
            .accounts
            .get_mut(&settlement.account_id)
            .expect("account vanished under lock");
        account.last_harvest_at = Some(settlement.now);

        let p = state
            .positions
            .get_mut(&settlement.position_id)
            .expect("position vanished under lock");
        p.state = PositionState::Empty;
        p.reserved_by = None;
        p.reserved_attempt = None;
        p.reservation_expires_at = None;
        p.available_since = None;

        if let Some(attempt) = state.attempts.get_mut(&settlement.attempt_id) {
            attempt.harvest_phase = HarvestPhase::Harvested;
        }

        Ok(HarvestOutcome {
            amount,
            new_balance: tx.balance_after,
            transaction_id: tx.id,
        })
    }

    async fn schedule_regrowth(&self, regrow_at: DateTime<Utc>) -> Result<Vec<i32>> {
        let mut state = self.state.lock().await;
        let mut scheduled = Vec::new();
        for position in state.positions.values_mut() {
            if position.state == PositionState::Empty {
                position.state = PositionState::Growing;
                position.next_regrowth_at = Some(regrow_at);
                scheduled.push(position.position_id);
            }
        }
        scheduled.sort_unstable();
        Ok(scheduled)
    }

    async fn regrow_due_positions(&self, now: DateTime<Utc>) -> Result<Vec<i32>> {
        let mut state = self.state.lock().await;
        let mut promoted = Vec::new();
        for position in state.positions.values_mut() {
            if position.state == PositionState::Growing
                && position.next_regrowth_at.is_some_and(|at| at <= now)
            {
                position.state = PositionState::Available;
                position.available_since = Some(now);
                position.next_regrowth_at = None;
                promoted.push(position.position_id);
            }
        }
        promoted.sort_unstable();
        Ok(promoted)
    }

    async fn assign_question(&self, position_id: i32, question_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        let position = state
            .positions
            .get_mut(&position_id)
            .ok_or(Error::NotFound {
                resource: "position",
                id: position_id.to_string(),
            })?;
        position.question_id = Some(question_id);
        Ok(())
    }

    async fn next_regrowth_at(&self) -> Result<Option<DateTime<Utc>>> {
        let state = self.state.lock().await;
        Ok(state
            .positions
            .values()
            .filter(|p| p.state == PositionState::Growing)
            .filter_map(|p| p.next_regrowth_at)
            .min())
    }

    async fn expire_harvest_windows(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut expired_attempts = Vec::new();
        let mut count = 0;
        for position in state.positions.values_mut() {
            if position.state == PositionState::Reserved
                && position.reservation_expires_at.is_some_and(|at| at <= now)
            {
                if let Some(attempt_id) = position.reserved_attempt {
                    expired_attempts.push(attempt_id);
                }
                position.state = PositionState::Available;
                position.reserved_by = None;
                position.reserved_attempt = None;
                position.reservation_expires_at = None;
                count += 1;
            }
        }
        for attempt_id in expired_attempts {
            if let Some(attempt) = state.attempts.get_mut(&attempt_id) {
                if attempt.harvest_phase == HarvestPhase::Window {
                    attempt.harvest_phase = HarvestPhase::WindowExpired;
                }
            }
        }
        Ok(count)
    }

    async fn seed_questions(&self, questions: &[Question]) -> Result<()> {
        let mut state = self.state.lock().await;
        for question in questions {
            state
                .questions
                .entry(question.question_id)
                .or_insert_with(|| question.clone());
        }
        Ok(())
    }

    async fn question(&self, question_id: Uuid) -> Result<Option<Question>> {
        Ok(self.state.lock().await.questions.get(&question_id).cloned())
    }

    async fn random_question(&self) -> Result<Question> {
        let state = self.state.lock().await;
        let ids: Vec<Uuid> = state.questions.keys().copied().collect();
        let id = ids
            .choose(&mut rand::thread_rng())
            .ok_or_else(|| Error::Other("question bank is empty".to_string()))?;
        Ok(state.questions[id].clone())
    }

    async fn create_attempt(&self, attempt: Attempt) -> Result<Attempt> {
        let mut state = self.state.lock().await;
        let has_live = state
            .attempts
            .values()
            .any(|a| a.account_id == attempt.account_id && a.status == AttemptStatus::Started);
        if has_live {
            return Err(Error::AlreadyAttempting);
        }
        state.attempts.insert(attempt.attempt_id, attempt.clone());
        Ok(attempt)
    }

    async fn attempt(&self, attempt_id: Uuid) -> Result<Option<Attempt>> {
        Ok(self.state.lock().await.attempts.get(&attempt_id).cloned())
    }

    async fn finalize_attempt(
        &self,
        attempt_id: Uuid,
        status: AttemptStatus,
        selected_option: i32,
        submitted_at: DateTime<Utc>,
    ) -> Result<Attempt> {
        let mut state = self.state.lock().await;
        let attempt = state
            .attempts
            .get_mut(&attempt_id)
            .ok_or(Error::AttemptNotFound { attempt_id })?;
        if attempt.status.is_terminal() {
            return Err(Error::AttemptAlreadyTerminal { attempt_id });
        }
        attempt.status = status;
        attempt.selected_option = Some(selected_option);
        attempt.submitted_at = Some(submitted_at);
        Ok(attempt.clone())
    }

    async fn open_harvest_window(
        &self,
        attempt_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let attempt = state
            .attempts
            .get_mut(&attempt_id)
            .ok_or(Error::AttemptNotFound { attempt_id })?;
        attempt.harvest_phase = HarvestPhase::Window;
        attempt.harvest_window_expires_at = Some(expires_at);
        Ok(())
    }

    async fn mark_harvest_lost(&self, attempt_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        let attempt = state
            .attempts
            .get_mut(&attempt_id)
            .ok_or(Error::AttemptNotFound { attempt_id })?;
        attempt.harvest_phase = HarvestPhase::Lost;
        Ok(())
    }

    async fn timeout_overdue_attempts(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut count = 0;
        for attempt in state.attempts.values_mut() {
            if attempt.status == AttemptStatus::Started && attempt.answer_deadline <= now {
                attempt.status = AttemptStatus::Timeout;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn create_instance_charged(
        &self,
        instance: Instance,
        total_cost: i64,
        max_per_account: i64,
    ) -> Result<Instance> {
        let mut state = self.state.lock().await;

        let owned = state
            .instances
            .values()
            .filter(|i| i.owner_account_id == instance.owner_account_id)
            .count() as i64;
        if owned >= max_per_account {
            return Err(Error::OwnerQuotaExceeded {
                max: max_per_account,
            });
        }
        let name_taken = state.instances.values().any(|i| {
            i.owner_account_id == instance.owner_account_id && i.name == instance.name
        });
        if name_taken {
            return Err(Error::NameConflict {
                name: instance.name.clone(),
            });
        }

        apply_locked(
            &mut state,
            LedgerEntry {
                account_id: instance.owner_account_id,
                action: ActionType::InstanceCreate,
                amount: -total_cost,
                instance_id: Some(instance.external_id),
                note: format!("instance {} creation", instance.name),
            },
            None,
        )?;

        state.instances.insert(instance.external_id, instance.clone());
        Ok(instance)
    }

    async fn instance(&self, external_id: Uuid) -> Result<Option<Instance>> {
        Ok(self.state.lock().await.instances.get(&external_id).cloned())
    }

    async fn instances_for_owner(&self, owner_account_id: Uuid) -> Result<Vec<Instance>> {
        let state = self.state.lock().await;
        let mut instances: Vec<Instance> = state
            .instances
            .values()
            .filter(|i| i.owner_account_id == owner_account_id)
            .cloned()
            .collect();
        instances.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(instances)
    }

    async fn active_instances(&self) -> Result<Vec<Instance>> {
        let state = self.state.lock().await;
        Ok(state
            .instances
            .values()
            .filter(|i| i.status.occupies_capacity())
            .cloned()
            .collect())
    }

    async fn running_instances(&self) -> Result<Vec<Instance>> {
        let state = self.state.lock().await;
        Ok(state
            .instances
            .values()
            .filter(|i| i.status == InstanceStatus::Running)
            .cloned()
            .collect())
    }

    async fn update_instance_status(
        &self,
        external_id: Uuid,
        status: InstanceStatus,
        reason: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let instance = state
            .instances
            .get_mut(&external_id)
            .ok_or_else(|| Error::NotFound {
                resource: "instance",
                id: external_id.to_string(),
            })?;
        let now = Utc::now();
        instance.status = status;
        instance.status_reason = reason.to_string();
        instance.updated_at = now;
        if status == InstanceStatus::Stopped {
            instance.stopped_at = Some(now);
        }
        Ok(())
    }

    async fn set_instance_endpoint(
        &self,
        external_id: Uuid,
        host: &str,
        port: i32,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let instance = state
            .instances
            .get_mut(&external_id)
            .ok_or_else(|| Error::NotFound {
                resource: "instance",
                id: external_id.to_string(),
            })?;
        instance.endpoint = Some(host.to_string());
        instance.port = Some(port);
        instance.updated_at = Utc::now();
        Ok(())
    }

    async fn set_instance_billed(&self, external_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        let instance = state
            .instances
            .get_mut(&external_id)
            .ok_or_else(|| Error::NotFound {
                resource: "instance",
                id: external_id.to_string(),
            })?;
        instance.last_billed_at = Some(at);
        Ok(())
    }

    async fn fail_instance_with_refund(
        &self,
        external_id: Uuid,
        reason: &str,
        refund: i64,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let instance = state
            .instances
            .get_mut(&external_id)
            .ok_or_else(|| Error::NotFound {
                resource: "instance",
                id: external_id.to_string(),
            })?;
        instance.status = InstanceStatus::Error;
        instance.status_reason = reason.to_string();
        instance.updated_at = Utc::now();
        let owner = instance.owner_account_id;
        let name = instance.name.clone();

        apply_locked(
            &mut state,
            LedgerEntry {
                account_id: owner,
                action: ActionType::InstanceCreateRefund,
                amount: refund,
                instance_id: Some(external_id),
                note: format!("refund: instance {} provisioning failed", name),
            },
            None,
        )?;
        Ok(())
    }

    async fn charge_instance_maintenance(
        &self,
        external_id: Uuid,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let instance = state
            .instances
            .get(&external_id)
            .ok_or_else(|| Error::NotFound {
                resource: "instance",
                id: external_id.to_string(),
            })?;
        let owner = instance.owner_account_id;
        let name = instance.name.clone();

        apply_locked(
            &mut state,
            LedgerEntry {
                account_id: owner,
                action: ActionType::InstanceMaintain,
                amount: -amount,
                instance_id: Some(external_id),
                note: format!("instance {} hourly maintenance", name),
            },
            None,
        )?;

        let instance = state
            .instances
            .get_mut(&external_id)
            .expect("instance vanished under lock");
        instance.last_billed_at = Some(now);
        Ok(())
    }

    async fn remove_instance(&self, external_id: Uuid) -> Result<()> {
        self.state.lock().await.instances.remove(&external_id);
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
