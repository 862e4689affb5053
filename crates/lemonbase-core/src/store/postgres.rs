// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL store backend.
//!
//! The production backend. Atomicity comes from SQL transactions: balance
//! changes lock the account row (`SELECT .. FOR UPDATE`), position
//! reservation is a conditional `UPDATE .. WHERE state = 'available'`
//! compare-and-swap, and the one-live-attempt rule rides on a partial unique
//! index.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction as PgTransaction};
use uuid::Uuid;

use super::{HarvestOutcome, HarvestSettlement, Store};
use crate::error::{Error, Result};
use crate::grove::{Position, PositionState};
use crate::ledger::{Account, ActionType, LedgerEntry, Transaction};
use crate::lifecycle::{
    DbMode, DbType, Instance, InstanceStatus, LemonCost, ResourceSpec,
};
use crate::questions::{Category, Difficulty, Question};
use crate::quiz::{Attempt, AttemptStatus, HarvestPhase};

/// Postgres error code for unique violations.
const UNIQUE_VIOLATION: &str = "23505";

/// A store backed by PostgreSQL.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the schema. Idempotent; call once at startup.
    pub async fn migrate(pool: &PgPool) -> Result<()> {
        sqlx::raw_sql(include_str!("../../migrations/schema.sql"))
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Lock an account row and return its balance.
    async fn lock_account(
        tx: &mut PgTransaction<'_, Postgres>,
        account_id: Uuid,
    ) -> Result<i64> {
        let row = sqlx::query("SELECT lemon_balance FROM accounts WHERE id = $1 FOR UPDATE")
            .bind(account_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(Error::AccountNotFound { account_id })?;
        Ok(row.get::<i64, _>("lemon_balance"))
    }

    /// Balance change inside an open transaction: the caller holds the
    /// account row lock.
    async fn apply_in_tx(
        tx: &mut PgTransaction<'_, Postgres>,
        entry: &LedgerEntry,
        balance: i64,
        cap: Option<i64>,
    ) -> Result<Transaction> {
        let new_balance = balance + entry.amount;
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

        let earned_delta = if entry.amount >= 0 { entry.amount } else { 0 };
        let spent_delta = if entry.amount < 0 { -entry.amount } else { 0 };
        sqlx::query(
            r#"
            UPDATE accounts
            SET lemon_balance = $2,
                total_earned = total_earned + $3,
                total_spent = total_spent + $4
            WHERE id = $1
            "#,
        )
        .bind(entry.account_id)
        .bind(new_balance)
        .bind(earned_delta)
        .bind(spent_delta)
        .execute(&mut **tx)
        .await?;

        let id = Uuid::new_v4();
        let created_at = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO lemon_transactions
                (id, account_id, action_type, amount, balance_after, instance_id, note, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(id)
        .bind(entry.account_id)
        .bind(entry.action.as_str())
        .bind(entry.amount)
        .bind(new_balance)
        .bind(entry.instance_id)
        .bind(&entry.note)
        .bind(created_at)
        .execute(&mut **tx)
        .await?;

        Ok(Transaction {
            id,
            account_id: entry.account_id,
            action: entry.action,
            amount: entry.amount,
            balance_after: new_balance,
            instance_id: entry.instance_id,
            note: entry.note.clone(),
            created_at,
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION)
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn account_from_row(row: &sqlx::postgres::PgRow) -> Account {
    Account {
        id: row.get("id"),
        email: row.get("email"),
        lemon_balance: row.get("lemon_balance"),
        total_earned: row.get("total_earned"),
        total_spent: row.get("total_spent"),
        last_harvest_at: row.get("last_harvest_at"),
        joined_at: row.get("joined_at"),
    }
}

fn transaction_from_row(row: &sqlx::postgres::PgRow) -> Result<Transaction> {
    Ok(Transaction {
        id: row.get("id"),
        account_id: row.get("account_id"),
        action: ActionType::parse(row.get::<&str, _>("action_type"))?,
        amount: row.get("amount"),
        balance_after: row.get("balance_after"),
        instance_id: row.get("instance_id"),
        note: row.get("note"),
        created_at: row.get("created_at"),
    })
}

fn position_from_row(row: &sqlx::postgres::PgRow) -> Result<Position> {
    Ok(Position {
        position_id: row.get("position_id"),
        state: PositionState::parse(row.get::<&str, _>("state"))?,
        reserved_by: row.get("reserved_by"),
        reserved_attempt: row.get("reserved_attempt"),
        reservation_expires_at: row.get("reservation_expires_at"),
        available_since: row.get("available_since"),
        next_regrowth_at: row.get("next_regrowth_at"),
        question_id: row.get("question_id"),
    })
}

fn question_from_row(row: &sqlx::postgres::PgRow) -> Result<Question> {
    let Json(options) = row.get::<Json<Vec<String>>, _>("options");
    Ok(Question {
        question_id: row.get("question_id"),
        prompt: row.get("prompt"),
        options,
        correct_option: row.get("correct_option"),
        difficulty: Difficulty::parse(row.get::<&str, _>("difficulty"))?,
        category: Category::parse(row.get::<&str, _>("category"))?,
        time_limit_secs: row.get("time_limit_secs"),
    })
}

fn attempt_from_row(row: &sqlx::postgres::PgRow) -> Result<Attempt> {
    Ok(Attempt {
        attempt_id: row.get("attempt_id"),
        account_id: row.get("account_id"),
        position_id: row.get("position_id"),
        question_id: row.get("question_id"),
        issued_at: row.get("issued_at"),
        answer_deadline: row.get("answer_deadline"),
        status: AttemptStatus::parse(row.get::<&str, _>("status"))?,
        selected_option: row.get("selected_option"),
        submitted_at: row.get("submitted_at"),
        harvest_window_expires_at: row.get("harvest_window_expires_at"),
        harvest_phase: HarvestPhase::parse(row.get::<&str, _>("harvest_phase"))?,
    })
}

fn instance_from_row(row: &sqlx::postgres::PgRow) -> Result<Instance> {
    Ok(Instance {
        external_id: row.get("external_id"),
        owner_account_id: row.get("owner_account_id"),
        name: row.get("name"),
        db_type: DbType::parse(row.get::<&str, _>("db_type"))?,
        mode: DbMode::parse(row.get::<&str, _>("mode"))?,
        size: crate::lifecycle::DbSize::parse(row.get::<&str, _>("size"))?,
        resources: ResourceSpec {
            cpu: row.get("cpu"),
            memory_mb: row.get("memory_mb"),
            disk_gb: row.get("disk_gb"),
        },
        cost: LemonCost {
            creation_cost: row.get("creation_cost"),
            hourly_lemons: row.get("hourly_lemons"),
        },
        status: InstanceStatus::parse(row.get::<&str, _>("status"))?,
        status_reason: row.get("status_reason"),
        endpoint: row.get("endpoint"),
        port: row.get("port"),
        created_from_preset: row.get("created_from_preset"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_billed_at: row.get("last_billed_at"),
        stopped_at: row.get("stopped_at"),
    })
}

const INSTANCE_COLUMNS: &str = "external_id, owner_account_id, name, db_type, mode, size, \
     cpu, memory_mb, disk_gb, creation_cost, hourly_lemons, status, status_reason, \
     endpoint, port, created_from_preset, created_at, updated_at, last_billed_at, stopped_at";

const POSITION_COLUMNS: &str = "position_id, state, reserved_by, reserved_attempt, \
     reservation_expires_at, available_since, next_regrowth_at, question_id";

const ATTEMPT_COLUMNS: &str = "attempt_id, account_id, position_id, question_id, issued_at, \
     answer_deadline, status, selected_option, submitted_at, harvest_window_expires_at, \
     harvest_phase";

#[async_trait]
impl Store for PostgresStore {
    async fn create_account(&self, email: &str) -> Result<Account> {
        let id = Uuid::new_v4();
        let result = sqlx::query(
            r#"
            INSERT INTO accounts (id, email, joined_at)
            VALUES ($1, $2, NOW())
            RETURNING id, email, lemon_balance, total_earned, total_spent,
                      last_harvest_at, joined_at
            "#,
        )
        .bind(id)
        .bind(email)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => Ok(account_from_row(&row)),
            Err(e) if is_unique_violation(&e) => Err(Error::NameConflict {
                name: email.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn account(&self, account_id: Uuid) -> Result<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT id, email, lemon_balance, total_earned, total_spent,
                   last_harvest_at, joined_at
            FROM accounts WHERE id = $1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(account_from_row))
    }

    async fn account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let row = sqlx::query(
            r#"
            SELECT id, email, lemon_balance, total_earned, total_spent,
                   last_harvest_at, joined_at
            FROM accounts WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(account_from_row))
    }

    async fn apply_transaction(
        &self,
        entry: LedgerEntry,
        cap: Option<i64>,
    ) -> Result<Transaction> {
        let mut tx = self.pool.begin().await?;
        let balance = Self::lock_account(&mut tx, entry.account_id).await?;
        let transaction = Self::apply_in_tx(&mut tx, &entry, balance, cap).await?;
        tx.commit().await?;
        Ok(transaction)
    }

    async fn transactions_for_account(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, account_id, action_type, amount, balance_after,
                   instance_id, note, created_at
            FROM lemon_transactions
            WHERE account_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn total_harvested(&self) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT AS total
             FROM lemon_transactions WHERE action_type = 'harvest'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("total"))
    }

    async fn seed_positions(&self, count: i32) -> Result<()> {
        for position_id in 0..count {
            sqlx::query(
                r#"
                INSERT INTO lemon_positions (position_id, state, available_since)
                VALUES ($1, 'available', NOW())
                ON CONFLICT (position_id) DO NOTHING
                "#,
            )
            .bind(position_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM lemon_positions ORDER BY position_id",
            POSITION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(position_from_row).collect()
    }

    async fn position(&self, position_id: i32) -> Result<Option<Position>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM lemon_positions WHERE position_id = $1",
            POSITION_COLUMNS
        ))
        .bind(position_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(position_from_row).transpose()
    }

    async fn try_reserve_position(
        &self,
        position_id: i32,
        account_id: Uuid,
        attempt_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<Position> {
        // Compare-and-swap: only an Available row takes the update, so one of
        // any number of racing reservations wins.
        let row = sqlx::query(&format!(
            r#"
            UPDATE lemon_positions
            SET state = 'reserved',
                reserved_by = $2,
                reserved_attempt = $3,
                reservation_expires_at = $4
            WHERE position_id = $1 AND state = 'available'
            RETURNING {}
            "#,
            POSITION_COLUMNS
        ))
        .bind(position_id)
        .bind(account_id)
        .bind(attempt_id)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => position_from_row(&row),
            None => Err(Error::PositionNotAvailable { position_id }),
        }
    }

    async fn return_position(&self, position_id: i32, account_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE lemon_positions
            SET state = 'available', reserved_by = NULL, reserved_attempt = NULL,
                reservation_expires_at = NULL
            WHERE position_id = $1 AND state = 'reserved' AND reserved_by = $2
            "#,
        )
        .bind(position_id)
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn settle_harvest(&self, settlement: HarvestSettlement) -> Result<HarvestOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM lemon_positions WHERE position_id = $1 FOR UPDATE",
            POSITION_COLUMNS
        ))
        .bind(settlement.position_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(Error::PositionNotAvailable {
            position_id: settlement.position_id,
        })?;
        let position = position_from_row(&row)?;

        match position.state {
            PositionState::Reserved => {
                if position.reserved_by != Some(settlement.account_id) {
                    return Err(Error::NotReserver);
                }
                let expired = position
                    .reservation_expires_at
                    .is_none_or(|at| at <= settlement.now);
                if expired {
                    sqlx::query(
                        r#"
                        UPDATE lemon_positions
                        SET state = 'available', reserved_by = NULL,
                            reserved_attempt = NULL, reservation_expires_at = NULL
                        WHERE position_id = $1
                        "#,
                    )
                    .bind(settlement.position_id)
                    .execute(&mut *tx)
                    .await?;
                    sqlx::query(
                        "UPDATE quiz_attempts SET harvest_phase = 'window_expired'
                         WHERE attempt_id = $1 AND harvest_phase = 'window'",
                    )
                    .bind(settlement.attempt_id)
                    .execute(&mut *tx)
                    .await?;
                    tx.commit().await?;
                    return Err(Error::WindowExpired);
                }
            }
            PositionState::Empty | PositionState::Growing => {
                return Err(Error::AlreadyHarvested);
            }
            PositionState::Available => return Err(Error::WindowExpired),
        }

        let balance = Self::lock_account(&mut tx, settlement.account_id).await?;
        let amount = settlement
            .base_amount
            .min(settlement.storage_cap - balance);
        if amount <= 0 {
            sqlx::query(
                r#"
                UPDATE lemon_positions
                SET state = 'available', reserved_by = NULL,
                    reserved_attempt = NULL, reservation_expires_at = NULL
                WHERE position_id = $1
                "#,
            )
            .bind(settlement.position_id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            return Err(Error::StorageFull {
                cap: settlement.storage_cap,
            });
        }

        let entry = LedgerEntry {
            account_id: settlement.account_id,
            action: ActionType::Harvest,
            amount,
            instance_id: None,
            note: format!("harvested position {}", settlement.position_id),
        };
        let transaction =
            Self::apply_in_tx(&mut tx, &entry, balance, Some(settlement.storage_cap)).await?;

        sqlx::query("UPDATE accounts SET last_harvest_at = $2 WHERE id = $1")
            .bind(settlement.account_id)
            .bind(settlement.now)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE lemon_positions
            SET state = 'empty', reserved_by = NULL, reserved_attempt = NULL,
                reservation_expires_at = NULL, available_since = NULL
            WHERE position_id = $1
            "#,
        )
        .bind(settlement.position_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE quiz_attempts SET harvest_phase = 'harvested' WHERE attempt_id = $1",
        )
        .bind(settlement.attempt_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(HarvestOutcome {
            amount,
            new_balance: transaction.balance_after,
            transaction_id: transaction.id,
        })
    }

    async fn schedule_regrowth(&self, regrow_at: DateTime<Utc>) -> Result<Vec<i32>> {
        let rows = sqlx::query(
            r#"
            UPDATE lemon_positions
            SET state = 'growing', next_regrowth_at = $1
            WHERE state = 'empty'
            RETURNING position_id
            "#,
        )
        .bind(regrow_at)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get("position_id")).collect())
    }

    async fn regrow_due_positions(&self, now: DateTime<Utc>) -> Result<Vec<i32>> {
        let rows = sqlx::query(
            r#"
            UPDATE lemon_positions
            SET state = 'available', available_since = $1, next_regrowth_at = NULL
            WHERE state = 'growing' AND next_regrowth_at <= $1
            RETURNING position_id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get("position_id")).collect())
    }

    async fn assign_question(&self, position_id: i32, question_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE lemon_positions SET question_id = $2 WHERE position_id = $1")
            .bind(position_id)
            .bind(question_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn next_regrowth_at(&self) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query(
            "SELECT MIN(next_regrowth_at) AS next
             FROM lemon_positions WHERE state = 'growing'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("next"))
    }

    async fn expire_harvest_windows(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            r#"
            UPDATE lemon_positions
            SET state = 'available', reserved_by = NULL, reserved_attempt = NULL,
                reservation_expires_at = NULL
            WHERE state = 'reserved' AND reservation_expires_at <= $1
            RETURNING reserved_attempt
            "#,
        )
        .bind(now)
        .fetch_all(&mut *tx)
        .await?;

        let attempt_ids: Vec<Uuid> = rows
            .iter()
            .filter_map(|r| r.get::<Option<Uuid>, _>("reserved_attempt"))
            .collect();
        if !attempt_ids.is_empty() {
            sqlx::query(
                "UPDATE quiz_attempts SET harvest_phase = 'window_expired'
                 WHERE attempt_id = ANY($1) AND harvest_phase = 'window'",
            )
            .bind(&attempt_ids)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len() as u64)
    }

    async fn seed_questions(&self, questions: &[Question]) -> Result<()> {
        for question in questions {
            sqlx::query(
                r#"
                INSERT INTO quiz_questions
                    (question_id, prompt, options, correct_option, difficulty,
                     category, time_limit_secs)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (question_id) DO NOTHING
                "#,
            )
            .bind(question.question_id)
            .bind(&question.prompt)
            .bind(Json(&question.options))
            .bind(question.correct_option)
            .bind(question.difficulty.as_str())
            .bind(question.category.as_str())
            .bind(question.time_limit_secs)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn question(&self, question_id: Uuid) -> Result<Option<Question>> {
        let row = sqlx::query(
            r#"
            SELECT question_id, prompt, options, correct_option, difficulty,
                   category, time_limit_secs
            FROM quiz_questions WHERE question_id = $1
            "#,
        )
        .bind(question_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(question_from_row).transpose()
    }

    async fn random_question(&self) -> Result<Question> {
        let row = sqlx::query(
            r#"
            SELECT question_id, prompt, options, correct_option, difficulty,
                   category, time_limit_secs
            FROM quiz_questions ORDER BY RANDOM() LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::Other("question bank is empty".to_string()))?;
        question_from_row(&row)
    }

    async fn create_attempt(&self, attempt: Attempt) -> Result<Attempt> {
        let result = sqlx::query(
            r#"
            INSERT INTO quiz_attempts
                (attempt_id, account_id, position_id, question_id, issued_at,
                 answer_deadline, status, selected_option, submitted_at,
                 harvest_window_expires_at, harvest_phase)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NULL, NULL, NULL, $8)
            "#,
        )
        .bind(attempt.attempt_id)
        .bind(attempt.account_id)
        .bind(attempt.position_id)
        .bind(attempt.question_id)
        .bind(attempt.issued_at)
        .bind(attempt.answer_deadline)
        .bind(attempt.status.as_str())
        .bind(attempt.harvest_phase.as_str())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(attempt),
            Err(e) if is_unique_violation(&e) => Err(Error::AlreadyAttempting),
            Err(e) => Err(e.into()),
        }
    }

    async fn attempt(&self, attempt_id: Uuid) -> Result<Option<Attempt>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM quiz_attempts WHERE attempt_id = $1",
            ATTEMPT_COLUMNS
        ))
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(attempt_from_row).transpose()
    }

    async fn finalize_attempt(
        &self,
        attempt_id: Uuid,
        status: AttemptStatus,
        selected_option: i32,
        submitted_at: DateTime<Utc>,
    ) -> Result<Attempt> {
        // Guarded update: only a Started row takes it, so the terminal
        // transition happens exactly once.
        let row = sqlx::query(&format!(
            r#"
            UPDATE quiz_attempts
            SET status = $2, selected_option = $3, submitted_at = $4
            WHERE attempt_id = $1 AND status = 'started'
            RETURNING {}
            "#,
            ATTEMPT_COLUMNS
        ))
        .bind(attempt_id)
        .bind(status.as_str())
        .bind(selected_option)
        .bind(submitted_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => attempt_from_row(&row),
            None => match self.attempt(attempt_id).await? {
                Some(_) => Err(Error::AttemptAlreadyTerminal { attempt_id }),
                None => Err(Error::AttemptNotFound { attempt_id }),
            },
        }
    }

    async fn open_harvest_window(
        &self,
        attempt_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE quiz_attempts
             SET harvest_phase = 'window', harvest_window_expires_at = $2
             WHERE attempt_id = $1",
        )
        .bind(attempt_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_harvest_lost(&self, attempt_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE quiz_attempts SET harvest_phase = 'lost' WHERE attempt_id = $1")
            .bind(attempt_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn timeout_overdue_attempts(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE quiz_attempts SET status = 'timeout'
             WHERE status = 'started' AND answer_deadline <= $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn create_instance_charged(
        &self,
        instance: Instance,
        total_cost: i64,
        max_per_account: i64,
    ) -> Result<Instance> {
        let mut tx = self.pool.begin().await?;

        // The account row lock serializes creations per owner, so the quota
        // and name checks cannot race.
        let balance = Self::lock_account(&mut tx, instance.owner_account_id).await?;

        let owned: i64 = sqlx::query(
            "SELECT COUNT(*)::BIGINT AS n FROM db_instances WHERE owner_account_id = $1",
        )
        .bind(instance.owner_account_id)
        .fetch_one(&mut *tx)
        .await?
        .get("n");
        if owned >= max_per_account {
            return Err(Error::OwnerQuotaExceeded {
                max: max_per_account,
            });
        }

        let name_taken: i64 = sqlx::query(
            "SELECT COUNT(*)::BIGINT AS n FROM db_instances
             WHERE owner_account_id = $1 AND name = $2",
        )
        .bind(instance.owner_account_id)
        .bind(&instance.name)
        .fetch_one(&mut *tx)
        .await?
        .get("n");
        if name_taken > 0 {
            return Err(Error::NameConflict {
                name: instance.name.clone(),
            });
        }

        let entry = LedgerEntry {
            account_id: instance.owner_account_id,
            action: ActionType::InstanceCreate,
            amount: -total_cost,
            instance_id: Some(instance.external_id),
            note: format!("instance {} creation", instance.name),
        };
        Self::apply_in_tx(&mut tx, &entry, balance, None).await?;

        sqlx::query(
            r#"
            INSERT INTO db_instances
                (external_id, owner_account_id, name, db_type, mode, size,
                 cpu, memory_mb, disk_gb, creation_cost, hourly_lemons,
                 status, status_reason, endpoint, port, created_from_preset,
                 created_at, updated_at, last_billed_at, stopped_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    $12, $13, NULL, NULL, $14, $15, $16, NULL, NULL)
            "#,
        )
        .bind(instance.external_id)
        .bind(instance.owner_account_id)
        .bind(&instance.name)
        .bind(instance.db_type.as_str())
        .bind(instance.mode.as_str())
        .bind(instance.size.as_str())
        .bind(instance.resources.cpu)
        .bind(instance.resources.memory_mb)
        .bind(instance.resources.disk_gb)
        .bind(instance.cost.creation_cost)
        .bind(instance.cost.hourly_lemons)
        .bind(instance.status.as_str())
        .bind(&instance.status_reason)
        .bind(&instance.created_from_preset)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(instance)
    }

    async fn instance(&self, external_id: Uuid) -> Result<Option<Instance>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM db_instances WHERE external_id = $1",
            INSTANCE_COLUMNS
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(instance_from_row).transpose()
    }

    async fn instances_for_owner(&self, owner_account_id: Uuid) -> Result<Vec<Instance>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM db_instances WHERE owner_account_id = $1
             ORDER BY created_at DESC",
            INSTANCE_COLUMNS
        ))
        .bind(owner_account_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(instance_from_row).collect()
    }

    async fn active_instances(&self) -> Result<Vec<Instance>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM db_instances
             WHERE status IN ('provisioning', 'running', 'stopped', 'maintenance')",
            INSTANCE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(instance_from_row).collect()
    }

    async fn running_instances(&self) -> Result<Vec<Instance>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM db_instances WHERE status = 'running'",
            INSTANCE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(instance_from_row).collect()
    }

    async fn update_instance_status(
        &self,
        external_id: Uuid,
        status: InstanceStatus,
        reason: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE db_instances
            SET status = $2,
                status_reason = $3,
                updated_at = NOW(),
                stopped_at = CASE WHEN $2 = 'stopped' THEN NOW() ELSE stopped_at END
            WHERE external_id = $1
            "#,
        )
        .bind(external_id)
        .bind(status.as_str())
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_instance_endpoint(
        &self,
        external_id: Uuid,
        host: &str,
        port: i32,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE db_instances SET endpoint = $2, port = $3, updated_at = NOW()
             WHERE external_id = $1",
        )
        .bind(external_id)
        .bind(host)
        .bind(port)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_instance_billed(&self, external_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE db_instances SET last_billed_at = $2 WHERE external_id = $1")
            .bind(external_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fail_instance_with_refund(
        &self,
        external_id: Uuid,
        reason: &str,
        refund: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT owner_account_id, name FROM db_instances
             WHERE external_id = $1 FOR UPDATE",
        )
        .bind(external_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "instance",
            id: external_id.to_string(),
        })?;
        let owner: Uuid = row.get("owner_account_id");
        let name: String = row.get("name");

        sqlx::query(
            "UPDATE db_instances
             SET status = 'error', status_reason = $2, updated_at = NOW()
             WHERE external_id = $1",
        )
        .bind(external_id)
        .bind(reason)
        .execute(&mut *tx)
        .await?;

        let balance = Self::lock_account(&mut tx, owner).await?;
        let entry = LedgerEntry {
            account_id: owner,
            action: ActionType::InstanceCreateRefund,
            amount: refund,
            instance_id: Some(external_id),
            note: format!("refund: instance {} provisioning failed", name),
        };
        Self::apply_in_tx(&mut tx, &entry, balance, None).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn charge_instance_maintenance(
        &self,
        external_id: Uuid,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT owner_account_id, name FROM db_instances
             WHERE external_id = $1 FOR UPDATE",
        )
        .bind(external_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "instance",
            id: external_id.to_string(),
        })?;
        let owner: Uuid = row.get("owner_account_id");
        let name: String = row.get("name");

        let balance = Self::lock_account(&mut tx, owner).await?;
        let entry = LedgerEntry {
            account_id: owner,
            action: ActionType::InstanceMaintain,
            amount: -amount,
            instance_id: Some(external_id),
            note: format!("instance {} hourly maintenance", name),
        };
        Self::apply_in_tx(&mut tx, &entry, balance, None).await?;

        sqlx::query("UPDATE db_instances SET last_billed_at = $2 WHERE external_id = $1")
            .bind(external_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn remove_instance(&self, external_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM db_instances WHERE external_id = $1")
            .bind(external_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS one").fetch_one(&self.pool).await?;
        Ok(row.get::<i32, _>("one") == 1)
    }
}
