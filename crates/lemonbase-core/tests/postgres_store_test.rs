// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the PostgreSQL store backend.
//!
//! These need a real database and are skipped unless
//! `LEMONBASE_TEST_DATABASE_URL` is set.

use chrono::Utc;
use lemonbase_core::error::Error;
use lemonbase_core::ledger::{ActionType, LedgerEntry};
use lemonbase_core::store::{PostgresStore, Store};
use sqlx::PgPool;
use uuid::Uuid;

/// Helper macro to skip tests if the database URL is not set.
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("LEMONBASE_TEST_DATABASE_URL").is_err() {
            eprintln!("Skipping test: LEMONBASE_TEST_DATABASE_URL not set");
            return;
        }
    };
}

/// Get a migrated store for testing.
async fn get_test_store() -> Option<(PgPool, PostgresStore)> {
    let database_url = std::env::var("LEMONBASE_TEST_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&database_url).await.ok()?;
    PostgresStore::migrate(&pool).await.ok()?;
    Some((pool.clone(), PostgresStore::new(pool.clone())))
}

fn unique_email(tag: &str) -> String {
    format!("{}-{}@example.com", tag, Uuid::new_v4())
}

#[tokio::test]
async fn account_creation_and_lookup_round_trip() {
    skip_if_no_db!();
    let Some((_pool, store)) = get_test_store().await else {
        return;
    };

    let email = unique_email("roundtrip");
    let account = store.create_account(&email).await.expect("create");
    assert_eq!(account.lemon_balance, 0);

    let by_id = store.account(account.id).await.expect("by id");
    assert_eq!(by_id.map(|a| a.email), Some(email.clone()));

    let by_email = store.account_by_email(&email).await.expect("by email");
    assert_eq!(by_email.map(|a| a.id), Some(account.id));

    // Same email again trips the unique constraint.
    let err = store.create_account(&email).await.unwrap_err();
    assert_eq!(err.error_code(), "NAME_CONFLICT");
}

#[tokio::test]
async fn apply_transaction_enforces_balance_and_cap() {
    skip_if_no_db!();
    let Some((_pool, store)) = get_test_store().await else {
        return;
    };

    let account = store
        .create_account(&unique_email("ledger"))
        .await
        .expect("create");

    let tx = store
        .apply_transaction(
            LedgerEntry {
                account_id: account.id,
                action: ActionType::WelcomeBonus,
                amount: 30,
                instance_id: None,
                note: "bonus".to_string(),
            },
            Some(500),
        )
        .await
        .expect("credit");
    assert_eq!(tx.balance_after, 30);

    let err = store
        .apply_transaction(
            LedgerEntry {
                account_id: account.id,
                action: ActionType::InstanceMaintain,
                amount: -31,
                instance_id: None,
                note: "too much".to_string(),
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientBalance { .. }));

    let err = store
        .apply_transaction(
            LedgerEntry {
                account_id: account.id,
                action: ActionType::WelcomeBonus,
                amount: 480,
                instance_id: None,
                note: "over cap".to_string(),
            },
            Some(500),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StorageFull { .. }));

    let refreshed = store.account(account.id).await.expect("load").expect("exists");
    assert_eq!(refreshed.lemon_balance, 30);
    assert_eq!(refreshed.total_earned - refreshed.total_spent, 30);
}

#[tokio::test]
async fn position_reservation_is_a_compare_and_swap() {
    skip_if_no_db!();
    let Some((pool, store)) = get_test_store().await else {
        return;
    };

    store.seed_positions(10).await.expect("seed");

    // Reset position 9 to a known state for this run.
    sqlx::query(
        "UPDATE lemon_positions
         SET state = 'available', reserved_by = NULL, reserved_attempt = NULL,
             reservation_expires_at = NULL
         WHERE position_id = 9",
    )
    .execute(&pool)
    .await
    .expect("reset");

    let expires = Utc::now() + chrono::Duration::seconds(30);
    let account = Uuid::new_v4();
    let reserved = store
        .try_reserve_position(9, account, Uuid::new_v4(), expires)
        .await
        .expect("reserve");
    assert_eq!(reserved.reserved_by, Some(account));

    // The CAS rejects every later caller.
    let err = store
        .try_reserve_position(9, Uuid::new_v4(), Uuid::new_v4(), expires)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "POSITION_NOT_AVAILABLE");

    // Returning is owner-gated and idempotent.
    store.return_position(9, account).await.expect("return");
    let position = store.position(9).await.expect("load").expect("exists");
    assert_eq!(position.reserved_by, None);
}
