// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the credit ledger: balance invariant, overdraw and cap
//! rejection, and per-account serialization under contention.

mod common;

use std::sync::Arc;

use lemonbase_core::error::Error;
use lemonbase_core::ledger::{ActionType, LedgerEntry};
use lemonbase_core::provisioner::MockProvisioner;

use common::{register, start_engine, test_config};

fn credit(account_id: uuid::Uuid, amount: i64) -> LedgerEntry {
    LedgerEntry {
        account_id,
        action: ActionType::WelcomeBonus,
        amount,
        instance_id: None,
        note: "test credit".to_string(),
    }
}

fn debit(account_id: uuid::Uuid, amount: i64) -> LedgerEntry {
    LedgerEntry {
        account_id,
        action: ActionType::InstanceMaintain,
        amount: -amount,
        instance_id: None,
        note: "test debit".to_string(),
    }
}

#[tokio::test]
async fn welcome_bonus_is_the_first_transaction() {
    let runtime = start_engine(test_config(), Arc::new(MockProvisioner::succeeding())).await;
    let engine = runtime.engine();

    let account = register(engine, "fresh@example.com").await;
    assert_eq!(account.lemon_balance, 30);
    assert_eq!(account.total_earned, 30);
    assert_eq!(account.total_spent, 0);

    let txs = engine
        .ledger
        .transactions(account.id, 10, 0)
        .await
        .expect("transactions");
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].action, ActionType::WelcomeBonus);
    assert_eq!(txs[0].amount, 30);
    assert_eq!(txs[0].balance_after, 30);

    runtime.shutdown().await;
}

#[tokio::test]
async fn duplicate_email_is_rejected() {
    let runtime = start_engine(test_config(), Arc::new(MockProvisioner::succeeding())).await;
    let engine = runtime.engine();

    register(engine, "dup@example.com").await;
    let err = engine.register_account("dup@example.com").await.unwrap_err();
    assert_eq!(err.error_code(), "NAME_CONFLICT");

    runtime.shutdown().await;
}

#[tokio::test]
async fn overdraw_fails_and_leaves_balance_unchanged() {
    let runtime = start_engine(test_config(), Arc::new(MockProvisioner::succeeding())).await;
    let engine = runtime.engine();

    let account = register(engine, "poor@example.com").await;
    let err = engine
        .ledger
        .apply(debit(account.id, 31))
        .await
        .unwrap_err();
    match err {
        Error::InsufficientBalance { required, missing } => {
            assert_eq!(required, 31);
            assert_eq!(missing, 1);
        }
        other => panic!("expected InsufficientBalance, got {:?}", other),
    }

    assert_eq!(engine.ledger.balance(account.id).await.expect("balance"), 30);

    runtime.shutdown().await;
}

#[tokio::test]
async fn credits_past_the_cap_fail_storage_full() {
    let runtime = start_engine(test_config(), Arc::new(MockProvisioner::succeeding())).await;
    let engine = runtime.engine();

    let account = register(engine, "hoarder@example.com").await;
    // Cap is 500; 30 already held.
    engine
        .ledger
        .apply(credit(account.id, 470))
        .await
        .expect("fill to cap");
    let err = engine.ledger.apply(credit(account.id, 1)).await.unwrap_err();
    assert_eq!(err.error_code(), "STORAGE_FULL");
    assert_eq!(engine.ledger.balance(account.id).await.expect("balance"), 500);

    runtime.shutdown().await;
}

#[tokio::test]
async fn refunds_are_exempt_from_the_cap() {
    let runtime = start_engine(test_config(), Arc::new(MockProvisioner::succeeding())).await;
    let engine = runtime.engine();

    let account = register(engine, "refundee@example.com").await;
    engine
        .ledger
        .apply(credit(account.id, 470))
        .await
        .expect("fill to cap");

    let tx = engine
        .ledger
        .apply(LedgerEntry {
            account_id: account.id,
            action: ActionType::InstanceCreateRefund,
            amount: 40,
            instance_id: None,
            note: "refund over cap".to_string(),
        })
        .await
        .expect("refund applies past cap");
    assert_eq!(tx.balance_after, 540);

    runtime.shutdown().await;
}

#[tokio::test]
async fn balance_invariant_holds_under_concurrent_applies() {
    let runtime = start_engine(test_config(), Arc::new(MockProvisioner::succeeding())).await;
    let engine = runtime.engine();

    let account = register(engine, "busy@example.com").await;

    // 50 concurrent credits and debits; some debits will bounce, which is
    // fine - the invariant must hold regardless.
    let mut tasks = Vec::new();
    for i in 0..50 {
        let ledger = engine.ledger.clone();
        let entry = if i % 2 == 0 {
            credit(account.id, 3)
        } else {
            debit(account.id, 2)
        };
        tasks.push(tokio::spawn(async move { ledger.apply(entry).await }));
    }
    for task in tasks {
        let _ = task.await.expect("task join");
    }

    let refreshed = engine.account(account.id).await.expect("account");
    assert_eq!(
        refreshed.lemon_balance,
        refreshed.total_earned - refreshed.total_spent
    );

    // The transaction log sums to the cached balance.
    let txs = engine
        .ledger
        .transactions(account.id, 100, 0)
        .await
        .expect("transactions");
    let total: i64 = txs.iter().map(|t| t.amount).sum();
    assert_eq!(total, refreshed.lemon_balance);

    runtime.shutdown().await;
}
