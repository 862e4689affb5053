// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the instance lifecycle: creation debits, provisioning outcomes,
//! refunds, quotas, capacity admission, billing, and teardown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lemonbase_core::config::EngineConfig;
use lemonbase_core::lifecycle::{
    CreateInstance, DbType, InstanceSource, InstanceStatus, ResourceSpec,
};
use lemonbase_core::provisioner::{MockProvisioner, ProvisionedEndpoint, ProvisionerError};
use lemonbase_core::runtime::Engine;

use common::{register, start_engine, test_config};

/// A shape costing 20 to create and 2 per hour (Redis, 1 GB memory).
fn redis_1gb(name: &str) -> CreateInstance {
    CreateInstance {
        name: name.to_string(),
        source: InstanceSource::Custom {
            db_type: DbType::Redis,
            mode: None,
            resources: ResourceSpec {
                cpu: 0.5,
                memory_mb: 1024,
                disk_gb: 5,
            },
        },
    }
}

fn rich_config() -> EngineConfig {
    EngineConfig {
        welcome_bonus: 100,
        ..test_config()
    }
}

async fn wait_for_status(engine: &Engine, account: uuid::Uuid, id: uuid::Uuid, want: InstanceStatus) {
    for _ in 0..100 {
        let instance = engine.instances.get(account, id).await.expect("get instance");
        if instance.status == want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("instance never reached {:?}", want);
}

#[tokio::test]
async fn create_debits_and_provisions_to_running() {
    let runtime = start_engine(rich_config(), Arc::new(MockProvisioner::succeeding())).await;
    let engine = runtime.engine();
    let account = register(engine, "creator@example.com").await;

    let instance = engine
        .instances
        .create(account.id, redis_1gb("cache-main"))
        .await
        .expect("create");
    assert_eq!(instance.status, InstanceStatus::Provisioning);
    assert_eq!(instance.cost.creation_cost, 20);
    assert_eq!(instance.cost.hourly_lemons, 2);

    // Creation cost plus the first hour.
    assert_eq!(engine.ledger.balance(account.id).await.expect("balance"), 78);

    wait_for_status(engine, account.id, instance.external_id, InstanceStatus::Running).await;
    let running = engine
        .instances
        .get(account.id, instance.external_id)
        .await
        .expect("get");
    assert!(running.endpoint.is_some());
    assert_eq!(running.port, Some(6379));

    runtime.shutdown().await;
}

#[tokio::test]
async fn failed_provisioning_refunds_in_full() {
    let runtime = start_engine(
        rich_config(),
        Arc::new(MockProvisioner::failing("volume quota exhausted")),
    )
    .await;
    let engine = runtime.engine();
    let account = register(engine, "unlucky@example.com").await;

    let instance = engine
        .instances
        .create(account.id, redis_1gb("doomed"))
        .await
        .expect("create");
    assert_eq!(engine.ledger.balance(account.id).await.expect("balance"), 78);

    wait_for_status(engine, account.id, instance.external_id, InstanceStatus::Error).await;

    // Balance is restored in full and the failure is on the audit trail.
    assert_eq!(engine.ledger.balance(account.id).await.expect("balance"), 100);
    let txs = engine
        .ledger
        .transactions(account.id, 10, 0)
        .await
        .expect("transactions");
    assert!(txs.iter().any(|t| t.amount == 22
        && t.instance_id == Some(instance.external_id)
        && t.note.contains("refund")));

    runtime.shutdown().await;
}

#[tokio::test]
async fn provision_results_for_settled_instances_are_ignored() {
    let runtime = start_engine(rich_config(), Arc::new(MockProvisioner::manual())).await;
    let engine = runtime.engine();
    let account = register(engine, "latecomer@example.com").await;

    let instance = engine
        .instances
        .create(account.id, redis_1gb("slowpoke"))
        .await
        .expect("create");

    engine
        .instances
        .on_provision_result(
            instance.external_id,
            Ok(ProvisionedEndpoint {
                host: "db-0.local".to_string(),
                port: 6379,
            }),
        )
        .await
        .expect("first result");
    wait_for_status(engine, account.id, instance.external_id, InstanceStatus::Running).await;

    // A duplicate (late) failure report must not refund or flip the status.
    engine
        .instances
        .on_provision_result(
            instance.external_id,
            Err(ProvisionerError::Failed("stale callback".to_string())),
        )
        .await
        .expect("stale result is swallowed");

    let still_running = engine
        .instances
        .get(account.id, instance.external_id)
        .await
        .expect("get");
    assert_eq!(still_running.status, InstanceStatus::Running);
    assert_eq!(engine.ledger.balance(account.id).await.expect("balance"), 78);

    runtime.shutdown().await;
}

#[tokio::test]
async fn third_instance_is_rejected_without_a_debit() {
    let runtime = start_engine(rich_config(), Arc::new(MockProvisioner::manual())).await;
    let engine = runtime.engine();
    let account = register(engine, "collector@example.com").await;

    engine
        .instances
        .create(account.id, redis_1gb("one"))
        .await
        .expect("first");
    engine
        .instances
        .create(account.id, redis_1gb("two"))
        .await
        .expect("second");
    let balance_before = engine.ledger.balance(account.id).await.expect("balance");

    let err = engine
        .instances
        .create(account.id, redis_1gb("three"))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "OWNER_QUOTA_EXCEEDED");
    assert_eq!(
        engine.ledger.balance(account.id).await.expect("balance"),
        balance_before
    );

    runtime.shutdown().await;
}

#[tokio::test]
async fn insufficient_balance_blocks_creation_with_no_partial_debit() {
    let config = EngineConfig {
        welcome_bonus: 21, // one lemon short of creation + first hour
        ..test_config()
    };
    let runtime = start_engine(config, Arc::new(MockProvisioner::manual())).await;
    let engine = runtime.engine();
    let account = register(engine, "broke@example.com").await;

    let err = engine
        .instances
        .create(account.id, redis_1gb("wish"))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "INSUFFICIENT_BALANCE");
    assert_eq!(engine.ledger.balance(account.id).await.expect("balance"), 21);
    assert!(engine
        .instances
        .list(account.id)
        .await
        .expect("list")
        .is_empty());

    runtime.shutdown().await;
}

#[tokio::test]
async fn admission_rejects_oversized_requests_before_any_debit() {
    let runtime = start_engine(rich_config(), Arc::new(MockProvisioner::manual())).await;
    let engine = runtime.engine();
    let account = register(engine, "dreamer@example.com").await;

    let err = engine
        .instances
        .create(
            account.id,
            CreateInstance {
                name: "leviathan".to_string(),
                source: InstanceSource::Custom {
                    db_type: DbType::MongoDb,
                    mode: None,
                    resources: ResourceSpec {
                        cpu: 16.0,
                        memory_mb: 65536,
                        disk_gb: 500,
                    },
                },
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "INSUFFICIENT_CAPACITY");
    assert_eq!(engine.ledger.balance(account.id).await.expect("balance"), 100);

    runtime.shutdown().await;
}

#[tokio::test]
async fn duplicate_names_are_rejected_per_owner() {
    let runtime = start_engine(rich_config(), Arc::new(MockProvisioner::manual())).await;
    let engine = runtime.engine();
    let account = register(engine, "namer@example.com").await;

    engine
        .instances
        .create(account.id, redis_1gb("cache"))
        .await
        .expect("first");
    let err = engine
        .instances
        .create(account.id, redis_1gb("cache"))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "NAME_CONFLICT");

    runtime.shutdown().await;
}

#[tokio::test]
async fn preset_creation_resolves_catalog_shape() {
    let runtime = start_engine(rich_config(), Arc::new(MockProvisioner::manual())).await;
    let engine = runtime.engine();
    let account = register(engine, "preset@example.com").await;

    let instance = engine
        .instances
        .create(
            account.id,
            CreateInstance {
                name: "sessions".to_string(),
                source: InstanceSource::Preset {
                    preset_id: "redis-cache-tiny".to_string(),
                },
            },
        )
        .await
        .expect("create from preset");

    assert_eq!(instance.db_type, DbType::Redis);
    assert_eq!(instance.created_from_preset.as_deref(), Some("redis-cache-tiny"));
    assert_eq!(instance.cost.creation_cost, 10);
    assert_eq!(instance.cost.hourly_lemons, 1);

    let err = engine
        .instances
        .create(
            account.id,
            CreateInstance {
                name: "nonesuch".to_string(),
                source: InstanceSource::Preset {
                    preset_id: "mainframe-xl".to_string(),
                },
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");

    runtime.shutdown().await;
}

#[tokio::test]
async fn delete_is_owner_only_and_frees_capacity() {
    let runtime = start_engine(rich_config(), Arc::new(MockProvisioner::succeeding())).await;
    let engine = runtime.engine();
    let owner = register(engine, "landlord@example.com").await;
    let stranger = register(engine, "stranger@example.com").await;

    let instance = engine
        .instances
        .create(owner.id, redis_1gb("mine"))
        .await
        .expect("create");
    wait_for_status(engine, owner.id, instance.external_id, InstanceStatus::Running).await;

    let err = engine
        .instances
        .delete(stranger.id, instance.external_id)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "NOT_OWNER");

    engine
        .instances
        .delete(owner.id, instance.external_id)
        .await
        .expect("delete");
    let err = engine
        .instances
        .get(owner.id, instance.external_id)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");

    let snapshot = engine.capacity.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.active_count, 0);
    assert_eq!(snapshot.used.memory, 0);

    runtime.shutdown().await;
}

#[tokio::test]
async fn billing_charges_running_instances_and_stops_broke_owners() {
    let config = EngineConfig {
        welcome_bonus: 25, // creation 20 + first hour 2 leaves 3: one more hour, then broke
        ..test_config()
    };
    let runtime = start_engine(config, Arc::new(MockProvisioner::succeeding())).await;
    let engine = runtime.engine();
    let account = register(engine, "tenant@example.com").await;

    let instance = engine
        .instances
        .create(account.id, redis_1gb("metered"))
        .await
        .expect("create");
    wait_for_status(engine, account.id, instance.external_id, InstanceStatus::Running).await;
    assert_eq!(engine.ledger.balance(account.id).await.expect("balance"), 3);

    // Second billing hour: the charge lands (3 -> 1).
    let later = Utc::now() + chrono::Duration::hours(2);
    let summary = engine.instances.bill_running(later).await.expect("bill");
    assert_eq!(summary.charged, 1);
    assert_eq!(summary.stopped, 0);
    assert_eq!(engine.ledger.balance(account.id).await.expect("balance"), 1);

    // Third billing hour: 1 < 2, so the instance stops instead of deleting.
    let even_later = later + chrono::Duration::hours(2);
    let summary = engine
        .instances
        .bill_running(even_later)
        .await
        .expect("bill");
    assert_eq!(summary.charged, 0);
    assert_eq!(summary.stopped, 1);

    let stopped = engine
        .instances
        .get(account.id, instance.external_id)
        .await
        .expect("get");
    assert_eq!(stopped.status, InstanceStatus::Stopped);
    assert_eq!(engine.ledger.balance(account.id).await.expect("balance"), 1);

    // Top up and restart: one hour is charged up front.
    engine
        .ledger
        .apply(lemonbase_core::ledger::LedgerEntry {
            account_id: account.id,
            action: lemonbase_core::ledger::ActionType::WelcomeBonus,
            amount: 10,
            instance_id: None,
            note: "top-up".to_string(),
        })
        .await
        .expect("top up");
    engine
        .instances
        .start(account.id, instance.external_id)
        .await
        .expect("restart");

    let running = engine
        .instances
        .get(account.id, instance.external_id)
        .await
        .expect("get");
    assert_eq!(running.status, InstanceStatus::Running);
    assert_eq!(engine.ledger.balance(account.id).await.expect("balance"), 9);

    runtime.shutdown().await;
}

#[tokio::test]
async fn stop_and_start_respect_the_state_machine() {
    let runtime = start_engine(rich_config(), Arc::new(MockProvisioner::succeeding())).await;
    let engine = runtime.engine();
    let account = register(engine, "operator@example.com").await;

    let instance = engine
        .instances
        .create(account.id, redis_1gb("toggled"))
        .await
        .expect("create");
    wait_for_status(engine, account.id, instance.external_id, InstanceStatus::Running).await;

    engine
        .instances
        .stop(account.id, instance.external_id)
        .await
        .expect("stop");
    let stopped = engine
        .instances
        .get(account.id, instance.external_id)
        .await
        .expect("get");
    assert_eq!(stopped.status, InstanceStatus::Stopped);
    assert!(stopped.stopped_at.is_some());

    // Stopping twice is an invalid transition.
    let err = engine
        .instances
        .stop(account.id, instance.external_id)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_STATE_TRANSITION");

    engine
        .instances
        .start(account.id, instance.external_id)
        .await
        .expect("start");
    let running = engine
        .instances
        .get(account.id, instance.external_id)
        .await
        .expect("get");
    assert_eq!(running.status, InstanceStatus::Running);

    runtime.shutdown().await;
}
