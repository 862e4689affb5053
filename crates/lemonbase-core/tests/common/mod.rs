// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for engine integration tests.
#![allow(dead_code)] // Not every test binary uses every helper.

use std::sync::Arc;
use std::time::Duration;

use lemonbase_core::config::EngineConfig;
use lemonbase_core::ledger::Account;
use lemonbase_core::provisioner::Provisioner;
use lemonbase_core::quiz::IssuedQuiz;
use lemonbase_core::runtime::{Engine, EngineRuntime};
use lemonbase_core::store::MemoryStore;

/// A config tuned for tests: no cooldown, tight windows, workers driven by
/// hand.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        harvest_cooldown: Duration::ZERO,
        harvest_window: Duration::from_secs(5),
        regrowth_interval: Duration::from_secs(1800),
        ..EngineConfig::default()
    }
}

/// Start an engine without background workers; tests tick sweeps manually.
pub async fn start_engine(
    config: EngineConfig,
    provisioner: Arc<dyn Provisioner>,
) -> EngineRuntime {
    EngineRuntime::builder()
        .store(Arc::new(MemoryStore::new()))
        .provisioner(provisioner)
        .config(config)
        .without_workers()
        .build()
        .expect("engine build")
        .start()
        .await
        .expect("engine start")
}

/// Register a fresh account.
pub async fn register(engine: &Engine, email: &str) -> Account {
    engine.register_account(email).await.expect("register account")
}

/// Answer a started quiz correctly by reading the bank server-side.
pub async fn correct_option(engine: &Engine, quiz: &IssuedQuiz) -> i32 {
    let attempt = engine
        .store
        .attempt(quiz.attempt_id)
        .await
        .expect("load attempt")
        .expect("attempt exists");
    engine
        .store
        .question(attempt.question_id)
        .await
        .expect("load question")
        .expect("question exists")
        .correct_option
}

/// An option index that is definitely wrong for the issued quiz.
pub async fn wrong_option(engine: &Engine, quiz: &IssuedQuiz) -> i32 {
    let correct = correct_option(engine, quiz).await;
    (correct + 1) % quiz.options.len() as i32
}
