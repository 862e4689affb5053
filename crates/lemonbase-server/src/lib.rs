// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lemonbase Server - HTTP API
//!
//! Serves the frontend contract over axum:
//!
//! | Method/Path | Purpose |
//! |-------------|---------|
//! | `GET /health` | liveness |
//! | `POST /accounts` | register (post-OTP hook) + welcome bonus |
//! | `GET /accounts/me` | account profile |
//! | `GET /lemon/global-status` | public tree snapshot |
//! | `GET /lemon/harvestable` | cooldown check |
//! | `GET /quiz/{position_id}` | issue a quiz, open an attempt |
//! | `POST /quiz/answer` | finalize the attempt, maybe open a window |
//! | `POST /lemon/harvest` | claim a reserved position |
//! | `GET /db/presets` | preset catalog |
//! | `POST /db/instances` | create (admission + debit) |
//! | `GET /db/instances` | list owned instances |
//! | `GET /db/instances/{id}` | poll one instance |
//! | `DELETE /db/instances/{id}` | tear down |
//! | `POST /db/instances/{id}/stop` | halt billing |
//! | `POST /db/instances/{id}/start` | restart (re-bills an hour) |
//! | `GET /system/resources` | capacity snapshot |
//!
//! All domain decisions live in `lemonbase-core`; this crate only parses,
//! dispatches, and serializes. Authentication is a bearer account id in
//! `X-Account-Id` - the OTP/session layer in front of this service is out of
//! scope.

#![deny(missing_docs)]

/// Server configuration from environment variables.
pub mod config;

/// Error-to-HTTP mapping.
pub mod error;

/// Request handlers.
pub mod routes;

use std::time::Instant;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use lemonbase_core::Engine;

/// Shared state cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    /// The engine service handle.
    pub engine: Engine,
    /// When the server started, for uptime reporting.
    pub start_time: Instant,
    /// Server version string.
    pub version: String,
}

impl AppState {
    /// Create state over a running engine.
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health))
        .route("/accounts", post(routes::register_account))
        .route("/accounts/me", get(routes::my_account))
        .route("/lemon/global-status", get(routes::global_status))
        .route("/lemon/harvestable", get(routes::harvestable))
        .route("/lemon/harvest", post(routes::harvest))
        .route("/quiz/{position_id}", get(routes::start_quiz))
        .route("/quiz/answer", post(routes::submit_answer))
        .route("/db/presets", get(routes::list_presets))
        .route(
            "/db/instances",
            get(routes::list_instances).post(routes::create_instance),
        )
        .route(
            "/db/instances/{id}",
            get(routes::get_instance).delete(routes::delete_instance),
        )
        .route("/db/instances/{id}/stop", post(routes::stop_instance))
        .route("/db/instances/{id}/start", post(routes::start_instance))
        .route("/system/resources", get(routes::system_resources))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
