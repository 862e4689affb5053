// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP-level tests: the full frontend contract served over the router with
//! an in-memory engine.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::util::ServiceExt;

use lemonbase_core::config::EngineConfig;
use lemonbase_core::provisioner::MockProvisioner;
use lemonbase_core::runtime::{Engine, EngineRuntime};
use lemonbase_core::store::MemoryStore;
use lemonbase_server::{AppState, router};

async fn test_app() -> (Router, Engine, EngineRuntime) {
    let config = EngineConfig {
        harvest_cooldown: Duration::from_secs(3600),
        welcome_bonus: 100,
        ..EngineConfig::default()
    };
    let runtime = EngineRuntime::builder()
        .store(Arc::new(MemoryStore::new()))
        .provisioner(Arc::new(MockProvisioner::succeeding()))
        .config(config)
        .without_workers()
        .build()
        .expect("build")
        .start()
        .await
        .expect("start");
    let engine = runtime.engine().clone();
    let app = router(AppState::new(engine.clone()));
    (app, engine, runtime)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

fn get(path: &str, account: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(path);
    if let Some(account) = account {
        builder = builder.header("x-account-id", account);
    }
    builder.body(Body::empty()).expect("request")
}

fn post(path: &str, account: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(account) = account {
        builder = builder.header("x-account-id", account);
    }
    builder
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn register(app: &Router, email: &str) -> String {
    let response = app
        .clone()
        .oneshot(post("/accounts", None, json!({ "email": email })))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    body["id"].as_str().expect("account id").to_string()
}

#[tokio::test]
async fn health_reports_ready() {
    let (app, _engine, runtime) = test_app().await;

    let response = app.oneshot(get("/health", None)).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["healthy"], json!(true));

    runtime.shutdown().await;
}

#[tokio::test]
async fn registration_grants_the_welcome_bonus() {
    let (app, _engine, runtime) = test_app().await;

    let response = app
        .clone()
        .oneshot(post("/accounts", None, json!({ "email": "new@example.com" })))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["lemonBalance"], json!(100));
    assert_eq!(body["email"], json!("new@example.com"));

    let id = body["id"].as_str().expect("id");
    let response = app
        .oneshot(get("/accounts/me", Some(id)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let me = body_json(response).await;
    assert_eq!(me["id"], json!(id));

    runtime.shutdown().await;
}

#[tokio::test]
async fn missing_or_unknown_account_header_is_401() {
    let (app, _engine, runtime) = test_app().await;

    let response = app
        .clone()
        .oneshot(get("/lemon/harvestable", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .oneshot(get(
            "/lemon/harvestable",
            Some("00000000-0000-0000-0000-000000000001"),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"]["code"], json!("ACCOUNT_NOT_FOUND"));

    runtime.shutdown().await;
}

#[tokio::test]
async fn global_status_is_public_and_lists_positions() {
    let (app, _engine, runtime) = test_app().await;

    let response = app
        .oneshot(get("/lemon/global-status", None))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(
        body["availablePositions"].as_array().expect("array").len(),
        10
    );
    assert_eq!(body["totalHarvested"], json!(0));

    runtime.shutdown().await;
}

#[tokio::test]
async fn quiz_to_harvest_over_http() {
    let (app, engine, runtime) = test_app().await;
    let account = register(&app, "picker@example.com").await;

    // Start the quiz for position 0.
    let response = app
        .clone()
        .oneshot(get("/quiz/0", Some(&account)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let quiz = body_json(response).await;
    let attempt_id = quiz["attemptId"].as_str().expect("attempt id").to_string();
    assert!(quiz["options"].as_array().expect("options").len() >= 2);
    assert!(quiz.get("correctOption").is_none());

    // Look the answer up server-side.
    let attempt = engine
        .store
        .attempt(attempt_id.parse().expect("uuid"))
        .await
        .expect("attempt")
        .expect("exists");
    let correct = engine
        .store
        .question(attempt.question_id)
        .await
        .expect("question")
        .expect("exists")
        .correct_option;

    // Submit it.
    let response = app
        .clone()
        .oneshot(post(
            "/quiz/answer",
            Some(&account),
            json!({ "attemptId": attempt_id, "optionIdx": correct }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = body_json(response).await;
    assert_eq!(outcome["isCorrect"], json!(true));
    assert_eq!(outcome["harvestEnabled"], json!(true));
    assert!(outcome["harvestTimeoutAt"].is_string());

    // Claim the lemon.
    let response = app
        .clone()
        .oneshot(post(
            "/lemon/harvest",
            Some(&account),
            json!({ "positionId": 0, "attemptId": attempt_id }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let receipt = body_json(response).await;
    assert_eq!(receipt["harvestAmount"], json!(5));
    assert_eq!(receipt["newBalance"], json!(105));

    // Cooldown is now active.
    let response = app
        .clone()
        .oneshot(get("/lemon/harvestable", Some(&account)))
        .await
        .expect("response");
    let availability = body_json(response).await;
    assert_eq!(availability["canHarvest"], json!(false));
    assert!(availability["waitSeconds"].as_i64().expect("wait") > 0);

    // And a second quiz is blocked.
    let response = app
        .oneshot(get("/quiz/1", Some(&account)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], json!("COOLDOWN_ACTIVE"));

    runtime.shutdown().await;
}

#[tokio::test]
async fn presets_are_served_with_costs() {
    let (app, _engine, runtime) = test_app().await;

    let response = app.oneshot(get("/db/presets", None)).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let presets = body.as_array().expect("array");
    assert!(presets.len() >= 4);
    for preset in presets {
        assert!(preset["cost"]["creationCost"].as_i64().expect("cost") > 0);
        assert!(preset["cost"]["hourlyLemons"].as_i64().expect("hourly") > 0);
    }

    runtime.shutdown().await;
}

#[tokio::test]
async fn instance_lifecycle_over_http() {
    let (app, _engine, runtime) = test_app().await;
    let account = register(&app, "builder@example.com").await;

    // Create a custom Redis instance (creation 20 + first hour 2).
    let response = app
        .clone()
        .oneshot(post(
            "/db/instances",
            Some(&account),
            json!({
                "name": "cache-main",
                "type": "redis",
                "resources": { "cpu": 0.5, "memory": 1024, "disk": 5 }
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["status"], json!("provisioning"));
    assert_eq!(created["cost"]["creationCost"], json!(20));
    let id = created["id"].as_str().expect("id").to_string();

    // Poll until the mock backend reports Running.
    let mut status = created["status"].clone();
    for _ in 0..100 {
        let response = app
            .clone()
            .oneshot(get(&format!("/db/instances/{}", id), Some(&account)))
            .await
            .expect("response");
        let body = body_json(response).await;
        status = body["status"].clone();
        if status == json!("running") {
            assert!(body["endpoint"].is_string());
            assert_eq!(body["port"], json!(6379));
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, json!("running"));

    // The balance shows the debit.
    let response = app
        .clone()
        .oneshot(get("/accounts/me", Some(&account)))
        .await
        .expect("response");
    let me = body_json(response).await;
    assert_eq!(me["lemonBalance"], json!(78));

    // The instance shows up in the list and in the capacity snapshot.
    let response = app
        .clone()
        .oneshot(get("/db/instances", Some(&account)))
        .await
        .expect("response");
    let list = body_json(response).await;
    assert_eq!(list.as_array().expect("array").len(), 1);

    let response = app
        .clone()
        .oneshot(get("/system/resources", None))
        .await
        .expect("response");
    let resources = body_json(response).await;
    assert_eq!(resources["activeCount"], json!(1));
    assert_eq!(resources["used"]["memory"], json!(1024));

    // Tear it down.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/db/instances/{}", id))
                .header("x-account-id", &account)
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(get(&format!("/db/instances/{}", id), Some(&account)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    runtime.shutdown().await;
}

#[tokio::test]
async fn quota_and_capacity_rejections_carry_stable_codes() {
    let (app, _engine, runtime) = test_app().await;
    let account = register(&app, "hoarder@example.com").await;

    let create = |name: &str| {
        post(
            "/db/instances",
            Some(&account),
            json!({
                "name": name,
                "type": "redis",
                "resources": { "cpu": 0.1, "memory": 256, "disk": 1 }
            }),
        )
    };

    for name in ["one", "two"] {
        let response = app.clone().oneshot(create(name)).await.expect("response");
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = app.clone().oneshot(create("three")).await.expect("response");
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], json!("OWNER_QUOTA_EXCEEDED"));

    // An oversized request is turned away by admission control.
    let other = register(&app, "giant@example.com").await;
    let response = app
        .oneshot(post(
            "/db/instances",
            Some(&other),
            json!({
                "name": "leviathan",
                "type": "mongodb",
                "resources": { "cpu": 32.0, "memory": 131072, "disk": 1000 }
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], json!("INSUFFICIENT_CAPACITY"));

    runtime.shutdown().await;
}

#[tokio::test]
async fn preset_creation_requires_no_custom_fields() {
    let (app, _engine, runtime) = test_app().await;
    let account = register(&app, "preset@example.com").await;

    let response = app
        .clone()
        .oneshot(post(
            "/db/instances",
            Some(&account),
            json!({ "name": "sessions", "presetId": "redis-cache-tiny" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["createdFromPreset"], json!("redis-cache-tiny"));

    // Neither preset nor custom shape is a 400.
    let response = app
        .oneshot(post(
            "/db/instances",
            Some(&account),
            json!({ "name": "shapeless" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], json!("INVALID_PARAMETER"));

    runtime.shutdown().await;
}
