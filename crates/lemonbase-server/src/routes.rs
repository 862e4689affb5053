// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP handlers for the lemonbase API.
//!
//! Thin adapters: parse the request, call one engine operation, serialize
//! the result. Account identity arrives in the `X-Account-Id` header; the
//! session layer that issues it (OTP verification) sits in front of this
//! service.

use axum::Json;
use axum::extract::{FromRequestParts, Path, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use lemonbase_core::Error as CoreError;
use lemonbase_core::capacity::CapacitySnapshot;
use lemonbase_core::grove::GroveStatus;
use lemonbase_core::harvest::{HarvestAvailability, HarvestReceipt};
use lemonbase_core::ledger::Account;
use lemonbase_core::lifecycle::{
    CreateInstance, DbMode, DbSize, DbType, Instance, InstanceSource, InstanceStatus, LemonCost,
    ResourceSpec,
};
use lemonbase_core::presets::{self, Preset};
use lemonbase_core::quiz::{AnswerOutcome, IssuedQuiz};

use crate::AppState;
use crate::error::ApiError;

/// The authenticated account, extracted from `X-Account-Id`.
pub struct CurrentAccount(
    /// The resolved account.
    pub Account,
);

impl FromRequestParts<AppState> for CurrentAccount {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let account_id = parts
            .headers
            .get("x-account-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or(ApiError(CoreError::AccountNotFound {
                account_id: Uuid::nil(),
            }))?;
        let account = state.engine.account(account_id).await?;
        Ok(Self(account))
    }
}

// ============================================================================
// Health
// ============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Whether the store is reachable.
    pub healthy: bool,
    /// Server version.
    pub version: String,
    /// Server uptime in milliseconds.
    pub uptime_ms: i64,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let healthy = state.engine.store.health_check().await.unwrap_or(false);
    Json(HealthResponse {
        healthy,
        version: state.version.clone(),
        uptime_ms: state.start_time.elapsed().as_millis() as i64,
    })
}

// ============================================================================
// Accounts
// ============================================================================

/// Registration request.
#[derive(Debug, Deserialize)]
pub struct RegisterBody {
    /// Verified email address.
    pub email: String,
}

/// `POST /accounts` - the post-OTP-verification hook.
pub async fn register_account(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> Result<(StatusCode, Json<Account>), ApiError> {
    let account = state.engine.register_account(&body.email).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// `GET /accounts/me`
pub async fn my_account(CurrentAccount(account): CurrentAccount) -> Json<Account> {
    Json(account)
}

// ============================================================================
// Lemon tree
// ============================================================================

/// `GET /lemon/global-status` - public tree snapshot.
pub async fn global_status(
    State(state): State<AppState>,
) -> Result<Json<GroveStatus>, ApiError> {
    Ok(Json(state.engine.grove.status().await?))
}

/// `GET /lemon/harvestable` - cooldown check for the current account.
pub async fn harvestable(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
) -> Result<Json<HarvestAvailability>, ApiError> {
    Ok(Json(state.engine.harvest.availability(account.id).await?))
}

/// Harvest request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestBody {
    /// Position to claim.
    pub position_id: i32,
    /// Attempt whose window backs the claim.
    pub attempt_id: Uuid,
}

/// `POST /lemon/harvest` - claim a reserved position.
pub async fn harvest(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    Json(body): Json<HarvestBody>,
) -> Result<Json<HarvestReceipt>, ApiError> {
    let receipt = state
        .engine
        .harvest
        .harvest(account.id, body.position_id, body.attempt_id)
        .await?;
    Ok(Json(receipt))
}

// ============================================================================
// Quiz
// ============================================================================

/// `GET /quiz/{position_id}` - issue the question for a position.
pub async fn start_quiz(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    Path(position_id): Path<i32>,
) -> Result<Json<IssuedQuiz>, ApiError> {
    let quiz = state.engine.quiz.start_quiz(account.id, position_id).await?;
    Ok(Json(quiz))
}

/// Answer submission request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerBody {
    /// Attempt being answered.
    pub attempt_id: Uuid,
    /// Index of the chosen option.
    pub option_idx: i32,
}

/// `POST /quiz/answer` - finalize an attempt.
pub async fn submit_answer(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    Json(body): Json<AnswerBody>,
) -> Result<Json<AnswerOutcome>, ApiError> {
    let outcome = state
        .engine
        .quiz
        .submit_answer(account.id, body.attempt_id, body.option_idx)
        .await?;
    Ok(Json(outcome))
}

// ============================================================================
// Database instances
// ============================================================================

/// `GET /db/presets` - the curated catalog.
pub async fn list_presets() -> Json<Vec<Preset>> {
    Json(presets::catalog())
}

/// Instance creation request: a preset id, or a custom shape.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInstanceBody {
    /// Instance name.
    pub name: String,
    /// Preset to use; custom fields are ignored when set.
    pub preset_id: Option<String>,
    /// Custom: database engine.
    #[serde(rename = "type")]
    pub db_type: Option<DbType>,
    /// Custom: deployment mode.
    pub mode: Option<DbMode>,
    /// Custom: requested resources.
    pub resources: Option<ResourceSpec>,
}

impl CreateInstanceBody {
    fn into_request(self) -> Result<CreateInstance, CoreError> {
        let source = match self.preset_id {
            Some(preset_id) => InstanceSource::Preset { preset_id },
            None => {
                let (Some(db_type), Some(resources)) = (self.db_type, self.resources) else {
                    return Err(CoreError::InvalidParameter {
                        field: "type,resources",
                        message: "required unless presetId is given".to_string(),
                    });
                };
                InstanceSource::Custom {
                    db_type,
                    mode: self.mode,
                    resources,
                }
            }
        };
        Ok(CreateInstance {
            name: self.name,
            source,
        })
    }
}

/// Instance representation on the wire.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceResponse {
    /// Public instance id.
    pub id: Uuid,
    /// Instance name.
    pub name: String,
    /// Database engine.
    #[serde(rename = "type")]
    pub db_type: DbType,
    /// Size class.
    pub size: DbSize,
    /// Deployment mode.
    pub mode: DbMode,
    /// Lifecycle status.
    pub status: InstanceStatus,
    /// Reason for the current status.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub status_reason: String,
    /// Allocated resources.
    pub resources: ResourceSpec,
    /// Lemon cost.
    pub cost: LemonCost,
    /// Connection host, once Running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Connection port, once Running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    /// Preset this instance came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_from_preset: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// When the instance was stopped, while Stopped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
}

impl From<Instance> for InstanceResponse {
    fn from(instance: Instance) -> Self {
        Self {
            id: instance.external_id,
            name: instance.name,
            db_type: instance.db_type,
            size: instance.size,
            mode: instance.mode,
            status: instance.status,
            status_reason: instance.status_reason,
            resources: instance.resources,
            cost: instance.cost,
            endpoint: instance.endpoint,
            port: instance.port,
            created_from_preset: instance.created_from_preset,
            created_at: instance.created_at,
            updated_at: instance.updated_at,
            stopped_at: instance.stopped_at,
        }
    }
}

/// `POST /db/instances` - admission, debit, and provisioning hand-off.
pub async fn create_instance(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    Json(body): Json<CreateInstanceBody>,
) -> Result<(StatusCode, Json<InstanceResponse>), ApiError> {
    let request = body.into_request()?;
    let instance = state.engine.instances.create(account.id, request).await?;
    Ok((StatusCode::CREATED, Json(instance.into())))
}

/// `GET /db/instances` - the account's instances.
pub async fn list_instances(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
) -> Result<Json<Vec<InstanceResponse>>, ApiError> {
    let instances = state.engine.instances.list(account.id).await?;
    Ok(Json(instances.into_iter().map(Into::into).collect()))
}

/// `GET /db/instances/{id}` - polled while Provisioning.
pub async fn get_instance(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    Path(id): Path<Uuid>,
) -> Result<Json<InstanceResponse>, ApiError> {
    let instance = state.engine.instances.get(account.id, id).await?;
    Ok(Json(instance.into()))
}

/// `DELETE /db/instances/{id}`
pub async fn delete_instance(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.engine.instances.delete(account.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /db/instances/{id}/stop`
pub async fn stop_instance(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.engine.instances.stop(account.id, id).await?;
    Ok(StatusCode::OK)
}

/// `POST /db/instances/{id}/start`
pub async fn start_instance(
    State(state): State<AppState>,
    CurrentAccount(account): CurrentAccount,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.engine.instances.start(account.id, id).await?;
    Ok(StatusCode::OK)
}

// ============================================================================
// System resources
// ============================================================================

/// `GET /system/resources` - capacity snapshot for admission visibility.
pub async fn system_resources(
    State(state): State<AppState>,
) -> Result<Json<CapacitySnapshot>, ApiError> {
    Ok(Json(state.engine.capacity.snapshot().await?))
}
