// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error-to-HTTP mapping.
//!
//! Every expected engine outcome maps to a 4xx with its stable code in the
//! body; internal faults are logged server-side and surface as an opaque
//! 500, never leaking database details.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use lemonbase_core::Error as CoreError;

/// JSON error envelope: `{"success": false, "error": {"code", "message"}}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Always false.
    pub success: bool,
    /// The error payload.
    pub error: ErrorDetail,
}

/// Stable code plus human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

/// An API-layer error, convertible into a response.
#[derive(Debug)]
pub struct ApiError(
    /// The engine error being surfaced.
    pub CoreError,
);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

/// HTTP status for an engine error code.
fn status_for(err: &CoreError) -> StatusCode {
    match err.error_code() {
        "ACCOUNT_NOT_FOUND" => StatusCode::UNAUTHORIZED,
        "INVALID_PARAMETER" => StatusCode::BAD_REQUEST,
        "INSUFFICIENT_BALANCE" => StatusCode::PAYMENT_REQUIRED,
        "NOT_OWNER" | "NOT_RESERVER" => StatusCode::FORBIDDEN,
        "NOT_FOUND" | "ATTEMPT_NOT_FOUND" => StatusCode::NOT_FOUND,
        "COOLDOWN_ACTIVE" => StatusCode::TOO_MANY_REQUESTS,
        "WINDOW_EXPIRED" | "ALREADY_HARVESTED" => StatusCode::GONE,
        "POSITION_NOT_AVAILABLE"
        | "ALREADY_ATTEMPTING"
        | "ATTEMPT_ALREADY_TERMINAL"
        | "OWNER_QUOTA_EXCEEDED"
        | "NAME_CONFLICT"
        | "STORAGE_FULL"
        | "INVALID_STATE_TRANSITION" => StatusCode::CONFLICT,
        "INSUFFICIENT_CAPACITY" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        let (code, message) = if self.0.is_client_error() {
            (self.0.error_code().to_string(), self.0.to_string())
        } else {
            tracing::error!(error = %self.0, "Internal error while handling request");
            (
                "INTERNAL_ERROR".to_string(),
                "internal error".to_string(),
            )
        };

        let body = ErrorBody {
            success: false,
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_outcomes_map_to_4xx() {
        let cases = [
            (CoreError::AlreadyAttempting, StatusCode::CONFLICT),
            (CoreError::WindowExpired, StatusCode::GONE),
            (CoreError::NotOwner, StatusCode::FORBIDDEN),
            (
                CoreError::InsufficientBalance {
                    required: 10,
                    missing: 5,
                },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                CoreError::CooldownActive { wait_secs: 60 },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                CoreError::InsufficientCapacity {
                    reason: "cpu".to_string(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, want) in cases {
            assert_eq!(status_for(&err), want);
        }
    }

    #[test]
    fn internal_faults_map_to_500() {
        let err = CoreError::Other("boom".to_string());
        assert_eq!(status_for(&err), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
