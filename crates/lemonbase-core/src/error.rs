// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for lemonbase-core.
//!
//! Every expected, user-facing outcome is a variant with a stable error code.
//! The HTTP layer maps codes to statuses; internal faults (database, JSON)
//! carry their source and map to a generic code.

use thiserror::Error;
use uuid::Uuid;

/// Result type using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Core errors that can occur while coordinating harvests and instances.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Account was not found.
    #[error("Account '{account_id}' not found")]
    AccountNotFound {
        /// The account that was looked up.
        account_id: Uuid,
    },

    /// A debit would drive the balance below zero.
    #[error("Insufficient balance: need {required}, missing {missing}")]
    InsufficientBalance {
        /// Total lemons the operation needs.
        required: i64,
        /// How many lemons are missing.
        missing: i64,
    },

    /// A credit has no headroom left under the storage cap.
    #[error("Lemon storage full (cap {cap})")]
    StorageFull {
        /// The configured maximum stored balance.
        cap: i64,
    },

    /// The position is not available for reservation.
    #[error("Position {position_id} is not available")]
    PositionNotAvailable {
        /// The contested position.
        position_id: i32,
    },

    /// The account already has a live quiz attempt.
    #[error("A quiz attempt is already in progress")]
    AlreadyAttempting,

    /// The account is inside the post-harvest cooldown.
    #[error("Harvest cooldown active, {wait_secs}s remaining")]
    CooldownActive {
        /// Seconds until the cooldown ends.
        wait_secs: i64,
    },

    /// The quiz attempt was not found.
    #[error("Attempt '{attempt_id}' not found")]
    AttemptNotFound {
        /// The attempt that was looked up.
        attempt_id: Uuid,
    },

    /// The quiz attempt already reached a terminal state.
    #[error("Attempt '{attempt_id}' is already terminal")]
    AttemptAlreadyTerminal {
        /// The attempt that was re-submitted.
        attempt_id: Uuid,
    },

    /// The harvest window has expired.
    #[error("Harvest window expired")]
    WindowExpired,

    /// The caller does not hold the live reservation for the position.
    #[error("Position is reserved by another account")]
    NotReserver,

    /// The position was already harvested by another account.
    #[error("Position was already harvested")]
    AlreadyHarvested,

    /// The account owns the maximum number of instances.
    #[error("Instance quota exceeded (max {max})")]
    OwnerQuotaExceeded {
        /// Maximum concurrent instances per account.
        max: i64,
    },

    /// The cluster has no headroom for the requested resources.
    #[error("Insufficient capacity: {reason}")]
    InsufficientCapacity {
        /// Which dimension ran out and by how much.
        reason: String,
    },

    /// The caller does not own the resource.
    #[error("Not the owner of this resource")]
    NotOwner,

    /// A resource was not found.
    #[error("{resource} '{id}' not found")]
    NotFound {
        /// The resource kind (instance, preset, question, ...).
        resource: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// An instance name is already taken by the same owner.
    #[error("Instance name '{name}' already in use")]
    NameConflict {
        /// The conflicting name.
        name: String,
    },

    /// A request parameter failed validation.
    #[error("Invalid parameter '{field}': {message}")]
    InvalidParameter {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        message: String,
    },

    /// The instance cannot move from its current status to the requested one.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStateTransition {
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Stable machine-readable code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Json(_) => "INTERNAL_ERROR",
            Self::AccountNotFound { .. } => "ACCOUNT_NOT_FOUND",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::StorageFull { .. } => "STORAGE_FULL",
            Self::PositionNotAvailable { .. } => "POSITION_NOT_AVAILABLE",
            Self::AlreadyAttempting => "ALREADY_ATTEMPTING",
            Self::CooldownActive { .. } => "COOLDOWN_ACTIVE",
            Self::AttemptNotFound { .. } => "ATTEMPT_NOT_FOUND",
            Self::AttemptAlreadyTerminal { .. } => "ATTEMPT_ALREADY_TERMINAL",
            Self::WindowExpired => "WINDOW_EXPIRED",
            Self::NotReserver => "NOT_RESERVER",
            Self::AlreadyHarvested => "ALREADY_HARVESTED",
            Self::OwnerQuotaExceeded { .. } => "OWNER_QUOTA_EXCEEDED",
            Self::InsufficientCapacity { .. } => "INSUFFICIENT_CAPACITY",
            Self::NotOwner => "NOT_OWNER",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::NameConflict { .. } => "NAME_CONFLICT",
            Self::InvalidParameter { .. } => "INVALID_PARAMETER",
            Self::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            Self::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether this error is an expected, user-facing outcome (4xx) rather
    /// than an internal fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Database(_) | Self::Json(_) | Self::Other(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        let cases: Vec<(Error, &str)> = vec![
            (
                Error::InsufficientBalance {
                    required: 22,
                    missing: 7,
                },
                "INSUFFICIENT_BALANCE",
            ),
            (
                Error::PositionNotAvailable { position_id: 3 },
                "POSITION_NOT_AVAILABLE",
            ),
            (Error::AlreadyAttempting, "ALREADY_ATTEMPTING"),
            (Error::CooldownActive { wait_secs: 60 }, "COOLDOWN_ACTIVE"),
            (Error::WindowExpired, "WINDOW_EXPIRED"),
            (Error::NotReserver, "NOT_RESERVER"),
            (Error::AlreadyHarvested, "ALREADY_HARVESTED"),
            (Error::OwnerQuotaExceeded { max: 2 }, "OWNER_QUOTA_EXCEEDED"),
            (
                Error::InsufficientCapacity {
                    reason: "cpu".to_string(),
                },
                "INSUFFICIENT_CAPACITY",
            ),
            (Error::NotOwner, "NOT_OWNER"),
            (Error::StorageFull { cap: 500 }, "STORAGE_FULL"),
        ];

        for (error, code) in cases {
            assert_eq!(error.error_code(), code);
            assert!(error.is_client_error());
        }
    }

    #[test]
    fn internal_faults_are_not_client_errors() {
        let err = Error::Other("half-applied state".to_string());
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
        assert!(!err.is_client_error());
    }

    #[test]
    fn display_names_the_subject() {
        let id = Uuid::nil();
        let err = Error::AttemptNotFound { attempt_id: id };
        assert_eq!(
            err.to_string(),
            format!("Attempt '{}' not found", id)
        );

        let err = Error::NotFound {
            resource: "instance",
            id: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "instance 'abc' not found");
    }
}
