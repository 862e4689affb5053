// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Quiz challenge engine.
//!
//! Each harvest begins with a quiz: the player requests the question assigned
//! to an Available position, answers within the question's time limit, and on
//! a correct answer receives a short-lived harvest window backed by a
//! position reservation. An account holds at most one live attempt at a time,
//! and an attempt becomes terminal exactly once; re-submitting a terminal
//! attempt fails `AttemptAlreadyTerminal`.
//!
//! A correct answer that loses the reservation race is still scored correct;
//! the response just carries `harvest_enabled = false`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::grove::PositionState;
use crate::store::Store;

/// Lifecycle state of a quiz attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Question issued, no answer yet.
    Started,
    /// Answered correctly in time.
    DoneCorrect,
    /// Answered incorrectly.
    DoneIncorrect,
    /// Never answered (or answered late); swept or marked on submission.
    Timeout,
}

impl AttemptStatus {
    /// Whether the attempt has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Started)
    }

    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::DoneCorrect => "done_correct",
            Self::DoneIncorrect => "done_incorrect",
            Self::Timeout => "timeout",
        }
    }

    /// Parse the storage string form.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "started" => Ok(Self::Started),
            "done_correct" => Ok(Self::DoneCorrect),
            "done_incorrect" => Ok(Self::DoneIncorrect),
            "timeout" => Ok(Self::Timeout),
            other => Err(Error::Other(format!("unknown attempt status '{}'", other))),
        }
    }
}

/// Where the attempt stands in the click-to-harvest phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarvestPhase {
    /// Not in the harvest phase (default).
    None,
    /// Reservation held, window ticking.
    Window,
    /// Lemon claimed.
    Harvested,
    /// Window lapsed before the claim.
    WindowExpired,
    /// Another account won the position first.
    Lost,
}

impl HarvestPhase {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Window => "window",
            Self::Harvested => "harvested",
            Self::WindowExpired => "window_expired",
            Self::Lost => "lost",
        }
    }

    /// Parse the storage string form.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "none" => Ok(Self::None),
            "window" => Ok(Self::Window),
            "harvested" => Ok(Self::Harvested),
            "window_expired" => Ok(Self::WindowExpired),
            "lost" => Ok(Self::Lost),
            other => Err(Error::Other(format!("unknown harvest phase '{}'", other))),
        }
    }
}

/// One quiz attempt by one account on one position.
#[derive(Debug, Clone)]
pub struct Attempt {
    /// Unique attempt identifier.
    pub attempt_id: Uuid,
    /// Account taking the quiz.
    pub account_id: Uuid,
    /// Position being contested.
    pub position_id: i32,
    /// Question issued for this attempt.
    pub question_id: Uuid,
    /// When the question was issued.
    pub issued_at: DateTime<Utc>,
    /// Hard wall-clock deadline for the answer (time limit + grace).
    pub answer_deadline: DateTime<Utc>,
    /// Current lifecycle state.
    pub status: AttemptStatus,
    /// Option the player picked, once submitted.
    pub selected_option: Option<i32>,
    /// When the answer arrived, once submitted.
    pub submitted_at: Option<DateTime<Utc>>,
    /// When the harvest window lapses, while one is open.
    pub harvest_window_expires_at: Option<DateTime<Utc>>,
    /// Click-phase state.
    pub harvest_phase: HarvestPhase,
}

/// A freshly issued quiz, ready to show the player.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedQuiz {
    /// The attempt to submit the answer against.
    pub attempt_id: Uuid,
    /// Position the quiz is for.
    pub position_id: i32,
    /// Question text.
    pub question: String,
    /// Answer options. The correct index is not included.
    pub options: Vec<String>,
    /// Seconds the player has to answer.
    pub time_limit: i64,
}

/// Outcome of an answer submission.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOutcome {
    /// The attempt that was finalized.
    pub attempt_id: Uuid,
    /// Whether the selected option was the correct one.
    pub is_correct: bool,
    /// Terminal status the attempt reached.
    pub status: AttemptStatus,
    /// The correct option, revealed now that the attempt is terminal.
    pub correct_option: i32,
    /// Whether a harvest window was opened for this attempt.
    pub harvest_enabled: bool,
    /// When the harvest window closes, when one was opened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub harvest_timeout_at: Option<DateTime<Utc>>,
}

/// The quiz challenge service.
#[derive(Clone)]
pub struct QuizEngine {
    store: Arc<dyn Store>,
    config: EngineConfig,
}

impl QuizEngine {
    /// Create a quiz engine over the given store.
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Issue the question assigned to a position and open an attempt.
    ///
    /// Fails `CooldownActive` inside the post-harvest cooldown,
    /// `PositionNotAvailable` unless the position is Available, and
    /// `AlreadyAttempting` when the account already has a live attempt.
    pub async fn start_quiz(&self, account_id: Uuid, position_id: i32) -> Result<IssuedQuiz> {
        let account = self
            .store
            .account(account_id)
            .await?
            .ok_or(Error::AccountNotFound { account_id })?;

        let now = Utc::now();
        if let Some(last) = account.last_harvest_at {
            let cooldown = Duration::from_std(self.config.harvest_cooldown)
                .map_err(|e| Error::Other(format!("invalid cooldown: {}", e)))?;
            let until = last + cooldown;
            if now < until {
                return Err(Error::CooldownActive {
                    wait_secs: (until - now).num_seconds().max(1),
                });
            }
        }

        let position = self
            .store
            .position(position_id)
            .await?
            .ok_or(Error::PositionNotAvailable { position_id })?;
        if position.state != PositionState::Available {
            return Err(Error::PositionNotAvailable { position_id });
        }
        let question_id = position
            .question_id
            .ok_or(Error::PositionNotAvailable { position_id })?;
        let question = self
            .store
            .question(question_id)
            .await?
            .ok_or(Error::NotFound {
                resource: "question",
                id: question_id.to_string(),
            })?;

        let grace = Duration::from_std(self.config.attempt_grace)
            .map_err(|e| Error::Other(format!("invalid grace: {}", e)))?;
        let attempt = Attempt {
            attempt_id: Uuid::new_v4(),
            account_id,
            position_id,
            question_id,
            issued_at: now,
            answer_deadline: now + Duration::seconds(question.time_limit_secs) + grace,
            status: AttemptStatus::Started,
            selected_option: None,
            submitted_at: None,
            harvest_window_expires_at: None,
            harvest_phase: HarvestPhase::None,
        };

        // The store rejects a second live attempt atomically.
        let attempt = self.store.create_attempt(attempt).await?;

        tracing::info!(
            account_id = %account_id,
            position_id,
            attempt_id = %attempt.attempt_id,
            "Quiz issued"
        );

        Ok(IssuedQuiz {
            attempt_id: attempt.attempt_id,
            position_id,
            question: question.prompt,
            options: question.options,
            time_limit: question.time_limit_secs,
        })
    }

    /// Submit an answer, finalizing the attempt.
    ///
    /// A late submission is marked Timeout and opens no window, though
    /// `is_correct` still reports whether the pick matched. On a correct,
    /// in-time answer the engine tries to reserve the position; losing that
    /// race keeps the correct score but returns `harvest_enabled = false`.
    pub async fn submit_answer(
        &self,
        account_id: Uuid,
        attempt_id: Uuid,
        option_index: i32,
    ) -> Result<AnswerOutcome> {
        let attempt = self
            .store
            .attempt(attempt_id)
            .await?
            .ok_or(Error::AttemptNotFound { attempt_id })?;
        if attempt.account_id != account_id {
            return Err(Error::NotOwner);
        }
        if attempt.status.is_terminal() {
            return Err(Error::AttemptAlreadyTerminal { attempt_id });
        }

        let question = self
            .store
            .question(attempt.question_id)
            .await?
            .ok_or(Error::NotFound {
                resource: "question",
                id: attempt.question_id.to_string(),
            })?;
        if option_index < 0 || option_index as usize >= question.options.len() {
            return Err(Error::InvalidParameter {
                field: "optionIdx",
                message: format!("must be 0..{}", question.options.len()),
            });
        }

        let now = Utc::now();
        let is_correct = question.check_answer(option_index);
        let status = if now > attempt.answer_deadline {
            AttemptStatus::Timeout
        } else if is_correct {
            AttemptStatus::DoneCorrect
        } else {
            AttemptStatus::DoneIncorrect
        };

        // Atomic terminal transition; a concurrent submit loses here.
        self.store
            .finalize_attempt(attempt_id, status, option_index, now)
            .await?;

        let mut outcome = AnswerOutcome {
            attempt_id,
            is_correct,
            status,
            correct_option: question.correct_option,
            harvest_enabled: false,
            harvest_timeout_at: None,
        };

        if status == AttemptStatus::DoneCorrect {
            let window = Duration::from_std(self.config.harvest_window)
                .map_err(|e| Error::Other(format!("invalid window: {}", e)))?;
            let expires_at = now + window;
            match self
                .store
                .try_reserve_position(attempt.position_id, account_id, attempt_id, expires_at)
                .await
            {
                Ok(_) => {
                    self.store.open_harvest_window(attempt_id, expires_at).await?;
                    outcome.harvest_enabled = true;
                    outcome.harvest_timeout_at = Some(expires_at);
                }
                Err(Error::PositionNotAvailable { .. }) => {
                    // Someone else is already harvesting this position. The
                    // answer stays scored correct; there is just no lemon.
                    self.store.mark_harvest_lost(attempt_id).await?;
                    tracing::debug!(
                        attempt_id = %attempt_id,
                        position_id = attempt.position_id,
                        "Correct answer lost the reservation race"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(outcome)
    }
}
