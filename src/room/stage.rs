//! Room stages and the transition function.
//!
//! ```text
//! Loading ──Validated(Pending/…)──────────────▶ Welcome ──Start──▶ Active
//! Loading ──Validated(InProgress, transcript)─────────────────────▶ Active
//! Loading ──Validated(Completed)──────────────────────────────────▶ Complete
//! Active  ──EndConfirmed | RemoteEnded | TimeLimit──▶ Closing ──Submitted──▶ Complete
//! ```
//!
//! Anything not drawn is undefined and yields `None`.  Bootstrap errors are
//! not a stage: they sit beside the stage and preempt it.

use std::fmt;

use thiserror::Error;

use crate::service::{AccessError, InterviewStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoomStage {
    #[default]
    Loading,
    Welcome,
    Active,
    Closing,
    Complete,
}

impl RoomStage {
    pub fn label(&self) -> &'static str {
        match self {
            RoomStage::Loading => "Loading",
            RoomStage::Welcome => "Welcome",
            RoomStage::Active => "In progress",
            RoomStage::Closing => "Finishing",
            RoomStage::Complete => "Complete",
        }
    }
}

/// Why an active interview is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The candidate confirmed the end dialog.
    Confirmed,
    /// The interviewer closed the session.
    RemoteEnded,
    /// The hard time limit elapsed.
    TimeLimit,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            EndReason::Confirmed => "ended by candidate",
            EndReason::RemoteEnded => "ended by interviewer",
            EndReason::TimeLimit => "time limit reached",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomTrigger {
    Validated {
        status: InterviewStatus,
        has_transcript: bool,
    },
    Start,
    End(EndReason),
    Submitted,
}

/// Next stage for `trigger` in `stage`, or `None` if undefined.
pub fn transition(stage: RoomStage, trigger: RoomTrigger) -> Option<RoomStage> {
    use RoomStage::*;

    match (stage, trigger) {
        (Loading, RoomTrigger::Validated { status, has_transcript }) => match status {
            InterviewStatus::Completed => Some(Complete),
            InterviewStatus::InProgress if has_transcript => Some(Active),
            InterviewStatus::Pending | InterviewStatus::InProgress => Some(Welcome),
            InterviewStatus::Cancelled | InterviewStatus::Expired => None,
        },
        (Welcome, RoomTrigger::Start) => Some(Active),
        (Active, RoomTrigger::End(_)) => Some(Closing),
        (Closing, RoomTrigger::Submitted) => Some(Complete),
        _ => None,
    }
}

/// The error screen shown instead of any stage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoomError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Failed to connect. Please check your internet connection. ({0})")]
    ConnectionFailed(String),

    #[error("Invalid interview link. Please check the URL.")]
    InvalidLink,
}

impl From<AccessError> for RoomError {
    fn from(e: AccessError) -> Self {
        match e {
            AccessError::InvalidLink => RoomError::InvalidLink,
            AccessError::AccessDenied(reason) => RoomError::AccessDenied(reason),
            AccessError::ConnectionFailed(reason) => RoomError::ConnectionFailed(reason),
        }
    }
}
