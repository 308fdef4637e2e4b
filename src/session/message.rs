//! Conversation messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who said it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Interviewer,
    Candidate,
}

/// One finalized turn in the conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl Message {
    /// A fresh message stamped now.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: format!("msg-{}", Uuid::new_v4()),
            role,
            content: content.into(),
            timestamp: Some(Utc::now()),
        }
    }

    /// A message restored from a persisted transcript at position `index`.
    pub fn restored(
        index: usize,
        role: Role,
        content: impl Into<String>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: format!("msg-restored-{index}"),
            role,
            content: content.into(),
            timestamp,
        }
    }
}

/// Number of interviewer messages that directly answer a candidate message.
///
/// The opening greeting is not a question; every interviewer reply to the
/// candidate is.
pub fn count_questions(messages: &[Message]) -> u32 {
    messages
        .windows(2)
        .filter(|pair| pair[0].role == Role::Candidate && pair[1].role == Role::Interviewer)
        .count() as u32
}
