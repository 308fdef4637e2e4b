//! The remote side of the interview: access validation and the streamed
//! conversation.
//!
//! Both are traits so the room can be driven by the real HTTP service
//! ([`HttpInterviewService`]) or by the scripted double in `testing`.
//!
//! # Streaming
//!
//! ```text
//! open_turn(Start | Respond{message} | End{events, transcript})
//!   └─▶ TurnStream:  Token("Hel") Token("lo") … EndOfTurn{questions_asked, ended}
//!                                            or Failed(message)
//! ```
//!
//! A turn is one awaited stream; the session controller holds a lock for
//! its whole lifetime, which is what keeps turns from interleaving.

pub mod http;
pub mod wire;

#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::proctor::IntegrityEvent;
use crate::session::Message;

pub use http::HttpInterviewService;
pub use wire::SseDecoder;

// ---------------------------------------------------------------------------
// Credentials and descriptor
// ---------------------------------------------------------------------------

/// What the candidate's interview link carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCredentials {
    pub interview_id: String,
    pub access_token: String,
}

impl SessionCredentials {
    pub fn new(interview_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            interview_id: interview_id.into(),
            access_token: access_token.into(),
        }
    }

    /// Both parts present.  A link missing either is rejected before any
    /// network call.
    pub fn is_well_formed(&self) -> bool {
        !self.interview_id.trim().is_empty() && !self.access_token.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterviewStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InterviewType {
    Technical,
    Behavioral,
    DomainExpert,
    Language,
    CaseStudy,
}

impl InterviewType {
    pub fn label(&self) -> &'static str {
        match self {
            InterviewType::Technical => "Technical",
            InterviewType::Behavioral => "Behavioral",
            InterviewType::DomainExpert => "Domain Expert",
            InterviewType::Language => "Language",
            InterviewType::CaseStudy => "Case Study",
        }
    }
}

/// How the candidate is shown on the welcome screen and header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateDisplay {
    pub name: String,
    pub title: Option<String>,
    pub photo_url: Option<String>,
}

/// Everything the room learns from a successful validation.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDescriptor {
    pub interview_id: String,
    /// `None` when the service only reported a terminal status.
    pub kind: Option<InterviewType>,
    pub status: InterviewStatus,
    pub candidate: CandidateDisplay,
    pub has_transcript: bool,
    /// Prior conversation, present only for an interview in progress.
    pub transcript: Option<Vec<Message>>,
    pub estimated_minutes: u32,
}

impl SessionDescriptor {
    /// Descriptor for an interview the service reports as already finished.
    pub fn completed(interview_id: impl Into<String>) -> Self {
        Self {
            interview_id: interview_id.into(),
            kind: None,
            status: InterviewStatus::Completed,
            candidate: CandidateDisplay::default(),
            has_transcript: false,
            transcript: None,
            estimated_minutes: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why validation failed.  Each variant is shown to the candidate
/// differently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    #[error("Invalid interview link")]
    InvalidLink,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Failed to connect: {0}")]
    ConnectionFailed(String),
}

/// Failures of a conversational turn.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// HTTP transport or connection error.
    #[error("connection error: {0}")]
    Request(String),

    #[error("request timed out")]
    Timeout,

    /// The service answered with a non-success status.
    #[error("{message}")]
    Rejected { status: u16, message: String },
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ServiceError::Timeout
        } else {
            ServiceError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Turns
// ---------------------------------------------------------------------------

/// What a turn asks of the interviewer.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnRequest {
    Start,
    Respond {
        message: String,
    },
    End {
        integrity_events: Vec<IntegrityEvent>,
        transcript: Vec<Message>,
    },
}

impl TurnRequest {
    pub fn action(&self) -> &'static str {
        match self {
            TurnRequest::Start => "start",
            TurnRequest::Respond { .. } => "respond",
            TurnRequest::End { .. } => "end",
        }
    }
}

/// One item of a streamed interviewer reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A fragment of interviewer text.
    Token(String),
    /// The reply is complete.  `ended` is set when the interviewer closed
    /// the whole session.
    EndOfTurn { questions_asked: u32, ended: bool },
    /// The service gave up mid-reply.
    Failed(String),
}

pub type TurnStream = BoxStream<'static, Result<StreamEvent, ServiceError>>;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Checks an interview link once, at bootstrap.
#[async_trait]
pub trait AccessValidator: Send + Sync {
    async fn validate(
        &self,
        credentials: &SessionCredentials,
    ) -> Result<SessionDescriptor, AccessError>;
}

/// The AI interviewer.
#[async_trait]
pub trait InterviewService: Send + Sync {
    /// Send one request and return the stream of its reply.
    async fn open_turn(
        &self,
        credentials: &SessionCredentials,
        request: TurnRequest,
    ) -> Result<TurnStream, ServiceError>;
}
