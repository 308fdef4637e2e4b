//! JSON bodies exchanged with the interview service and the decoder for its
//! server-sent event stream.
//!
//! Stream frames look like
//!
//! ```text
//! data: {"type":"chunk","content":"Tell me about"}
//! data: {"type":"chunk","content":" yourself."}
//! data: {"type":"done","questionsAsked":3,"ended":false}
//! ```
//!
//! A network read may end anywhere, including inside a line or inside a
//! multi-byte character, so [`SseDecoder`] buffers bytes until a newline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::proctor::IntegrityEvent;
use crate::session::{Message, Role};

use super::{
    CandidateDisplay, InterviewStatus, InterviewType, SessionCredentials, SessionDescriptor,
    StreamEvent, TurnRequest,
};

// ---------------------------------------------------------------------------
// Transcript entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

impl From<&Message> for TranscriptEntry {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            timestamp: message.timestamp,
        }
    }
}

/// An unparseable timestamp is dropped rather than failing the transcript.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .ok()
    }))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateBody<'a> {
    pub access_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: InterviewType,
    pub status: InterviewStatus,
    #[serde(default)]
    pub candidate_name: Option<String>,
    #[serde(default)]
    pub candidate_title: Option<String>,
    #[serde(default)]
    pub candidate_image: Option<String>,
    #[serde(default)]
    pub has_transcript: bool,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub transcript: Option<Vec<TranscriptEntry>>,
}

impl ValidateResponse {
    pub fn into_descriptor(self) -> SessionDescriptor {
        let transcript = self.transcript.map(|entries| {
            entries
                .into_iter()
                .enumerate()
                .map(|(i, e)| Message::restored(i, e.role, e.content, e.timestamp))
                .collect()
        });

        SessionDescriptor {
            interview_id: self.id,
            kind: Some(self.kind),
            status: self.status,
            candidate: CandidateDisplay {
                name: self.candidate_name.unwrap_or_default(),
                title: self.candidate_title,
                photo_url: self.candidate_image,
            },
            has_transcript: self.has_transcript,
            transcript,
            estimated_minutes: self.duration.unwrap_or(30),
        }
    }
}

/// Body of a non-success response.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub status: Option<InterviewStatus>,
}

// ---------------------------------------------------------------------------
// Stream request
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamBody<'a> {
    pub action: &'static str,
    pub access_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity_events: Option<&'a [IntegrityEvent]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript: Option<Vec<TranscriptEntry>>,
}

impl<'a> StreamBody<'a> {
    pub fn new(credentials: &'a SessionCredentials, request: &'a TurnRequest) -> Self {
        let mut body = Self {
            action: request.action(),
            access_token: &credentials.access_token,
            message: None,
            integrity_events: None,
            transcript: None,
        };
        match request {
            TurnRequest::Start => {}
            TurnRequest::Respond { message } => body.message = Some(message.as_str()),
            TurnRequest::End {
                integrity_events,
                transcript,
            } => {
                body.integrity_events = Some(integrity_events.as_slice());
                body.transcript = Some(transcript.iter().map(TranscriptEntry::from).collect());
            }
        }
        body
    }
}

// ---------------------------------------------------------------------------
// Stream events
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireEvent {
    Chunk {
        #[serde(default)]
        content: String,
    },
    Done {
        #[serde(default, rename = "questionsAsked")]
        questions_asked: Option<u32>,
        #[serde(default)]
        ended: bool,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
    },
}

impl From<WireEvent> for StreamEvent {
    fn from(event: WireEvent) -> Self {
        match event {
            WireEvent::Chunk { content } => StreamEvent::Token(content),
            WireEvent::Done {
                questions_asked,
                ended,
            } => StreamEvent::EndOfTurn {
                questions_asked: questions_asked.unwrap_or(0),
                ended,
            },
            WireEvent::Error { message } => {
                StreamEvent::Failed(message.unwrap_or_else(|| "Stream interrupted".into()))
            }
        }
    }
}

/// Incremental decoder for `data: {json}` lines.
///
/// Lines that are not `data:` frames, or whose payload is not a known event,
/// are skipped.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk and return every event it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_line(line: &[u8]) -> Option<StreamEvent> {
    let line = std::str::from_utf8(line).ok()?;
    let payload = line.trim_end().strip_prefix("data:")?.trim();
    if payload.is_empty() {
        return None;
    }
    match serde_json::from_str::<WireEvent>(payload) {
        Ok(event) => Some(event.into()),
        Err(e) => {
            log::debug!("service: skipping malformed stream line: {e}");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
