//! [`SessionController`]: the conversation with the remote interviewer.
//!
//! ```text
//! send_message("…")
//!   ├─ turn lock (try_lock → Busy if a reply is streaming)
//!   ├─ append candidate Message          (optimistic)
//!   ├─ open_turn(Respond) ─▶ Token…      → streaming_text only
//!   │                       EndOfTurn    → one interviewer Message appended
//!   │                       Failed / Err → error set, partial text dropped
//!   └─ release lock
//!
//! end_interview(events)
//!   ├─ cancel `closing` (every Start/Respond turn runs on a child token,
//!   │   including one that has the lock but has not opened its stream yet)
//!   └─ turn lock (awaited) → open_turn(End{events, transcript})
//! ```
//!
//! State is published through a `watch` channel so a renderer can redraw
//! on every token without ever seeing a half-finished message in history.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::proctor::IntegrityEvent;
use crate::service::{InterviewService, ServiceError, SessionCredentials, StreamEvent, TurnRequest};

use super::message::{count_questions, Message, Role};

// ---------------------------------------------------------------------------
// SessionError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("message is empty")]
    EmptyMessage,

    /// Another turn is still streaming.
    #[error("the interviewer is still responding")]
    Busy,

    /// Hydration after the candidate has already spoken.
    #[error("the conversation has already started")]
    AlreadyStarted,

    #[error("the interview has ended")]
    Ended,

    /// The turn was abandoned because the interview is being closed.
    #[error("turn cancelled")]
    Cancelled,

    /// The service reported a failure inside the stream.
    #[error("{0}")]
    Remote(String),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

// ---------------------------------------------------------------------------
// SessionSnapshot
// ---------------------------------------------------------------------------

/// Everything a renderer needs from the conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub messages: Vec<Message>,
    /// Interviewer text received so far for the current turn.
    pub streaming_text: String,
    pub is_streaming: bool,
    pub questions_asked: u32,
    /// The interviewer closed the session on its own.
    pub is_ended: bool,
    /// Last turn failure, cleared when the next turn starts.
    pub error: Option<String>,
}

struct TurnOutcome {
    text: String,
    questions_asked: Option<u32>,
    ended: bool,
}

// ---------------------------------------------------------------------------
// SessionController
// ---------------------------------------------------------------------------

pub struct SessionController {
    credentials: SessionCredentials,
    service: Arc<dyn InterviewService>,
    state: watch::Sender<SessionSnapshot>,
    turn: tokio::sync::Mutex<()>,
    /// Cancelled once the interview is being ended; parent of every
    /// conversational turn's token.
    closing: CancellationToken,
    candidate_spoke: AtomicBool,
}

impl SessionController {
    pub fn new(credentials: SessionCredentials, service: Arc<dyn InterviewService>) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        Self {
            credentials,
            service,
            state,
            turn: tokio::sync::Mutex::new(()),
            closing: CancellationToken::new(),
            candidate_spoke: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// Receiver that changes on every state update, including each token.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    pub fn is_ended(&self) -> bool {
        self.state.borrow().is_ended
    }

    pub fn is_streaming(&self) -> bool {
        self.state.borrow().is_streaming
    }

    /// Replace the transcript with a restored one.  Only valid before the
    /// candidate sends anything.
    pub fn hydrate_messages(&self, prior: Vec<Message>) -> Result<(), SessionError> {
        if self.candidate_spoke.load(Ordering::SeqCst) {
            return Err(SessionError::AlreadyStarted);
        }
        let questions = count_questions(&prior);
        log::info!(
            "session: restored {} messages ({questions} questions)",
            prior.len()
        );
        self.state.send_modify(|s| {
            s.messages = prior;
            s.questions_asked = questions;
        });
        Ok(())
    }

    /// Tell the interviewer the session has begun and stream its greeting.
    pub async fn start_interview(&self) -> Result<(), SessionError> {
        if self.closing.is_cancelled() {
            return Err(SessionError::Ended);
        }
        let _turn = self.turn.try_lock().map_err(|_| SessionError::Busy)?;
        log::info!("session: starting interview {}", self.credentials.interview_id);
        self.run_turn(TurnRequest::Start).await
    }

    /// Append the candidate's message and stream the interviewer's reply.
    ///
    /// Rejected with [`SessionError::Busy`] while another reply streams.
    pub async fn send_message(&self, text: &str) -> Result<(), SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        if self.is_ended() || self.closing.is_cancelled() {
            return Err(SessionError::Ended);
        }
        let _turn = self.turn.try_lock().map_err(|_| SessionError::Busy)?;

        self.candidate_spoke.store(true, Ordering::SeqCst);
        self.state.send_modify(|s| {
            s.messages.push(Message::new(Role::Candidate, text));
        });

        self.run_turn(TurnRequest::Respond {
            message: text.to_string(),
        })
        .await
    }

    /// Submit the transcript and integrity log for assessment.
    ///
    /// Any reply still streaming is abandoned first, and no new turn may
    /// start afterwards.
    pub async fn end_interview(
        &self,
        integrity_events: Vec<IntegrityEvent>,
    ) -> Result<(), SessionError> {
        if self.is_streaming() {
            log::info!("session: abandoning in-flight reply to end the interview");
        }
        self.closing.cancel();

        let _turn = self.turn.lock().await;
        let transcript = self.state.borrow().messages.clone();
        log::info!(
            "session: ending interview ({} messages, {} integrity events)",
            transcript.len(),
            integrity_events.len()
        );
        self.run_turn(TurnRequest::End {
            integrity_events,
            transcript,
        })
        .await
    }

    // ---- turn machinery ----------------------------------------------------

    /// Run one turn.  The caller holds the turn lock.
    async fn run_turn(&self, request: TurnRequest) -> Result<(), SessionError> {
        let cancel = match request {
            TurnRequest::End { .. } => CancellationToken::new(),
            _ => self.closing.child_token(),
        };

        self.state.send_modify(|s| {
            s.error = None;
            s.is_streaming = true;
            s.streaming_text.clear();
        });

        let result = self.stream_turn(request, &cancel).await;

        match result {
            Ok(outcome) => {
                self.state.send_modify(|s| {
                    if !outcome.text.is_empty() {
                        s.messages.push(Message::new(Role::Interviewer, outcome.text));
                    }
                    s.streaming_text.clear();
                    s.is_streaming = false;
                    if let Some(count) = outcome.questions_asked {
                        s.questions_asked = count;
                    }
                    if outcome.ended {
                        s.is_ended = true;
                    }
                });
                if outcome.ended {
                    log::info!("session: interviewer closed the session");
                }
                Ok(())
            }
            Err(e) => {
                match &e {
                    SessionError::Cancelled => log::debug!("session: turn cancelled"),
                    other => log::warn!("session: turn failed: {other}"),
                }
                let shown = match &e {
                    SessionError::Cancelled => None,
                    other => Some(other.to_string()),
                };
                self.state.send_modify(|s| {
                    s.streaming_text.clear();
                    s.is_streaming = false;
                    s.error = shown;
                });
                Err(e)
            }
        }
    }

    async fn stream_turn(
        &self,
        request: TurnRequest,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, SessionError> {
        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            opened = self.service.open_turn(&self.credentials, request) => opened?,
        };

        let mut text = String::new();
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(SessionError::Cancelled),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(StreamEvent::Token(token))) => {
                    text.push_str(&token);
                    self.state.send_modify(|s| s.streaming_text.push_str(&token));
                }
                Some(Ok(StreamEvent::EndOfTurn {
                    questions_asked,
                    ended,
                })) => {
                    return Ok(TurnOutcome {
                        text,
                        questions_asked: Some(questions_asked),
                        ended,
                    });
                }
                Some(Ok(StreamEvent::Failed(message))) => {
                    return Err(SessionError::Remote(message));
                }
                Some(Err(e)) => return Err(e.into()),
                // Closed without a marker: keep what arrived.
                None => {
                    return Ok(TurnOutcome {
                        text,
                        questions_asked: None,
                        ended: false,
                    });
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;
    use crate::platform::testing::CallLog;
    use crate::proctor::IntegrityEventKind;
    use crate::service::testing::{reply, MockInterviewService, Script};
    use crate::service::AccessError;

    fn controller() -> (Arc<MockInterviewService>, Arc<SessionController>) {
        let service = Arc::new(MockInterviewService::new(
            CallLog::new(),
            Err(AccessError::InvalidLink),
        ));
        let session = Arc::new(SessionController::new(
            SessionCredentials::new("iv-1", "tok"),
            Arc::clone(&service) as Arc<dyn InterviewService>,
        ));
        (service, session)
    }

    fn roles(snapshot: &SessionSnapshot) -> Vec<Role> {
        snapshot.messages.iter().map(|m| m.role).collect()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn start_appends_greeting() {
        let (service, session) = controller();
        service.push(Script::Reply(reply("Welcome! Tell me about yourself.", 0)));

        session.start_interview().await.unwrap();

        let snap = session.snapshot();
        assert_eq!(roles(&snap), vec![Role::Interviewer]);
        assert_eq!(snap.messages[0].content, "Welcome! Tell me about yourself.");
        assert!(!snap.is_streaming);
        assert!(snap.streaming_text.is_empty());
        assert_eq!(service.requests(), vec![TurnRequest::Start]);
    }

    #[tokio::test]
    async fn tokens_accumulate_into_one_message() {
        let (service, session) = controller();
        service.push(Script::Reply(vec![
            StreamEvent::Token("Why ".into()),
            StreamEvent::Token("Rust?".into()),
            StreamEvent::EndOfTurn {
                questions_asked: 1,
                ended: false,
            },
        ]));

        session.send_message("  I rewrote the cache  ").await.unwrap();

        let snap = session.snapshot();
        assert_eq!(roles(&snap), vec![Role::Candidate, Role::Interviewer]);
        assert_eq!(snap.messages[0].content, "I rewrote the cache");
        assert_eq!(snap.messages[1].content, "Why Rust?");
        assert_eq!(snap.questions_asked, 1);
        assert_eq!(
            service.requests(),
            vec![TurnRequest::Respond {
                message: "I rewrote the cache".into()
            }]
        );
    }

    #[tokio::test]
    async fn streaming_text_is_visible_mid_turn_but_not_in_history() {
        let (service, session) = controller();
        service.push(Script::Hang(vec![StreamEvent::Token("Partial".into())]));

        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.send_message("answer").await })
        };
        settle().await;

        let snap = session.snapshot();
        assert!(snap.is_streaming);
        assert_eq!(snap.streaming_text, "Partial");
        assert_eq!(roles(&snap), vec![Role::Candidate]);

        task.abort();
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let (service, session) = controller();
        assert!(matches!(
            session.send_message("   \n").await,
            Err(SessionError::EmptyMessage)
        ));
        assert!(session.snapshot().messages.is_empty());
        assert!(service.requests().is_empty());
    }

    #[tokio::test]
    async fn concurrent_send_is_rejected_not_interleaved() {
        let (service, session) = controller();
        let (release, gate) = oneshot::channel();
        service.push(Script::Gated(reply("First reply", 1), gate));

        let first = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.send_message("one").await })
        };
        settle().await;

        assert!(matches!(
            session.send_message("two").await,
            Err(SessionError::Busy)
        ));

        release.send(()).unwrap();
        first.await.unwrap().unwrap();

        let snap = session.snapshot();
        assert_eq!(roles(&snap), vec![Role::Candidate, Role::Interviewer]);
        assert_eq!(service.requests().len(), 1);
    }

    #[tokio::test]
    async fn stream_failure_sets_error_and_keeps_history() {
        let (service, session) = controller();
        service.push(Script::Reply(vec![
            StreamEvent::Token("half an ans".into()),
            StreamEvent::Failed("Stream interrupted".into()),
        ]));

        let result = session.send_message("hello").await;
        assert!(matches!(result, Err(SessionError::Remote(_))));

        let snap = session.snapshot();
        assert_eq!(snap.error.as_deref(), Some("Stream interrupted"));
        assert_eq!(roles(&snap), vec![Role::Candidate]);
        assert!(snap.streaming_text.is_empty());
        assert!(!snap.is_streaming);
        assert!(!snap.is_ended);
    }

    #[tokio::test]
    async fn error_clears_on_next_turn() {
        let (service, session) = controller();
        service.push(Script::Fail(ServiceError::Rejected {
            status: 503,
            message: "Service unavailable".into(),
        }));
        let _ = session.send_message("first").await;
        assert_eq!(
            session.snapshot().error.as_deref(),
            Some("Service unavailable")
        );

        session.send_message("second").await.unwrap();
        let snap = session.snapshot();
        assert!(snap.error.is_none());
        assert_eq!(
            roles(&snap),
            vec![Role::Candidate, Role::Candidate, Role::Interviewer]
        );
    }

    #[tokio::test]
    async fn remote_end_sets_is_ended_and_blocks_sends() {
        let (service, session) = controller();
        service.push(Script::Reply(vec![
            StreamEvent::Token("That concludes our interview.".into()),
            StreamEvent::EndOfTurn {
                questions_asked: 6,
                ended: true,
            },
        ]));

        session.send_message("final answer").await.unwrap();
        assert!(session.is_ended());
        assert!(matches!(
            session.send_message("more").await,
            Err(SessionError::Ended)
        ));
    }

    #[tokio::test]
    async fn stream_closed_without_marker_keeps_text() {
        let (service, session) = controller();
        service.push(Script::Reply(vec![StreamEvent::Token("Go on.".into())]));

        session.send_message("hi").await.unwrap();
        let snap = session.snapshot();
        assert_eq!(snap.messages[1].content, "Go on.");
        assert_eq!(snap.questions_asked, 0);
    }

    #[tokio::test]
    async fn hydrate_restores_transcript_and_counts_questions() {
        let (_service, session) = controller();
        let prior = vec![
            Message::restored(0, Role::Interviewer, "Welcome", None),
            Message::restored(1, Role::Candidate, "Hi", None),
            Message::restored(2, Role::Interviewer, "Q1", None),
        ];
        session.hydrate_messages(prior.clone()).unwrap();

        let snap = session.snapshot();
        assert_eq!(snap.messages, prior);
        assert_eq!(snap.questions_asked, 1);
    }

    #[tokio::test]
    async fn hydrate_after_candidate_spoke_is_rejected() {
        let (_service, session) = controller();
        session.send_message("hello").await.unwrap();
        assert!(matches!(
            session.hydrate_messages(Vec::new()),
            Err(SessionError::AlreadyStarted)
        ));
        assert_eq!(session.snapshot().messages.len(), 2);
    }

    #[tokio::test]
    async fn end_sends_events_and_transcript() {
        let (service, session) = controller();
        session.send_message("hello").await.unwrap();

        let events = vec![IntegrityEvent::now(IntegrityEventKind::TabSwitch, "away")];
        session.end_interview(events.clone()).await.unwrap();

        let requests = service.requests();
        match requests.last() {
            Some(TurnRequest::End {
                integrity_events,
                transcript,
            }) => {
                assert_eq!(integrity_events, &events);
                assert_eq!(transcript.len(), 2);
            }
            other => panic!("expected end request, got {other:?}"),
        }
        assert!(session.is_ended());
    }

    #[tokio::test]
    async fn end_cancels_in_flight_reply() {
        let (service, session) = controller();
        service.push(Script::Hang(vec![StreamEvent::Token("Let me th".into())]));

        let pending = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.send_message("answer").await })
        };
        settle().await;

        session.end_interview(Vec::new()).await.unwrap();

        assert!(matches!(
            pending.await.unwrap(),
            Err(SessionError::Cancelled)
        ));
        let snap = session.snapshot();
        assert!(snap.error.is_none());
        assert_eq!(
            roles(&snap),
            vec![Role::Candidate, Role::Interviewer],
            "partial reply dropped, closing message kept"
        );
        assert_eq!(snap.messages[1].content, "Thank you for your time.");
    }

    #[tokio::test]
    async fn turn_holding_the_lock_is_cancelled_by_end() {
        let (service, session) = controller();
        let (release, gate) = oneshot::channel();
        service.push(Script::Gated(reply("Too late", 1), gate));

        let pending = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.send_message("answer").await })
        };
        settle().await;
        assert!(session.is_streaming());

        session.end_interview(Vec::new()).await.unwrap();

        assert!(matches!(
            pending.await.unwrap(),
            Err(SessionError::Cancelled)
        ));
        assert!(release.send(()).is_err(), "gated stream was dropped");
        assert!(matches!(
            session.send_message("one more").await,
            Err(SessionError::Ended)
        ));
        assert!(matches!(
            session.start_interview().await,
            Err(SessionError::Ended)
        ));
        assert_eq!(service.requests().len(), 2);
    }

    #[tokio::test]
    async fn subscribers_see_each_token() {
        let (service, session) = controller();
        let (release, gate) = oneshot::channel();
        service.push(Script::Gated(reply("Hello", 0), gate));
        let mut rx = session.subscribe();

        let task = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.start_interview().await })
        };

        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_streaming);

        release.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(rx.borrow().messages.len(), 1);
    }
}
