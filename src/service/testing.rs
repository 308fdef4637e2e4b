//! Scripted stand-in for the remote interview service.
//!
//! Each `open_turn` call pops the next [`Script`]; when the queue is empty a
//! plausible default reply is streamed.  Calls are recorded in the shared
//! [`CallLog`] as `service.start`, `service.respond` and `service.end`.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::{future, stream, StreamExt};
use tokio::sync::oneshot;

use crate::platform::testing::CallLog;

use super::{
    AccessError, AccessValidator, InterviewService, ServiceError, SessionCredentials,
    SessionDescriptor, StreamEvent, TurnRequest, TurnStream,
};

/// How the next turn behaves.
pub enum Script {
    /// Stream these events, then close.
    Reply(Vec<StreamEvent>),
    /// Fail before any event.
    Fail(ServiceError),
    /// Stream these events once the gate fires (or its sender is dropped).
    Gated(Vec<StreamEvent>, oneshot::Receiver<()>),
    /// Stream these events, then never finish.
    Hang(Vec<StreamEvent>),
}

pub fn reply(text: &str, questions_asked: u32) -> Vec<StreamEvent> {
    vec![
        StreamEvent::Token(text.into()),
        StreamEvent::EndOfTurn {
            questions_asked,
            ended: false,
        },
    ]
}

pub struct MockInterviewService {
    log: CallLog,
    access: Mutex<Result<SessionDescriptor, AccessError>>,
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<TurnRequest>>,
    validations: Mutex<usize>,
}

impl MockInterviewService {
    pub fn new(log: CallLog, access: Result<SessionDescriptor, AccessError>) -> Self {
        Self {
            log,
            access: Mutex::new(access),
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            validations: Mutex::new(0),
        }
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn validations(&self) -> usize {
        *self.validations.lock().unwrap()
    }

    fn default_script(request: &TurnRequest) -> Script {
        match request {
            TurnRequest::End { .. } => Script::Reply(vec![
                StreamEvent::Token("Thank you for your time.".into()),
                StreamEvent::EndOfTurn {
                    questions_asked: 0,
                    ended: true,
                },
            ]),
            _ => Script::Reply(reply("Tell me more.", 0)),
        }
    }
}

#[async_trait]
impl AccessValidator for MockInterviewService {
    async fn validate(
        &self,
        _credentials: &SessionCredentials,
    ) -> Result<SessionDescriptor, AccessError> {
        *self.validations.lock().unwrap() += 1;
        self.log.record("service.validate");
        self.access.lock().unwrap().clone()
    }
}

#[async_trait]
impl InterviewService for MockInterviewService {
    async fn open_turn(
        &self,
        _credentials: &SessionCredentials,
        request: TurnRequest,
    ) -> Result<TurnStream, ServiceError> {
        self.log.record(format!("service.{}", request.action()));
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Self::default_script(&request));
        self.requests.lock().unwrap().push(request);

        let events = |events: Vec<StreamEvent>| stream::iter(events.into_iter().map(Ok));
        match script {
            Script::Reply(list) => Ok(events(list).boxed()),
            Script::Fail(e) => Err(e),
            Script::Gated(list, gate) => {
                let wait = stream::once(async move {
                    let _ = gate.await;
                })
                .filter_map(|()| future::ready(None::<Result<StreamEvent, ServiceError>>));
                Ok(wait.chain(events(list)).boxed())
            }
            Script::Hang(list) => Ok(events(list).chain(stream::pending()).boxed()),
        }
    }
}
