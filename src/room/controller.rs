//! [`InterviewRoom`]: the top-level orchestrator.
//!
//! The room owns the stage and nothing else.  It asks the integrity monitor
//! to start and stop, asks the session to start and end, and holds the two
//! resources that exist only while the interview is active: the hard-limit
//! timer and the unload guard.  Both live in one [`ActiveScope`] that is
//! created on entering `Active` and dropped on leaving it, whichever way
//! that happens.
//!
//! # Termination
//!
//! ```text
//! confirm_end() ─┐
//! remote ended ──┼─▶ terminate(reason)
//! time limit ────┘     ├─ latch (second caller returns here)
//!                      ├─ stage = Closing, drop ActiveScope (timer + unload guard)
//!                      ├─ monitor.stop_monitoring()   (observers + webcam)
//!                      ├─ monitor.exit_fullscreen()
//!                      ├─ session.end_interview(events)   failure logged only
//!                      └─ stage = Complete
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::platform::{Capabilities, NavigationGuard, UnloadBlock};
use crate::proctor::{IntegrityMonitor, ProctorSnapshot};
use crate::service::{AccessValidator, InterviewService, SessionCredentials, SessionDescriptor};
use crate::session::{SessionController, SessionError, SessionSnapshot};
use crate::voice::{SpeechRecognizer, VoiceInput, VoiceSnapshot};

use super::clock::TimeBudget;
use super::stage::{transition, EndReason, RoomError, RoomStage, RoomTrigger};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// External collaborators handed to the room.
#[derive(Clone)]
pub struct RoomDeps {
    pub validator: Arc<dyn AccessValidator>,
    pub service: Arc<dyn InterviewService>,
    pub capabilities: Capabilities,
    pub recognizer: Option<Arc<dyn SpeechRecognizer>>,
}

/// Why a candidate message was not sent.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("the interview is not in progress")]
    NotActive,

    /// The interviewer has not opened the conversation yet.
    #[error("the interview is still starting")]
    Starting,

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Everything needed to render the room.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub stage: RoomStage,
    pub error: Option<RoomError>,
    pub show_end_confirm: bool,
    pub descriptor: Option<SessionDescriptor>,
    pub session: SessionSnapshot,
    pub proctor: ProctorSnapshot,
    pub voice: VoiceSnapshot,
    /// Present only while active.
    pub time: Option<TimeBudget>,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

/// Resources held for exactly the duration of the `Active` stage.
struct ActiveScope {
    timer: CancellationToken,
    _unload: UnloadBlock,
    entered_at: Instant,
}

impl Drop for ActiveScope {
    fn drop(&mut self) {
        self.timer.cancel();
    }
}

#[derive(Default)]
struct RoomState {
    stage: RoomStage,
    error: Option<RoomError>,
    show_end_confirm: bool,
    descriptor: Option<SessionDescriptor>,
    active: Option<ActiveScope>,
}

struct RoomInner {
    credentials: SessionCredentials,
    config: AppConfig,
    validator: Arc<dyn AccessValidator>,
    navigation: Arc<dyn NavigationGuard>,
    session: SessionController,
    monitor: IntegrityMonitor,
    voice: VoiceInput,
    state: Mutex<RoomState>,
    bootstrapped: AtomicBool,
    terminating: AtomicBool,
    /// Set from the moment `start` enters `Active` until the opening turn
    /// has returned.
    opening: AtomicBool,
}

impl RoomInner {
    fn lock(&self) -> MutexGuard<'_, RoomState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// InterviewRoom
// ---------------------------------------------------------------------------

/// One candidate's interview room.  Cheap to clone; clones share state.
///
/// ```rust,no_run
/// use interview_room::config::AppConfig;
/// use interview_room::room::{InterviewRoom, RoomDeps};
/// use interview_room::service::SessionCredentials;
/// # fn deps() -> RoomDeps { unimplemented!() }
///
/// # async fn example() {
/// let room = InterviewRoom::new(
///     SessionCredentials::new("iv-123", "secret"),
///     AppConfig::default(),
///     deps(),
/// );
/// room.bootstrap().await;
/// room.start().await;
/// room.send_message("I'd start with the data model.").await.ok();
/// room.request_end();
/// room.confirm_end().await;
/// # }
/// ```
#[derive(Clone)]
pub struct InterviewRoom {
    inner: Arc<RoomInner>,
}

impl InterviewRoom {
    pub fn new(credentials: SessionCredentials, config: AppConfig, deps: RoomDeps) -> Self {
        let session = SessionController::new(credentials.clone(), deps.service);
        let monitor = IntegrityMonitor::new(deps.capabilities.clone(), config.proctoring.clone());
        let voice = VoiceInput::new(deps.recognizer, config.voice.clone());

        Self {
            inner: Arc::new(RoomInner {
                credentials,
                validator: deps.validator,
                navigation: deps.capabilities.navigation,
                session,
                monitor,
                voice,
                config,
                state: Mutex::new(RoomState::default()),
                bootstrapped: AtomicBool::new(false),
                terminating: AtomicBool::new(false),
                opening: AtomicBool::new(false),
            }),
        }
    }

    // ---- component access --------------------------------------------------

    pub fn session(&self) -> &SessionController {
        &self.inner.session
    }

    pub fn monitor(&self) -> &IntegrityMonitor {
        &self.inner.monitor
    }

    pub fn voice(&self) -> &VoiceInput {
        &self.inner.voice
    }

    pub fn stage(&self) -> RoomStage {
        self.inner.lock().stage
    }

    pub fn error(&self) -> Option<RoomError> {
        self.inner.lock().error.clone()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        let (stage, error, show_end_confirm, descriptor, time) = {
            let state = self.inner.lock();
            let time = state
                .active
                .as_ref()
                .map(|scope| TimeBudget::new(scope.entered_at.elapsed(), &self.inner.config.room));
            (
                state.stage,
                state.error.clone(),
                state.show_end_confirm,
                state.descriptor.clone(),
                time,
            )
        };

        RoomSnapshot {
            stage,
            error,
            show_end_confirm,
            descriptor,
            session: self.inner.session.snapshot(),
            proctor: self.inner.monitor.snapshot(),
            voice: self.inner.voice.snapshot(),
            time,
        }
    }

    // ---- bootstrap ---------------------------------------------------------

    /// Validate the link once and route to the first visible stage.
    ///
    /// A failure is terminal for this room: the error is set and nothing
    /// else is started.
    pub async fn bootstrap(&self) {
        if self.inner.bootstrapped.swap(true, Ordering::SeqCst) {
            log::debug!("room: bootstrap already ran");
            return;
        }

        let descriptor = match self.inner.validator.validate(&self.inner.credentials).await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                log::error!("room: validation failed: {e}");
                self.inner.lock().error = Some(e.into());
                return;
            }
        };

        let trigger = RoomTrigger::Validated {
            status: descriptor.status,
            has_transcript: descriptor.has_transcript,
        };
        let mut state = self.inner.lock();
        let Some(next) = transition(state.stage, trigger) else {
            log::error!("room: interview is {:?}", descriptor.status);
            state.error = Some(RoomError::AccessDenied(
                "Interview is no longer available".into(),
            ));
            return;
        };

        if next == RoomStage::Active {
            log::info!("room: resuming interview in progress");
            if let Some(prior) = descriptor.transcript.clone() {
                if let Err(e) = self.inner.session.hydrate_messages(prior) {
                    log::warn!("room: could not restore transcript: {e}");
                }
            }
            self.enter_active(&mut state);
        }
        if next == RoomStage::Complete {
            // Nothing may start again for a finished interview.
            self.inner.terminating.store(true, Ordering::SeqCst);
        }

        log::info!(
            "room: {} -> {} ({:?})",
            state.stage.label(),
            next.label(),
            descriptor.status
        );
        state.stage = next;
        state.descriptor = Some(descriptor);
    }

    // ---- start -------------------------------------------------------------

    /// Leave the welcome screen: start monitoring, ask for fullscreen and
    /// open the conversation.  Returns `false` outside `Welcome`.
    pub async fn start(&self) -> bool {
        {
            let mut state = self.inner.lock();
            if transition(state.stage, RoomTrigger::Start).is_none() {
                log::debug!("room: start ignored in {}", state.stage.label());
                return false;
            }
            state.stage = RoomStage::Active;
            self.inner.opening.store(true, Ordering::SeqCst);
            self.enter_active(&mut state);
        }
        log::info!("room: interview started");

        if self.inner.config.room.request_fullscreen {
            self.inner.monitor.request_fullscreen().await;
        }

        if self.stage() == RoomStage::Active {
            if let Err(e) = self.inner.session.start_interview().await {
                log::warn!("room: interviewer did not start: {e}");
            }
        }
        self.inner.opening.store(false, Ordering::SeqCst);
        self.check_remote_end().await;
        true
    }

    /// Acquire everything the active stage holds.  Called with the state
    /// lock held, right as the stage becomes `Active`.
    fn enter_active(&self, state: &mut RoomState) {
        let timer = CancellationToken::new();
        let unload = self.inner.navigation.block_unload();
        self.arm_timer(timer.clone());
        self.inner.monitor.start_monitoring();
        state.active = Some(ActiveScope {
            timer,
            _unload: unload,
            entered_at: Instant::now(),
        });
    }

    fn arm_timer(&self, cancel: CancellationToken) {
        let room = Arc::downgrade(&self.inner);
        let limit = self.inner.config.room.max_duration();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(limit) => {
                    if let Some(inner) = Weak::upgrade(&room) {
                        log::warn!("room: {limit:?} limit reached");
                        InterviewRoom { inner }.terminate(EndReason::TimeLimit).await;
                    }
                }
            }
        });
    }

    // ---- camera ------------------------------------------------------------

    /// Ask for the camera on the candidate's behalf.
    ///
    /// Refused once the room is closing or complete; a grant that lands
    /// while the room closes is released by the monitor.
    pub async fn request_webcam(&self) -> bool {
        let stage = self.stage();
        if self.inner.terminating.load(Ordering::SeqCst)
            || matches!(stage, RoomStage::Closing | RoomStage::Complete)
        {
            log::debug!("room: camera request ignored in {}", stage.label());
            return false;
        }
        self.inner.monitor.request_webcam().await
    }

    // ---- conversation ------------------------------------------------------

    /// Forward a candidate message; close the room if the interviewer ends
    /// the session in its reply.
    pub async fn send_message(&self, text: &str) -> Result<(), SendError> {
        if self.stage() != RoomStage::Active {
            return Err(SendError::NotActive);
        }
        if self.inner.opening.load(Ordering::SeqCst) {
            log::debug!("room: message held back until the interviewer opens");
            return Err(SendError::Starting);
        }
        let result = self.inner.session.send_message(text).await;
        self.check_remote_end().await;
        result.map_err(SendError::from)
    }

    async fn check_remote_end(&self) {
        if self.inner.session.is_ended() && self.stage() == RoomStage::Active {
            self.terminate(EndReason::RemoteEnded).await;
        }
    }

    // ---- end ---------------------------------------------------------------

    /// Open the end-confirmation dialog.
    pub fn request_end(&self) -> bool {
        let mut state = self.inner.lock();
        if state.stage != RoomStage::Active || self.inner.terminating.load(Ordering::SeqCst) {
            return false;
        }
        state.show_end_confirm = true;
        true
    }

    /// Dismiss the dialog.  No other effect.
    pub fn cancel_end(&self) {
        self.inner.lock().show_end_confirm = false;
    }

    /// Confirm the dialog and run the termination sequence.
    ///
    /// Without an open dialog, or while already closing, this is a no-op.
    pub async fn confirm_end(&self) -> bool {
        {
            let mut state = self.inner.lock();
            if !state.show_end_confirm {
                log::debug!("room: end confirmation without an open dialog");
                return false;
            }
            state.show_end_confirm = false;
        }
        self.terminate(EndReason::Confirmed).await
    }

    /// The one termination sequence shared by every end path.
    ///
    /// Returns `false` if another caller already owns the sequence or the
    /// room is not active.
    async fn terminate(&self, reason: EndReason) -> bool {
        if self.inner.terminating.swap(true, Ordering::SeqCst) {
            log::debug!("room: termination already in progress ({reason})");
            return false;
        }

        let scope = {
            let mut state = self.inner.lock();
            if transition(state.stage, RoomTrigger::End(reason)).is_none() {
                self.inner.terminating.store(false, Ordering::SeqCst);
                return false;
            }
            state.stage = RoomStage::Closing;
            state.show_end_confirm = false;
            state.active.take()
        };
        drop(scope);
        log::info!("room: closing ({reason})");

        self.inner.monitor.stop_monitoring().await;
        self.inner.monitor.exit_fullscreen().await;

        let events = self.inner.monitor.integrity_events();
        if let Err(e) = self.inner.session.end_interview(events).await {
            log::error!("room: failed to submit interview, completing anyway: {e}");
        }

        let mut state = self.inner.lock();
        if let Some(next) = transition(state.stage, RoomTrigger::Submitted) {
            state.stage = next;
        }
        log::info!("room: interview complete");
        true
    }

    // ---- teardown ----------------------------------------------------------

    /// The room is going away without a normal end (window closed).
    ///
    /// Releases the active-stage resources and the camera; does not submit.
    pub async fn shutdown(&self) {
        self.inner.terminating.store(true, Ordering::SeqCst);
        let scope = {
            let mut state = self.inner.lock();
            state.show_end_confirm = false;
            state.active.take()
        };
        if scope.is_some() {
            log::info!("room: shut down while active");
        }
        drop(scope);
        self.inner.monitor.stop_monitoring().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
