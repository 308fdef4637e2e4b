//! [`IntegrityMonitor`]: passive proctoring for the active stage.
//!
//! ```text
//! start_monitoring()
//!   └─▶ page.subscribe() ──▶ spawn ┐
//!                                  │ loop {
//!                                  │   select! {
//!                                  │     cancelled  → break
//!                                  │     event      → apply_signal() → event.respond(verdict)
//!                                  │   }
//!                                  │ }
//! stop_monitoring()                │
//!   └─▶ cancel + join ◀────────────┘   (receiver dropped = observers gone)
//!       generation += 1, stop_webcam()
//! ```
//!
//! A camera grant that resolves after `stop_monitoring` belongs to an older
//! generation and is released on arrival.
//!
//! The monitor never talks to the session.  The room reads
//! [`integrity_events`](IntegrityMonitor::integrity_events) once, at
//! termination.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::ProctoringConfig;
use crate::platform::{Capabilities, Key, KeyChord, MediaTrack, PageSignal, SignalVerdict};

use super::event::{IntegrityEvent, IntegrityEventKind};

// ---------------------------------------------------------------------------
// ProctorSnapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of the monitor's observable flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProctorSnapshot {
    pub is_monitoring: bool,
    pub tab_switches: u32,
    pub focus_lost_count: u32,
    pub is_fullscreen: bool,
    pub paste_blocked: bool,
    pub webcam_active: bool,
    pub event_count: usize,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct HeldWebcam {
    track: Box<dyn MediaTrack>,
    watcher: CancellationToken,
}

impl HeldWebcam {
    fn release(mut self) {
        self.watcher.cancel();
        self.track.stop();
    }
}

#[derive(Default)]
struct MonitorState {
    monitoring: bool,
    events: Vec<IntegrityEvent>,
    tab_switches: u32,
    focus_lost_count: u32,
    page_hidden: bool,
    is_fullscreen: bool,
    paste_flagged_at: Option<Instant>,
    webcam: Option<HeldWebcam>,
    /// Bumped by every `stop_monitoring`.
    generation: u64,
}

impl MonitorState {
    fn push(&mut self, kind: IntegrityEventKind, description: impl Into<String>) {
        let event = IntegrityEvent::now(kind, description);
        log::info!("proctor: {:?} ({})", event.kind, event.description);
        self.events.push(event);
    }
}

struct MonitorTask {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

type SharedMonitorState = Arc<Mutex<MonitorState>>;

fn lock(state: &Mutex<MonitorState>) -> MutexGuard<'_, MonitorState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// IntegrityMonitor
// ---------------------------------------------------------------------------

/// Observes the hosting page and camera and keeps an append-only event log.
///
/// Owns the camera track and the fullscreen mode exclusively; callers only
/// issue start/stop/request calls.
pub struct IntegrityMonitor {
    caps: Capabilities,
    config: ProctoringConfig,
    state: SharedMonitorState,
    task: Mutex<Option<MonitorTask>>,
}

impl IntegrityMonitor {
    pub fn new(caps: Capabilities, config: ProctoringConfig) -> Self {
        Self {
            caps,
            config,
            state: Arc::new(Mutex::new(MonitorState::default())),
            task: Mutex::new(None),
        }
    }

    // ---- lifecycle ---------------------------------------------------------

    /// Subscribe to page signals.  A second call while running is a no-op.
    pub fn start_monitoring(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            log::debug!("proctor: already monitoring");
            return;
        }

        lock(&self.state).monitoring = true;

        let mut signals = self.caps.page.subscribe();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let state = Arc::clone(&self.state);
        let config = self.config.clone();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = signals.recv() => match event {
                        Some(event) => {
                            let verdict = apply_signal(&state, &config, event.signal.clone());
                            if event.expects_reply() {
                                log::debug!("proctor: {:?} -> {verdict:?}", event.signal);
                            }
                            event.respond(verdict);
                        }
                        None => {
                            // Host closed the stream; hold until stopped.
                            token.cancelled().await;
                            break;
                        }
                    },
                }
            }
        });

        *task = Some(MonitorTask { handle, cancel });
        log::info!("proctor: monitoring started");
    }

    /// Unsubscribe from page signals and release the camera.
    ///
    /// Safe to call when not monitoring.
    pub async fn stop_monitoring(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        {
            let mut state = lock(&self.state);
            state.monitoring = false;
            state.page_hidden = false;
            state.generation += 1;
        }

        if let Some(task) = task {
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                log::warn!("proctor: monitor task ended abnormally: {e}");
            }
            log::info!("proctor: monitoring stopped");
        }

        self.stop_webcam();
    }

    pub fn is_monitoring(&self) -> bool {
        lock(&self.state).monitoring
    }

    // ---- camera ------------------------------------------------------------

    /// Ask for the camera.  Returns `false` (and logs `webcam_denied`) on
    /// refusal; never an error.
    ///
    /// If monitoring is stopped while the prompt is open, the late grant is
    /// stopped immediately and `false` is returned.
    pub async fn request_webcam(&self) -> bool {
        let generation = {
            let state = lock(&self.state);
            if state.webcam.is_some() {
                return true;
            }
            state.generation
        };

        let feed = match self.caps.camera.open().await {
            Ok(feed) => feed,
            Err(e) => {
                log::warn!("proctor: webcam unavailable: {e}");
                lock(&self.state)
                    .push(IntegrityEventKind::WebcamDenied, "Candidate denied webcam access");
                return false;
            }
        };

        let watcher = CancellationToken::new();
        let mut state = lock(&self.state);
        if state.generation != generation {
            log::info!("proctor: webcam granted after monitoring stopped, releasing");
            let mut track = feed.track;
            track.stop();
            return false;
        }
        if state.webcam.is_some() {
            // Lost a race with a concurrent request; keep the first track.
            let mut track = feed.track;
            track.stop();
            return true;
        }
        log::info!("proctor: webcam granted ({})", feed.track.id());
        state.webcam = Some(HeldWebcam {
            track: feed.track,
            watcher: watcher.clone(),
        });
        drop(state);

        let shared = Arc::clone(&self.state);
        let ended = feed.ended;
        tokio::spawn(async move {
            tokio::select! {
                _ = watcher.cancelled() => {}
                res = ended => {
                    if res.is_ok() {
                        let mut state = lock(&shared);
                        if let Some(webcam) = state.webcam.take() {
                            webcam.release();
                            state.push(
                                IntegrityEventKind::WebcamLost,
                                "Webcam disconnected during interview",
                            );
                        }
                    }
                }
            }
        });

        true
    }

    /// Release the camera.  Safe to call without a camera.
    pub fn stop_webcam(&self) {
        let webcam = lock(&self.state).webcam.take();
        if let Some(webcam) = webcam {
            webcam.release();
            log::info!("proctor: webcam released");
        }
    }

    pub fn webcam_active(&self) -> bool {
        lock(&self.state).webcam.is_some()
    }

    /// Id of the live camera track, if any.
    pub fn webcam_track(&self) -> Option<String> {
        lock(&self.state)
            .webcam
            .as_ref()
            .map(|w| w.track.id().to_string())
    }

    // ---- fullscreen --------------------------------------------------------

    /// Best-effort fullscreen.  Refusal only leaves `is_fullscreen` false.
    pub async fn request_fullscreen(&self) {
        let result = self.caps.fullscreen.request().await;
        let active = match result {
            Ok(()) => true,
            Err(e) => {
                log::info!("proctor: fullscreen unavailable: {e}");
                self.caps.fullscreen.is_active()
            }
        };
        lock(&self.state).is_fullscreen = active;
    }

    /// Leave fullscreen if the host is in it.
    pub async fn exit_fullscreen(&self) {
        let tracked = lock(&self.state).is_fullscreen;
        if !tracked && !self.caps.fullscreen.is_active() {
            return;
        }
        if let Err(e) = self.caps.fullscreen.exit().await {
            log::warn!("proctor: could not exit fullscreen: {e}");
        }
        lock(&self.state).is_fullscreen = false;
    }

    pub fn is_fullscreen(&self) -> bool {
        lock(&self.state).is_fullscreen
    }

    // ---- observable state --------------------------------------------------

    pub fn tab_switches(&self) -> u32 {
        lock(&self.state).tab_switches
    }

    /// `true` for a short while after an intercepted paste.
    pub fn paste_blocked(&self) -> bool {
        let ttl = self.config.paste_flag_ttl();
        lock(&self.state)
            .paste_flagged_at
            .is_some_and(|at| at.elapsed() < ttl)
    }

    /// Copy of the event log, in arrival order.
    pub fn integrity_events(&self) -> Vec<IntegrityEvent> {
        lock(&self.state).events.clone()
    }

    pub fn snapshot(&self) -> ProctorSnapshot {
        let ttl = self.config.paste_flag_ttl();
        let state = lock(&self.state);
        ProctorSnapshot {
            is_monitoring: state.monitoring,
            tab_switches: state.tab_switches,
            focus_lost_count: state.focus_lost_count,
            is_fullscreen: state.is_fullscreen,
            paste_blocked: state.paste_flagged_at.is_some_and(|at| at.elapsed() < ttl),
            webcam_active: state.webcam.is_some(),
            event_count: state.events.len(),
        }
    }
}

impl Drop for IntegrityMonitor {
    fn drop(&mut self) {
        if let Some(task) = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.cancel.cancel();
        }
        if let Some(webcam) = lock(&self.state).webcam.take() {
            webcam.release();
        }
    }
}

// ---------------------------------------------------------------------------
// Signal handling
// ---------------------------------------------------------------------------

fn is_devtools_chord(chord: &KeyChord) -> bool {
    let inspector = chord.command() && chord.shift && (chord.is_char('i') || chord.is_char('j'));
    inspector || chord.key == Key::Function(12)
}

fn apply_signal(
    state: &Mutex<MonitorState>,
    config: &ProctoringConfig,
    signal: PageSignal,
) -> SignalVerdict {
    use IntegrityEventKind as Kind;

    let mut state = lock(state);
    if !state.monitoring {
        return SignalVerdict::Allow;
    }

    match signal {
        PageSignal::Hidden => {
            if !state.page_hidden {
                state.page_hidden = true;
                state.tab_switches += 1;
                state.push(Kind::TabSwitch, "Candidate switched to another tab");
            }
            SignalVerdict::Allow
        }
        PageSignal::Visible => {
            state.page_hidden = false;
            SignalVerdict::Allow
        }
        PageSignal::FocusLost => {
            state.focus_lost_count += 1;
            state.push(Kind::FocusLost, "Interview window lost focus");
            SignalVerdict::Allow
        }
        PageSignal::Paste => {
            if config.block_paste {
                state.paste_flagged_at = Some(Instant::now());
                state.push(Kind::PasteDetected, "Paste attempt blocked during interview");
                SignalVerdict::Prevent
            } else {
                state.push(Kind::PasteDetected, "Paste detected during interview");
                SignalVerdict::Allow
            }
        }
        PageSignal::Copy => {
            state.push(Kind::CopyDetected, "Candidate copied text during interview");
            SignalVerdict::Allow
        }
        PageSignal::ContextMenu => {
            state.push(Kind::RightClick, "Right-click attempt blocked during interview");
            if config.block_context_menu {
                SignalVerdict::Prevent
            } else {
                SignalVerdict::Allow
            }
        }
        PageSignal::Key(chord) if is_devtools_chord(&chord) => {
            state.push(
                Kind::DevtoolsAttempt,
                format!("DevTools shortcut detected: {chord}"),
            );
            if config.block_devtools {
                SignalVerdict::Prevent
            } else {
                SignalVerdict::Allow
            }
        }
        PageSignal::Key(chord) if chord.command() && chord.is_char('v') => {
            if config.block_paste {
                state.paste_flagged_at = Some(Instant::now());
                state.push(Kind::KeyboardShortcut, format!("{chord} paste shortcut blocked"));
                SignalVerdict::Prevent
            } else {
                state.push(Kind::KeyboardShortcut, format!("{chord} paste shortcut used"));
                SignalVerdict::Allow
            }
        }
        PageSignal::Key(chord) if chord.command() && chord.is_char('a') => {
            state.push(
                Kind::KeyboardShortcut,
                format!("Select all shortcut used ({chord})"),
            );
            SignalVerdict::Allow
        }
        PageSignal::Key(_) => SignalVerdict::Allow,
        PageSignal::FullscreenChanged(active) => {
            state.is_fullscreen = active;
            if !active {
                state.push(Kind::FullscreenExit, "Candidate exited fullscreen mode");
            }
            SignalVerdict::Allow
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
