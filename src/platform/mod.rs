//! Host capabilities the interview room orchestrates but does not own.
//!
//! A browser tab exposes page-visibility, focus, clipboard and keyboard
//! notifications, a fullscreen toggle, camera acquisition and an unload
//! guard.  Each is modelled here as a small trait so the room can run
//! against a real host, the headless [`TerminalPlatform`], or the test
//! doubles in `testing`.
//!
//! # Resource discipline
//!
//! ```text
//! PageEvents::subscribe()      ──▶ UnboundedReceiver<PageEvent>    (drop = unsubscribe)
//! Camera::open()               ──▶ CameraFeed { track, ended }     (track.stop() = release)
//! NavigationGuard::block_unload() ──▶ UnloadBlock                  (drop = remove guard)
//! Fullscreen::request()/exit()     best-effort, never fatal
//! ```
//!
//! Every acquisition returns a value whose lifetime *is* the resource, so
//! release happens on every exit path including an abrupt drop.

pub mod terminal;

#[cfg(test)]
pub mod testing;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

pub use terminal::TerminalPlatform;

// ---------------------------------------------------------------------------
// PlatformError
// ---------------------------------------------------------------------------

/// Failures reported by host capabilities.
///
/// None of these are fatal to the room; callers translate them into
/// degraded-capability flags.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The user (or a policy) refused the permission prompt.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The host has no such capability.
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    /// The device exists but could not be opened.
    #[error("device error: {0}")]
    Device(String),
}

// ---------------------------------------------------------------------------
// KeyChord
// ---------------------------------------------------------------------------

/// The key part of a key-down notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// A printable character, compared case-insensitively.
    Char(char),
    /// A function key (`F1` … `F24`).
    Function(u8),
    /// Anything the monitor does not care about.
    Other,
}

/// A key press together with its modifier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyChord {
    pub key: Key,
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
}

impl KeyChord {
    pub fn plain(key: Key) -> Self {
        Self {
            key,
            ctrl: false,
            meta: false,
            shift: false,
        }
    }

    /// `Ctrl+<c>`.
    pub fn ctrl(c: char) -> Self {
        Self {
            ctrl: true,
            ..Self::plain(Key::Char(c))
        }
    }

    /// `Cmd+<c>` (macOS command key).
    pub fn meta(c: char) -> Self {
        Self {
            meta: true,
            ..Self::plain(Key::Char(c))
        }
    }

    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }

    /// Ctrl on most hosts, Cmd on macOS.
    pub fn command(&self) -> bool {
        self.ctrl || self.meta
    }

    /// Case-insensitive character match.
    pub fn is_char(&self, c: char) -> bool {
        matches!(self.key, Key::Char(k) if k.eq_ignore_ascii_case(&c))
    }
}

impl fmt::Display for KeyChord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ctrl {
            write!(f, "Ctrl+")?;
        }
        if self.meta {
            write!(f, "Cmd+")?;
        }
        if self.shift {
            write!(f, "Shift+")?;
        }
        match self.key {
            Key::Char(c) => write!(f, "{}", c.to_ascii_uppercase()),
            Key::Function(n) => write!(f, "F{n}"),
            Key::Other => write!(f, "?"),
        }
    }
}

// ---------------------------------------------------------------------------
// PageSignal
// ---------------------------------------------------------------------------

/// A notification from the hosting page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSignal {
    /// The page became hidden (tab switched away, window minimised).
    Hidden,
    /// The page became visible again.
    Visible,
    /// The window lost input focus.
    FocusLost,
    /// A paste into the response area was attempted.
    Paste,
    /// Text was copied from the page.
    Copy,
    /// The context menu was requested.
    ContextMenu,
    /// A key was pressed.
    Key(KeyChord),
    /// The host's fullscreen state changed.
    FullscreenChanged(bool),
}

/// What the host should do with the default action of a page signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalVerdict {
    Allow,
    Prevent,
}

// ---------------------------------------------------------------------------
// PageEvent
// ---------------------------------------------------------------------------

/// A [`PageSignal`] as delivered to a subscriber.
///
/// Cancellable signals (paste, context menu, key presses) carry a reply
/// slot; the host holds the default action until the subscriber answers.
/// An event dropped without an answer counts as [`SignalVerdict::Allow`].
#[derive(Debug)]
pub struct PageEvent {
    pub signal: PageSignal,
    reply: Option<oneshot::Sender<SignalVerdict>>,
}

impl PageEvent {
    /// A signal the host does not wait on.
    pub fn notify(signal: PageSignal) -> Self {
        Self {
            signal,
            reply: None,
        }
    }

    /// A signal whose default action waits for a verdict.
    pub fn ask(signal: PageSignal) -> (Self, oneshot::Receiver<SignalVerdict>) {
        let (tx, rx) = oneshot::channel();
        let event = Self {
            signal,
            reply: Some(tx),
        };
        (event, rx)
    }

    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Answer the host.  A no-op for notifications or if the host stopped
    /// waiting.
    pub fn respond(self, verdict: SignalVerdict) {
        if let Some(reply) = self.reply {
            let _ = reply.send(verdict);
        }
    }
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Source of page notifications.
///
/// Each call to [`subscribe`](Self::subscribe) registers one set of
/// observers; dropping the receiver unregisters them.
pub trait PageEvents: Send + Sync {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<PageEvent>;
}

/// Host fullscreen toggle.
#[async_trait]
pub trait Fullscreen: Send + Sync {
    /// Enter fullscreen.  May require a user gesture and may be refused.
    async fn request(&self) -> Result<(), PlatformError>;
    /// Leave fullscreen.
    async fn exit(&self) -> Result<(), PlatformError>;
    /// Whether the host is currently fullscreen.
    fn is_active(&self) -> bool;
}

/// A live camera track.
pub trait MediaTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;
    /// Release the device.  Calling it twice is harmless.
    fn stop(&mut self);
}

/// A granted camera: the track plus a one-shot that fires if the device
/// disappears on its own (unplugged, revoked by the user).
#[derive(Debug)]
pub struct CameraFeed {
    pub track: Box<dyn MediaTrack>,
    pub ended: oneshot::Receiver<()>,
}

/// Camera acquisition.
#[async_trait]
pub trait Camera: Send + Sync {
    async fn open(&self) -> Result<CameraFeed, PlatformError>;
}

/// Installs a guard that makes leaving the page require confirmation.
pub trait NavigationGuard: Send + Sync {
    fn block_unload(&self) -> UnloadBlock;
}

// ---------------------------------------------------------------------------
// UnloadBlock
// ---------------------------------------------------------------------------

/// RAII handle for an installed unload guard.
///
/// The guard is removed exactly once, when this value is dropped.
pub struct UnloadBlock {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl UnloadBlock {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for UnloadBlock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for UnloadBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnloadBlock")
            .field("armed", &self.release.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// The full set of host capabilities handed to the room.
#[derive(Clone)]
pub struct Capabilities {
    pub page: Arc<dyn PageEvents>,
    pub fullscreen: Arc<dyn Fullscreen>,
    pub camera: Arc<dyn Camera>,
    pub navigation: Arc<dyn NavigationGuard>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn chord_display_lists_modifiers_in_order() {
        assert_eq!(KeyChord::ctrl('i').with_shift().to_string(), "Ctrl+Shift+I");
        assert_eq!(KeyChord::meta('v').to_string(), "Cmd+V");
        assert_eq!(KeyChord::plain(Key::Function(12)).to_string(), "F12");
    }

    #[test]
    fn chord_char_match_ignores_case() {
        let chord = KeyChord::ctrl('V');
        assert!(chord.is_char('v'));
        assert!(chord.command());
        assert!(!KeyChord::plain(Key::Function(5)).is_char('f'));
    }

    #[tokio::test]
    async fn asked_event_delivers_its_verdict() {
        let (event, verdict) = PageEvent::ask(PageSignal::Paste);
        assert!(event.expects_reply());
        event.respond(SignalVerdict::Prevent);
        assert_eq!(verdict.await.ok(), Some(SignalVerdict::Prevent));

        let (event, verdict) = PageEvent::ask(PageSignal::Copy);
        drop(event);
        assert!(verdict.await.is_err(), "unanswered means the host proceeds");

        let note = PageEvent::notify(PageSignal::Hidden);
        assert!(!note.expects_reply());
        note.respond(SignalVerdict::Allow);
    }

    #[test]
    fn unload_block_releases_once_on_drop() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let block = UnloadBlock::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(block);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
