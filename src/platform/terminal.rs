//! Headless implementation of the host capabilities for the terminal runner.
//!
//! A terminal has no page to watch, no fullscreen and no camera.  The only
//! live capability is the unload guard: while it is held, the runner asks
//! for a second Ctrl-C before quitting.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    Camera, CameraFeed, Capabilities, Fullscreen, NavigationGuard, PageEvent, PageEvents,
    PlatformError, UnloadBlock,
};

/// Capabilities of a plain terminal session.
#[derive(Default)]
pub struct TerminalPlatform {
    // Senders are kept so subscriptions stay open (and silent) until the
    // subscriber drops its receiver.
    subscribers: Mutex<Vec<mpsc::UnboundedSender<PageEvent>>>,
    unload_blocks: Arc<AtomicUsize>,
}

impl TerminalPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Bundle this platform as room [`Capabilities`].
    pub fn capabilities(self: &Arc<Self>) -> Capabilities {
        Capabilities {
            page: Arc::clone(self) as Arc<dyn PageEvents>,
            fullscreen: Arc::clone(self) as Arc<dyn Fullscreen>,
            camera: Arc::clone(self) as Arc<dyn Camera>,
            navigation: Arc::clone(self) as Arc<dyn NavigationGuard>,
        }
    }

    /// `true` while an [`UnloadBlock`] is alive.
    pub fn unload_blocked(&self) -> bool {
        self.unload_blocks.load(Ordering::SeqCst) > 0
    }
}

impl PageEvents for TerminalPlatform {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<PageEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|s| !s.is_closed());
        subscribers.push(tx);
        rx
    }
}

#[async_trait]
impl Fullscreen for TerminalPlatform {
    async fn request(&self) -> Result<(), PlatformError> {
        Err(PlatformError::Unsupported("fullscreen"))
    }

    async fn exit(&self) -> Result<(), PlatformError> {
        Ok(())
    }

    fn is_active(&self) -> bool {
        false
    }
}

#[async_trait]
impl Camera for TerminalPlatform {
    async fn open(&self) -> Result<CameraFeed, PlatformError> {
        Err(PlatformError::Unsupported("camera"))
    }
}

impl NavigationGuard for TerminalPlatform {
    fn block_unload(&self) -> UnloadBlock {
        self.unload_blocks.fetch_add(1, Ordering::SeqCst);
        let blocks = Arc::clone(&self.unload_blocks);
        UnloadBlock::new(move || {
            blocks.fetch_sub(1, Ordering::SeqCst);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unload_guard_tracks_block_lifetime() {
        let platform = TerminalPlatform::new();
        assert!(!platform.unload_blocked());

        let block = platform.block_unload();
        assert!(platform.unload_blocked());

        drop(block);
        assert!(!platform.unload_blocked());
    }

    #[tokio::test]
    async fn fullscreen_and_camera_are_unsupported() {
        let platform = TerminalPlatform::new();
        assert!(matches!(
            platform.request().await,
            Err(PlatformError::Unsupported("fullscreen"))
        ));
        assert!(platform.exit().await.is_ok());
        assert!(!platform.is_active());
        assert!(matches!(
            platform.open().await,
            Err(PlatformError::Unsupported("camera"))
        ));
    }

    #[tokio::test]
    async fn subscription_stays_open_and_silent() {
        let platform = TerminalPlatform::new();
        let mut rx = platform.subscribe();
        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Empty)
        ));
    }
}
