//! Test doubles for the host capabilities.
//!
//! Every fake appends to a shared [`CallLog`] so tests can assert the exact
//! order of side effects across the platform and the remote service.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::{
    Camera, CameraFeed, Capabilities, Fullscreen, MediaTrack, NavigationGuard, PageEvent,
    PageEvents, PageSignal, PlatformError, SignalVerdict, UnloadBlock,
};

// ---------------------------------------------------------------------------
// CallLog
// ---------------------------------------------------------------------------

/// Ordered record of side effects, shared between fakes.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == entry).count()
    }

    /// Entries whose name starts with one of `prefixes`, in order.
    pub fn filtered(&self, prefixes: &[&str]) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| prefixes.iter().any(|p| e.starts_with(p)))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// FakePage
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakePage {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<PageEvent>>>,
    subscriptions: AtomicUsize,
}

impl FakePage {
    /// Deliver `signal` to every live subscriber without waiting.
    pub fn emit(&self, signal: PageSignal) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|s| s.send(PageEvent::notify(signal.clone())).is_ok());
    }

    /// Deliver a cancellable `signal` and wait for the verdict, the way a
    /// host holds a default action.  Unanswered signals are allowed.
    pub async fn ask(&self, signal: PageSignal) -> SignalVerdict {
        let verdict = {
            let mut subscribers = self.subscribers.lock().unwrap();
            subscribers.retain(|s| !s.is_closed());
            let Some((last, rest)) = subscribers.split_last() else {
                return SignalVerdict::Allow;
            };
            for s in rest {
                let _ = s.send(PageEvent::notify(signal.clone()));
            }
            let (event, verdict) = PageEvent::ask(signal);
            let _ = last.send(event);
            verdict
        };
        verdict.await.unwrap_or(SignalVerdict::Allow)
    }

    /// Total number of `subscribe` calls so far.
    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Subscribers whose receiver is still alive.
    pub fn live_subscribers(&self) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|s| !s.is_closed());
        subscribers.len()
    }
}

impl PageEvents for FakePage {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<PageEvent> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }
}

// ---------------------------------------------------------------------------
// FakeFullscreen
// ---------------------------------------------------------------------------

pub struct FakeFullscreen {
    log: CallLog,
    active: AtomicBool,
    refuse: AtomicBool,
    yields: AtomicUsize,
}

impl FakeFullscreen {
    pub fn refuse(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }

    /// Make `request` yield to the scheduler `n` times before answering.
    pub fn slow(&self, n: usize) {
        self.yields.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Fullscreen for FakeFullscreen {
    async fn request(&self) -> Result<(), PlatformError> {
        self.log.record("fullscreen.request");
        for _ in 0..self.yields.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        if self.refuse.load(Ordering::SeqCst) {
            return Err(PlatformError::PermissionDenied("user gesture required".into()));
        }
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn exit(&self) -> Result<(), PlatformError> {
        self.log.record("fullscreen.exit");
        self.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// FakeCamera
// ---------------------------------------------------------------------------

pub struct FakeCamera {
    log: CallLog,
    deny: AtomicBool,
    yields: AtomicUsize,
    open_tracks: Arc<AtomicUsize>,
    unplug: Mutex<Option<oneshot::Sender<()>>>,
}

impl FakeCamera {
    pub fn deny(&self) {
        self.deny.store(true, Ordering::SeqCst);
    }

    /// Keep the permission prompt open for `n` scheduler yields.
    pub fn slow(&self, n: usize) {
        self.yields.store(n, Ordering::SeqCst);
    }

    /// Tracks opened and not yet stopped.
    pub fn open_tracks(&self) -> usize {
        self.open_tracks.load(Ordering::SeqCst)
    }

    /// Simulate the device disappearing under the latest track.
    pub fn unplug(&self) {
        if let Some(tx) = self.unplug.lock().unwrap().take() {
            let _ = tx.send(());
        }
    }
}

#[derive(Debug)]
struct FakeTrack {
    id: String,
    log: CallLog,
    open_tracks: Arc<AtomicUsize>,
    stopped: bool,
}

impl MediaTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.open_tracks.fetch_sub(1, Ordering::SeqCst);
            self.log.record("camera.stop");
        }
    }
}

#[async_trait]
impl Camera for FakeCamera {
    async fn open(&self) -> Result<CameraFeed, PlatformError> {
        self.log.record("camera.open");
        for _ in 0..self.yields.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        if self.deny.load(Ordering::SeqCst) {
            return Err(PlatformError::PermissionDenied("camera".into()));
        }
        self.open_tracks.fetch_add(1, Ordering::SeqCst);
        let (tx, ended) = oneshot::channel();
        *self.unplug.lock().unwrap() = Some(tx);
        Ok(CameraFeed {
            track: Box::new(FakeTrack {
                id: "fake-camera-0".into(),
                log: self.log.clone(),
                open_tracks: Arc::clone(&self.open_tracks),
                stopped: false,
            }),
            ended,
        })
    }
}

// ---------------------------------------------------------------------------
// FakeNavigation
// ---------------------------------------------------------------------------

pub struct FakeNavigation {
    log: CallLog,
    blocks: Arc<AtomicUsize>,
}

impl FakeNavigation {
    pub fn blocked(&self) -> bool {
        self.blocks.load(Ordering::SeqCst) > 0
    }
}

impl NavigationGuard for FakeNavigation {
    fn block_unload(&self) -> UnloadBlock {
        self.log.record("unload.block");
        self.blocks.fetch_add(1, Ordering::SeqCst);
        let blocks = Arc::clone(&self.blocks);
        let log = self.log.clone();
        UnloadBlock::new(move || {
            blocks.fetch_sub(1, Ordering::SeqCst);
            log.record("unload.release");
        })
    }
}

// ---------------------------------------------------------------------------
// FakePlatform
// ---------------------------------------------------------------------------

/// All four fakes sharing one [`CallLog`].
pub struct FakePlatform {
    pub log: CallLog,
    pub page: Arc<FakePage>,
    pub fullscreen: Arc<FakeFullscreen>,
    pub camera: Arc<FakeCamera>,
    pub navigation: Arc<FakeNavigation>,
}

impl FakePlatform {
    pub fn new(log: CallLog) -> Self {
        Self {
            page: Arc::new(FakePage::default()),
            fullscreen: Arc::new(FakeFullscreen {
                log: log.clone(),
                active: AtomicBool::new(false),
                refuse: AtomicBool::new(false),
                yields: AtomicUsize::new(0),
            }),
            camera: Arc::new(FakeCamera {
                log: log.clone(),
                deny: AtomicBool::new(false),
                yields: AtomicUsize::new(0),
                open_tracks: Arc::new(AtomicUsize::new(0)),
                unplug: Mutex::new(None),
            }),
            navigation: Arc::new(FakeNavigation {
                log: log.clone(),
                blocks: Arc::new(AtomicUsize::new(0)),
            }),
            log,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            page: Arc::clone(&self.page) as Arc<dyn PageEvents>,
            fullscreen: Arc::clone(&self.fullscreen) as Arc<dyn Fullscreen>,
            camera: Arc::clone(&self.camera) as Arc<dyn Camera>,
            navigation: Arc::clone(&self.navigation) as Arc<dyn NavigationGuard>,
        }
    }
}
