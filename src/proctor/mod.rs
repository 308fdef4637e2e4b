//! Integrity monitoring for the active interview stage.
//!
//! [`IntegrityMonitor`] watches page signals (visibility, focus, clipboard,
//! keyboard, fullscreen) and the camera, and keeps an append-only log of
//! [`IntegrityEvent`]s that the room submits when the interview ends.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use interview_room::config::ProctoringConfig;
//! use interview_room::platform::TerminalPlatform;
//! use interview_room::proctor::IntegrityMonitor;
//!
//! # async fn example() {
//! let platform = TerminalPlatform::new();
//! let monitor = IntegrityMonitor::new(platform.capabilities(), ProctoringConfig::default());
//!
//! let has_camera = monitor.request_webcam().await;
//! monitor.start_monitoring();
//! // … interview runs …
//! monitor.stop_monitoring().await;
//! let log = monitor.integrity_events();
//! # let _ = (has_camera, log);
//! # }
//! ```

pub mod event;
pub mod monitor;

pub use event::{IntegrityEvent, IntegrityEventKind};
pub use monitor::{IntegrityMonitor, ProctorSnapshot};
pub use crate::platform::SignalVerdict;
