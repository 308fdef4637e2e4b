//! Configuration module for the interview room.
//!
//! Provides `AppConfig` (top-level settings), sub-configs for the service
//! connection, room timing, proctoring and voice input, `AppPaths` for the
//! cross-platform settings location, and TOML persistence via
//! `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{AppConfig, ProctoringConfig, RoomConfig, ServiceConfig, VoiceConfig};
