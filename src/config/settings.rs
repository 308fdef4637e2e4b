//! Settings sections, their defaults, and `settings.toml` persistence.
//!
//! Every section is `#[serde(default)]`: a file that names only the keys it
//! changes is valid.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// ServiceConfig
// ---------------------------------------------------------------------------

/// Connection settings for the remote interview service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base URL of the recruiting platform (e.g. `https://hire.example.com`).
    ///
    /// Endpoints are resolved as `{base_url}/api/interviews/{id}/…`.
    pub base_url: String,
    /// Maximum seconds a single request may take.  Streamed turns can run for
    /// a while, so this is generous.
    pub timeout_secs: u64,
    /// Maximum seconds to wait for the TCP/TLS handshake.
    pub connect_timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".into(),
            timeout_secs: 120,
            connect_timeout_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// RoomConfig
// ---------------------------------------------------------------------------

/// Timing and presentation settings for the interview room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Hard limit for the active stage, in seconds (45 minutes).
    pub max_duration_secs: u64,
    /// Ask for fullscreen when the candidate starts.
    pub request_fullscreen: bool,
    /// Remaining time at which the clock is shown as a warning.
    pub warning_remaining_secs: u64,
    /// Remaining time at which the clock is shown as critical.
    pub critical_remaining_secs: u64,
}

impl RoomConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: 45 * 60,
            request_fullscreen: true,
            warning_remaining_secs: 5 * 60,
            critical_remaining_secs: 2 * 60,
        }
    }
}

// ---------------------------------------------------------------------------
// ProctoringConfig
// ---------------------------------------------------------------------------

/// Integrity monitor behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProctoringConfig {
    /// Seconds the paste warning stays raised after an intercepted paste.
    pub paste_flag_secs: u64,
    /// Prevent paste into the response area.
    pub block_paste: bool,
    /// Prevent the context menu.
    pub block_context_menu: bool,
    /// Prevent developer-tools shortcuts.
    pub block_devtools: bool,
}

impl ProctoringConfig {
    pub fn paste_flag_ttl(&self) -> Duration {
        Duration::from_secs(self.paste_flag_secs)
    }
}

impl Default for ProctoringConfig {
    fn default() -> Self {
        Self {
            paste_flag_secs: 3,
            block_paste: true,
            block_context_menu: true,
            block_devtools: true,
        }
    }
}

// ---------------------------------------------------------------------------
// VoiceConfig
// ---------------------------------------------------------------------------

/// Speech recognition settings passed to the recognizer on start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// BCP-47 language tag (e.g. `"en-US"`).
    pub language: String,
    /// Keep recognising across pauses instead of stopping after one phrase.
    pub continuous: bool,
    /// Ask the recognizer for interim (non-final) hypotheses.
    pub interim_results: bool,
    /// GGML whisper model for local dictation.  Dictation is off without
    /// one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<PathBuf>,
    /// Silence that closes a dictated phrase, in milliseconds.
    pub phrase_pause_ms: u64,
}

impl VoiceConfig {
    pub fn phrase_pause(&self) -> Duration {
        Duration::from_millis(self.phrase_pause_ms)
    }

    /// Whisper language code: the primary subtag of `language`, or `None`
    /// for `"auto"`.
    pub fn whisper_language(&self) -> Option<&str> {
        let primary = self.language.split(['-', '_']).next().unwrap_or_default();
        match primary {
            "" | "auto" => None,
            code => Some(code),
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            language: "en-US".into(),
            continuous: true,
            interim_results: true,
            model: None,
            phrase_pause_ms: 800,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Everything in `settings.toml`.
///
/// ```rust,no_run
/// use interview_room::config::AppConfig;
///
/// let mut config = AppConfig::load().unwrap_or_default();
/// config.service.base_url = "https://interviews.example.com".into();
/// config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Remote service connection.
    pub service: ServiceConfig,
    /// Room timing.
    pub room: RoomConfig,
    /// Integrity monitor behaviour.
    pub proctoring: ProctoringConfig,
    /// Voice input.
    pub voice: VoiceConfig,
}

impl AppConfig {
    /// Read the platform `settings.toml`; defaults if it does not exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Keys missing from the file keep their defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Write to `path`, creating its directory first.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating {}", dir.display()))?;
        }
        let text = toml::to_string_pretty(self)?;
        std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
