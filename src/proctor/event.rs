//! Integrity events: the proctoring log submitted with the final transcript.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of a proctoring observation.
///
/// Serialised in `snake_case` (`"tab_switch"`, `"paste_detected"`, …), which
/// is the form the assessment service stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityEventKind {
    TabSwitch,
    FocusLost,
    WebcamLost,
    WebcamDenied,
    PasteDetected,
    CopyDetected,
    RightClick,
    DevtoolsAttempt,
    FullscreenExit,
    KeyboardShortcut,
}

/// One timestamped proctoring observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityEvent {
    #[serde(rename = "type")]
    pub kind: IntegrityEventKind,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl IntegrityEvent {
    /// Stamp a new event with the current wall-clock time.
    pub fn now(kind: IntegrityEventKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            timestamp: Utc::now(),
        }
    }
}
