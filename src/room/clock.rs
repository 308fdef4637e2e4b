//! Elapsed and remaining time for the interview header.

use std::time::Duration;

use crate::config::RoomConfig;

/// How close the interview is to its hard limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Normal,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBudget {
    pub elapsed: Duration,
    pub remaining: Duration,
    pub urgency: Urgency,
}

impl TimeBudget {
    pub fn new(elapsed: Duration, config: &RoomConfig) -> Self {
        let remaining = config.max_duration().saturating_sub(elapsed);
        let urgency = if remaining <= Duration::from_secs(config.critical_remaining_secs) {
            Urgency::Critical
        } else if remaining <= Duration::from_secs(config.warning_remaining_secs) {
            Urgency::Warning
        } else {
            Urgency::Normal
        };
        Self {
            elapsed,
            remaining,
            urgency,
        }
    }
}

/// `MM:SS`, minutes not capped at 59.
pub fn format_clock(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
