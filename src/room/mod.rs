//! The interview room: one candidate, one session, start to finish.
//!
//! [`InterviewRoom`] validates the link, walks the stage machine in
//! [`stage`], and coordinates the session, the integrity monitor and voice
//! input.  Every way out of an active interview (candidate confirms, the
//! interviewer closes, the clock runs out) goes through the same cleanup.

pub mod clock;
pub mod controller;
pub mod stage;

pub use clock::{format_clock, TimeBudget, Urgency};
pub use controller::{InterviewRoom, RoomDeps, RoomSnapshot, SendError};
pub use stage::{transition, EndReason, RoomError, RoomStage, RoomTrigger};
