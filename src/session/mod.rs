//! The candidate/interviewer conversation.
//!
//! [`SessionController`] owns the message history exclusively.  Other
//! components read it through [`SessionController::snapshot`] or
//! [`SessionController::subscribe`] and hand the final integrity log to
//! [`SessionController::end_interview`].

pub mod controller;
pub mod message;

pub use controller::{SessionController, SessionError, SessionSnapshot};
pub use message::{count_questions, Message, Role};
