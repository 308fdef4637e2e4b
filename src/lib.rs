//! Live interview room: access validation, a streamed conversation with a
//! remote interviewer, integrity monitoring and optional voice input.

pub mod config;
pub mod platform;
pub mod proctor;
pub mod room;
pub mod service;
pub mod session;
pub mod voice;
