//! Core abstractions for debug adapter sessions.
//!
//! This crate provides the fundamental building blocks:
//! - `Message` - Request / response / event protocol messages
//! - `EventLog` - Bounded, drainable event buffer with live broadcast
//! - `LaunchContext` - Working directory and environment of a session
//! - `EventSink` and `FrameWriter` traits used at the transport seams

pub mod context;
pub mod event_log;
pub mod message;
pub mod traits;

pub use context::LaunchContext;
pub use event_log::{DEFAULT_EVENT_LOG_CAPACITY, EventLog, EventLogEntry};
pub use message::{Event, Message, Request, Response, Seq};
pub use traits::{ConnectionState, EventSink, ExitInfo, FrameWriter, SessionId, now_millis};
