//! Shared traits and small value types used across the relay crates.

use std::{
    fmt,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::message::{Event, Request};

/// Opaque session identifier.
pub type SessionId = String;

/// Lifecycle of one adapter connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Process is being spawned and wired.
    Starting,
    /// Stdio is wired; requests may be sent.
    Connected,
    /// Stopped or the process exited.
    Closed,
    /// Transport-level I/O failure.
    Errored,
}

impl ConnectionState {
    /// Whether the connection can no longer carry requests.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }
}

/// How an adapter process ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal, if any (Unix only).
    pub signal: Option<i32>,
}

impl ExitInfo {
    #[must_use]
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn field(v: Option<i32>) -> String {
            v.map_or_else(|| "none".to_string(), |v| v.to_string())
        }
        write!(f, "code={}, signal={}", field(self.code), field(self.signal))
    }
}

/// Consumer of adapter-originated notifications.
pub trait EventSink: Send + Sync {
    /// Called once per decoded event, in arrival order.
    fn on_event(&self, event: Event);

    /// Called for adapter-initiated requests, which are not answered here.
    fn on_reverse_request(&self, request: Request);
}

/// Byte sink for encoded frames (usually adapter stdin).
#[async_trait]
pub trait FrameWriter: Send + Sync {
    /// Write one complete frame and flush it.
    async fn write_frame(&self, frame: &[u8]) -> std::io::Result<()>;
}

/// Current time as Unix epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
