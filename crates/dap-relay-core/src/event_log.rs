//! Bounded, drainable event log with live broadcast.

use std::{
    collections::VecDeque,
    sync::{Mutex, PoisonError},
};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    message::{Event, Request},
    traits::{EventSink, now_millis},
};

/// Default number of buffered entries per session.
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 500;

/// Live listener channel size.
const BROADCAST_CAPACITY: usize = 1024;

/// One buffered adapter notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// Event name (or command name for adapter-initiated requests).
    pub event: String,
    /// Event payload.
    #[serde(default)]
    pub body: Option<Value>,
    /// Unix epoch milliseconds at which the entry was recorded.
    pub timestamp: i64,
}

struct Inner {
    entries: VecDeque<EventLogEntry>,
    dropped: u64,
}

/// Ring buffer of adapter events.
///
/// Oldest entries are discarded once `capacity` is reached. `drain` removes
/// and returns everything buffered, so each entry is delivered at most once
/// per poll. Live subscribers see every entry regardless of draining.
pub struct EventLog {
    inner: Mutex<Inner>,
    capacity: usize,
    sender: broadcast::Sender<EventLogEntry>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_LOG_CAPACITY)
    }
}

impl EventLog {
    /// Create a log holding at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity.min(64)),
                dropped: 0,
            }),
            capacity,
            sender,
        }
    }

    /// Maximum number of buffered entries.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an entry, evicting the oldest if full.
    pub fn push(&self, entry: EventLogEntry) {
        let _ = self.sender.send(entry.clone());

        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        while inner.entries.len() >= self.capacity {
            if inner.entries.pop_front().is_none() {
                break;
            }
            inner.dropped = inner.dropped.saturating_add(1);
        }
        inner.entries.push_back(entry);
    }

    /// Record a named event with the current timestamp.
    pub fn push_event(&self, event: impl Into<String>, body: Option<Value>) {
        self.push(EventLogEntry {
            event: event.into(),
            body,
            timestamp: now_millis(),
        });
    }

    /// Remove and return every buffered entry, oldest first.
    #[must_use]
    pub fn drain(&self) -> Vec<EventLogEntry> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.entries.drain(..).collect()
    }

    /// Number of currently buffered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries evicted by the capacity bound since creation.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .dropped
    }

    /// Receiver for entries appended from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EventLogEntry> {
        self.sender.subscribe()
    }

    /// Stream of entries appended from now on. Lagged entries are skipped.
    #[must_use]
    pub fn live_stream(&self) -> futures::stream::BoxStream<'static, EventLogEntry> {
        BroadcastStream::new(self.subscribe())
            .filter_map(|res| async move { res.ok() })
            .boxed()
    }
}

impl EventSink for EventLog {
    fn on_event(&self, event: Event) {
        self.push_event(event.event, event.body);
    }

    fn on_reverse_request(&self, request: Request) {
        tracing::debug!(command = %request.command, "Recording adapter-initiated request as event");
        self.push_event(request.command, request.arguments);
    }
}
