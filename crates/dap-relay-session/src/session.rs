//! One supervised adapter and its conversation state.

use std::{
    path::PathBuf,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicI64, Ordering},
    },
};

use dap_relay_core::{
    ConnectionState, EventLog, EventLogEntry, ExitInfo, Seq, SessionId, now_millis,
};
use dap_relay_process::AdapterProcess;
use dap_relay_rpc::{RpcClient, RpcError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Snapshot of a session's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Registry key, `dap_<millis>_<random>`.
    pub id: SessionId,
    /// Caller the session was started for.
    pub owner_id: String,
    /// Adapter type the session was started with.
    pub adapter_type: String,
    /// Adapter working directory.
    pub working_directory: PathBuf,
    /// Resolved adapter executable.
    pub program: PathBuf,
    /// OS process id of the adapter.
    pub pid: Option<u32>,
    /// Connection lifecycle state.
    pub state: ConnectionState,
    /// Set once the adapter has exited.
    pub exit: Option<ExitInfo>,
    /// Creation time (Unix epoch milliseconds).
    pub created_at: i64,
    /// Last `request` / `drain_events` call (Unix epoch milliseconds).
    pub last_used_at: i64,
    /// Requests still awaiting a response.
    pub pending_requests: usize,
    /// Events waiting to be drained.
    pub buffered_events: usize,
    /// Events discarded because the buffer was full.
    pub dropped_events: u64,
}

struct Lifecycle {
    state: ConnectionState,
    exit: Option<ExitInfo>,
}

/// Live session record.
pub struct Session {
    pub(crate) id: SessionId,
    owner_id: String,
    adapter_type: String,
    working_directory: PathBuf,
    program: PathBuf,
    pid: Option<u32>,
    created_at: i64,
    last_used_at: AtomicI64,
    lifecycle: Mutex<Lifecycle>,
    pub(crate) rpc: Arc<RpcClient>,
    pub(crate) events: Arc<EventLog>,
    pub(crate) process: tokio::sync::Mutex<AdapterProcess>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: SessionId,
        owner_id: String,
        adapter_type: String,
        working_directory: PathBuf,
        program: PathBuf,
        process: AdapterProcess,
        rpc: Arc<RpcClient>,
        events: Arc<EventLog>,
    ) -> Self {
        let now = now_millis();
        Self {
            id,
            owner_id,
            adapter_type,
            working_directory,
            program,
            pid: process.pid(),
            created_at: now,
            last_used_at: AtomicI64::new(now),
            lifecycle: Mutex::new(Lifecycle {
                state: ConnectionState::Starting,
                exit: None,
            }),
            rpc,
            events,
            process: tokio::sync::Mutex::new(process),
        }
    }

    /// Session id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Owner the session was started for.
    #[must_use]
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    fn touch(&self) {
        self.last_used_at.store(now_millis(), Ordering::Relaxed);
    }

    pub(crate) fn mark_connected(&self) {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        if lifecycle.state == ConnectionState::Starting {
            lifecycle.state = ConnectionState::Connected;
        }
    }

    /// Record the terminal state. The first terminal state wins.
    pub(crate) fn mark_finished(&self, state: ConnectionState, exit: Option<ExitInfo>) {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        if !lifecycle.state.is_terminal() {
            lifecycle.state = state;
        }
        if lifecycle.exit.is_none() {
            lifecycle.exit = exit;
        }
    }

    /// Send a request and wait for its response body.
    ///
    /// # Errors
    /// Returns the transport or response error.
    pub async fn request(
        &self,
        seq: Seq,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<Value, RpcError> {
        self.touch();
        self.rpc.send_request(seq, command, arguments).await
    }

    /// Remove and return all buffered events.
    #[must_use]
    pub fn drain_events(&self) -> Vec<EventLogEntry> {
        self.touch();
        self.events.drain()
    }

    /// Live feed of events appended from now on.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventLogEntry> {
        self.events.subscribe()
    }

    /// Reserve the next unused sequence number.
    #[must_use]
    pub fn next_seq(&self) -> Seq {
        self.rpc.next_seq()
    }

    /// Metadata snapshot.
    #[must_use]
    pub fn info(&self) -> SessionInfo {
        let (state, exit) = {
            let lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
            (lifecycle.state, lifecycle.exit)
        };
        SessionInfo {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            adapter_type: self.adapter_type.clone(),
            working_directory: self.working_directory.clone(),
            program: self.program.clone(),
            pid: self.pid,
            state,
            exit,
            created_at: self.created_at,
            last_used_at: self.last_used_at.load(Ordering::Relaxed),
            pending_requests: self.rpc.pending_count(),
            buffered_events: self.events.len(),
            dropped_events: self.events.dropped(),
        }
    }
}

/// New session id: `dap_<unix-millis>_<random>`.
#[must_use]
pub fn generate_session_id() -> SessionId {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("dap_{}_{}", now_millis(), &suffix[..9])
}
