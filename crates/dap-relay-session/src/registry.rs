//! Session registry for supervising debug adapter sessions.

use std::{collections::HashMap, ffi::OsStr, path::PathBuf, sync::Arc, time::Duration};

use dap_relay_core::{
    ConnectionState, EventLog, EventLogEntry, LaunchContext, Message, Request, Seq, SessionId,
};
use dap_relay_process::{
    AdapterCommand, AdapterProcess, CommandBuildError, ExitWatcher, ProcessError,
};
use dap_relay_rpc::{RpcClient, RpcError, codec};
use serde_json::{Value, json};
use tokio::{
    io::AsyncReadExt,
    process::ChildStdout,
    sync::{RwLock, broadcast},
};

use crate::{
    adapters::AdapterCatalog,
    config::RegistryConfig,
    session::{Session, SessionInfo, generate_session_id},
};

const READ_CHUNK: usize = 8 * 1024;

type SessionMap = Arc<RwLock<HashMap<SessionId, Arc<Session>>>>;

/// Registry error.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unsupported adapter type: {0}")]
    UnsupportedAdapterType(String),
    #[error("Adapter `{adapter_type}` executable not found: {command}")]
    AdapterNotFound {
        adapter_type: String,
        command: String,
    },
    #[error("Invalid adapter command: {0}")]
    InvalidAdapterCommand(#[from] CommandBuildError),
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),
    #[error("Process error: {0}")]
    Process(#[from] ProcessError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl RegistryError {
    /// Stable machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedAdapterType(_) => "UNSUPPORTED_ADAPTER_TYPE",
            Self::AdapterNotFound { .. } => "ADAPTER_NOT_FOUND",
            Self::InvalidAdapterCommand(_) => "INVALID_ADAPTER_COMMAND",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::Process(_) => "SPAWN_FAILED",
            Self::Rpc(RpcError::TransportWriteFailed { .. }) => "TRANSPORT_WRITE_FAILED",
            Self::Rpc(RpcError::ResponseFailure { .. }) => "RESPONSE_FAILURE",
            Self::Rpc(RpcError::TransportClosed { .. }) => "TRANSPORT_CLOSED",
            Self::Rpc(RpcError::SeqInUse { .. }) => "SEQ_IN_USE",
            Self::Rpc(RpcError::Encode(_)) => "ENCODE_FAILED",
        }
    }
}

/// Parameters for [`SessionRegistry::start_session`].
#[derive(Debug, Clone)]
pub struct StartOptions {
    /// Caller the session belongs to; used to filter `list`.
    pub owner_id: String,
    /// Catalog key, or a free-form label when `explicit_adapter` is set.
    pub adapter_type: String,
    /// Adapter cwd; relative adapter paths are probed here first.
    pub working_directory: PathBuf,
    /// Environment overrides. A `PATH` entry also drives executable lookup.
    pub env: HashMap<String, String>,
    /// Shell-style command line overriding the catalog entry.
    pub explicit_adapter: Option<String>,
}

impl StartOptions {
    #[must_use]
    pub fn new(
        owner_id: impl Into<String>,
        adapter_type: impl Into<String>,
        working_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            adapter_type: adapter_type.into(),
            working_directory: working_directory.into(),
            env: HashMap::new(),
            explicit_adapter: None,
        }
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn explicit_adapter(mut self, command_line: impl Into<String>) -> Self {
        self.explicit_adapter = Some(command_line.into());
        self
    }
}

/// Table of live sessions.
///
/// Construct one per application and share it (it is cheap to wrap in an
/// `Arc`). Map access is synchronized; per-session state is owned by the
/// session's stdout pump.
pub struct SessionRegistry {
    sessions: SessionMap,
    catalog: AdapterCatalog,
    config: RegistryConfig,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl SessionRegistry {
    /// Create a registry using the built-in catalog plus `config.adapters`.
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        let catalog = AdapterCatalog::builtin().with_overrides(&config.adapters);
        Self::with_catalog(config, catalog)
    }

    /// Create a registry with an explicit catalog (`config.adapters` is ignored).
    #[must_use]
    pub fn with_catalog(config: RegistryConfig, catalog: AdapterCatalog) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            catalog,
            config,
        }
    }

    /// Adapter catalog in use.
    #[must_use]
    pub const fn catalog(&self) -> &AdapterCatalog {
        &self.catalog
    }

    /// Resolve the adapter, spawn it, wire its stdio, and register the session.
    ///
    /// # Errors
    /// Fails before spawning with `UnsupportedAdapterType`, `AdapterNotFound`
    /// or `InvalidAdapterCommand`; fails with `Process` if the spawn fails.
    pub async fn start_session(&self, opts: StartOptions) -> Result<SessionInfo, RegistryError> {
        let StartOptions {
            owner_id,
            adapter_type,
            working_directory,
            env,
            explicit_adapter,
        } = opts;

        let command = match explicit_adapter {
            Some(line) => AdapterCommand::parse(&line)?,
            None => self
                .catalog
                .lookup(&adapter_type)
                .cloned()
                .ok_or_else(|| RegistryError::UnsupportedAdapterType(adapter_type.clone()))?,
        };

        let search_path = env.get("PATH").map(OsStr::new);
        let resolved = command
            .into_resolved(&working_directory, search_path)
            .await
            .map_err(|e| match e {
                ProcessError::ExecutableNotFound(command) => RegistryError::AdapterNotFound {
                    adapter_type: adapter_type.clone(),
                    command,
                },
                other => RegistryError::Process(other),
            })?;

        let id = generate_session_id();
        let ctx = LaunchContext::with_env(working_directory.clone(), env);
        let mut process = AdapterProcess::spawn(&resolved, &ctx, &id)?;
        let stdout = process
            .take_stdout()
            .ok_or(ProcessError::MissingPipe("stdout"))?;
        let exit = process.exit_watcher();

        let events = Arc::new(EventLog::new(self.config.event_log_capacity));
        let rpc = Arc::new(RpcClient::new(process.stdin(), events.clone()));
        let session = Arc::new(Session::new(
            id.clone(),
            owner_id,
            adapter_type,
            working_directory,
            resolved.program,
            process,
            rpc,
            events,
        ));

        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::clone(&session));
        session.mark_connected();

        tokio::spawn(pump_stdout(
            Arc::clone(&self.sessions),
            Arc::clone(&session),
            stdout,
            exit,
            self.config.exit_grace(),
        ));

        let info = session.info();
        tracing::info!(
            session = %info.id,
            owner = %info.owner_id,
            adapter_type = %info.adapter_type,
            program = %info.program.display(),
            "Debug session started"
        );
        Ok(info)
    }

    async fn session(&self, id: &str) -> Result<Arc<Session>, RegistryError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::SessionNotFound(id.to_string()))
    }

    /// Metadata for one session.
    pub async fn get(&self, id: &str) -> Option<SessionInfo> {
        self.sessions.read().await.get(id).map(|s| s.info())
    }

    /// Sessions, optionally restricted to one owner, newest first.
    pub async fn list(&self, owner_id: Option<&str>) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| owner_id.is_none_or(|owner| s.owner_id() == owner))
            .map(|s| s.info())
            .collect();

        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        sessions
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether no session is registered.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Send a request on a session and wait for the response body.
    ///
    /// # Errors
    /// Returns `SessionNotFound` for unknown ids, otherwise the RPC error.
    pub async fn request(
        &self,
        id: &str,
        seq: Seq,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<Value, RegistryError> {
        let session = self.session(id).await?;
        Ok(session.request(seq, command, arguments).await?)
    }

    /// Remove and return every buffered event of a session.
    ///
    /// # Errors
    /// Returns `SessionNotFound` for unknown ids.
    pub async fn drain_events(&self, id: &str) -> Result<Vec<EventLogEntry>, RegistryError> {
        Ok(self.session(id).await?.drain_events())
    }

    /// Live feed of a session's events.
    ///
    /// # Errors
    /// Returns `SessionNotFound` for unknown ids.
    pub async fn subscribe_events(
        &self,
        id: &str,
    ) -> Result<broadcast::Receiver<EventLogEntry>, RegistryError> {
        Ok(self.session(id).await?.subscribe_events())
    }

    /// Reserve the next unused sequence number of a session.
    ///
    /// # Errors
    /// Returns `SessionNotFound` for unknown ids.
    pub async fn next_seq(&self, id: &str) -> Result<Seq, RegistryError> {
        Ok(self.session(id).await?.next_seq())
    }

    /// Stop a session: best-effort `disconnect`, then kill the adapter.
    ///
    /// Returns `false` if the id is unknown.
    pub async fn stop(&self, id: &str) -> bool {
        let Some(session) = self.sessions.write().await.remove(id) else {
            return false;
        };
        self.shutdown(&session).await;
        true
    }

    /// Stop every session. Returns how many were stopped.
    pub async fn stop_all(&self) -> usize {
        let sessions: Vec<Arc<Session>> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        let count = sessions.len();
        futures::future::join_all(sessions.iter().map(|s| self.shutdown(s))).await;
        count
    }

    async fn shutdown(&self, session: &Session) {
        let seq = session.next_seq();
        let disconnect = Message::Request(Request::new(
            seq,
            "disconnect",
            Some(json!({ "terminateDebuggee": self.config.terminate_debuggee })),
        ));
        let farewell = codec::encode(&disconnect).ok();

        let exit = session
            .process
            .lock()
            .await
            .stop(
                farewell.as_deref(),
                self.config.disconnect_timeout(),
                self.config.exit_grace(),
            )
            .await;

        session.mark_finished(ConnectionState::Closed, exit);
        let failed = session.rpc.on_transport_closed(exit.unwrap_or_default());
        tracing::info!(session = %session.id, failed, "Debug session stopped");
    }
}

/// Feed adapter stdout to the session's RPC client until EOF, then retire
/// the session.
async fn pump_stdout(
    sessions: SessionMap,
    session: Arc<Session>,
    mut stdout: ChildStdout,
    mut exit: ExitWatcher,
    exit_grace: Duration,
) {
    let mut buf = vec![0u8; READ_CHUNK];
    let errored = loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break false,
            Ok(n) => session.rpc.on_bytes_received(&buf[..n]),
            Err(e) => {
                tracing::error!(session = %session.id, "Adapter stdout read failed: {e}");
                break true;
            }
        }
    };

    let info = tokio::time::timeout(exit_grace, exit.wait()).await.ok();

    // Unregister before failing waiters so follow-up calls see SessionNotFound.
    {
        let mut map = sessions.write().await;
        if map.get(&session.id).is_some_and(|s| Arc::ptr_eq(s, &session)) {
            map.remove(&session.id);
        }
    }

    let state = if errored {
        ConnectionState::Errored
    } else {
        ConnectionState::Closed
    };
    session.mark_finished(state, info);
    let failed = session.rpc.on_transport_closed(info.unwrap_or_default());
    tracing::info!(
        session = %session.id,
        ?state,
        exit = %info.unwrap_or_default(),
        failed,
        "Adapter transport closed"
    );
}
