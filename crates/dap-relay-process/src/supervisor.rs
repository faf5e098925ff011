//! Adapter process lifecycle.

use std::{
    io,
    process::Stdio,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use dap_relay_core::{ExitInfo, FrameWriter, LaunchContext};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{ChildStderr, ChildStdin, ChildStdout, Command},
    sync::{mpsc, oneshot, watch},
};

use crate::{ProcessError, command::ResolvedCommand};

type WriteJob = (Vec<u8>, oneshot::Sender<io::Result<()>>);

/// Write half of the adapter's stdin.
///
/// Frames are queued to a writer task that owns the pipe. A frame is always
/// written whole even if the caller stops waiting for the acknowledgement.
pub struct AdapterStdin {
    tx: Mutex<Option<mpsc::UnboundedSender<WriteJob>>>,
}

impl AdapterStdin {
    fn spawn(stdin: ChildStdin, label: String) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_frames(stdin, rx, label));
        Self {
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Stop accepting frames. Already queued frames are still written, then
    /// the pipe is closed.
    pub fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<WriteJob>> {
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

fn stdin_closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "adapter stdin closed")
}

#[async_trait]
impl FrameWriter for AdapterStdin {
    async fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
        let tx = self.sender().ok_or_else(stdin_closed)?;
        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send((frame.to_vec(), ack_tx))
            .map_err(|_| stdin_closed())?;
        ack_rx.await.unwrap_or_else(|_| Err(stdin_closed()))
    }
}

async fn write_frames(
    mut stdin: ChildStdin,
    mut rx: mpsc::UnboundedReceiver<WriteJob>,
    label: String,
) {
    while let Some((frame, ack)) = rx.recv().await {
        let result = match stdin.write_all(&frame).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        let failed = result.is_err();
        if let Err(e) = &result {
            tracing::debug!(label = %label, "Adapter stdin write failed: {e}");
        }
        let _ = ack.send(result);
        if failed {
            break;
        }
    }
}

/// Waits for the adapter to exit.
#[derive(Clone)]
pub struct ExitWatcher {
    rx: watch::Receiver<Option<ExitInfo>>,
}

impl ExitWatcher {
    /// Exit status, if the process has already exited.
    #[must_use]
    pub fn get(&self) -> Option<ExitInfo> {
        *self.rx.borrow()
    }

    /// Wait until the process exits.
    ///
    /// Resolves to `ExitInfo::default()` if the waiter task is gone without
    /// having reported a status.
    pub async fn wait(&mut self) -> ExitInfo {
        match self.rx.wait_for(Option::is_some).await {
            Ok(info) => info.unwrap_or_default(),
            Err(_) => ExitInfo::default(),
        }
    }
}

/// A running adapter process with piped stdio.
///
/// Dropping the handle kills the process group.
pub struct AdapterProcess {
    pid: Option<u32>,
    stdin: Arc<AdapterStdin>,
    stdout: Option<ChildStdout>,
    exit: ExitWatcher,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl AdapterProcess {
    /// Launch `command` in `ctx.working_dir` with `ctx.env` layered over the
    /// inherited environment. `label` tags log lines (usually the session id).
    ///
    /// # Errors
    /// Returns error if the process cannot be spawned or a pipe is missing.
    pub fn spawn(
        command: &ResolvedCommand,
        ctx: &LaunchContext,
        label: &str,
    ) -> Result<Self, ProcessError> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(&ctx.working_dir)
            .envs(&ctx.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.group_spawn().map_err(|source| ProcessError::Spawn {
            program: command.program.display().to_string(),
            source,
        })?;

        let pid = child.id();
        let stdin = child.inner().stdin.take().ok_or(ProcessError::MissingPipe("stdin"))?;
        let stdout = child.inner().stdout.take().ok_or(ProcessError::MissingPipe("stdout"))?;
        if let Some(stderr) = child.inner().stderr.take() {
            spawn_stderr_forwarder(stderr, label.to_string());
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        spawn_waiter(child, kill_rx, exit_tx, label.to_string());

        tracing::debug!(label, ?pid, program = %command.program.display(), "Adapter process spawned");

        Ok(Self {
            pid,
            stdin: Arc::new(AdapterStdin::spawn(stdin, label.to_string())),
            stdout: Some(stdout),
            exit: ExitWatcher { rx: exit_rx },
            kill_tx: Some(kill_tx),
        })
    }

    /// OS process id, if still known.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Shared handle to stdin.
    #[must_use]
    pub fn stdin(&self) -> Arc<AdapterStdin> {
        Arc::clone(&self.stdin)
    }

    /// Take stdout for the reader. Returns `None` after the first call.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Exit notification.
    #[must_use]
    pub fn exit_watcher(&self) -> ExitWatcher {
        self.exit.clone()
    }

    /// Write raw bytes to stdin.
    ///
    /// # Errors
    /// Returns error if stdin is closed or the write fails.
    pub async fn write(&self, bytes: &[u8]) -> io::Result<()> {
        self.stdin.write_frame(bytes).await
    }

    /// Best-effort graceful stop.
    ///
    /// Writes `farewell` (if any) within `write_timeout`, ignoring failure,
    /// then kills the process group and waits up to `exit_timeout` for it to
    /// be reaped. Never waits on the pipe beyond `write_timeout`, even when
    /// the adapter has stopped reading stdin.
    pub async fn stop(
        &mut self,
        farewell: Option<&[u8]>,
        write_timeout: Duration,
        exit_timeout: Duration,
    ) -> Option<ExitInfo> {
        if let Some(frame) = farewell {
            match tokio::time::timeout(write_timeout, self.stdin.write_frame(frame)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(pid = ?self.pid, "Farewell write failed: {e}"),
                Err(_) => tracing::debug!(pid = ?self.pid, "Farewell write timed out"),
            }
        }

        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        self.stdin.close();

        let mut exit = self.exit.clone();
        tokio::time::timeout(exit_timeout, exit.wait()).await.ok()
    }
}

impl Drop for AdapterProcess {
    fn drop(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
    }
}

fn spawn_waiter(
    mut child: AsyncGroupChild,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<ExitInfo>>,
    label: String,
) {
    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill_rx => {
                if let Err(e) = child.start_kill() {
                    tracing::debug!(label = %label, "Kill failed (process may have exited): {e}");
                }
                child.wait().await
            }
        };

        let info = match status {
            Ok(status) => ExitInfo::from_status(status),
            Err(e) => {
                tracing::warn!(label = %label, "Failed to reap adapter process: {e}");
                ExitInfo::default()
            }
        };
        tracing::debug!(label = %label, %info, "Adapter process exited");
        let _ = exit_tx.send(Some(info));
    });
}

fn spawn_stderr_forwarder(stderr: ChildStderr, label: String) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => tracing::debug!(session = %label, "adapter stderr: {line}"),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(session = %label, "adapter stderr read failed: {e}");
                    break;
                }
            }
        }
    });
}
