//! Request/response correlation over one adapter transport.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use dap_relay_core::{EventSink, ExitInfo, FrameWriter, Message, Request, Response, Seq};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::codec::{self, FrameDecoder};

/// RPC error. Every variant except `Encode` names the originating command.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("failed to write request `{command}` to adapter: {source}")]
    TransportWriteFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{}", describe_failure(.command, .message.as_deref()))]
    ResponseFailure {
        command: String,
        message: Option<String>,
    },
    #[error("transport closed ({reason}) while awaiting `{command}`")]
    TransportClosed { command: String, reason: String },
    #[error("seq {seq} already has a pending request (`{command}`)")]
    SeqInUse { seq: Seq, command: String },
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

fn describe_failure(command: &str, message: Option<&str>) -> String {
    match message {
        Some(message) if !message.is_empty() => format!("request `{command}` failed: {message}"),
        _ => format!("request failed: {command}"),
    }
}

type Outcome = Result<Value, RpcError>;

/// Outstanding request awaiting its response.
struct PendingRequest {
    command: String,
    token: u64,
    tx: oneshot::Sender<Outcome>,
}

#[derive(Default)]
struct PendingTable {
    by_seq: HashMap<Seq, PendingRequest>,
    highest_seq: Seq,
    next_token: u64,
    closed: Option<String>,
}

/// Clears a request's pending entry when its future goes away, whether it
/// completed, failed to write, or was dropped by the caller.
struct PendingGuard<'a> {
    table: &'a Mutex<PendingTable>,
    seq: Seq,
    token: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // The seq may already belong to a newer request.
        if table
            .by_seq
            .get(&self.seq)
            .is_some_and(|p| p.token == self.token)
        {
            table.by_seq.remove(&self.seq);
        }
    }
}

/// Client side of one adapter conversation.
///
/// Outgoing requests are framed and written through a [`FrameWriter`];
/// incoming bytes are fed to [`RpcClient::on_bytes_received`] by whoever
/// owns the read half. Responses resolve the matching pending request,
/// events go to the [`EventSink`].
pub struct RpcClient {
    writer: Arc<dyn FrameWriter>,
    events: Arc<dyn EventSink>,
    decoder: Mutex<FrameDecoder>,
    pending: Mutex<PendingTable>,
}

impl RpcClient {
    /// Create a client writing to `writer` and reporting events to `events`.
    #[must_use]
    pub fn new(writer: Arc<dyn FrameWriter>, events: Arc<dyn EventSink>) -> Self {
        Self {
            writer,
            events,
            decoder: Mutex::new(FrameDecoder::new()),
            pending: Mutex::new(PendingTable::default()),
        }
    }

    fn table(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send a request and wait for its response body.
    ///
    /// A missing `body` in a successful response resolves to `Value::Null`.
    /// Dropping the returned future releases `seq` for reuse; a response
    /// that arrives for it afterwards is discarded as unmatched.
    ///
    /// # Errors
    /// Returns `SeqInUse` if `seq` is already pending, `TransportWriteFailed`
    /// if the frame cannot be written, `ResponseFailure` if the adapter
    /// answers with `success: false`, and `TransportClosed` if the transport
    /// is (or becomes) closed before a response arrives.
    pub async fn send_request(
        &self,
        seq: Seq,
        command: &str,
        arguments: Option<Value>,
    ) -> Result<Value, RpcError> {
        let frame = codec::encode(&Message::Request(Request::new(seq, command, arguments)))?;

        let (rx, token) = {
            let mut table = self.table();
            if let Some(reason) = &table.closed {
                return Err(RpcError::TransportClosed {
                    command: command.to_string(),
                    reason: reason.clone(),
                });
            }
            if table.by_seq.contains_key(&seq) {
                return Err(RpcError::SeqInUse {
                    seq,
                    command: command.to_string(),
                });
            }
            let (tx, rx) = oneshot::channel();
            table.next_token = table.next_token.wrapping_add(1);
            let token = table.next_token;
            table.by_seq.insert(
                seq,
                PendingRequest {
                    command: command.to_string(),
                    token,
                    tx,
                },
            );
            table.highest_seq = table.highest_seq.max(seq);
            (rx, token)
        };
        let _guard = PendingGuard {
            table: &self.pending,
            seq,
            token,
        };

        tracing::trace!(seq, command, "Sending request");
        if let Err(source) = self.writer.write_frame(&frame).await {
            tracing::warn!(seq, command, "Request write failed: {source}");
            return Err(RpcError::TransportWriteFailed {
                command: command.to_string(),
                source,
            });
        }

        rx.await.unwrap_or_else(|_| {
            Err(RpcError::TransportClosed {
                command: command.to_string(),
                reason: "request abandoned".to_string(),
            })
        })
    }

    /// Feed raw transport bytes; dispatches every completed message.
    pub fn on_bytes_received(&self, chunk: &[u8]) {
        let messages = self
            .decoder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .feed(chunk);

        for message in messages {
            self.dispatch(message);
        }
    }

    fn dispatch(&self, message: Message) {
        match message {
            Message::Event(event) => self.events.on_event(event),
            Message::Request(request) => self.events.on_reverse_request(request),
            Message::Response(response) => self.resolve(response),
        }
    }

    fn resolve(&self, response: Response) {
        let Some(pending) = self.table().by_seq.remove(&response.request_seq) else {
            tracing::debug!(
                request_seq = response.request_seq,
                command = %response.command,
                "Dropping response with no pending request"
            );
            return;
        };

        let outcome = if response.success {
            Ok(response.body.unwrap_or(Value::Null))
        } else {
            Err(RpcError::ResponseFailure {
                command: pending.command,
                message: response.message,
            })
        };
        // The caller may have stopped waiting.
        let _ = pending.tx.send(outcome);
    }

    /// Fail every pending request and refuse new ones.
    ///
    /// Returns the number of requests that were failed.
    pub fn on_transport_closed(&self, exit: ExitInfo) -> usize {
        self.close(exit.to_string())
    }

    fn close(&self, reason: String) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut table = self.table();
            if table.closed.is_none() {
                table.closed = Some(reason.clone());
            }
            table.by_seq.drain().map(|(_, p)| p).collect()
        };

        let count = drained.len();
        if count > 0 {
            tracing::debug!(count, %reason, "Failing pending requests on transport close");
        }
        for pending in drained {
            let _ = pending.tx.send(Err(RpcError::TransportClosed {
                command: pending.command,
                reason: reason.clone(),
            }));
        }
        count
    }

    /// Reserve and return the next unused sequence number.
    pub fn next_seq(&self) -> Seq {
        let mut table = self.table();
        table.highest_seq = table.highest_seq.saturating_add(1);
        table.highest_seq
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.table().by_seq.len()
    }

    /// Whether the transport has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.table().closed.is_some()
    }
}
