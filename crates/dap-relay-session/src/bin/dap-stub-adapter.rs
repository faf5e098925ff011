//! Scripted stdio debug adapter used by the integration tests.
//!
//! Commands:
//! - `initialize` - emit `initialized`, then respond `{"ok": true}`
//! - `echo` - respond with the request arguments
//! - `fail` / `failSilently` - respond unsuccessfully, with / without a message
//! - `emit` - emit `arguments.count` `output` events, then respond
//! - `hold` - never respond
//! - `reverse` - send a `runInTerminal` reverse request, then respond
//! - `garbage` - write non-frame bytes, then respond
//! - `crash` - exit with status 3
//! - `disconnect` - respond, then exit
//!
//! Anything else succeeds with `{"command": <name>}`.

use std::io;

use dap_relay_core::{Event, Message, Request, Response};
use dap_relay_rpc::{FrameDecoder, encode};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt, Stdout};

struct Adapter {
    out: Stdout,
    seq: i64,
}

impl Adapter {
    async fn send(&mut self, message: Message) -> io::Result<()> {
        let frame = encode(&message).map_err(io::Error::other)?;
        self.out.write_all(&frame).await?;
        self.out.flush().await
    }

    const fn next_seq(&mut self) -> i64 {
        self.seq += 1;
        self.seq
    }

    async fn event(&mut self, event: &str, body: Option<Value>) -> io::Result<()> {
        let seq = self.next_seq();
        self.send(Message::Event(Event {
            seq,
            event: event.to_string(),
            body,
        }))
        .await
    }

    async fn respond(
        &mut self,
        request: &Request,
        success: bool,
        message: Option<&str>,
        body: Option<Value>,
    ) -> io::Result<()> {
        let seq = self.next_seq();
        self.send(Message::Response(Response {
            seq,
            request_seq: request.seq,
            success,
            command: request.command.clone(),
            message: message.map(str::to_string),
            body,
        }))
        .await
    }

    async fn handle(&mut self, request: Request) -> io::Result<()> {
        match request.command.as_str() {
            "initialize" => {
                self.event("initialized", None).await?;
                self.respond(&request, true, None, Some(json!({"ok": true})))
                    .await
            }
            "echo" => {
                let body = request.arguments.clone();
                self.respond(&request, true, None, body).await
            }
            "fail" => {
                self.respond(&request, false, Some("stub refused"), None)
                    .await
            }
            "failSilently" => self.respond(&request, false, None, None).await,
            "emit" => {
                let count = request
                    .arguments
                    .as_ref()
                    .and_then(|a| a.get("count"))
                    .and_then(Value::as_u64)
                    .unwrap_or(1);
                for n in 0..count {
                    self.event("output", Some(json!({"n": n}))).await?;
                }
                self.respond(&request, true, Some("emitted"), Some(json!({"count": count})))
                    .await
            }
            "hold" => Ok(()),
            "reverse" => {
                let seq = self.next_seq();
                self.send(Message::Request(Request::new(
                    seq,
                    "runInTerminal",
                    Some(json!({"args": ["echo", "hi"]})),
                )))
                .await?;
                self.respond(&request, true, None, None).await
            }
            "garbage" => {
                self.out.write_all(b"not a frame\r\n\r\n").await?;
                self.out
                    .write_all(b"Content-Length: 5\r\n\r\n{oops")
                    .await?;
                self.respond(&request, true, None, Some(json!({"recovered": true})))
                    .await
            }
            "crash" => std::process::exit(3),
            "disconnect" => {
                self.respond(&request, true, None, None).await?;
                std::process::exit(0)
            }
            other => {
                let body = json!({"command": other});
                self.respond(&request, true, None, Some(body)).await
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> io::Result<()> {
    let mut stdin = tokio::io::stdin();
    let mut adapter = Adapter {
        out: tokio::io::stdout(),
        seq: 0,
    };
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; 4096];

    loop {
        let n = stdin.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        for message in decoder.feed(&buf[..n]) {
            if let Message::Request(request) = message {
                adapter.handle(request).await?;
            }
        }
    }
}
