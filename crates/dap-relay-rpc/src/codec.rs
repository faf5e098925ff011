//! `Content-Length` framing.
//!
//! Wire format:
//! ```text
//! Content-Length: <N>\r\n
//! \r\n
//! <N bytes of UTF-8 JSON>
//! ```
//!
//! Decoding is lenient: a header block without a parseable `Content-Length`
//! is skipped, and a body that is not a valid message is dropped. Either way
//! scanning resumes at the next frame, so diagnostic text written to the
//! same stream cannot wedge the decoder.

use bytes::{Buf, BytesMut};
use dap_relay_core::Message;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &str = "content-length";

/// Encode a message as one frame.
///
/// # Errors
/// Returns error if the message cannot be serialized.
pub fn encode(message: &Message) -> Result<Vec<u8>, serde_json::Error> {
    let body = serde_json::to_vec(message)?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());

    let mut frame = Vec::with_capacity(header.len() + body.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode every complete frame at the front of `buffer`.
///
/// Consumed bytes are removed; an incomplete trailing header or body stays
/// in `buffer` for the next call.
pub fn decode_frames(buffer: &mut BytesMut) -> Vec<Message> {
    let mut messages = Vec::new();

    loop {
        let Some(header_end) = find_terminator(buffer) else {
            break;
        };

        let Some(length) = parse_content_length(&buffer[..header_end]) else {
            tracing::warn!(
                header = %String::from_utf8_lossy(&buffer[..header_end]),
                "Skipping frame header without a valid Content-Length"
            );
            buffer.advance(header_end + HEADER_TERMINATOR.len());
            continue;
        };

        let body_start = header_end + HEADER_TERMINATOR.len();
        let Some(frame_end) = body_start.checked_add(length) else {
            buffer.advance(body_start);
            continue;
        };
        if buffer.len() < frame_end {
            break;
        }

        let frame = buffer.split_to(frame_end);
        match serde_json::from_slice::<Message>(&frame[body_start..]) {
            Ok(message) => messages.push(message),
            Err(e) => {
                tracing::warn!(length, "Dropping undecodable frame body: {e}");
            }
        }
    }

    messages
}

fn find_terminator(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}

/// Scan `Name: value` lines for a case-insensitive `Content-Length`.
fn parse_content_length(header: &[u8]) -> Option<usize> {
    let header = std::str::from_utf8(header).ok()?;
    header.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

/// Stateful decoder that accumulates chunks across reads.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every message it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Message> {
        self.buffer.extend_from_slice(chunk);
        decode_frames(&mut self.buffer)
    }

    /// Bytes waiting for the rest of their frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use dap_relay_core::{Event, Request, Response};
    use serde_json::{Value, json};

    use super::*;

    fn initialize() -> Message {
        Message::Request(Request::new(1, "initialize", Some(json!({"adapterID": "stub"}))))
    }

    fn stopped() -> Message {
        Message::Event(Event {
            seq: 2,
            event: "stopped".into(),
            body: Some(json!({"reason": "entry", "text": "héllo"})),
        })
    }

    #[test]
    fn test_encode_header_counts_bytes() {
        let frame = encode(&stopped()).unwrap();
        let text = String::from_utf8(frame).unwrap();
        let (header, body) = text.split_once("\r\n\r\n").unwrap();
        assert_eq!(header, format!("Content-Length: {}", body.len()));
        assert!(body.len() > body.chars().count());
    }

    #[test]
    fn test_roundtrip() {
        let mut decoder = FrameDecoder::new();
        let decoded = decoder.feed(&encode(&initialize()).unwrap());
        assert_eq!(decoded, vec![initialize()]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_null_payloads_survive_roundtrip() {
        let messages = vec![
            Message::Request(Request::new(1, "threads", Some(Value::Null))),
            Message::Response(Response {
                seq: 2,
                request_seq: 1,
                success: true,
                command: "threads".into(),
                message: None,
                body: Some(Value::Null),
            }),
            Message::Event(Event {
                seq: 3,
                event: "initialized".into(),
                body: Some(Value::Null),
            }),
            Message::Event(Event {
                seq: 4,
                event: "terminated".into(),
                body: None,
            }),
        ];

        let mut buffer = BytesMut::new();
        for message in &messages {
            buffer.extend_from_slice(&encode(message).unwrap());
        }
        assert_eq!(decode_frames(&mut buffer), messages);
    }

    #[test]
    fn test_split_at_every_boundary() {
        let frame = encode(&stopped()).unwrap();
        for split in 0..=frame.len() {
            let mut decoder = FrameDecoder::new();
            let mut decoded = decoder.feed(&frame[..split]);
            decoded.extend(decoder.feed(&frame[split..]));
            assert_eq!(decoded, vec![stopped()], "split at {split}");
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let frame = encode(&initialize()).unwrap();
        let mut decoder = FrameDecoder::new();
        let mut decoded = Vec::new();
        for byte in &frame {
            decoded.extend(decoder.feed(std::slice::from_ref(byte)));
        }
        assert_eq!(decoded, vec![initialize()]);
    }

    #[test]
    fn test_batched_frames_keep_order() {
        let mut chunk = encode(&initialize()).unwrap();
        chunk.extend(encode(&stopped()).unwrap());

        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(&chunk), vec![initialize(), stopped()]);
    }

    #[test]
    fn test_partial_body_retained() {
        let frame = encode(&initialize()).unwrap();
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(&frame[..frame.len() - 3]).is_empty());
        assert_eq!(decoder.buffered(), frame.len() - 3);
        assert_eq!(decoder.feed(&frame[frame.len() - 3..]), vec![initialize()]);
    }

    #[test]
    fn test_case_insensitive_header_and_extra_fields() {
        let body = br#"{"type":"event","seq":1,"event":"initialized"}"#;
        let mut chunk = format!(
            "content-type: application/json\r\ncontent-LENGTH:{}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        chunk.extend_from_slice(body);

        let decoded = FrameDecoder::new().feed(&chunk);
        assert_eq!(decoded.len(), 1);
        assert!(matches!(&decoded[0], Message::Event(e) if e.event == "initialized"));
    }

    #[test]
    fn test_malformed_header_skipped() {
        let mut chunk = b"Debugger listening on port 1234\r\n\r\n".to_vec();
        chunk.extend(encode(&initialize()).unwrap());

        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(&chunk), vec![initialize()]);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_invalid_json_body_dropped() {
        let bad = b"{not json";
        let mut chunk = format!("Content-Length: {}\r\n\r\n", bad.len()).into_bytes();
        chunk.extend_from_slice(bad);
        chunk.extend(encode(&stopped()).unwrap());

        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.feed(&chunk), vec![stopped()]);
    }

    #[test]
    fn test_valid_json_of_unknown_shape_dropped() {
        let odd = br#"{"type":"notice","seq":1}"#;
        let mut chunk = format!("Content-Length: {}\r\n\r\n", odd.len()).into_bytes();
        chunk.extend_from_slice(odd);
        let response = Message::Response(Response {
            seq: 3,
            request_seq: 1,
            success: true,
            command: "initialize".into(),
            message: None,
            body: Some(json!({"ok": true})),
        });
        chunk.extend(encode(&response).unwrap());

        assert_eq!(FrameDecoder::new().feed(&chunk), vec![response]);
    }

    #[test]
    fn test_leading_diagnostic_line_tolerated() {
        let mut chunk = b"warning: something\n".to_vec();
        chunk.extend(encode(&initialize()).unwrap());
        assert_eq!(FrameDecoder::new().feed(&chunk), vec![initialize()]);
    }

    #[test]
    fn test_partial_header_retained() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"Content-Len").is_empty());
        assert_eq!(decoder.buffered(), 11);
    }
}
