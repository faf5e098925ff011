//! Framed request/response transport for debug adapters.
//!
//! Provides:
//! - `Content-Length` frame codec
//! - `RpcClient` correlating responses to requests by sequence number

pub mod client;
pub mod codec;

pub use client::{RpcClient, RpcError};
pub use codec::{FrameDecoder, decode_frames, encode};
