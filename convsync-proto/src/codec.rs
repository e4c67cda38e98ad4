//! JSON encoding of push-channel frames.
//!
//! Frames travel as WebSocket text messages. Oversized frames are refused
//! before parsing.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::event::{ClientFrame, ServerEvent};

/// Largest frame accepted from the wire (64 KB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Frame larger than [`MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes (max {max})")]
    Oversized {
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },
}

fn encode<T: Serialize>(value: &T) -> Result<String, CodecError> {
    Ok(serde_json::to_string(value)?)
}

fn decode<T: DeserializeOwned>(text: &str) -> Result<T, CodecError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(CodecError::Oversized {
            size: text.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(serde_json::from_str(text)?)
}

/// Encode a client frame for the wire.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the frame cannot be serialized.
pub fn encode_frame(frame: &ClientFrame) -> Result<String, CodecError> {
    encode(frame)
}

/// Decode a client frame (server side and test doubles).
///
/// # Errors
///
/// Returns [`CodecError`] for oversized or malformed input.
pub fn decode_frame(text: &str) -> Result<ClientFrame, CodecError> {
    decode(text)
}

/// Encode a server event (server side and test doubles).
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the event cannot be serialized.
pub fn encode_event(event: &ServerEvent) -> Result<String, CodecError> {
    encode(event)
}

/// Decode a server event received on the push channel.
///
/// # Errors
///
/// Returns [`CodecError`] for oversized or malformed input.
pub fn decode_event(text: &str) -> Result<ServerEvent, CodecError> {
    decode(text)
}
