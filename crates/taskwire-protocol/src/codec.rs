//! Codec for encoding and decoding Taskwire frames.
//!
//! Frames travel either as JSON in text messages or as MessagePack in binary
//! messages. Decoding follows the message kind, so a server may mix both;
//! encoding follows the configured [`Encoding`].

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frames::Frame;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Payload does not match the shape of its topic.
    #[error("Invalid payload for '{topic}': {reason}")]
    InvalidPayload {
        /// Topic the payload arrived on.
        topic: String,
        /// What was wrong with it.
        reason: String,
    },
}

/// Outbound encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// JSON text messages.
    #[default]
    Json,
    /// MessagePack binary messages.
    #[serde(alias = "msgpack")]
    MessagePack,
}

/// An encoded frame, ready to be written as a text or binary message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    /// JSON text.
    Text(String),
    /// MessagePack bytes.
    Binary(Bytes),
}

impl Encoded {
    /// Encoded size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Encoded::Text(text) => text.len(),
            Encoded::Binary(data) => data.len(),
        }
    }

    /// Check whether the encoded frame is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encode a frame as JSON text.
///
/// # Errors
///
/// Returns an error if the frame is too large or serialization fails.
pub fn encode_json(frame: &Frame) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(frame)?;
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(text)
}

/// Decode a frame from JSON text.
///
/// # Errors
///
/// Returns an error if the text is too large or is not a valid frame.
pub fn decode_json(text: &str) -> Result<Frame, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

/// Encode a frame as MessagePack.
///
/// # Errors
///
/// Returns an error if the frame is too large or serialization fails.
pub fn encode_msgpack(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let payload = rmp_serde::to_vec_named(frame)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }
    Ok(Bytes::from(payload))
}

/// Decode a frame from MessagePack.
///
/// # Errors
///
/// Returns an error if the data is too large or is not a valid frame.
pub fn decode_msgpack(data: &[u8]) -> Result<Frame, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }
    Ok(rmp_serde::from_slice(data)?)
}

/// Codec bound to an outbound encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec {
    encoding: Encoding,
}

impl FrameCodec {
    /// Create a codec that encodes with `encoding`.
    #[must_use]
    pub fn new(encoding: Encoding) -> Self {
        Self { encoding }
    }

    /// Get the outbound encoding.
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Encode a frame with the configured encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self, frame: &Frame) -> Result<Encoded, ProtocolError> {
        match self.encoding {
            Encoding::Json => encode_json(frame).map(Encoded::Text),
            Encoding::MessagePack => encode_msgpack(frame).map(Encoded::Binary),
        }
    }

    /// Decode a text message.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode_text(&self, text: &str) -> Result<Frame, ProtocolError> {
        decode_json(text)
    }

    /// Decode a binary message.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails.
    pub fn decode_binary(&self, data: &[u8]) -> Result<Frame, ProtocolError> {
        decode_msgpack(data)
    }
}
