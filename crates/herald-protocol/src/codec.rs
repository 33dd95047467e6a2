//! Codec for encoding and decoding Herald events.
//!
//! Text frames carry JSON, binary frames carry MessagePack. Both encode the
//! same `{event, data}` envelope. Outbound encoding is chosen once per hub.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::event::Event;
use crate::frames::{Encoded, Frame};

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

    /// A reserved event carried a payload of the wrong shape.
    #[error("Invalid {event} payload: {reason}")]
    InvalidControl {
        /// Reserved event name.
        event: &'static str,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// The frame kind does not carry an event.
    #[error("Not a data frame")]
    NotData,
}

/// Wire encoding used for outbound events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// JSON in text frames.
    #[default]
    Json,
    /// MessagePack in binary frames.
    #[serde(alias = "messagepack")]
    Msgpack,
}

/// Encode an event.
///
/// # Errors
///
/// Returns an error if the encoded event is too large or serialization fails.
pub fn encode(event: &Event, encoding: Encoding) -> Result<Encoded, ProtocolError> {
    let encoded = match encoding {
        Encoding::Json => Encoded::Text(Arc::from(serde_json::to_string(event)?)),
        Encoding::Msgpack => Encoded::Binary(Bytes::from(rmp_serde::to_vec_named(event)?)),
    };

    if encoded.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(encoded.len()));
    }

    Ok(encoded)
}

/// Decode an event from a JSON text payload.
///
/// # Errors
///
/// Returns an error if the payload is too large or is not a valid envelope.
pub fn decode_text(text: &str) -> Result<Event, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }
    Ok(serde_json::from_str(text)?)
}

/// Decode an event from a MessagePack payload.
///
/// # Errors
///
/// Returns an error if the payload is too large or is not a valid envelope.
pub fn decode_binary(data: &[u8]) -> Result<Event, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }
    Ok(rmp_serde::from_slice(data)?)
}

/// Decode an event from a data frame.
///
/// # Errors
///
/// Returns [`ProtocolError::NotData`] for control frames, or a decoding error.
pub fn decode(frame: &Frame) -> Result<Event, ProtocolError> {
    match frame {
        Frame::Text(text) => decode_text(text),
        Frame::Binary(data) => decode_binary(data),
        _ => Err(ProtocolError::NotData),
    }
}
