//! Tracewire wire format — control frames and the data datagram layout.
//!
//! These types ARE the protocol; both front-ends (native RPC and the HTTP
//! gateway) are views over them. The control plane speaks length-prefixed
//! JSON frames over TCP: a big-endian u32 payload length followed by
//! exactly that many bytes of JSON. The data plane is a bare datagram —
//! 16 bytes of stream id, then payload, no further framing.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use zerocopy::FromBytes;

use crate::stream_id::StreamId;

/// Hard cap on a control frame payload. Descriptor sets are the largest
/// thing that travels here; 4 MiB is far above any sane descriptor.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// Length of the frame length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Length of the stream-id prefix on every data datagram.
pub const DATAGRAM_PREFIX_LEN: usize = StreamId::LEN;

/// Base64 (standard alphabet) for binary fields embedded in JSON.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

/// One control-plane operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Register (or refresh) the descriptor set for one package.
    UpsertSchema {
        #[serde(with = "base64_bytes")]
        descriptor: Vec<u8>,
    },
    /// Bind a stream id to a message type.
    BindStream {
        stream_id: StreamId,
        package: String,
        message: String,
    },
    /// Remove a stream's binding.
    UnbindStream { stream_id: StreamId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Ok,
    AlreadyExists,
    NotFound,
    InvalidArgument,
    Unavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl ControlResponse {
    pub fn ok() -> Self {
        Self {
            status: ResponseStatus::Ok,
            message: String::new(),
        }
    }

    pub fn with_status(status: ResponseStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::with_status(ResponseStatus::InvalidArgument, message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN}-byte cap")]
    TooLarge(usize),
    #[error("frame body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode a control message as a length-prefixed frame.
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>, FrameError> {
    let body = serde_json::to_vec(msg)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(body.len()));
    }
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode a frame body. The caller has already consumed the length prefix
/// and enforced [`MAX_FRAME_LEN`].
pub fn decode_frame<T: DeserializeOwned>(body: &[u8]) -> Result<T, FrameError> {
    Ok(serde_json::from_slice(body)?)
}

/// Split a data datagram into its stream-id prefix and payload.
///
/// Returns `None` when the datagram is shorter than the prefix.
pub fn split_datagram(buf: &[u8]) -> Option<(StreamId, &[u8])> {
    if buf.len() < DATAGRAM_PREFIX_LEN {
        return None;
    }
    let id = StreamId::read_from_prefix(buf)?;
    Some((id, &buf[DATAGRAM_PREFIX_LEN..]))
}
