//! Binary codec for frames exchanged with the host application.
//!
//! Wire format:
//! ```text
//! [version:1][msg_type:1][reserved:2][payload_len:4][request_id:8][payload:N]
//! ```
//! Total header size: 16 bytes. All multi-byte integers are big-endian.
//! Payloads are `bincode`-encoded:
//!
//! | Message                 | Payload                      |
//! |-------------------------|------------------------------|
//! | `SetDefaultPropagation` | `Propagation`                |
//! | `InstallPolicy`         | `(Category, Vec<Rule>)`      |
//! | `Accepted`              | empty                        |
//! | `Rejected`              | `String` reason              |

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::domain::category::Category;
use crate::domain::rule::{Propagation, Rule};
use crate::protocol::messages::{
    FrameHeader, HostCommand, HostReply, MessageType, HEADER_SIZE, MAX_PAYLOAD_LEN,
    PROTOCOL_VERSION,
};

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The message type byte in the header is not a recognized value.
    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// A known message type arrived in the wrong direction (e.g. a command
    /// where a reply was expected).
    #[error("unexpected message type: {0:?}")]
    UnexpectedMessageType(MessageType),

    /// The protocol version in the header is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The payload could not be parsed.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The encoded payload length field does not match the actual data available.
    #[error("payload length mismatch: header says {declared}, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },

    /// The declared payload length exceeds [`MAX_PAYLOAD_LEN`].
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// A reply carried a different request id than the command it answers.
    #[error("reply for request {received} while waiting for request {expected}")]
    RequestIdMismatch { expected: u64, received: u64 },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`HostCommand`] into a complete frame.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedPayload`] if serialization fails and
/// [`ProtocolError::PayloadTooLarge`] if the payload does not fit a frame.
///
/// # Examples
///
/// ```rust
/// use keyhold_core::protocol::{decode_command, encode_command, HostCommand};
/// use keyhold_core::Propagation;
///
/// let cmd = HostCommand::SetDefaultPropagation(Propagation::Suppress);
/// let bytes = encode_command(&cmd, 7).unwrap();
/// let (request_id, decoded, consumed) = decode_command(&bytes).unwrap();
/// assert_eq!(request_id, 7);
/// assert_eq!(decoded, cmd);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_command(cmd: &HostCommand, request_id: u64) -> Result<Vec<u8>, ProtocolError> {
    let payload = match cmd {
        HostCommand::SetDefaultPropagation(mode) => serialize(mode)?,
        HostCommand::InstallPolicy { category, rules } => serialize(&(category, rules))?,
    };
    frame(cmd.message_type(), request_id, &payload)
}

/// Encodes a [`HostReply`] into a complete frame.
///
/// # Errors
///
/// Returns [`ProtocolError`] if serialization fails.
pub fn encode_reply(reply: &HostReply, request_id: u64) -> Result<Vec<u8>, ProtocolError> {
    let payload = match reply {
        HostReply::Accepted => Vec::new(),
        HostReply::Rejected { reason } => serialize(reason)?,
    };
    frame(reply.message_type(), request_id, &payload)
}

/// Parses and validates the 16-byte header at the start of `bytes`.
///
/// Stream readers call this on the first [`HEADER_SIZE`] bytes to learn how
/// many payload bytes follow.
///
/// # Errors
///
/// Returns [`ProtocolError`] for short input, a foreign version, an unknown
/// message type, or an oversized payload declaration.
pub fn decode_header(bytes: &[u8]) -> Result<FrameHeader, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let message_type =
        MessageType::try_from(bytes[1]).map_err(|_| ProtocolError::UnknownMessageType(bytes[1]))?;
    // bytes[2..4] reserved

    let payload_length = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if payload_length as usize > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge(payload_length as usize));
    }

    let mut id = [0u8; 8];
    id.copy_from_slice(&bytes[8..16]);

    Ok(FrameHeader {
        version,
        message_type,
        payload_length,
        request_id: u64::from_be_bytes(id),
    })
}

/// Decodes one [`HostCommand`] from the beginning of `bytes`.
///
/// Returns the request id, the command, and the number of bytes consumed.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are malformed or hold a reply.
pub fn decode_command(bytes: &[u8]) -> Result<(u64, HostCommand, usize), ProtocolError> {
    let (header, payload) = split_frame(bytes)?;
    let cmd = match header.message_type {
        MessageType::SetDefaultPropagation => {
            HostCommand::SetDefaultPropagation(deserialize::<Propagation>(payload)?)
        }
        MessageType::InstallPolicy => {
            let (category, rules) = deserialize::<(Category, Vec<Rule>)>(payload)?;
            HostCommand::InstallPolicy { category, rules }
        }
        other => return Err(ProtocolError::UnexpectedMessageType(other)),
    };
    Ok((header.request_id, cmd, HEADER_SIZE + payload.len()))
}

/// Decodes one [`HostReply`] from the beginning of `bytes`.
///
/// Returns the request id, the reply, and the number of bytes consumed.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the bytes are malformed or hold a command.
pub fn decode_reply(bytes: &[u8]) -> Result<(u64, HostReply, usize), ProtocolError> {
    let (header, payload) = split_frame(bytes)?;
    let reply = match header.message_type {
        MessageType::Accepted => HostReply::Accepted,
        MessageType::Rejected => HostReply::Rejected {
            reason: deserialize::<String>(payload)?,
        },
        other => return Err(ProtocolError::UnexpectedMessageType(other)),
    };
    Ok((header.request_id, reply, HEADER_SIZE + payload.len()))
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn frame(message_type: MessageType, request_id: u64, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::PayloadTooLarge(payload.len()));
    }
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.push(PROTOCOL_VERSION);
    buf.push(message_type as u8);
    buf.push(0x00); // reserved
    buf.push(0x00); // reserved
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&request_id.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

fn split_frame(bytes: &[u8]) -> Result<(FrameHeader, &[u8]), ProtocolError> {
    let header = decode_header(bytes)?;
    let declared = header.payload_length as usize;
    let available = bytes.len() - HEADER_SIZE;
    if available < declared {
        return Err(ProtocolError::PayloadLengthMismatch {
            declared,
            available,
        });
    }
    Ok((header, &bytes[HEADER_SIZE..HEADER_SIZE + declared]))
}

fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    bincode::serialize(value).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
}

fn deserialize<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ProtocolError> {
    bincode::deserialize(payload).map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
