//! Messages exchanged between the Keyhold agent and a host application.
//!
//! The agent sends [`HostCommand`]s; the host answers each one with exactly
//! one [`HostReply`] carrying the same request id.

use serde::{Deserialize, Serialize};

use crate::domain::category::Category;
use crate::domain::rule::{Propagation, Rule};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Total size of the common frame header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Largest payload a peer may declare.  Larger frames are rejected before
/// any allocation happens.
pub const MAX_PAYLOAD_LEN: usize = 1 << 20;

// ── Message type codes ────────────────────────────────────────────────────────

/// All message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Agent → host (0x00–0x7F)
    SetDefaultPropagation = 0x01,
    InstallPolicy = 0x02,
    // Host → agent (0x80–0xFF)
    Accepted = 0x80,
    Rejected = 0x81,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(MessageType::SetDefaultPropagation),
            0x02 => Ok(MessageType::InstallPolicy),
            0x80 => Ok(MessageType::Accepted),
            0x81 => Ok(MessageType::Rejected),
            _ => Err(()),
        }
    }
}

// ── Frame header ──────────────────────────────────────────────────────────────

/// 16-byte header prepended to every frame on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol version; always [`PROTOCOL_VERSION`].
    pub version: u8,
    /// Identifies the payload type.
    pub message_type: MessageType,
    /// Length of the payload in bytes (not including this header).
    pub payload_length: u32,
    /// Correlates a reply with the command it answers.
    pub request_id: u64,
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// A request from the agent to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    /// Sets what the host does with events no installed rule matches.
    SetDefaultPropagation(Propagation),
    /// Atomically replaces the host's active rule list for `category`.
    InstallPolicy { category: Category, rules: Vec<Rule> },
}

impl HostCommand {
    pub fn message_type(&self) -> MessageType {
        match self {
            HostCommand::SetDefaultPropagation(_) => MessageType::SetDefaultPropagation,
            HostCommand::InstallPolicy { .. } => MessageType::InstallPolicy,
        }
    }
}

/// The host's answer to one [`HostCommand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostReply {
    Accepted,
    /// The host refused the command; `reason` is for diagnostics only.
    Rejected { reason: String },
}

impl HostReply {
    pub fn message_type(&self) -> MessageType {
        match self {
            HostReply::Accepted => MessageType::Accepted,
            HostReply::Rejected { .. } => MessageType::Rejected,
        }
    }
}
