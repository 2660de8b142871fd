//! Protocol module containing host message types and the binary codec.

pub mod codec;
pub mod messages;
pub mod sequence;

pub use codec::{decode_command, decode_header, decode_reply, encode_command, encode_reply, ProtocolError};
pub use messages::*;
pub use sequence::RequestCounter;
