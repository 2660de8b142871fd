//! # keyhold-core
//!
//! Shared library for Keyhold containing the input-propagation rule model,
//! the policy-list store, and the binary wire protocol used to hand master
//! policy lists to a host application.
//!
//! It has zero dependencies on OS APIs, async runtimes, or network sockets.
//!
//! # Architecture overview
//!
//! A host application (a terminal, an editor, a browser shell...) receives
//! raw keyboard and pointer events.  For each event it consults an installed
//! list of *rules* that decide whether the event is propagated to the host's
//! own handlers or suppressed.  Keyhold owns the lists the host installs.
//!
//! - **`domain`** – Pure business logic.  The most important piece is the
//!   [`PolicyStore`]: per [`Category`], a set of independently registered
//!   rule lists that can be flattened into one *master* list.
//!
//! - **`protocol`** – How a master list travels to the host.  Commands are
//!   encoded into a compact binary frame (16-byte header + payload) and
//!   replies are decoded back into typed Rust values.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `keyhold_core::PolicyStore` instead of `keyhold_core::domain::store::PolicyStore`.
pub use domain::category::Category;
pub use domain::rule::{EventKind, KeyId, Modifiers, Propagation, Rule};
pub use domain::store::{ListId, PolicyList, PolicyStore};
pub use protocol::codec::{decode_command, decode_reply, encode_command, encode_reply, ProtocolError};
pub use protocol::messages::{HostCommand, HostReply};
