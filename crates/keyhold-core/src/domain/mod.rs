//! Domain entities for Keyhold.
//!
//! This module contains pure business logic with no infrastructure
//! dependencies: no sockets, no async runtime, no file system.  Everything
//! here can be compiled and tested on any platform without external setup.
//!
//! Code in outer layers (the agent's application and infrastructure layers)
//! depends on the domain, but the domain never depends on them.

/// The two independent partitions of policy state.
pub mod category;

/// A single propagation directive and its parts.
pub mod rule;

/// Registered policy lists and master-list construction.
///
/// See [`store::PolicyStore`] for the main type.
pub mod store;
