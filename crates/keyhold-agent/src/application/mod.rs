//! Application layer use cases for the agent.
//!
//! Use cases in this layer orchestrate domain objects from `keyhold_core`
//! and depend on abstractions (the [`commit_policies::PolicySink`] trait)
//! rather than on a concrete transport.  They contain no socket or file
//! system access.
//!
//! # Sub-modules
//!
//! - **`commit_policies`** – Registers and removes policy lists and keeps
//!   the host's installed master lists in step with the local store,
//!   rolling back local state when an install fails.
//!
//! - **`presets`** – Installs and tears down the named policy lists
//!   declared in configuration.

pub mod commit_policies;
pub mod presets;
