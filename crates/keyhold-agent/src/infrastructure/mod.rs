//! Infrastructure layer for the agent.
//!
//! Contains the adapters that touch the outside world: the byte-stream
//! connection to the host application and configuration file storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `keyhold_core`, but MUST NOT be imported by the `application` layer.

pub mod host_sink;
pub mod storage;
