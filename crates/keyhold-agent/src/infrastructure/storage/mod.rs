//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML configuration from the
//! platform-appropriate directory (or an explicit path), supplies defaults
//! on first run, and turns the declared preset tables into
//! [`Preset`](crate::application::presets::Preset)s.

pub mod config;
