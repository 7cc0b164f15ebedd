//! `conductor-core` — shared configuration, errors, and time helpers.
//!
//! Every other crate in the workspace depends on this one for the
//! [`config::ConductorConfig`] loaded from `conductor.toml` plus
//! `CONDUCTOR_*` environment overrides.

pub mod config;
pub mod error;
pub mod time;

pub use config::ConductorConfig;
pub use error::{ConductorError, Result};
