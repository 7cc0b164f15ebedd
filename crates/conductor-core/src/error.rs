use thiserror::Error;

/// Top-level errors surfaced while wiring the daemon together.
///
/// Subsystem crates define their own error enums; this type only covers the
/// concerns shared across the workspace.
#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ConductorError>;
