use thiserror::Error;

/// Errors that can occur while materializing a package.
#[derive(Debug, Error)]
pub enum PackageError {
    /// The artifact key does not exist in the package store.
    #[error("Artifact not found: {key}")]
    ArtifactNotFound { key: String },

    /// The blob key escapes the store root or is otherwise malformed.
    #[error("Invalid artifact key: {key}")]
    InvalidKey { key: String },

    /// The archive could not be unpacked.
    #[error("Archive error: {0}")]
    Archive(String),

    /// No manifest.json was found in the extracted package.
    #[error("No manifest found in package")]
    ManifestMissing,

    /// The manifest was found but could not be parsed.
    #[error("Invalid manifest: {0}")]
    ManifestInvalid(String),

    /// The dependency restore step failed.
    #[error("Dependency restore failed: {0}")]
    RestoreFailed(String),

    /// Dependencies are declared but no restore command is configured.
    #[error("No restore command configured; cannot resolve dependencies")]
    RestoreUnavailable,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PackageError>;
