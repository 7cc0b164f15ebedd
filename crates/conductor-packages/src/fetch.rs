use std::path::PathBuf;

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use tar::Archive;
use tempfile::TempDir;
use tracing::debug;

use crate::error::{PackageError, Result};
use crate::store::PackageStore;

/// An extracted package, exclusively owned by one execution attempt.
///
/// Dropping the workspace removes the temporary directory (best-effort —
/// `TempDir` swallows removal errors on drop), so cleanup happens at the end
/// of the attempt regardless of outcome.
#[derive(Debug)]
pub struct PackageWorkspace {
    pub dir: TempDir,
    /// Extracted file paths relative to `dir`, in archive order.
    pub files: Vec<PathBuf>,
}

impl PackageWorkspace {
    pub fn path(&self) -> &std::path::Path {
        self.dir.path()
    }
}

/// Download `key` from the store and unpack it into a fresh temp directory.
///
/// The artifact is a gzip tarball. Its sha256 digest is appended to `logs`
/// so the audit trail records exactly which bytes ran.
pub fn fetch_and_extract(
    store: &dyn PackageStore,
    key: &str,
    logs: &mut Vec<String>,
) -> Result<PackageWorkspace> {
    let bytes = store
        .get(key)?
        .ok_or_else(|| PackageError::ArtifactNotFound {
            key: key.to_string(),
        })?;

    let digest = hex::encode(Sha256::digest(&bytes));
    logs.push(format!(
        "Fetched artifact '{key}' ({} bytes, sha256 {digest})",
        bytes.len()
    ));

    let dir = TempDir::with_prefix("conductor-pkg-")?;
    let mut archive = Archive::new(GzDecoder::new(bytes.as_slice()));

    let mut files = Vec::new();
    let entries = archive
        .entries()
        .map_err(|e| PackageError::Archive(e.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| PackageError::Archive(e.to_string()))?;
        let rel = entry
            .path()
            .map_err(|e| PackageError::Archive(e.to_string()))?
            .into_owned();
        // unpack_in refuses paths that would escape the workspace
        let unpacked = entry
            .unpack_in(dir.path())
            .map_err(|e| PackageError::Archive(e.to_string()))?;
        if unpacked && entry.header().entry_type().is_file() {
            files.push(rel);
        }
    }

    debug!(key, files = files.len(), dir = %dir.path().display(), "package extracted");
    logs.push(format!("Extracted {} files", files.len()));

    Ok(PackageWorkspace { dir, files })
}
