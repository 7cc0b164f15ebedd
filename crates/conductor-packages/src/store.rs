use std::path::{Component, Path, PathBuf};

use crate::error::{PackageError, Result};

/// Blob get/put for packaged code artifacts.
///
/// A missing key is an explicit `None`, never an error the caller has to
/// catch-and-ignore; the resolver decides that absence is fatal.
pub trait PackageStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// Filesystem-backed [`PackageStore`] rooted at a directory.
///
/// Keys map to paths under the root; keys with parent-directory components
/// are rejected so a key can never escape the store.
pub struct FsPackageStore {
    root: PathBuf,
}

impl FsPackageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve_key(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        let safe = rel.components().all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !safe {
            return Err(PackageError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.root.join(rel))
    }
}

impl PackageStore for FsPackageStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve_key(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PackageError::Io(e)),
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve_key(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)?;
        Ok(())
    }
}
