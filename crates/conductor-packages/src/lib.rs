//! `conductor-packages` — turn a stored artifact into a runnable working set.
//!
//! The pipeline is fetch → extract → validate → resolve:
//!
//! 1. [`store::PackageStore`] fetches the artifact bytes by blob key.
//! 2. [`fetch::fetch_and_extract`] unpacks the gzip tarball into a fresh
//!    temporary directory owned by this one execution attempt.
//! 3. [`manifest::validate_structure`] locates and parses `manifest.json`.
//! 4. [`resolve::PackageResolver`] selects the dependency group for the
//!    target platform and restores each entry to a concrete local file.
//!
//! Every step appends human-readable lines to the attempt's log; failures
//! return a structured error plus the accumulated logs instead of unwinding
//! past the caller.

pub mod error;
pub mod fetch;
pub mod manifest;
pub mod resolve;
pub mod store;

pub use error::{PackageError, Result};
pub use fetch::{fetch_and_extract, PackageWorkspace};
pub use manifest::{detect_language, Dependency, DependencySection, Language, Manifest};
pub use resolve::{
    LocalReference, NoRestorer, PackageResolver, ProcessRestorer, ResolveFailure, ResolvedPackage,
    Restorer,
};
pub use store::{FsPackageStore, PackageStore};
