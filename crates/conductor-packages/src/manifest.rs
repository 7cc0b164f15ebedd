use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{PackageError, Result};

/// File name of the package descriptor at the archive root.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Entry-point name used when the manifest does not designate one.
pub const DEFAULT_ENTRY_POINT: &str = "execute_job";

/// Languages a package may ship code for, with their folder conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Python,
    Shell,
}

impl Language {
    /// Detection order for packages that do not declare a language.
    pub const ALL: [Language; 2] = [Language::Python, Language::Shell];

    /// Conventional code folder for this language.
    pub fn code_dir(&self) -> &'static str {
        match self {
            Language::Python => "code_python",
            Language::Shell => "code_shell",
        }
    }

    /// Conventional entry file inside [`Self::code_dir`].
    pub fn entry_file(&self) -> &'static str {
        match self {
            Language::Python => "main.py",
            Language::Shell => "main.sh",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Python => write!(f, "python"),
            Language::Shell => write!(f, "shell"),
        }
    }
}

/// One declared dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub id: String,
    pub version: String,
    /// Excluded entries are declared but skipped during restore.
    #[serde(default)]
    pub exclude: bool,
}

/// Dependency list, either flat or grouped by target platform version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencySection {
    Flat(Vec<Dependency>),
    Grouped(BTreeMap<String, Vec<Dependency>>),
}

impl Default for DependencySection {
    fn default() -> Self {
        DependencySection::Flat(Vec::new())
    }
}

impl DependencySection {
    pub fn is_empty(&self) -> bool {
        match self {
            DependencySection::Flat(deps) => deps.is_empty(),
            DependencySection::Grouped(groups) => groups.values().all(|g| g.is_empty()),
        }
    }
}

/// The package-level descriptor declaring metadata, dependencies, and the
/// designated entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Name of the designated callable; defaults to `execute_job`.
    #[serde(default)]
    pub entry_point: Option<String>,
    /// Declared language. When unset, detection walks the code-folder
    /// conventions in [`Language::ALL`] order.
    #[serde(default)]
    pub language: Option<Language>,
    #[serde(default)]
    pub dependencies: DependencySection,
}

impl Manifest {
    pub fn entry_point(&self) -> &str {
        self.entry_point.as_deref().unwrap_or(DEFAULT_ENTRY_POINT)
    }
}

/// Locate and parse the manifest, then check the code-folder layout.
///
/// A missing manifest is fatal. A code folder without its conventional entry
/// file only produces a warning — the entry-point lookup at execution time
/// makes the final call.
pub fn validate_structure(work_dir: &Path, logs: &mut Vec<String>) -> Result<Manifest> {
    let manifest_path = work_dir.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return Err(PackageError::ManifestMissing);
    }

    let raw = std::fs::read_to_string(&manifest_path)?;
    let manifest: Manifest =
        serde_json::from_str(&raw).map_err(|e| PackageError::ManifestInvalid(e.to_string()))?;

    logs.push(format!(
        "Manifest: {} {} ({})",
        manifest.id,
        manifest.version,
        manifest.description.as_deref().unwrap_or("no description")
    ));

    for language in Language::ALL {
        let code_dir = work_dir.join(language.code_dir());
        if !code_dir.is_dir() {
            continue;
        }
        let entry = code_dir.join(language.entry_file());
        if entry.is_file() {
            logs.push(format!("Found {language} code folder"));
        } else {
            let line = format!(
                "Warning: {} exists but {} is missing",
                language.code_dir(),
                language.entry_file()
            );
            warn!(package = %manifest.id, "{line}");
            logs.push(line);
        }
    }

    Ok(manifest)
}

/// Pick the language to execute: declared in the manifest, else the first
/// convention whose code folder exists.
pub fn detect_language(manifest: &Manifest, work_dir: &Path) -> Option<Language> {
    if let Some(lang) = manifest.language {
        return Some(lang);
    }
    Language::ALL
        .into_iter()
        .find(|lang| work_dir.join(lang.code_dir()).is_dir())
}
