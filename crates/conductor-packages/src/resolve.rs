use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{PackageError, Result};
use crate::fetch::{fetch_and_extract, PackageWorkspace};
use crate::manifest::{validate_structure, Dependency, DependencySection, Manifest};
use crate::store::PackageStore;

/// Platform versions tried, in order, when no group matches the target
/// exactly.
const PLATFORM_FALLBACKS: [&str; 4] = ["py312", "py311", "py310", "py39"];

/// A dependency resolved to a concrete local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalReference {
    /// Logical name used for deduplication (lowercased file stem).
    pub name: String,
    pub path: PathBuf,
}

/// The package-manager restore seam.
///
/// Given the selected dependency list, produce the local files (including
/// transitive ones) that must be resolvable at execution time.
#[async_trait]
pub trait Restorer: Send + Sync {
    async fn restore(&self, deps: &[Dependency], work_dir: &Path) -> Result<Vec<PathBuf>>;
}

/// Restorer that shells out to a configured restore command.
///
/// A throwaway requirements descriptor naming every dependency is written
/// into the workspace; the command reads it via `CONDUCTOR_RESTORE_MANIFEST`
/// and downloads into `CONDUCTOR_RESTORE_DIR`. Its stdout is the lock
/// output: one resolved local path per line. Lines that are not existing
/// files are logged and skipped.
pub struct ProcessRestorer {
    command: String,
}

impl ProcessRestorer {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl Restorer for ProcessRestorer {
    async fn restore(&self, deps: &[Dependency], work_dir: &Path) -> Result<Vec<PathBuf>> {
        let requirements: String = deps
            .iter()
            .map(|d| format!("{}=={}\n", d.id, d.version))
            .collect();
        let manifest_path = work_dir.join("requirements.restore.txt");
        std::fs::write(&manifest_path, requirements)?;

        let restore_dir = work_dir.join("deps");
        std::fs::create_dir_all(&restore_dir)?;

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("CONDUCTOR_RESTORE_MANIFEST", &manifest_path)
            .env("CONDUCTOR_RESTORE_DIR", &restore_dir)
            .current_dir(work_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // The execution deadline may drop this future mid-restore; the
            // child must not outlive it.
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PackageError::RestoreFailed(format!("spawn failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PackageError::RestoreFailed(format!(
                "restore exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let mut paths = Vec::new();
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let path = PathBuf::from(line);
            if path.is_file() {
                paths.push(path);
            } else {
                warn!(line, "restore output line is not an existing file; skipped");
            }
        }
        Ok(paths)
    }
}

/// Select the dependency group for `target_platform`.
///
/// Exact match first, then the fixed descending-preference list, then any
/// group with entries. Returns the group label for logging.
pub fn select_group<'a>(
    section: &'a DependencySection,
    target_platform: &str,
) -> (String, &'a [Dependency]) {
    match section {
        DependencySection::Flat(deps) => ("ungrouped".to_string(), deps),
        DependencySection::Grouped(groups) => {
            if let Some(deps) = non_empty(groups, target_platform) {
                return (target_platform.to_string(), deps);
            }
            for fallback in PLATFORM_FALLBACKS {
                if let Some(deps) = non_empty(groups, fallback) {
                    return (fallback.to_string(), deps);
                }
            }
            groups
                .iter()
                .find(|(_, deps)| !deps.is_empty())
                .map(|(label, deps)| (label.clone(), deps.as_slice()))
                .unwrap_or_else(|| ("none".to_string(), &[]))
        }
    }
}

fn non_empty<'a>(
    groups: &'a BTreeMap<String, Vec<Dependency>>,
    key: &str,
) -> Option<&'a [Dependency]> {
    groups
        .get(key)
        .filter(|deps| !deps.is_empty())
        .map(|deps| deps.as_slice())
}

/// Deduplicate restore output by logical name.
///
/// Runtime-specific build outputs (any path with a `runtimes` component)
/// win over generic ones; the result is sorted by name so the reference set
/// is identical regardless of declaration order.
pub fn dedup_references(paths: Vec<PathBuf>) -> Vec<LocalReference> {
    let mut by_name: BTreeMap<String, LocalReference> = BTreeMap::new();
    for path in paths {
        let name = match path.file_stem() {
            Some(stem) => stem.to_string_lossy().to_lowercase(),
            None => continue,
        };
        let runtime_specific = path
            .components()
            .any(|c| c.as_os_str() == "runtimes");
        let candidate = LocalReference {
            name: name.clone(),
            path,
        };
        match by_name.get(&name) {
            Some(existing) => {
                let existing_specific = existing
                    .path
                    .components()
                    .any(|c| c.as_os_str() == "runtimes");
                if runtime_specific && !existing_specific {
                    by_name.insert(name, candidate);
                }
            }
            None => {
                by_name.insert(name, candidate);
            }
        }
    }
    by_name.into_values().collect()
}

/// Resolve the manifest's dependencies into local references.
pub async fn resolve_dependencies(
    manifest: &Manifest,
    target_platform: &str,
    restorer: &dyn Restorer,
    work_dir: &Path,
    logs: &mut Vec<String>,
) -> Result<Vec<LocalReference>> {
    if manifest.dependencies.is_empty() {
        logs.push("No dependencies declared".to_string());
        return Ok(Vec::new());
    }

    let (label, group) = select_group(&manifest.dependencies, target_platform);
    let selected: Vec<Dependency> = group.iter().filter(|d| !d.exclude).cloned().collect();
    logs.push(format!(
        "Selected dependency group '{label}': {} entries ({} excluded)",
        selected.len(),
        group.len() - selected.len()
    ));
    if selected.is_empty() {
        return Ok(Vec::new());
    }

    let paths = restorer.restore(&selected, work_dir).await?;
    let references = dedup_references(paths);
    logs.push(format!(
        "Restored {} local references: {}",
        references.len(),
        references
            .iter()
            .map(|r| r.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    ));
    Ok(references)
}

/// A validated, executable working set — the output of the whole resolver.
///
/// Transient: lives for one execution attempt; dropping it removes the
/// extraction directory.
#[derive(Debug)]
pub struct ResolvedPackage {
    pub workspace: PackageWorkspace,
    pub manifest: Manifest,
    pub references: Vec<LocalReference>,
    pub logs: Vec<String>,
}

/// A resolver failure with the log lines accumulated before it.
#[derive(Debug)]
pub struct ResolveFailure {
    pub error: PackageError,
    pub logs: Vec<String>,
}

impl std::fmt::Display for ResolveFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

/// Fetch → extract → validate → resolve, in order.
pub struct PackageResolver {
    store: Arc<dyn PackageStore>,
    restorer: Arc<dyn Restorer>,
    target_platform: String,
}

impl PackageResolver {
    pub fn new(
        store: Arc<dyn PackageStore>,
        restorer: Arc<dyn Restorer>,
        target_platform: impl Into<String>,
    ) -> Self {
        Self {
            store,
            restorer,
            target_platform: target_platform.into(),
        }
    }

    /// Materialize `artifact_key` into a runnable working set.
    ///
    /// On failure the logs collected so far travel with the error so the
    /// execution engine can attach them to the instance's audit trail.
    pub async fn resolve(
        &self,
        artifact_key: &str,
    ) -> std::result::Result<ResolvedPackage, ResolveFailure> {
        let mut logs = Vec::new();

        let workspace = match fetch_and_extract(self.store.as_ref(), artifact_key, &mut logs) {
            Ok(ws) => ws,
            Err(error) => return Err(ResolveFailure { error, logs }),
        };

        let manifest = match validate_structure(workspace.path(), &mut logs) {
            Ok(m) => m,
            Err(error) => return Err(ResolveFailure { error, logs }),
        };

        let references = match resolve_dependencies(
            &manifest,
            &self.target_platform,
            self.restorer.as_ref(),
            workspace.path(),
            &mut logs,
        )
        .await
        {
            Ok(refs) => refs,
            Err(error) => return Err(ResolveFailure { error, logs }),
        };

        debug!(
            package = %manifest.id,
            references = references.len(),
            "package resolved"
        );
        Ok(ResolvedPackage {
            workspace,
            manifest,
            references,
            logs,
        })
    }
}

/// Restorer used where no restore command is configured: succeeds for empty
/// dependency sets and fails otherwise.
pub struct NoRestorer;

#[async_trait]
impl Restorer for NoRestorer {
    async fn restore(&self, deps: &[Dependency], _work_dir: &Path) -> Result<Vec<PathBuf>> {
        if deps.is_empty() {
            Ok(Vec::new())
        } else {
            Err(PackageError::RestoreUnavailable)
        }
    }
}
