use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tracing::info;

use conductor_packages::{Language, ResolvedPackage};

/// Everything a job's entry point receives when invoked.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionContext {
    /// Settings JSON the executed code may read (connection strings etc.).
    pub app_settings_json: String,
    pub agent_id: i64,
    pub job_id: i64,
    pub job_instance_id: i64,
    pub job_schedule_id: i64,
    pub environment: Option<String>,
    /// Optional free-form parameter forwarded verbatim.
    pub parameter: Option<String>,
}

/// Failure raised by (or on behalf of) an entry point.
#[derive(Debug, Default)]
pub struct EntryPointFault {
    pub message: String,
    /// Best-effort stack/trace text, usually the child's stderr.
    pub trace: Option<String>,
    /// Log lines emitted before the fault; they still belong to the
    /// instance's audit trail.
    pub logs: Vec<String>,
}

impl EntryPointFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

impl std::fmt::Display for EntryPointFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.message.fmt(f)
    }
}

/// The single designated callable of a package.
///
/// One method with the fixed signature: the context goes in, the ordered
/// log lines come out. The host invokes through this interface instead of
/// scanning the package at runtime.
#[async_trait]
pub trait EntryPoint: Send + Sync {
    async fn run(
        &self,
        ctx: &ExecutionContext,
    ) -> std::result::Result<Vec<String>, EntryPointFault>;
}

/// Produces an [`EntryPoint`] handle for a resolved package, or `None` when
/// the package does not provide the capability this factory knows how to
/// locate (e.g. the conventional entry file is absent).
pub trait EntryPointFactory: Send + Sync {
    fn locate(&self, package: &ResolvedPackage) -> Option<Arc<dyn EntryPoint>>;
}

/// Registered-capability lookup keyed by language.
pub struct EntryPointRegistry {
    factories: HashMap<Language, Arc<dyn EntryPointFactory>>,
}

impl EntryPointRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in subprocess factories for every supported
    /// language.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for language in Language::ALL {
            registry.register(language, Arc::new(SubprocessFactory { language }));
        }
        registry
    }

    pub fn register(&mut self, language: Language, factory: Arc<dyn EntryPointFactory>) {
        self.factories.insert(language, factory);
    }

    /// Locate the entry point for `package` in `language`.
    pub fn locate(
        &self,
        language: Language,
        package: &ResolvedPackage,
    ) -> Option<Arc<dyn EntryPoint>> {
        self.factories.get(&language)?.locate(package)
    }
}

impl Default for EntryPointRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Factory for the conventional script entry points (`code_python/main.py`,
/// `code_shell/main.sh`).
struct SubprocessFactory {
    language: Language,
}

impl EntryPointFactory for SubprocessFactory {
    fn locate(&self, package: &ResolvedPackage) -> Option<Arc<dyn EntryPoint>> {
        let script = package
            .workspace
            .path()
            .join(self.language.code_dir())
            .join(self.language.entry_file());
        if !script.is_file() {
            return None;
        }
        let dep_paths = package.references.iter().map(|r| r.path.clone()).collect();
        Some(Arc::new(SubprocessEntryPoint {
            language: self.language,
            script,
            dep_paths,
        }))
    }
}

/// Entry point that runs the package's script as a child process.
///
/// The context is written as JSON on the child's stdin; every stdout line
/// is a log line, kept for the audit trail and mirrored to `tracing` for
/// live display. Resolved dependency paths are exposed through the child's
/// environment so the package's own code can locate them at call time.
pub struct SubprocessEntryPoint {
    language: Language,
    script: PathBuf,
    dep_paths: Vec<PathBuf>,
}

impl SubprocessEntryPoint {
    fn program(&self) -> &'static str {
        match self.language {
            Language::Python => "python3",
            Language::Shell => "sh",
        }
    }

    fn joined_dep_paths(&self) -> String {
        self.dep_paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":")
    }
}

#[async_trait]
impl EntryPoint for SubprocessEntryPoint {
    async fn run(
        &self,
        ctx: &ExecutionContext,
    ) -> std::result::Result<Vec<String>, EntryPointFault> {
        let ctx_json = serde_json::to_string(ctx).map_err(|e| {
            EntryPointFault::new(format!("could not serialize execution context: {e}"))
        })?;

        let dep_paths = self.joined_dep_paths();
        let mut command = tokio::process::Command::new(self.program());
        command
            .arg(&self.script)
            .env("CONDUCTOR_DEP_PATHS", &dep_paths)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // If the execution deadline drops this future the child must not
            // linger.
            .kill_on_drop(true);
        if self.language == Language::Python && !dep_paths.is_empty() {
            command.env("PYTHONPATH", &dep_paths);
        }

        let mut child = command.spawn().map_err(|e| {
            EntryPointFault::new(format!("could not spawn {}: {e}", self.program()))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(ctx_json.as_bytes())
                .await
                .map_err(|e| {
                    EntryPointFault::new(format!("could not write execution context: {e}"))
                })?;
            drop(stdin);
        }

        // Stream stdout line by line; stderr is drained concurrently and
        // kept as the trace text on failure.
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EntryPointFault::new("child stdout was not captured"))?;
        let mut stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(stderr) = stderr.as_mut() {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        let mut logs = Vec::new();
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(job_instance_id = ctx.job_instance_id, "{line}");
            logs.push(line);
        }

        let status = match child.wait().await {
            Ok(status) => status,
            Err(e) => {
                return Err(EntryPointFault {
                    message: format!("could not await child: {e}"),
                    trace: None,
                    logs,
                })
            }
        };
        let stderr_text = stderr_task.await.unwrap_or_default();

        if status.success() {
            Ok(logs)
        } else {
            Err(EntryPointFault {
                message: format!("entry point exited with {status}"),
                trace: (!stderr_text.is_empty()).then_some(stderr_text),
                logs,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_packages::{DependencySection, Manifest, PackageWorkspace};

    fn shell_package(script: &str) -> ResolvedPackage {
        let dir = tempfile::tempdir().unwrap();
        let code_dir = dir.path().join("code_shell");
        std::fs::create_dir_all(&code_dir).unwrap();
        std::fs::write(code_dir.join("main.sh"), script).unwrap();
        ResolvedPackage {
            workspace: PackageWorkspace {
                dir,
                files: vec![PathBuf::from("code_shell/main.sh")],
            },
            manifest: Manifest {
                id: "demo".into(),
                version: "1.0.0".into(),
                description: None,
                entry_point: None,
                language: Some(Language::Shell),
                dependencies: DependencySection::default(),
            },
            references: Vec::new(),
            logs: Vec::new(),
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            app_settings_json: "{}".into(),
            agent_id: 1,
            job_id: 1,
            job_instance_id: 1,
            job_schedule_id: 1,
            environment: None,
            parameter: None,
        }
    }

    #[test]
    fn factory_requires_the_conventional_entry_file() {
        let dir = tempfile::tempdir().unwrap();
        let package = ResolvedPackage {
            workspace: PackageWorkspace {
                dir,
                files: Vec::new(),
            },
            manifest: Manifest {
                id: "empty".into(),
                version: "1.0.0".into(),
                description: None,
                entry_point: None,
                language: Some(Language::Shell),
                dependencies: DependencySection::default(),
            },
            references: Vec::new(),
            logs: Vec::new(),
        };
        let registry = EntryPointRegistry::with_defaults();
        assert!(registry.locate(Language::Shell, &package).is_none());
    }

    #[tokio::test]
    async fn shell_entry_point_streams_stdout_lines() {
        let package = shell_package("cat > /dev/null\necho one\necho two\n");
        let registry = EntryPointRegistry::with_defaults();
        let entry = registry.locate(Language::Shell, &package).unwrap();

        let logs = entry.run(&ctx()).await.unwrap();
        assert_eq!(logs, vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn failing_script_keeps_logs_and_captures_stderr() {
        let package =
            shell_package("cat > /dev/null\necho started\necho boom >&2\nexit 3\n");
        let registry = EntryPointRegistry::with_defaults();
        let entry = registry.locate(Language::Shell, &package).unwrap();

        let fault = entry.run(&ctx()).await.unwrap_err();
        assert!(fault.message.contains("exited"));
        assert_eq!(fault.logs, vec!["started".to_string()]);
        assert!(fault.trace.unwrap().contains("boom"));
    }
}
