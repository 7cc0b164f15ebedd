use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use conductor_core::config::AgentConfig;
use conductor_packages::{detect_language, PackageResolver};
use conductor_queue::QueueMessage;
use conductor_store::{MetadataStore, StoreError};

use crate::entrypoint::{EntryPointRegistry, ExecutionContext};
use crate::error::Result;

/// Actor stamp written to instances finalized by the execution engine.
const UPDATED_BY: &str = "JobExecutor";

/// Result of one execution attempt, carrying the full audit trail.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub logs: Vec<String>,
}

impl ExecutionOutcome {
    fn failure(logs: Vec<String>) -> Self {
        Self {
            success: false,
            logs,
        }
    }
}

/// Runs one received message end to end: resolve the package and invoke its
/// entry point, both under one execution deadline, then reconcile durable
/// state.
///
/// Every failure mode is converted into log lines plus `has_error=1` on the
/// instance; nothing here is allowed to take down the worker process.
pub struct ExecutionEngine {
    store: Arc<MetadataStore>,
    resolver: PackageResolver,
    registry: EntryPointRegistry,
    config: AgentConfig,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<MetadataStore>,
        resolver: PackageResolver,
        registry: EntryPointRegistry,
        config: AgentConfig,
    ) -> Self {
        Self {
            store,
            resolver,
            registry,
            config,
        }
    }

    /// Execute the message's job and reconcile the outcome. Returns the
    /// outcome so the caller can decide logging; store errors during
    /// reconciliation are the only way this returns `Err`.
    pub async fn process(&self, msg: &QueueMessage) -> Result<ExecutionOutcome> {
        let outcome = self.execute(msg).await?;
        self.reconcile(msg, &outcome)?;
        Ok(outcome)
    }

    async fn execute(&self, msg: &QueueMessage) -> Result<ExecutionOutcome> {
        let mut logs = Vec::new();

        let job = match self.store.get_job(msg.job_id)? {
            Some(job) => job,
            None => {
                logs.push(format!("job {} not found", msg.job_id));
                return Ok(ExecutionOutcome::failure(logs));
            }
        };
        let artifact_key = match &job.artifact_key {
            Some(key) => key.clone(),
            None => {
                logs.push(format!("job '{}' has no artifact to execute", job.name));
                return Ok(ExecutionOutcome::failure(logs));
            }
        };
        let instance = match self.store.get_instance(msg.job_instance_id)? {
            Some(instance) => instance,
            None => {
                logs.push(format!("job instance {} not found", msg.job_instance_id));
                return Ok(ExecutionOutcome::failure(logs));
            }
        };

        info!(
            job_id = job.id,
            job_instance_id = instance.id,
            job = %job.name,
            "executing job"
        );

        // The deadline covers the whole attempt: resolve (including the
        // restore subprocess) and the entry point itself. A hung restore
        // must not wedge the worker behind a forever-renewed lease.
        let deadline = std::time::Duration::from_secs(self.config.execution_timeout_secs);
        let attempt = self.resolve_and_run(&artifact_key, msg, instance.job_schedule_id);
        match tokio::time::timeout(deadline, attempt).await {
            Ok(mut outcome) => {
                let mut merged = logs;
                merged.append(&mut outcome.logs);
                outcome.logs = merged;
                Ok(outcome)
            }
            Err(_) => {
                logs.push(format!(
                    "job execution exceeded the {} second deadline and was terminated",
                    self.config.execution_timeout_secs
                ));
                Ok(ExecutionOutcome::failure(logs))
            }
        }
    }

    /// Resolve the artifact and invoke its entry point. Runs entirely under
    /// the caller's deadline; dropping this future kills any child process
    /// still running.
    async fn resolve_and_run(
        &self,
        artifact_key: &str,
        msg: &QueueMessage,
        job_schedule_id: i64,
    ) -> ExecutionOutcome {
        let mut logs = Vec::new();

        let package = match self.resolver.resolve(artifact_key).await {
            Ok(package) => package,
            Err(failure) => {
                logs.extend(failure.logs);
                logs.push(format!("package resolution failed: {}", failure.error));
                return ExecutionOutcome::failure(logs);
            }
        };
        logs.extend(package.logs.iter().cloned());

        let language = match detect_language(&package.manifest, package.workspace.path()) {
            Some(language) => language,
            None => {
                logs.push(format!(
                    "package '{}' contains no recognizable code directory",
                    package.manifest.id
                ));
                return ExecutionOutcome::failure(logs);
            }
        };

        let entry = match self.registry.locate(language, &package) {
            Some(entry) => entry,
            None => {
                // Deterministic code defect; reported, never redelivered.
                logs.push(format!(
                    "entry point '{}' not found in package '{}'",
                    package.manifest.entry_point(),
                    package.manifest.id
                ));
                return ExecutionOutcome::failure(logs);
            }
        };

        let ctx = ExecutionContext {
            app_settings_json: self.config.app_settings_json.clone(),
            agent_id: self.config.id,
            job_id: msg.job_id,
            job_instance_id: msg.job_instance_id,
            job_schedule_id,
            environment: msg.job_environment.clone(),
            parameter: None,
        };

        match entry.run(&ctx).await {
            Ok(lines) => {
                logs.extend(lines);
                ExecutionOutcome { success: true, logs }
            }
            Err(fault) => {
                logs.extend(fault.logs);
                if let Some(trace) = &fault.trace {
                    logs.push(trace.clone());
                }
                logs.push(format!("job execution failed: {}", fault.message));
                ExecutionOutcome::failure(logs)
            }
        }
    }

    /// Finalize the instance and the job's denormalized flags. Runs on
    /// every outcome so the instance always reaches a terminal state.
    fn reconcile(&self, msg: &QueueMessage, outcome: &ExecutionOutcome) -> Result<()> {
        let now = Utc::now();
        let has_error = !outcome.success;

        if has_error {
            for line in &outcome.logs {
                warn!(job_instance_id = msg.job_instance_id, "{line}");
            }
            error!(
                job_id = msg.job_id,
                job_instance_id = msg.job_instance_id,
                "job finished with errors"
            );
        } else {
            info!(
                job_id = msg.job_id,
                job_instance_id = msg.job_instance_id,
                lines = outcome.logs.len(),
                "job finished"
            );
        }

        match self
            .store
            .finish_instance(msg.job_instance_id, has_error, now, UPDATED_BY)
        {
            // The instance row can be gone if the job was deleted mid-run;
            // the outcome is still reported against the job below.
            Err(StoreError::InstanceNotFound { id }) => {
                warn!(instance_id = id, "instance vanished before reconciliation");
            }
            other => other?,
        }
        if self.store.get_job(msg.job_id)?.is_some() {
            self.store
                .update_job_flags(msg.job_id, false, false, has_error)?;
        }
        Ok(())
    }
}
