use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level config (conductor.toml + CONDUCTOR_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConductorConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub packages: PackagesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Polling-loop tunables for the scheduler role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Fixed delay between ticks. Ticks never overlap.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Instances still unfinished after this many hours are flagged as errored.
    #[serde(default = "default_stuck_timeout_hours")]
    pub stuck_timeout_hours: i64,
    /// Physical queue used when a job has no resolvable JobQueue reference.
    #[serde(default = "default_queue_name")]
    pub default_queue: String,
    /// Optional environment tag stamped onto every queue message.
    pub environment: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            stuck_timeout_hours: default_stuck_timeout_hours(),
            default_queue: default_queue_name(),
            environment: None,
        }
    }
}

/// Worker-agent tunables: lease timing, polling cadence, execution deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_id")]
    pub id: i64,
    /// Physical queue this agent polls. Messages tagged with a different
    /// queue name are re-routed instead of executed.
    #[serde(default = "default_queue_name")]
    pub queue: String,
    /// Optional environment tag forwarded to the execution context.
    pub environment: Option<String>,
    /// Sleep between receive attempts when the queue is empty.
    #[serde(default = "default_receive_poll_secs")]
    pub receive_poll_secs: u64,
    /// Initial lease (visibility timeout) taken on receive.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,
    /// Heartbeat cadence. Must stay strictly below `lease_secs` so a renewal
    /// lands before the prior lease expires even if one tick is missed.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Hard deadline for one execution attempt.
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    /// Settings JSON handed verbatim to every entry point.
    #[serde(default = "default_app_settings")]
    pub app_settings_json: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: default_agent_id(),
            queue: default_queue_name(),
            environment: None,
            receive_poll_secs: default_receive_poll_secs(),
            lease_secs: default_lease_secs(),
            heartbeat_secs: default_heartbeat_secs(),
            execution_timeout_secs: default_execution_timeout_secs(),
            app_settings_json: default_app_settings(),
        }
    }
}

/// Package store and dependency-resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagesConfig {
    /// Root directory of the filesystem blob store.
    #[serde(default = "default_packages_root")]
    pub root: String,
    /// Target platform version used to pick a dependency group.
    #[serde(default = "default_target_platform")]
    pub target_platform: String,
    /// Restore command invoked with the generated requirements descriptor.
    /// When unset, packages declaring dependencies fail resolution.
    pub restore_command: Option<String>,
}

impl Default for PackagesConfig {
    fn default() -> Self {
        Self {
            root: default_packages_root(),
            target_platform: default_target_platform(),
            restore_command: None,
        }
    }
}

impl ConductorConfig {
    /// Load config: explicit path > CONDUCTOR_CONFIG env > ./conductor.toml.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ConductorConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CONDUCTOR_").split("_"))
            .extract()
            .map_err(|e| crate::error::ConductorError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    std::env::var("CONDUCTOR_CONFIG").unwrap_or_else(|_| "conductor.toml".to_string())
}

fn default_db_path() -> String {
    "conductor.db".to_string()
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_stuck_timeout_hours() -> i64 {
    24
}

fn default_queue_name() -> String {
    "jobs".to_string()
}

fn default_agent_id() -> i64 {
    1
}

fn default_receive_poll_secs() -> u64 {
    5
}

fn default_lease_secs() -> u64 {
    300
}

fn default_heartbeat_secs() -> u64 {
    180
}

fn default_execution_timeout_secs() -> u64 {
    300
}

fn default_app_settings() -> String {
    "{}".to_string()
}

fn default_packages_root() -> String {
    "packages".to_string()
}

fn default_target_platform() -> String {
    "py312".to_string()
}
