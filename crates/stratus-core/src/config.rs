//! Pool configuration (`stratus.toml`) parser and validator.
//!
//! One file describes one pool. Key validation runs over the raw TOML table
//! before deserialization so an operator sees every missing and unexpected
//! key at once instead of the first serde error.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ConfigResult};

const TOP_REQUIRED: &[&str] = &["name", "count", "template_name", "backend"];
const TOP_OPTIONAL: &[&str] = &[
    "vm_name_prefix",
    "work_dir",
    "provision",
    "check",
    "timing",
    "garbage_collection",
    "agent_host",
    "ssh",
];

const JENKINS_REQUIRED: &[&str] = &["type", "url", "username", "password", "credentials_id"];
const JENKINS_OPTIONAL: &[&str] = &["labels", "mode", "remote_fs", "executors"];
const BAMBOO_REQUIRED: &[&str] = &["type", "url", "username", "password"];
const BAMBOO_OPTIONAL: &[&str] = &[];
const OC_REQUIRED: &[&str] = &["type", "url", "username", "password", "credentials_id"];
const OC_OPTIONAL: &[&str] = &["labels", "template_path"];

// ── Top level ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Pool name. Doubles as the cloud-side `POOL` tag and VM name stem.
    pub name: String,
    /// Desired number of VMs.
    pub count: u32,
    /// Cloud template to instantiate, matched by substring.
    pub template_name: String,
    pub vm_name_prefix: Option<String>,
    /// Local scratch root for compiled stage bundles and archives.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    pub backend: BackendConfig,
    #[serde(default)]
    pub provision: Vec<StageSpec>,
    #[serde(default)]
    pub check: Vec<StageSpec>,
    #[serde(default)]
    pub timing: Tunables,
    #[serde(default)]
    pub garbage_collection: GcConfig,
    #[serde(default)]
    pub agent_host: AgentHostConfig,
    #[serde(default)]
    pub ssh: SshConfig,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("tmp")
}

impl PoolConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse, validate keys, then deserialize.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let table: toml::Table =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let issues = validate_keys(&table);
        if !issues.is_empty() {
            return Err(ConfigError::Invalid(issues));
        }
        let config: PoolConfig = toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))?;
        config.check_values()?;
        Ok(config)
    }

    fn check_values(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Value("name must not be empty".into()));
        }
        if self.template_name.trim().is_empty() {
            return Err(ConfigError::Value("template_name must not be empty".into()));
        }
        if self.garbage_collection.rounds == Some(0) {
            return Err(ConfigError::Value(
                "garbage_collection.rounds must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ── Key validation ─────────────────────────────────────────────────

/// Missing and unexpected keys found in a raw config table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigIssues {
    pub missing: Vec<String>,
    pub extra: Vec<String>,
}

impl ConfigIssues {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty()
    }
}

impl fmt::Display for ConfigIssues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.missing.is_empty() {
            parts.push(format!("missing [{}]", self.missing.join(", ")));
        }
        if !self.extra.is_empty() {
            parts.push(format!("unexpected [{}]", self.extra.join(", ")));
        }
        f.write_str(&parts.join("; "))
    }
}

/// Compare a raw config table against the keys each section allows.
///
/// Backend keys are checked against the set for the declared `type`;
/// nested keys are reported with a `backend.` prefix.
pub fn validate_keys(table: &toml::Table) -> ConfigIssues {
    let mut issues = ConfigIssues::default();
    diff_keys(table, TOP_REQUIRED, TOP_OPTIONAL, "", &mut issues);

    if let Some(toml::Value::Table(backend)) = table.get("backend") {
        let sets = match backend.get("type").and_then(toml::Value::as_str) {
            Some("jenkins") => Some((JENKINS_REQUIRED, JENKINS_OPTIONAL)),
            Some("bamboo") => Some((BAMBOO_REQUIRED, BAMBOO_OPTIONAL)),
            Some("operation_center") => Some((OC_REQUIRED, OC_OPTIONAL)),
            Some(other) => {
                issues.extra.push(format!("backend.type={other}"));
                None
            }
            None => {
                issues.missing.push("backend.type".into());
                None
            }
        };
        if let Some((required, optional)) = sets {
            diff_keys(backend, required, optional, "backend.", &mut issues);
        }
    }

    issues
}

fn diff_keys(
    table: &toml::Table,
    required: &[&str],
    optional: &[&str],
    prefix: &str,
    issues: &mut ConfigIssues,
) {
    let present: BTreeSet<&str> = table.keys().map(String::as_str).collect();
    for key in required {
        if !present.contains(key) {
            issues.missing.push(format!("{prefix}{key}"));
        }
    }
    for key in present {
        if !required.contains(&key) && !optional.contains(&key) {
            issues.extra.push(format!("{prefix}{key}"));
        }
    }
}

// ── Secrets ────────────────────────────────────────────────────────

/// An opaque credential. Written either inline or as `{ env = "VAR" }`,
/// which is resolved when the config is loaded.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Plain(String),
            Env { env: String },
        }
        match Raw::deserialize(deserializer)? {
            Raw::Plain(s) => Ok(Secret(s)),
            Raw::Env { env } => std::env::var(&env).map(Secret).map_err(|_| {
                serde::de::Error::custom(ConfigError::MissingEnv(env))
            }),
        }
    }
}

// ── Backends ───────────────────────────────────────────────────────

/// CI backend selection; the `type` tag picks the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendConfig {
    Jenkins(JenkinsConfig),
    Bamboo(BambooConfig),
    OperationCenter(OperationCenterConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Jenkins(_) => "jenkins",
            Self::Bamboo(_) => "bamboo",
            Self::OperationCenter(_) => "operation_center",
        }
    }
}

/// Jenkins node usage mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    #[default]
    Normal,
    Exclusive,
}

impl AgentMode {
    /// The value Jenkins expects in `Node.Mode`.
    pub fn as_jenkins(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Exclusive => "EXCLUSIVE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JenkinsConfig {
    pub url: String,
    pub username: String,
    pub password: Secret,
    pub credentials_id: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub mode: AgentMode,
    #[serde(default = "default_remote_fs")]
    pub remote_fs: String,
    #[serde(default = "default_executors")]
    pub executors: u32,
}

fn default_remote_fs() -> String {
    "/home/jenkins".into()
}

fn default_executors() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BambooConfig {
    pub url: String,
    pub username: String,
    pub password: Secret,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationCenterConfig {
    pub url: String,
    pub username: String,
    pub password: Secret,
    pub credentials_id: String,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Shared-slave XML template; a built-in one is used when absent.
    pub template_path: Option<PathBuf>,
}

// ── Stages ─────────────────────────────────────────────────────────

/// One declarative provisioning step. `number` defaults to the position
/// in the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageSpec {
    Inline {
        number: Option<u32>,
        command: String,
    },
    Script {
        number: Option<u32>,
        path: PathBuf,
        #[serde(default)]
        args: Vec<String>,
    },
    Directory {
        number: Option<u32>,
        path: PathBuf,
        #[serde(default)]
        args: Vec<String>,
    },
    Tar {
        number: Option<u32>,
        path: PathBuf,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl StageSpec {
    pub fn number(&self) -> Option<u32> {
        match self {
            Self::Inline { number, .. }
            | Self::Script { number, .. }
            | Self::Directory { number, .. }
            | Self::Tar { number, .. } => *number,
        }
    }
}

// ── Tunables ───────────────────────────────────────────────────────

/// Retry counts and delays for every bounded polling loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Tunables {
    pub ssh_ready_attempts: u32,
    pub ssh_ready_backoff_secs: u64,
    pub provision_attempts: u32,
    pub provision_backoff_secs: u64,
    pub registration_attempts: u32,
    pub registration_delay_secs: u64,
    pub inventory_attempts: u32,
    pub inventory_delay_secs: u64,
    pub instantiation_wait_count: u32,
    pub instantiation_poll_secs: u64,
    pub worker_stagger_secs: u64,
    pub http_attempts: u32,
    pub http_delay_secs: u64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            ssh_ready_attempts: 15,
            ssh_ready_backoff_secs: 5,
            provision_attempts: 3,
            provision_backoff_secs: 5,
            registration_attempts: 21,
            registration_delay_secs: 5,
            inventory_attempts: 20,
            inventory_delay_secs: 5,
            instantiation_wait_count: 300,
            instantiation_poll_secs: 5,
            worker_stagger_secs: 5,
            http_attempts: 3,
            http_delay_secs: 5,
        }
    }
}

impl Tunables {
    /// Same attempt counts with every delay set to zero.
    pub fn immediate() -> Self {
        Self {
            ssh_ready_backoff_secs: 0,
            provision_backoff_secs: 0,
            registration_delay_secs: 0,
            inventory_delay_secs: 0,
            instantiation_poll_secs: 0,
            worker_stagger_secs: 0,
            http_delay_secs: 0,
            ..Self::default()
        }
    }
}

/// Reconciliation campaign parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GcConfig {
    /// VMs younger than this are never deleted.
    pub min_safe_age_secs: u64,
    /// Verification rounds; the backend decides when unset.
    pub rounds: Option<u32>,
    pub round_delay_secs: u64,
    pub max_reenumerations: u32,
    /// Minimum age of the agent's main process before retirement.
    pub min_agent_uptime_secs: u64,
    pub child_poll_attempts: u32,
    pub child_poll_secs: u64,
    pub kill_switch_poll_attempts: u32,
    pub kill_switch_poll_secs: u64,
    pub stop_poll_attempts: u32,
    pub stop_poll_secs: u64,
    pub activity_samples: u32,
    pub activity_sample_delay_secs: u64,
    /// Where retired agents' local configs are archived.
    pub archive_dir: PathBuf,
    /// Drain the oldest agents when the pool is over its size.
    pub drain_surplus: bool,
    /// Delete candidates that fail the reachability probe instead of keeping them.
    pub retire_unreachable: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            min_safe_age_secs: 300,
            rounds: None,
            round_delay_secs: 60,
            max_reenumerations: 10,
            min_agent_uptime_secs: 600,
            child_poll_attempts: 30,
            child_poll_secs: 2,
            kill_switch_poll_attempts: 10,
            kill_switch_poll_secs: 10,
            stop_poll_attempts: 30,
            stop_poll_secs: 2,
            activity_samples: 4,
            activity_sample_delay_secs: 30,
            archive_dir: PathBuf::from("archive"),
            drain_surplus: false,
            retire_unreachable: false,
        }
    }
}

impl GcConfig {
    /// Same thresholds with every delay set to zero.
    pub fn immediate() -> Self {
        Self {
            round_delay_secs: 0,
            child_poll_secs: 0,
            kill_switch_poll_secs: 0,
            stop_poll_secs: 0,
            activity_sample_delay_secs: 0,
            ..Self::default()
        }
    }
}

/// Per-pool overrides of the backend's agent host profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentHostConfig {
    pub process_pattern: Option<String>,
    pub main_process: Option<String>,
    pub stop_command: Option<String>,
    pub config_path: Option<String>,
    pub kill_switch_pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SshConfig {
    pub user: String,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "root".into(),
            identity_file: None,
            connect_timeout_secs: 20,
        }
    }
}
