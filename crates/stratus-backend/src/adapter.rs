//! The [`BackendAdapter`] capability interface.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use stratus_core::{AgentHostConfig, AgentId, AgentRecord, BackendConfig, PoolConfig, VmRecord};

use crate::bamboo::BambooBackend;
use crate::error::BackendResult;
use crate::jenkins::JenkinsBackend;
use crate::operation_center::OperationCenterBackend;

/// Capability variant of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Typed API, agents registered by the manager.
    SimpleAgent,
    /// Scraped HTML, agents register themselves and retire after one job.
    EphemeralScrapedAgent,
    /// Agents defined as items in a central operations server.
    ManagedSlave,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SimpleAgent => "simple-agent",
            Self::EphemeralScrapedAgent => "ephemeral-scraped-agent",
            Self::ManagedSlave => "managed-slave",
        };
        f.write_str(s)
    }
}

/// How the agent service looks on its VM, for the pre-deletion checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentHostProfile {
    /// Pattern matching every agent process (parents of build children).
    pub process_pattern: String,
    /// Pattern matching the long-running main agent process.
    pub main_process: String,
    /// Command that gracefully stops the agent service.
    pub stop_command: String,
    /// Local agent config to archive before deletion.
    pub config_path: Option<String>,
    /// Pattern matching the self-disable helper.
    pub kill_switch_pattern: String,
}

impl AgentHostProfile {
    /// Apply per-pool overrides.
    pub fn with_overrides(mut self, overrides: &AgentHostConfig) -> Self {
        if let Some(v) = &overrides.process_pattern {
            self.process_pattern = v.clone();
        }
        if let Some(v) = &overrides.main_process {
            self.main_process = v.clone();
        }
        if let Some(v) = &overrides.stop_command {
            self.stop_command = v.clone();
        }
        if overrides.config_path.is_some() {
            self.config_path = overrides.config_path.clone();
        }
        if let Some(v) = &overrides.kill_switch_pattern {
            self.kill_switch_pattern = v.clone();
        }
        self
    }
}

/// What every CI backend must offer the engine.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Agents this pool manages. Agents the manager must never touch
    /// (built-in or local agents) are not returned.
    async fn list_agents(&self) -> BackendResult<Vec<AgentRecord>>;

    /// "Disabled and not running work" in this backend's terms.
    fn is_inactive(&self, agent: &AgentRecord) -> bool;

    /// Make a provisioned VM known to the backend. Idempotent.
    async fn register(&self, vm: &VmRecord) -> BackendResult<()>;

    /// Stop the agent from taking new work.
    async fn drain(&self, agent: &AgentRecord) -> BackendResult<()>;

    /// Delete the backend-side definition. An agent that is already gone
    /// counts as removed.
    async fn remove(&self, agent: &AgentRecord) -> BackendResult<()>;

    /// Verification rounds when the pool does not configure them.
    fn default_rounds(&self) -> u32 {
        1
    }

    fn supports_cross_check(&self) -> bool {
        false
    }

    /// Candidates seen busy by a secondary activity signal.
    async fn cross_check_activity(&self, _candidates: &[AgentRecord]) -> BackendResult<Vec<AgentId>> {
        Ok(Vec::new())
    }

    fn host_profile(&self) -> AgentHostProfile;
}

/// Build the adapter selected by `[backend].type`.
pub fn from_config(config: &PoolConfig) -> BackendResult<Arc<dyn BackendAdapter>> {
    let adapter: Arc<dyn BackendAdapter> = match &config.backend {
        BackendConfig::Jenkins(j) => Arc::new(JenkinsBackend::new(&config.name, j, &config.timing)?),
        BackendConfig::Bamboo(b) => Arc::new(BambooBackend::new(
            b,
            &config.timing,
            &config.garbage_collection,
        )?),
        BackendConfig::OperationCenter(oc) => {
            Arc::new(OperationCenterBackend::new(&config.name, oc, &config.timing)?)
        }
    };
    Ok(adapter)
}

/// `{pool}-{ip}` naming used by the Jenkins-family backends.
pub(crate) fn agent_name(pool: &str, ip: &str) -> String {
    format!("{pool}-{ip}")
}

/// Inverse of [`agent_name`]; `None` for agents of other pools.
pub(crate) fn ip_from_agent_name(pool: &str, name: &str) -> Option<String> {
    name.strip_prefix(pool)
        .and_then(|rest| rest.strip_prefix('-'))
        .filter(|ip| !ip.is_empty() && ip.chars().all(|c| c.is_ascii_digit() || c == '.'))
        .map(str::to_string)
}
