//! Records exchanged between the cloud inventory, the CI backends, and the
//! reconciliation engine.
//!
//! Neither record is persisted. Both are recomputed from their owning system
//! on every pass.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cloud-side VM identifier.
pub type VmId = String;

/// Backend-side agent identifier.
pub type AgentId = String;

/// Desired pool size minus observed VM count.
pub type PoolDelta = i64;

// ── Agents ─────────────────────────────────────────────────────────

/// Status of an agent as reported by its CI backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Connected and accepting work.
    Online,
    /// Intake disabled by an operator or by the agent itself.
    Disabled,
    /// Disabled while a job is still finishing.
    Draining,
    /// Connected and executing a job.
    RunningJob,
    /// Not connected to the backend.
    Offline,
    Unknown,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Online => "online",
            Self::Disabled => "disabled",
            Self::Draining => "draining",
            Self::RunningJob => "running_job",
            Self::Offline => "offline",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A backend-reported agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    /// Display name; for Jenkins-style backends this is `{pool}-{ip}`.
    pub name: String,
    /// Address of the VM the agent runs on, when the backend exposes it.
    pub ip: Option<String>,
    pub status: AgentStatus,
    /// Whether backend policy retires this agent after a single job.
    pub ephemeral: bool,
    /// Opaque backend handle (URL, slave name, numeric id).
    pub backend_key: String,
}

impl AgentRecord {
    /// Offline ephemeral agents are stale definitions that can be dropped
    /// from the backend regardless of the cloud state.
    pub fn is_stale_ephemeral(&self) -> bool {
        self.ephemeral && self.status == AgentStatus::Offline
    }
}

// ── VMs ────────────────────────────────────────────────────────────

/// Cloud-reported lifecycle state of a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmState {
    Pending,
    Running,
    Failed,
    Stopped,
}

impl VmState {
    /// Whether the instantiation wait can stop polling this VM.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Running | Self::Failed)
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// A cloud-side VM. Owned by the cloud inventory; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRecord {
    pub id: VmId,
    pub name: String,
    pub ip: Option<String>,
    /// Unix timestamp (seconds) when the VM was started.
    pub start_time: u64,
    /// Value of the `POOL` tag, if the VM carries one.
    pub pool_tag: Option<String>,
    pub state: VmState,
    pub hostname: Option<String>,
}

impl VmRecord {
    /// Seconds since the VM started, saturating at zero for clock skew.
    pub fn age_secs(&self, now: u64) -> u64 {
        now.saturating_sub(self.start_time)
    }

    /// Human-readable address: the IP, or the VM name when none is known.
    pub fn label(&self) -> &str {
        self.ip.as_deref().unwrap_or(&self.name)
    }
}
