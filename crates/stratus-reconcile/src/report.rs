//! Campaign result record.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use stratus_core::{AgentId, VmId};

/// Why a VM that was not backed by an active agent was still kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Within the minimum safe age.
    TooYoung,
    /// No IP, so it cannot be matched against agents.
    NoIp,
    Unreachable,
    ChildrenRunning,
    UptimeTooShort,
    KillSwitchRunning,
    /// The stop request was never confirmed.
    AgentStillRunning,
    /// Gone from the cloud before deletion.
    Vanished,
    ProbeFailed(String),
    DeleteFailed(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooYoung => f.write_str("younger than minimum safe age"),
            Self::NoIp => f.write_str("no ip address"),
            Self::Unreachable => f.write_str("host unreachable"),
            Self::ChildrenRunning => f.write_str("agent child process still running"),
            Self::UptimeTooShort => f.write_str("agent process uptime below minimum"),
            Self::KillSwitchRunning => f.write_str("self-disable helper running"),
            Self::AgentStillRunning => f.write_str("agent did not stop"),
            Self::Vanished => f.write_str("vm no longer in inventory"),
            Self::ProbeFailed(e) => write!(f, "probe failed: {e}"),
            Self::DeleteFailed(e) => write!(f, "delete failed: {e}"),
        }
    }
}

/// Everything one campaign observed and did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CampaignReport {
    pub rounds: u32,
    /// Net tally score per agent.
    pub tallies: BTreeMap<AgentId, i64>,
    /// Offline ephemeral agents removed during enumeration.
    pub stale_removed: Vec<AgentId>,
    pub garbage_agents: Vec<AgentId>,
    /// Candidates restored by the activity cross-check or fresh listing.
    pub restored: Vec<AgentId>,
    pub active_ips: BTreeSet<String>,
    pub candidates: Vec<VmId>,
    pub skipped: Vec<(VmId, SkipReason)>,
    pub deleted: Vec<VmId>,
    pub archived: Vec<PathBuf>,
    /// Backend definitions removed after their VM was deleted.
    pub agents_removed: Vec<AgentId>,
    /// Conditions an operator should look at.
    pub diagnostics: Vec<String>,
}

impl CampaignReport {
    pub fn skip(&mut self, vm: &VmId, reason: SkipReason) {
        self.skipped.push((vm.clone(), reason));
    }

    pub fn skip_reason(&self, vm: &str) -> Option<&SkipReason> {
        self.skipped.iter().find(|(id, _)| id == vm).map(|(_, r)| r)
    }
}
