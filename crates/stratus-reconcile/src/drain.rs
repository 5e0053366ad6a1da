//! Drain protocol and the lighter-weight retirement passes.
//!
//! Draining only disables intake; a later campaign deletes the VM once
//! its agent has been confirmed inactive.

use std::collections::{HashMap, HashSet};

use tracing::{info, warn};

use stratus_core::{AgentId, AgentRecord, AgentStatus, VmRecord};

use crate::engine::ReconciliationEngine;
use crate::error::ReconcileResult;
use crate::report::{CampaignReport, SkipReason};

const SECS_PER_DAY: u64 = 86_400;

fn by_ip(agents: Vec<AgentRecord>) -> HashMap<String, Vec<AgentRecord>> {
    let mut map: HashMap<String, Vec<AgentRecord>> = HashMap::new();
    for agent in agents {
        if let Some(ip) = agent.ip.clone() {
            map.entry(ip).or_default().push(agent);
        }
    }
    map
}

impl ReconciliationEngine {
    /// Disable intake on every agent bound to `vm`'s IP.
    pub async fn drain_vm(&self, vm: &VmRecord) -> ReconcileResult<Vec<AgentId>> {
        self.drain_oldest(std::slice::from_ref(vm), 1).await
    }

    /// Drain the agents of the `n` oldest VMs in `vms`.
    pub async fn drain_oldest(&self, vms: &[VmRecord], n: usize) -> ReconcileResult<Vec<AgentId>> {
        let agents = by_ip(self.backend.list_agents().await?);
        let mut oldest: Vec<&VmRecord> = vms.iter().collect();
        oldest.sort_by_key(|vm| vm.start_time);

        let mut drained = Vec::new();
        for vm in oldest.into_iter().take(n) {
            let Some(bound) = vm.ip.as_ref().and_then(|ip| agents.get(ip)) else {
                warn!(vm = %vm.label(), id = %vm.id, "no agent bound to vm, nothing to drain");
                continue;
            };
            for agent in bound {
                self.backend.drain(agent).await?;
                info!(agent = %agent.name, vm = %vm.id, "drained agent");
                drained.push(agent.id.clone());
            }
        }
        Ok(drained)
    }

    /// Drain up to `size` agents whose VMs are at least `age_days` old.
    pub async fn hunt(&self, age_days: u64, size: usize) -> ReconcileResult<Vec<AgentId>> {
        let now = self.clock.now();
        let threshold = age_days.saturating_mul(SECS_PER_DAY);
        let old: Vec<VmRecord> = self
            .inventory
            .list_vms(&self.pool)
            .await?
            .into_iter()
            .filter(|vm| vm.age_secs(now) >= threshold)
            .collect();
        info!(pool = %self.pool, age_days, found = old.len(), size, "hunting old vms");
        self.drain_oldest(&old, size).await
    }

    /// Remove the backend definitions of a VM that is being destroyed.
    pub async fn forget_vm(&self, vm: &VmRecord) -> ReconcileResult<Vec<AgentId>> {
        let Some(ref ip) = vm.ip else {
            return Ok(Vec::new());
        };
        let mut removed = Vec::new();
        for agent in self.backend.list_agents().await? {
            if agent.ip.as_ref() == Some(ip) {
                self.backend.remove(&agent).await?;
                removed.push(agent.id);
            }
        }
        Ok(removed)
    }

    /// Single-pass cleanup for backends whose disabled state is final.
    ///
    /// Deletes VMs whose every bound agent is inactive along with those
    /// agents, deletes VMs with no agent at all, and removes inactive
    /// or offline agents with no VM. VMs within the minimum safe age are kept.
    pub async fn reap(&self) -> ReconcileResult<CampaignReport> {
        let mut report = CampaignReport {
            rounds: 1,
            ..CampaignReport::default()
        };
        let agents = self.backend.list_agents().await?;
        let vms = self.inventory.list_vms(&self.pool).await?;
        let now = self.clock.now();
        let vm_ips: HashSet<String> = vms.iter().filter_map(|vm| vm.ip.clone()).collect();
        let bound = by_ip(agents.clone());

        for vm in &vms {
            let Some(ref ip) = vm.ip else {
                report.skip(&vm.id, SkipReason::NoIp);
                continue;
            };
            let on_vm = bound.get(ip).map(Vec::as_slice).unwrap_or_default();
            if on_vm.iter().any(|a| !self.backend.is_inactive(a)) {
                report.active_ips.insert(ip.clone());
                continue;
            }
            if vm.age_secs(now) <= self.gc.min_safe_age_secs {
                report.skip(&vm.id, SkipReason::TooYoung);
                continue;
            }
            report.candidates.push(vm.id.clone());
            if let Err(e) = self.inventory.delete_vm(&vm.id).await {
                warn!(vm = %ip, id = %vm.id, error = %e, "delete failed");
                report.skip(&vm.id, SkipReason::DeleteFailed(e.to_string()));
                continue;
            }
            info!(vm = %ip, id = %vm.id, agents = on_vm.len(), "reaped vm");
            report.deleted.push(vm.id.clone());
            for agent in on_vm {
                self.remove_agent(agent, &mut report).await;
            }
        }

        for agent in &agents {
            let orphan = agent.ip.as_ref().is_none_or(|ip| !vm_ips.contains(ip));
            let retired = self.backend.is_inactive(agent) || agent.status == AgentStatus::Offline;
            if orphan && retired {
                self.remove_agent(agent, &mut report).await;
            }
        }
        Ok(report)
    }

    async fn remove_agent(&self, agent: &AgentRecord, report: &mut CampaignReport) {
        match self.backend.remove(agent).await {
            Ok(()) => {
                info!(agent = %agent.name, "removed agent definition");
                report.agents_removed.push(agent.id.clone());
            }
            Err(e) => {
                warn!(agent = %agent.name, error = %e, "failed to remove agent definition");
                report
                    .diagnostics
                    .push(format!("agent {} not removed: {e}", agent.name));
            }
        }
    }
}
