//! The garbage-collection campaign.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use stratus_backend::BackendAdapter;
use stratus_cloud::CloudInventory;
use stratus_core::{AgentId, AgentRecord, Clock, GcConfig, SystemClock, VmId, VmRecord};

use crate::error::ReconcileResult;
use crate::probe::HostProbe;
use crate::report::{CampaignReport, SkipReason};
use crate::tally::VerificationTally;

/// File name used for archived configs when the profile names no path.
const ARCHIVE_FALLBACK_NAME: &str = "agent.cfg";

/// Reconciles one pool's backend agents against its cloud VMs.
///
/// A campaign is a single sequential pass. Only one campaign may run per
/// pool at a time; nothing here enforces that.
pub struct ReconciliationEngine {
    pub(crate) pool: String,
    pub(crate) backend: Arc<dyn BackendAdapter>,
    pub(crate) inventory: Arc<dyn CloudInventory>,
    probe: Arc<dyn HostProbe>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) gc: GcConfig,
    rounds: u32,
}

impl ReconciliationEngine {
    pub fn new(
        pool: impl Into<String>,
        backend: Arc<dyn BackendAdapter>,
        inventory: Arc<dyn CloudInventory>,
        probe: Arc<dyn HostProbe>,
        gc: GcConfig,
    ) -> Self {
        let rounds = gc.rounds.unwrap_or_else(|| backend.default_rounds()).max(1);
        Self {
            pool: pool.into(),
            backend,
            inventory,
            probe,
            clock: Arc::new(SystemClock),
            gc,
            rounds,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    /// Run one campaign.
    ///
    /// Backend and inventory failures during the read phases abort the
    /// campaign before anything is deleted. Failures while retiring a
    /// single VM only skip that VM.
    pub async fn run(&self) -> ReconcileResult<CampaignReport> {
        let mut report = CampaignReport {
            rounds: self.rounds,
            ..CampaignReport::default()
        };
        info!(
            pool = %self.pool,
            backend = %self.backend.kind(),
            rounds = self.rounds,
            "starting garbage collection"
        );

        // ── Enumerate ──────────────────────────────────────────────
        let mut listing = self.enumerate(&mut report).await?;

        // ── Verify ─────────────────────────────────────────────────
        let mut tallies: BTreeMap<AgentId, VerificationTally> = BTreeMap::new();
        let mut seen: HashMap<AgentId, AgentRecord> = HashMap::new();
        for round in 1..=self.rounds {
            if round > 1 {
                tokio::time::sleep(Duration::from_secs(self.gc.round_delay_secs)).await;
                listing = self.backend.list_agents().await?;
            }
            self.verify_round(round, &listing, &mut tallies, &mut seen, &mut report);
        }
        report.tallies = tallies
            .iter()
            .map(|(id, t)| (id.clone(), t.score()))
            .collect();

        // ── Select ─────────────────────────────────────────────────
        let mut garbage: Vec<AgentRecord> = tallies
            .iter()
            .filter(|(_, t)| t.is_garbage())
            .filter_map(|(id, _)| seen.get(id).cloned())
            .collect();

        // ── Activity override ──────────────────────────────────────
        if self.backend.supports_cross_check() && !garbage.is_empty() {
            let busy: HashSet<AgentId> = self
                .backend
                .cross_check_activity(&garbage)
                .await?
                .into_iter()
                .collect();
            garbage.retain(|agent| {
                if busy.contains(&agent.id) {
                    info!(agent = %agent.name, "busy on the activity feed, restoring");
                    report.restored.push(agent.id.clone());
                    false
                } else {
                    true
                }
            });
        }

        // ── Active set ─────────────────────────────────────────────
        let fresh = self.backend.list_agents().await?;
        let mut garbage_ids: HashSet<AgentId> = garbage.iter().map(|a| a.id.clone()).collect();
        for agent in &fresh {
            if garbage_ids.contains(&agent.id) && !self.backend.is_inactive(agent) {
                info!(agent = %agent.name, status = %agent.status, "candidate became active, restoring");
                garbage_ids.remove(&agent.id);
                report.restored.push(agent.id.clone());
            }
        }
        let fresh_by_id: HashMap<&str, &AgentRecord> =
            fresh.iter().map(|a| (a.id.as_str(), a)).collect();
        let known: BTreeSet<&AgentId> = seen.keys().chain(fresh.iter().map(|a| &a.id)).collect();
        for id in known {
            if garbage_ids.contains(id) {
                continue;
            }
            let ip = fresh_by_id
                .get(id.as_str())
                .and_then(|a| a.ip.clone())
                .or_else(|| seen.get(id).and_then(|a| a.ip.clone()));
            match ip {
                Some(ip) => {
                    report.active_ips.insert(ip);
                }
                None => {
                    warn!(agent = %id, "active agent has no resolvable ip; its vm is unprotected");
                    report
                        .diagnostics
                        .push(format!("active agent {id} has no resolvable ip"));
                }
            }
        }
        let mut garbage_list: Vec<AgentId> = garbage_ids.into_iter().collect();
        garbage_list.sort();
        report.garbage_agents = garbage_list;

        let mut agents_by_ip: HashMap<String, Vec<AgentRecord>> = HashMap::new();
        for agent in seen.into_values().chain(fresh) {
            if let Some(ip) = agent.ip.clone() {
                let bound = agents_by_ip.entry(ip).or_default();
                if !bound.iter().any(|a| a.id == agent.id) {
                    bound.push(agent);
                }
            }
        }

        // ── Cross-reference ────────────────────────────────────────
        let now = self.clock.now();
        let candidates = self.select_candidates(now, &mut report).await?;
        report.candidates = candidates.iter().map(|vm| vm.id.clone()).collect();
        info!(
            pool = %self.pool,
            garbage_agents = report.garbage_agents.len(),
            active_ips = report.active_ips.len(),
            candidates = candidates.len(),
            "cross-reference complete"
        );

        // ── Retire ─────────────────────────────────────────────────
        let mut requested: HashSet<VmId> = HashSet::new();
        for vm in &candidates {
            self.retire(vm, &agents_by_ip, &mut requested, &mut report).await;
        }

        info!(
            pool = %self.pool,
            deleted = report.deleted.len(),
            skipped = report.skipped.len(),
            "garbage collection finished"
        );
        Ok(report)
    }

    /// List agents, dropping offline ephemeral definitions until the
    /// listing stops changing.
    async fn enumerate(&self, report: &mut CampaignReport) -> ReconcileResult<Vec<AgentRecord>> {
        let mut passes = 0;
        loop {
            let agents = self.backend.list_agents().await?;
            let stale: Vec<AgentRecord> = agents
                .iter()
                .filter(|a| a.is_stale_ephemeral())
                .cloned()
                .collect();
            if stale.is_empty() {
                return Ok(agents);
            }
            if passes >= self.gc.max_reenumerations {
                warn!(stale = stale.len(), passes, "enumeration did not reach a fixed point");
                report.diagnostics.push(format!(
                    "{} offline ephemeral agents remain after {passes} re-enumerations",
                    stale.len()
                ));
                return Ok(agents);
            }
            passes += 1;
            for agent in &stale {
                match self.backend.remove(agent).await {
                    Ok(()) => {
                        info!(agent = %agent.name, "removed offline ephemeral agent");
                        report.stale_removed.push(agent.id.clone());
                    }
                    Err(e) => warn!(agent = %agent.name, error = %e, "failed to remove stale agent"),
                }
            }
        }
    }

    fn verify_round(
        &self,
        round: u32,
        listing: &[AgentRecord],
        tallies: &mut BTreeMap<AgentId, VerificationTally>,
        seen: &mut HashMap<AgentId, AgentRecord>,
        report: &mut CampaignReport,
    ) {
        let mut present: HashSet<AgentId> = HashSet::new();
        for agent in listing {
            if !present.insert(agent.id.clone()) {
                continue;
            }
            let inactive = self.backend.is_inactive(agent);
            if inactive && agent.ip.is_none() {
                warn!(agent = %agent.name, round, "inactive agent has no resolvable ip, treating as active");
                report.diagnostics.push(format!(
                    "round {round}: agent {} has no resolvable ip",
                    agent.name
                ));
            }
            tallies
                .entry(agent.id.clone())
                .or_insert_with(|| VerificationTally::new(self.rounds))
                .record(inactive && agent.ip.is_some());

            let mut record = agent.clone();
            if record.ip.is_none() {
                record.ip = seen.get(&agent.id).and_then(|a| a.ip.clone());
            }
            seen.insert(agent.id.clone(), record);
        }
        // Absent from this round: cannot be confirmed.
        for (id, tally) in tallies.iter_mut() {
            if !present.contains(id) {
                tally.record(false);
            }
        }
        debug!(round, agents = present.len(), "verification round complete");
    }

    async fn select_candidates(
        &self,
        now: u64,
        report: &mut CampaignReport,
    ) -> ReconcileResult<Vec<VmRecord>> {
        let mut candidates = Vec::new();
        for vm in self.inventory.list_vms(&self.pool).await? {
            let Some(ref ip) = vm.ip else {
                debug!(vm = %vm.name, "vm has no ip, keeping");
                report.skip(&vm.id, SkipReason::NoIp);
                continue;
            };
            if report.active_ips.contains(ip) {
                continue;
            }
            if vm.age_secs(now) <= self.gc.min_safe_age_secs {
                debug!(vm = %vm.label(), age = vm.age_secs(now), "vm too young, keeping");
                report.skip(&vm.id, SkipReason::TooYoung);
                continue;
            }
            candidates.push(vm);
        }
        Ok(candidates)
    }

    async fn retire(
        &self,
        vm: &VmRecord,
        agents_by_ip: &HashMap<String, Vec<AgentRecord>>,
        requested: &mut HashSet<VmId>,
        report: &mut CampaignReport,
    ) {
        let Some(ip) = vm.ip.as_deref() else {
            return;
        };

        if self.probe.reachable(ip).await {
            match self.safety_checks(ip).await {
                Ok(None) => {}
                Ok(Some(reason)) => {
                    info!(vm = %ip, id = %vm.id, %reason, "keeping vm");
                    report.skip(&vm.id, reason);
                    return;
                }
                Err(e) => {
                    warn!(vm = %ip, id = %vm.id, error = %e, "safety check failed, keeping vm");
                    report.skip(&vm.id, SkipReason::ProbeFailed(e.to_string()));
                    return;
                }
            }
            self.archive_config(vm, ip, report).await;
        } else if self.gc.retire_unreachable {
            warn!(vm = %ip, id = %vm.id, "host unreachable, retiring without checks");
        } else {
            info!(vm = %ip, id = %vm.id, "host unreachable, keeping vm");
            report.skip(&vm.id, SkipReason::Unreachable);
            return;
        }

        match self.inventory.list_vms(&self.pool).await {
            Ok(vms) if vms.iter().any(|v| v.id == vm.id) => {}
            Ok(_) => {
                info!(vm = %ip, id = %vm.id, "vm vanished before deletion");
                report.skip(&vm.id, SkipReason::Vanished);
                return;
            }
            Err(e) => {
                warn!(vm = %ip, id = %vm.id, error = %e, "could not re-confirm vm");
                report.skip(&vm.id, SkipReason::DeleteFailed(e.to_string()));
                return;
            }
        }

        if !requested.insert(vm.id.clone()) {
            return;
        }
        if let Err(e) = self.inventory.delete_vm(&vm.id).await {
            warn!(vm = %ip, id = %vm.id, error = %e, "delete failed");
            report.skip(&vm.id, SkipReason::DeleteFailed(e.to_string()));
            return;
        }
        info!(vm = %ip, id = %vm.id, "deleted garbage vm");
        report.deleted.push(vm.id.clone());

        for agent in agents_by_ip.get(ip).into_iter().flatten() {
            match self.backend.remove(agent).await {
                Ok(()) => report.agents_removed.push(agent.id.clone()),
                Err(e) => warn!(agent = %agent.name, error = %e, "failed to remove agent definition"),
            }
        }
    }

    /// Checks in order; the first one that fails names the skip reason.
    async fn safety_checks(&self, host: &str) -> ReconcileResult<Option<SkipReason>> {
        if !self.probe.children_settled(host).await? {
            return Ok(Some(SkipReason::ChildrenRunning));
        }
        if let Some(uptime) = self.probe.agent_uptime(host).await? {
            if uptime < self.gc.min_agent_uptime_secs {
                return Ok(Some(SkipReason::UptimeTooShort));
            }
        }
        if !self.probe.kill_switch_settled(host).await? {
            return Ok(Some(SkipReason::KillSwitchRunning));
        }
        if !self.probe.stop_agent(host).await? {
            return Ok(Some(SkipReason::AgentStillRunning));
        }
        Ok(None)
    }

    async fn archive_config(&self, vm: &VmRecord, host: &str, report: &mut CampaignReport) {
        let config = match self.probe.read_agent_config(host).await {
            Ok(Some(config)) => config,
            Ok(None) => return,
            Err(e) => {
                warn!(vm = %host, error = %e, "could not read agent config");
                report.diagnostics.push(format!("config of {} not archived: {e}", vm.id));
                return;
            }
        };
        let file = self
            .backend
            .host_profile()
            .config_path
            .as_deref()
            .and_then(|p| Path::new(p).file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| ARCHIVE_FALLBACK_NAME.to_string());
        let dir = self.gc.archive_dir.join(&self.pool);
        let path = dir.join(format!("{}-{file}", vm.id));
        let written = async {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(&path, config).await
        }
        .await;
        match written {
            Ok(()) => {
                debug!(path = %path.display(), "archived agent config");
                report.archived.push(path);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not archive agent config");
                report.diagnostics.push(format!("config of {} not archived: {e}", vm.id));
            }
        }
    }
}
