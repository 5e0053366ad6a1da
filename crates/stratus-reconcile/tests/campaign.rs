//! Garbage-collection campaign tests.
//!
//! Every scenario runs in-process against the in-memory inventory and
//! backend, a manual clock, and a scripted host probe. All delays are zero.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use stratus_backend::{BackendKind, MemoryBackend};
use stratus_cloud::MemoryInventory;
use stratus_core::{AgentRecord, AgentStatus, GcConfig, ManualClock, VmRecord, VmState};
use stratus_reconcile::{HostProbe, ReconcileError, ReconcileResult, ReconciliationEngine, SkipReason};

const POOL: &str = "linux";
const NOW: u64 = 100_000;

// ── Fixtures ───────────────────────────────────────────────────────

#[derive(Default)]
struct ScriptedProbe {
    unreachable: HashSet<String>,
    children_busy: HashSet<String>,
    uptime: HashMap<String, u64>,
    kill_switch: HashSet<String>,
    stubborn: HashSet<String>,
    config: Option<String>,
    /// Removes this VM from the inventory when its agent is stopped.
    vanish_on_stop: Option<(Arc<MemoryInventory>, String)>,
    stopped: Mutex<Vec<String>>,
}

impl ScriptedProbe {
    fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }
}

#[async_trait]
impl HostProbe for ScriptedProbe {
    async fn reachable(&self, host: &str) -> bool {
        !self.unreachable.contains(host)
    }

    async fn children_settled(&self, host: &str) -> ReconcileResult<bool> {
        Ok(!self.children_busy.contains(host))
    }

    async fn agent_uptime(&self, host: &str) -> ReconcileResult<Option<u64>> {
        Ok(self.uptime.get(host).copied())
    }

    async fn kill_switch_settled(&self, host: &str) -> ReconcileResult<bool> {
        Ok(!self.kill_switch.contains(host))
    }

    async fn stop_agent(&self, host: &str) -> ReconcileResult<bool> {
        self.stopped.lock().unwrap().push(host.to_string());
        if let Some((ref inventory, ref id)) = self.vanish_on_stop {
            inventory.remove_silently(id);
        }
        Ok(!self.stubborn.contains(host))
    }

    async fn read_agent_config(&self, _host: &str) -> ReconcileResult<Option<String>> {
        Ok(self.config.clone())
    }
}

fn vm(id: &str, ip: Option<&str>, start_time: u64) -> VmRecord {
    VmRecord {
        id: id.into(),
        name: format!("{POOL}-{id}"),
        ip: ip.map(str::to_string),
        start_time,
        pool_tag: Some(POOL.into()),
        state: VmState::Running,
        hostname: None,
    }
}

fn agent(id: &str, ip: Option<&str>, status: AgentStatus) -> AgentRecord {
    AgentRecord {
        id: id.into(),
        name: format!("{POOL}-{}", ip.unwrap_or(id)),
        ip: ip.map(str::to_string),
        status,
        ephemeral: false,
        backend_key: id.into(),
    }
}

fn stale(id: &str) -> AgentRecord {
    AgentRecord {
        ephemeral: true,
        ..agent(id, None, AgentStatus::Offline)
    }
}

fn inventory_with(vms: Vec<VmRecord>) -> Arc<MemoryInventory> {
    let inventory = Arc::new(MemoryInventory::new());
    for vm in vms {
        inventory.insert(vm);
    }
    inventory
}

fn engine(
    backend: &Arc<MemoryBackend>,
    inventory: &Arc<MemoryInventory>,
    probe: &Arc<ScriptedProbe>,
    gc: GcConfig,
) -> ReconciliationEngine {
    ReconciliationEngine::new(POOL, backend.clone(), inventory.clone(), probe.clone(), gc)
        .with_clock(Arc::new(ManualClock::new(NOW)))
}

fn simple_backend() -> Arc<MemoryBackend> {
    Arc::new(MemoryBackend::new(BackendKind::SimpleAgent))
}

// ── Campaign ───────────────────────────────────────────────────────

#[tokio::test]
async fn deletes_vm_of_confirmed_inactive_agent() {
    let backend = simple_backend();
    backend.set_agents(vec![
        agent("a1", Some("10.0.0.1"), AgentStatus::Disabled),
        agent("a2", Some("10.0.0.2"), AgentStatus::Online),
    ]);
    let inventory = inventory_with(vec![
        vm("1", Some("10.0.0.1"), 0),
        vm("2", Some("10.0.0.2"), 0),
    ]);
    let probe = Arc::new(ScriptedProbe::default());

    let report = engine(&backend, &inventory, &probe, GcConfig::immediate())
        .run()
        .await
        .unwrap();

    assert_eq!(report.rounds, 1);
    assert_eq!(report.garbage_agents, vec!["a1".to_string()]);
    assert!(report.active_ips.contains("10.0.0.2"));
    assert_eq!(report.deleted, vec!["1".to_string()]);
    assert_eq!(inventory.deleted(), vec!["1".to_string()]);
    assert_eq!(probe.stopped(), vec!["10.0.0.1".to_string()]);
    assert_eq!(report.agents_removed, vec!["a1".to_string()]);
    assert_eq!(backend.removed(), vec!["a1".to_string()]);
}

#[tokio::test]
async fn agent_active_in_last_round_is_kept() {
    let backend = Arc::new(MemoryBackend::scraped(3));
    let inactive = agent("a1", Some("10.0.0.1"), AgentStatus::Disabled);
    let active = agent("a1", Some("10.0.0.1"), AgentStatus::RunningJob);
    backend.script_listings(vec![vec![inactive.clone()], vec![inactive], vec![active]]);
    let inventory = inventory_with(vec![vm("1", Some("10.0.0.1"), 0)]);
    let probe = Arc::new(ScriptedProbe::default());

    let report = engine(&backend, &inventory, &probe, GcConfig::immediate())
        .run()
        .await
        .unwrap();

    assert_eq!(report.rounds, 3);
    assert_eq!(report.tallies["a1"], 1);
    assert!(report.garbage_agents.is_empty());
    assert!(report.active_ips.contains("10.0.0.1"));
    assert!(report.deleted.is_empty());
    assert!(inventory.deleted().is_empty());
    assert_eq!(backend.cross_checks(), 0);
}

#[tokio::test]
async fn young_vm_survives_perfect_tally() {
    let backend = simple_backend();
    backend.set_agents(vec![agent("a1", Some("10.0.0.1"), AgentStatus::Disabled)]);
    let inventory = inventory_with(vec![vm("1", Some("10.0.0.1"), NOW - 120)]);
    let probe = Arc::new(ScriptedProbe::default());
    let gc = GcConfig {
        min_safe_age_secs: 300,
        ..GcConfig::immediate()
    };

    let report = engine(&backend, &inventory, &probe, gc).run().await.unwrap();

    assert_eq!(report.garbage_agents, vec!["a1".to_string()]);
    assert!(report.candidates.is_empty());
    assert_eq!(report.skip_reason("1"), Some(&SkipReason::TooYoung));
    assert!(inventory.deleted().is_empty());
    assert!(probe.stopped().is_empty());
}

#[tokio::test]
async fn activity_cross_check_restores_busy_candidates() {
    let backend = Arc::new(MemoryBackend::scraped(2));
    backend.set_agents(vec![
        agent("a1", Some("10.0.0.1"), AgentStatus::Disabled),
        agent("a2", Some("10.0.0.2"), AgentStatus::Disabled),
    ]);
    backend.set_busy(&["a1"]);
    let inventory = inventory_with(vec![
        vm("1", Some("10.0.0.1"), 0),
        vm("2", Some("10.0.0.2"), 0),
    ]);
    let probe = Arc::new(ScriptedProbe::default());

    let report = engine(&backend, &inventory, &probe, GcConfig::immediate())
        .run()
        .await
        .unwrap();

    assert_eq!(backend.cross_checks(), 1);
    assert_eq!(report.restored, vec!["a1".to_string()]);
    assert_eq!(report.garbage_agents, vec!["a2".to_string()]);
    assert!(report.active_ips.contains("10.0.0.1"));
    assert_eq!(inventory.deleted(), vec!["2".to_string()]);
}

#[tokio::test]
async fn candidate_reactivated_in_fresh_listing_is_restored() {
    let backend = simple_backend();
    let inactive = agent("a1", Some("10.0.0.1"), AgentStatus::Disabled);
    let online = agent("a1", Some("10.0.0.1"), AgentStatus::Online);
    backend.script_listings(vec![vec![inactive], vec![online]]);
    let inventory = inventory_with(vec![vm("1", Some("10.0.0.1"), 0)]);
    let probe = Arc::new(ScriptedProbe::default());

    let report = engine(&backend, &inventory, &probe, GcConfig::immediate())
        .run()
        .await
        .unwrap();

    assert_eq!(report.restored, vec!["a1".to_string()]);
    assert!(report.garbage_agents.is_empty());
    assert!(inventory.deleted().is_empty());
}

#[tokio::test]
async fn each_vm_is_deleted_at_most_once() {
    let backend = simple_backend();
    // Two agent definitions bound to the same VM.
    backend.set_agents(vec![
        agent("a1", Some("10.0.0.1"), AgentStatus::Disabled),
        agent("a1-old", Some("10.0.0.1"), AgentStatus::Offline),
        agent("a3", Some("10.0.0.3"), AgentStatus::Disabled),
    ]);
    let inventory = inventory_with(vec![
        vm("1", Some("10.0.0.1"), 0),
        vm("3", Some("10.0.0.3"), 0),
    ]);
    let probe = Arc::new(ScriptedProbe::default());

    let report = engine(&backend, &inventory, &probe, GcConfig::immediate())
        .run()
        .await
        .unwrap();

    let mut deleted = inventory.deleted();
    deleted.sort();
    assert_eq!(deleted, vec!["1".to_string(), "3".to_string()]);
    assert_eq!(report.deleted.len(), 2);
    let mut removed = backend.removed();
    removed.sort();
    assert_eq!(removed, vec!["a1", "a1-old", "a3"]);
}

#[tokio::test]
async fn stale_ephemeral_agents_are_removed_to_fixed_point() {
    let backend = simple_backend();
    let keeper = agent("a2", Some("10.0.0.2"), AgentStatus::Online);
    backend.script_listings(vec![
        vec![stale("s1"), keeper.clone()],
        vec![stale("s2"), keeper.clone()],
        vec![keeper],
    ]);
    let inventory = inventory_with(vec![vm("2", Some("10.0.0.2"), 0)]);
    let probe = Arc::new(ScriptedProbe::default());

    let report = engine(&backend, &inventory, &probe, GcConfig::immediate())
        .run()
        .await
        .unwrap();

    assert_eq!(report.stale_removed, vec!["s1".to_string(), "s2".to_string()]);
    assert!(!report.tallies.contains_key("s1"));
    assert!(inventory.deleted().is_empty());
}

#[tokio::test]
async fn enumeration_gives_up_after_bound() {
    let backend = simple_backend();
    backend.script_listings(vec![
        vec![stale("s1")],
        vec![stale("s2")],
        vec![stale("s3")],
    ]);
    let inventory = inventory_with(vec![]);
    let probe = Arc::new(ScriptedProbe::default());
    let gc = GcConfig {
        max_reenumerations: 1,
        ..GcConfig::immediate()
    };

    let report = engine(&backend, &inventory, &probe, gc).run().await.unwrap();

    assert_eq!(report.stale_removed, vec!["s1".to_string()]);
    assert!(report.diagnostics.iter().any(|d| d.contains("re-enumerations")));
}

#[tokio::test]
async fn vm_without_ip_is_kept() {
    let backend = simple_backend();
    let inventory = inventory_with(vec![vm("1", None, 0)]);
    let probe = Arc::new(ScriptedProbe::default());

    let report = engine(&backend, &inventory, &probe, GcConfig::immediate())
        .run()
        .await
        .unwrap();

    assert_eq!(report.skip_reason("1"), Some(&SkipReason::NoIp));
    assert!(inventory.deleted().is_empty());
}

#[tokio::test]
async fn inactive_agent_without_ip_counts_as_active() {
    let backend = Arc::new(MemoryBackend::scraped(2));
    backend.set_agents(vec![agent("a1", None, AgentStatus::Disabled)]);
    let inventory = inventory_with(vec![]);
    let probe = Arc::new(ScriptedProbe::default());

    let report = engine(&backend, &inventory, &probe, GcConfig::immediate())
        .run()
        .await
        .unwrap();

    assert_eq!(report.tallies["a1"], -2);
    assert!(report.garbage_agents.is_empty());
    assert!(report.diagnostics.iter().any(|d| d.contains("no resolvable ip")));
}

#[tokio::test]
async fn failed_safety_checks_keep_the_vm() {
    // No agents at all: every VM is unbacked.
    let backend = simple_backend();
    let inventory = inventory_with(vec![
        vm("1", Some("10.0.0.1"), 0),
        vm("2", Some("10.0.0.2"), 0),
        vm("3", Some("10.0.0.3"), 0),
        vm("4", Some("10.0.0.4"), 0),
        vm("5", Some("10.0.0.5"), 0),
        vm("6", Some("10.0.0.6"), 0),
    ]);
    let mut probe = ScriptedProbe::default();
    probe.unreachable.insert("10.0.0.1".into());
    probe.children_busy.insert("10.0.0.2".into());
    probe.uptime.insert("10.0.0.3".into(), 60);
    probe.kill_switch.insert("10.0.0.4".into());
    probe.stubborn.insert("10.0.0.5".into());
    probe.uptime.insert("10.0.0.6".into(), 3_600);
    let probe = Arc::new(probe);

    let report = engine(&backend, &inventory, &probe, GcConfig::immediate())
        .run()
        .await
        .unwrap();

    assert_eq!(report.skip_reason("1"), Some(&SkipReason::Unreachable));
    assert_eq!(report.skip_reason("2"), Some(&SkipReason::ChildrenRunning));
    assert_eq!(report.skip_reason("3"), Some(&SkipReason::UptimeTooShort));
    assert_eq!(report.skip_reason("4"), Some(&SkipReason::KillSwitchRunning));
    assert_eq!(report.skip_reason("5"), Some(&SkipReason::AgentStillRunning));
    assert_eq!(inventory.deleted(), vec!["6".to_string()]);
    // Only hosts that passed the first three checks were asked to stop.
    assert_eq!(probe.stopped(), vec!["10.0.0.5".to_string(), "10.0.0.6".to_string()]);
}

#[tokio::test]
async fn unreachable_hosts_can_be_retired_when_configured() {
    let backend = simple_backend();
    let inventory = inventory_with(vec![vm("1", Some("10.0.0.1"), 0)]);
    let mut probe = ScriptedProbe::default();
    probe.unreachable.insert("10.0.0.1".into());
    let probe = Arc::new(probe);
    let gc = GcConfig {
        retire_unreachable: true,
        ..GcConfig::immediate()
    };

    let report = engine(&backend, &inventory, &probe, gc).run().await.unwrap();

    assert_eq!(report.deleted, vec!["1".to_string()]);
    assert!(probe.stopped().is_empty());
}

#[tokio::test]
async fn vm_that_vanishes_before_deletion_is_not_deleted() {
    let backend = simple_backend();
    let inventory = inventory_with(vec![vm("1", Some("10.0.0.1"), 0)]);
    let probe = Arc::new(ScriptedProbe {
        vanish_on_stop: Some((inventory.clone(), "1".into())),
        ..ScriptedProbe::default()
    });

    let report = engine(&backend, &inventory, &probe, GcConfig::immediate())
        .run()
        .await
        .unwrap();

    assert_eq!(report.skip_reason("1"), Some(&SkipReason::Vanished));
    assert!(inventory.deleted().is_empty());
}

#[tokio::test]
async fn agent_config_is_archived_before_deletion() {
    let dir = tempfile::tempdir().unwrap();
    let backend = simple_backend();
    let inventory = inventory_with(vec![vm("7", Some("10.0.0.7"), 0)]);
    let probe = Arc::new(ScriptedProbe {
        config: Some("<agent id=\"7\"/>".into()),
        ..ScriptedProbe::default()
    });
    let gc = GcConfig {
        archive_dir: dir.path().to_path_buf(),
        ..GcConfig::immediate()
    };

    let report = engine(&backend, &inventory, &probe, gc).run().await.unwrap();

    let archived = dir.path().join(POOL).join("7-agent.cfg");
    assert_eq!(report.archived, vec![archived.clone()]);
    assert_eq!(std::fs::read_to_string(archived).unwrap(), "<agent id=\"7\"/>");
    assert_eq!(report.deleted, vec!["7".to_string()]);
}

#[tokio::test]
async fn inventory_failure_aborts_before_any_deletion() {
    let backend = simple_backend();
    backend.set_agents(vec![agent("a1", Some("10.0.0.1"), AgentStatus::Disabled)]);
    let inventory = inventory_with(vec![vm("1", Some("10.0.0.1"), 0)]);
    inventory.fail_next_lists(1);
    let probe = Arc::new(ScriptedProbe::default());

    let result = engine(&backend, &inventory, &probe, GcConfig::immediate()).run().await;

    assert!(matches!(result, Err(ReconcileError::Cloud(_))));
    assert!(inventory.deleted().is_empty());
}

// ── Drain protocol ─────────────────────────────────────────────────

#[tokio::test]
async fn drain_oldest_picks_by_start_time() {
    let backend = simple_backend();
    backend.set_agents(vec![
        agent("a1", Some("10.0.0.1"), AgentStatus::Online),
        agent("a2", Some("10.0.0.2"), AgentStatus::Online),
    ]);
    let vms = vec![vm("1", Some("10.0.0.1"), 500), vm("2", Some("10.0.0.2"), 100)];
    let inventory = inventory_with(vms.clone());
    let probe = Arc::new(ScriptedProbe::default());

    let drained = engine(&backend, &inventory, &probe, GcConfig::immediate())
        .drain_oldest(&vms, 1)
        .await
        .unwrap();

    assert_eq!(drained, vec!["a2".to_string()]);
    assert_eq!(backend.drained(), vec!["a2".to_string()]);
    assert!(inventory.deleted().is_empty());
}

#[tokio::test]
async fn drain_vm_drains_only_agents_bound_to_its_ip() {
    let backend = simple_backend();
    backend.set_agents(vec![
        agent("a1", Some("10.0.0.1"), AgentStatus::Online),
        agent("a1b", Some("10.0.0.1"), AgentStatus::Online),
        agent("a2", Some("10.0.0.2"), AgentStatus::Online),
    ]);
    let target = vm("1", Some("10.0.0.1"), 0);
    let inventory = inventory_with(vec![target.clone(), vm("2", Some("10.0.0.2"), 0)]);
    let probe = Arc::new(ScriptedProbe::default());

    let drained = engine(&backend, &inventory, &probe, GcConfig::immediate())
        .drain_vm(&target)
        .await
        .unwrap();

    assert_eq!(drained, vec!["a1".to_string(), "a1b".to_string()]);
    assert_eq!(backend.drained(), drained);
    assert!(backend.removed().is_empty());
    assert!(inventory.deleted().is_empty());
}

#[tokio::test]
async fn drain_vm_without_bound_agent_is_a_no_op() {
    let backend = simple_backend();
    backend.set_agents(vec![agent("a2", Some("10.0.0.2"), AgentStatus::Online)]);
    let inventory = inventory_with(vec![]);
    let probe = Arc::new(ScriptedProbe::default());
    let engine = engine(&backend, &inventory, &probe, GcConfig::immediate());

    assert!(engine.drain_vm(&vm("1", Some("10.0.0.1"), 0)).await.unwrap().is_empty());
    assert!(engine.drain_vm(&vm("3", None, 0)).await.unwrap().is_empty());
    assert!(backend.drained().is_empty());
}

#[tokio::test]
async fn hunt_drains_vms_at_least_age_days_old() {
    let day = 86_400;
    let now = 40 * day;
    let backend = simple_backend();
    backend.set_agents(vec![
        agent("old", Some("10.0.0.1"), AgentStatus::Online),
        agent("exact", Some("10.0.0.2"), AgentStatus::Online),
        agent("new", Some("10.0.0.3"), AgentStatus::Online),
    ]);
    let inventory = inventory_with(vec![
        vm("1", Some("10.0.0.1"), now - 10 * day),
        vm("2", Some("10.0.0.2"), now - 5 * day),
        vm("3", Some("10.0.0.3"), now - day),
    ]);
    let probe = Arc::new(ScriptedProbe::default());
    let engine = ReconciliationEngine::new(
        POOL,
        backend.clone(),
        inventory.clone(),
        probe.clone(),
        GcConfig::immediate(),
    )
    .with_clock(Arc::new(ManualClock::new(now)));

    assert!(engine.hunt(30, 10).await.unwrap().is_empty());
    assert_eq!(
        engine.hunt(5, 10).await.unwrap(),
        vec!["old".to_string(), "exact".to_string()]
    );
    assert_eq!(engine.hunt(5, 1).await.unwrap(), vec!["old".to_string()]);
}

#[tokio::test]
async fn forget_vm_removes_bound_agents() {
    let backend = simple_backend();
    backend.set_agents(vec![
        agent("a1", Some("10.0.0.1"), AgentStatus::Online),
        agent("a2", Some("10.0.0.2"), AgentStatus::Online),
    ]);
    let inventory = inventory_with(vec![]);
    let probe = Arc::new(ScriptedProbe::default());
    let target = vm("1", Some("10.0.0.1"), 0);

    let removed = engine(&backend, &inventory, &probe, GcConfig::immediate())
        .forget_vm(&target)
        .await
        .unwrap();

    assert_eq!(removed, vec!["a1".to_string()]);
    assert_eq!(backend.removed(), vec!["a1".to_string()]);
}

#[tokio::test]
async fn reap_removes_disabled_and_orphaned_resources() {
    let backend = simple_backend();
    backend.set_agents(vec![
        agent("disabled", Some("10.0.0.1"), AgentStatus::Disabled),
        agent("busy", Some("10.0.0.2"), AgentStatus::RunningJob),
        agent("orphan", Some("10.0.0.9"), AgentStatus::Offline),
        agent("young", Some("10.0.0.4"), AgentStatus::Disabled),
    ]);
    let inventory = inventory_with(vec![
        vm("1", Some("10.0.0.1"), 0),
        vm("2", Some("10.0.0.2"), 0),
        vm("3", Some("10.0.0.3"), 0),
        vm("4", Some("10.0.0.4"), NOW - 10),
    ]);
    let probe = Arc::new(ScriptedProbe::default());

    let report = engine(&backend, &inventory, &probe, GcConfig::immediate())
        .reap()
        .await
        .unwrap();

    let mut deleted = report.deleted.clone();
    deleted.sort();
    assert_eq!(deleted, vec!["1".to_string(), "3".to_string()]);
    assert_eq!(report.skip_reason("4"), Some(&SkipReason::TooYoung));
    let mut removed = backend.removed();
    removed.sort();
    assert_eq!(removed, vec!["disabled", "orphan"]);
    assert!(probe.stopped().is_empty());
}
