//! Scripted in-memory [`BackendAdapter`] for tests and dry runs.
//!
//! Listings can be queued so successive `list_agents` calls observe a
//! changing backend; the last queued listing repeats. Removing an agent
//! drops it from every queued listing.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use stratus_core::{AgentId, AgentRecord, AgentStatus, VmId, VmRecord};

use crate::adapter::{AgentHostProfile, BackendAdapter, BackendKind};
use crate::error::{BackendError, BackendResult};

pub struct MemoryBackend {
    kind: BackendKind,
    rounds: u32,
    cross_check: bool,
    listings: Mutex<VecDeque<Vec<AgentRecord>>>,
    busy: Mutex<Vec<AgentId>>,
    failing_registrations: Mutex<HashSet<String>>,
    registered: Mutex<Vec<VmId>>,
    drained: Mutex<Vec<AgentId>>,
    removed: Mutex<Vec<AgentId>>,
    cross_checks: AtomicU32,
    list_calls: AtomicU32,
}

impl MemoryBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            rounds: 1,
            cross_check: false,
            listings: Mutex::new(VecDeque::from([Vec::new()])),
            busy: Mutex::new(Vec::new()),
            failing_registrations: Mutex::new(HashSet::new()),
            registered: Mutex::new(Vec::new()),
            drained: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            cross_checks: AtomicU32::new(0),
            list_calls: AtomicU32::new(0),
        }
    }

    /// Behave like a scraped backend: `rounds` verification rounds and a
    /// dashboard cross-check.
    pub fn scraped(rounds: u32) -> Self {
        Self {
            rounds,
            cross_check: true,
            ..Self::new(BackendKind::EphemeralScrapedAgent)
        }
    }

    /// One listing that every call returns.
    pub fn set_agents(&self, agents: Vec<AgentRecord>) {
        self.script_listings(vec![agents]);
    }

    /// Successive listings; the last one repeats.
    pub fn script_listings(&self, listings: Vec<Vec<AgentRecord>>) {
        if let Ok(mut queue) = self.listings.lock() {
            *queue = listings.into();
            if queue.is_empty() {
                queue.push_back(Vec::new());
            }
        }
    }

    /// Agents the activity cross-check reports busy.
    pub fn set_busy(&self, ids: &[&str]) {
        if let Ok(mut busy) = self.busy.lock() {
            *busy = ids.iter().map(|s| s.to_string()).collect();
        }
    }

    pub fn fail_registration_for(&self, ip: &str) {
        if let Ok(mut failing) = self.failing_registrations.lock() {
            failing.insert(ip.to_string());
        }
    }

    pub fn registered(&self) -> Vec<VmId> {
        self.registered.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn drained(&self) -> Vec<AgentId> {
        self.drained.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn removed(&self) -> Vec<AgentId> {
        self.removed.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn cross_checks(&self) -> u32 {
        self.cross_checks.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn poisoned() -> BackendError {
        BackendError::Unavailable("memory backend lock poisoned".into())
    }
}

#[async_trait]
impl BackendAdapter for MemoryBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn list_agents(&self) -> BackendResult<Vec<AgentRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut queue = self.listings.lock().map_err(|_| Self::poisoned())?;
        let listing = if queue.len() > 1 {
            queue.pop_front().unwrap_or_default()
        } else {
            queue.front().cloned().unwrap_or_default()
        };
        Ok(listing)
    }

    fn is_inactive(&self, agent: &AgentRecord) -> bool {
        matches!(agent.status, AgentStatus::Disabled | AgentStatus::Offline)
    }

    async fn register(&self, vm: &VmRecord) -> BackendResult<()> {
        let ip = vm.ip.clone().unwrap_or_default();
        let failing = self.failing_registrations.lock().map_err(|_| Self::poisoned())?;
        if failing.contains(&ip) {
            return Err(BackendError::RegistrationFailed {
                agent: vm.name.clone(),
                reason: "scripted failure".into(),
            });
        }
        drop(failing);
        self.registered.lock().map_err(|_| Self::poisoned())?.push(vm.id.clone());
        Ok(())
    }

    async fn drain(&self, agent: &AgentRecord) -> BackendResult<()> {
        self.drained.lock().map_err(|_| Self::poisoned())?.push(agent.id.clone());
        Ok(())
    }

    async fn remove(&self, agent: &AgentRecord) -> BackendResult<()> {
        self.removed.lock().map_err(|_| Self::poisoned())?.push(agent.id.clone());
        let mut queue = self.listings.lock().map_err(|_| Self::poisoned())?;
        for listing in queue.iter_mut() {
            listing.retain(|a| a.id != agent.id);
        }
        Ok(())
    }

    fn default_rounds(&self) -> u32 {
        self.rounds
    }

    fn supports_cross_check(&self) -> bool {
        self.cross_check
    }

    async fn cross_check_activity(&self, candidates: &[AgentRecord]) -> BackendResult<Vec<AgentId>> {
        self.cross_checks.fetch_add(1, Ordering::SeqCst);
        let busy = self.busy.lock().map_err(|_| Self::poisoned())?;
        Ok(candidates
            .iter()
            .filter(|a| busy.contains(&a.id))
            .map(|a| a.id.clone())
            .collect())
    }

    fn host_profile(&self) -> AgentHostProfile {
        AgentHostProfile {
            process_pattern: "agent".into(),
            main_process: "java".into(),
            stop_command: "agent stop".into(),
            config_path: Some("./agent.cfg".into()),
            kill_switch_pattern: "self-disable".into(),
        }
    }
}
