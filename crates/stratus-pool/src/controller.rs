//! Pool delta and partitioned provisioning.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use stratus_cloud::{CloudInventory, TemplateRef, vm_name};
use stratus_core::{AgentId, PoolConfig, PoolDelta, VmRecord, VmState, epoch_secs};
use stratus_reconcile::ReconciliationEngine;
use stratus_stages::{BundleScope, Stage, validate};

use crate::error::{PoolError, PoolResult};
use crate::outcome::{PoolOutcome, RunResults, WorkerReport};
use crate::provisioner::Provisioner;

/// Split a positive `delta` into batches of at most `batch_size` that sum
/// to `delta`. A non-positive delta yields no batches.
pub fn partition(delta: PoolDelta, batch_size: u32) -> Vec<u32> {
    let batch_size = u64::from(batch_size.max(1));
    let mut remaining = u64::try_from(delta).unwrap_or(0);
    let mut batches = Vec::new();
    while remaining > 0 {
        let take = remaining.min(batch_size);
        // take <= batch_size, which came from a u32.
        batches.push(take as u32);
        remaining -= take;
    }
    batches
}

pub struct PoolController {
    config: Arc<PoolConfig>,
    inventory: Arc<dyn CloudInventory>,
    provisioner: Arc<Provisioner>,
}

impl PoolController {
    pub fn new(config: PoolConfig, inventory: Arc<dyn CloudInventory>, provisioner: Provisioner) -> Self {
        Self {
            config: Arc::new(config),
            inventory,
            provisioner: Arc::new(provisioner),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    pub async fn vms(&self) -> PoolResult<Vec<VmRecord>> {
        Ok(self.inventory.list_vms(&self.config.name).await?)
    }

    /// Configured count minus observed VMs; negative when over size.
    pub async fn delta(&self) -> PoolResult<PoolDelta> {
        let observed = self.vms().await?.len();
        Ok(i64::from(self.config.count) - observed as i64)
    }

    /// Create, provision and optionally register enough VMs to close the
    /// delta. One worker per batch; all workers are joined before returning.
    ///
    /// An invalid stage list or an unresolvable template is fatal and
    /// reported before any VM is created. Every other failure is recorded
    /// in the outcome.
    pub async fn fill(&self, batch_size: Option<u32>, register: bool) -> PoolResult<PoolOutcome> {
        if batch_size == Some(0) {
            return Err(PoolError::InvalidPartition(0));
        }
        let stages = Arc::new(Stage::from_specs(&self.config.provision));
        validate(&stages)?;
        let delta = self.delta().await?;
        if delta <= 0 {
            info!(pool = %self.config.name, delta, "pool is already at size");
            return Ok(PoolOutcome::default());
        }
        let whole = u32::try_from(delta).unwrap_or(u32::MAX);
        let batches = partition(delta, batch_size.unwrap_or(whole));
        let template = self
            .inventory
            .resolve_template(&self.config.template_name)
            .await?;
        info!(
            pool = %self.config.name,
            delta,
            workers = batches.len(),
            template = %template.name,
            "pool delta"
        );

        let mut set = JoinSet::new();
        for (index, &batch) in batches.iter().enumerate() {
            let worker = Worker {
                index,
                batch,
                pool: self.config.name.clone(),
                prefix: self.config.vm_name_prefix.clone(),
                template: template.clone(),
                inventory: self.inventory.clone(),
                provisioner: self.provisioner.clone(),
                stages: stages.clone(),
                scope: BundleScope::for_worker(&self.config.work_dir, index),
                stagger: Duration::from_secs(self.config.timing.worker_stagger_secs),
                wait_count: self.config.timing.instantiation_wait_count,
                wait_poll: Duration::from_secs(self.config.timing.instantiation_poll_secs),
                register,
            };
            set.spawn(worker.run());
        }

        let mut outcome = PoolOutcome {
            batches: batches.clone(),
            ..PoolOutcome::default()
        };
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(report) => outcome.reports.push(report),
                Err(e) => error!(pool = %self.config.name, error = %e, "provisioning worker crashed"),
            }
        }
        outcome.reports.sort_by_key(|r| r.worker);
        outcome.crashed = (0..batches.len())
            .filter(|i| !outcome.reports.iter().any(|r| r.worker == *i))
            .collect();

        info!(
            pool = %self.config.name,
            succeeded = outcome.succeeded(),
            failed = outcome.failed(),
            crashed = outcome.crashed.len(),
            "provisioning finished"
        );
        Ok(outcome)
    }

    /// Run the provision stages again on existing VMs.
    pub async fn reprovision(&self, vms: Vec<VmRecord>) -> PoolResult<RunResults> {
        let stages = Stage::from_specs(&self.config.provision);
        self.run_stages(vms, &stages).await
    }

    /// Run the check stages on existing VMs.
    pub async fn check(&self, vms: Vec<VmRecord>) -> PoolResult<RunResults> {
        let stages = Stage::from_specs(&self.config.check);
        self.run_stages(vms, &stages).await
    }

    /// Run an arbitrary stage list without touching the backend. The list
    /// is validated before any host is contacted.
    pub async fn run_stages(&self, vms: Vec<VmRecord>, stages: &[Stage]) -> PoolResult<RunResults> {
        validate(stages)?;
        let scope = BundleScope::for_worker(&self.config.work_dir, 0);
        Ok(self.provisioner.run_stages(vms, stages, &scope).await)
    }

    pub async fn reregister(&self, vms: Vec<VmRecord>) -> RunResults {
        self.provisioner.register(vms).await
    }

    /// When the pool is over size and surplus draining is enabled, drain
    /// the agents of the oldest surplus VMs.
    pub async fn retire_surplus(&self, engine: &ReconciliationEngine) -> PoolResult<Vec<AgentId>> {
        if !self.config.garbage_collection.drain_surplus {
            return Ok(Vec::new());
        }
        let vms = self.vms().await?;
        let surplus = vms.len().saturating_sub(self.config.count as usize);
        if surplus == 0 {
            return Ok(Vec::new());
        }
        info!(pool = %self.config.name, surplus, "draining surplus agents");
        Ok(engine.drain_oldest(&vms, surplus).await?)
    }
}

// ── Worker ─────────────────────────────────────────────────────────

struct Worker {
    index: usize,
    batch: u32,
    pool: String,
    prefix: Option<String>,
    template: TemplateRef,
    inventory: Arc<dyn CloudInventory>,
    provisioner: Arc<Provisioner>,
    stages: Arc<Vec<Stage>>,
    scope: BundleScope,
    stagger: Duration,
    wait_count: u32,
    wait_poll: Duration,
    register: bool,
}

impl Worker {
    async fn run(self) -> WorkerReport {
        tokio::time::sleep(self.stagger * self.index as u32).await;
        let mut report = WorkerReport {
            worker: self.index,
            batch: self.batch,
            ..WorkerReport::default()
        };
        info!(pool = %self.pool, worker = self.index, batch = self.batch, "worker starting");

        let created = self.create(&mut report).await;
        let settled = self.wait_settled(created).await;
        let (running, broken): (Vec<VmRecord>, Vec<VmRecord>) = settled
            .into_iter()
            .partition(|vm| vm.state == VmState::Running);
        for vm in broken {
            warn!(vm = %vm.name, id = %vm.id, state = %vm.state, "vm did not come up");
            self.discard(&vm).await;
            report.results.failed.push(vm);
        }

        let provisioned = self
            .provisioner
            .run_stages(running, &self.stages, &self.scope)
            .await;
        for vm in &provisioned.failed {
            self.discard(vm).await;
        }
        report.results.failed.extend(provisioned.failed);

        if self.register {
            let registered = self.provisioner.register(provisioned.succeeded).await;
            report.results.succeeded = registered.succeeded;
            report.results.failed.extend(registered.failed);
        } else {
            report.results.succeeded = provisioned.succeeded;
        }

        info!(
            pool = %self.pool,
            worker = self.index,
            succeeded = report.results.succeeded.len(),
            failed = report.results.failed.len(),
            "worker finished"
        );
        report
    }

    async fn create(&self, report: &mut WorkerReport) -> Vec<VmRecord> {
        let mut created = Vec::new();
        for i in 0..self.batch {
            let seed = format!("{}-{}-{}-{i}", epoch_secs(), std::process::id(), self.index);
            let name = vm_name(self.prefix.as_deref(), &self.pool, &seed);
            match self.inventory.create_vm(&self.template, &name, &self.pool).await {
                Ok(vm) => {
                    info!(vm = %vm.name, id = %vm.id, "instantiated vm");
                    created.push(vm);
                }
                Err(e) => {
                    warn!(vm = %name, error = %e, "failed to instantiate vm");
                    report.errors.push(e.to_string());
                }
            }
        }
        created
    }

    /// Poll until every VM is running or failed. After the budget runs
    /// out the last observed records are returned as they are.
    async fn wait_settled(&self, mut vms: Vec<VmRecord>) -> Vec<VmRecord> {
        for attempt in 1..=self.wait_count.max(1) {
            if vms.iter().all(|vm| vm.state.is_settled()) {
                return vms;
            }
            tokio::time::sleep(self.wait_poll).await;
            for vm in vms.iter_mut().filter(|vm| !vm.state.is_settled()) {
                match self.inventory.get_vm(&vm.id).await {
                    Ok(fresh) => *vm = fresh,
                    Err(e) => debug!(id = %vm.id, attempt, error = %e, "status poll failed"),
                }
            }
        }
        let pending = vms.iter().filter(|vm| !vm.state.is_settled()).count();
        if pending > 0 {
            warn!(pool = %self.pool, pending, "instantiation wait exhausted, continuing with running vms");
        }
        vms
    }

    async fn discard(&self, vm: &VmRecord) {
        match self.inventory.delete_vm(&vm.id).await {
            Ok(()) => info!(vm = %vm.label(), id = %vm.id, "deleted unprovisioned vm"),
            Err(e) => warn!(vm = %vm.label(), id = %vm.id, error = %e, "failed to delete vm"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_sums_to_delta() {
        assert_eq!(partition(5, 2), vec![2, 2, 1]);
        assert_eq!(partition(4, 4), vec![4]);
        assert_eq!(partition(3, 10), vec![3]);
        for (delta, batch) in [(1, 1), (17, 3), (100, 7)] {
            let batches = partition(delta, batch);
            assert_eq!(batches.iter().map(|&b| i64::from(b)).sum::<i64>(), delta);
            assert!(batches.iter().all(|&b| b >= 1 && b <= batch));
        }
    }

    #[test]
    fn non_positive_delta_has_no_batches() {
        assert!(partition(0, 3).is_empty());
        assert!(partition(-4, 3).is_empty());
    }

    #[test]
    fn zero_batch_size_is_treated_as_one() {
        assert_eq!(partition(3, 0), vec![1, 1, 1]);
    }
}
