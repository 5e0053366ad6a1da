//! Runs stage lists on VMs and registers them with the backend.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use stratus_backend::BackendAdapter;
use stratus_core::{Tunables, VmRecord};
use stratus_stages::{BundleScope, RemoteExecutor, Stage, StageBundle, StageError};

use crate::outcome::RunResults;

/// Sequential per-VM provisioning. One VM's stages finish, or exhaust
/// their attempts, before the next VM starts.
pub struct Provisioner {
    backend: Arc<dyn BackendAdapter>,
    executor: RemoteExecutor,
    attempts: u32,
    backoff: Duration,
}

impl Provisioner {
    pub fn new(backend: Arc<dyn BackendAdapter>, executor: RemoteExecutor, tunables: &Tunables) -> Self {
        Self {
            backend,
            executor,
            attempts: tunables.provision_attempts.max(1),
            backoff: Duration::from_secs(tunables.provision_backoff_secs),
        }
    }

    pub fn backend(&self) -> &Arc<dyn BackendAdapter> {
        &self.backend
    }

    /// Wait for every VM to answer, then run `stages` on each reachable one.
    /// Unreachable VMs land in `failed`.
    pub async fn run_stages(&self, vms: Vec<VmRecord>, stages: &[Stage], scope: &BundleScope) -> RunResults {
        let mut results = RunResults::default();
        let (ready, unreachable) = self.executor.await_ready(vms).await;
        for vm in unreachable {
            warn!(vm = %vm.label(), id = %vm.id, "vm never became reachable");
            results.failed.push(vm);
        }

        let total = ready.len();
        for (i, vm) in ready.into_iter().enumerate() {
            if self.provision_one(&vm, stages, scope).await {
                info!(vm = %vm.label(), id = %vm.id, remaining = total - i - 1, "vm provisioned");
                results.succeeded.push(vm);
            } else {
                error!(vm = %vm.label(), id = %vm.id, attempts = self.attempts, "provisioning failed");
                results.failed.push(vm);
            }
        }
        results
    }

    async fn provision_one(&self, vm: &VmRecord, stages: &[Stage], scope: &BundleScope) -> bool {
        let Some(ip) = vm.ip.as_deref() else {
            return false;
        };
        if stages.is_empty() {
            return true;
        }
        for attempt in 1..=self.attempts {
            // Recompiled per attempt so a half-written bundle is never reused.
            let outcome = match StageBundle::compile(stages, scope) {
                Ok(bundle) => self.executor.provision(&bundle, ip).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(outcome) if outcome.is_success() => return true,
                Ok(outcome) => warn!(vm = %ip, attempt, ?outcome, "stage runner failed"),
                Err(e @ StageError::InvalidStageDefinition(_)) => {
                    error!(vm = %ip, error = %e, "stage list is invalid");
                    return false;
                }
                Err(e) => warn!(vm = %ip, attempt, error = %e, "provisioning attempt failed"),
            }
            if attempt < self.attempts {
                tokio::time::sleep(self.backoff).await;
            }
        }
        false
    }

    /// Register each VM. Failures are reported, never deleted.
    pub async fn register(&self, vms: Vec<VmRecord>) -> RunResults {
        let mut results = RunResults::default();
        for vm in vms {
            match self.backend.register(&vm).await {
                Ok(()) => {
                    info!(vm = %vm.label(), id = %vm.id, "registered agent");
                    results.succeeded.push(vm);
                }
                Err(e) => {
                    error!(vm = %vm.label(), id = %vm.id, error = %e, "registration failed");
                    results.failed.push(vm);
                }
            }
        }
        results
    }
}
