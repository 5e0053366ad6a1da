//! Readiness polling, bundle transfer, and runner execution for one host.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use stratus_core::{Tunables, VmRecord};

use crate::bundle::{RUNNER_SCRIPT, StageBundle};
use crate::error::{StageError, StageResult};
use crate::remote::RemoteShell;

/// Result of running a bundle's runner on a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Success,
    /// The runner exited nonzero.
    ProvisionFailure { exit_code: i32 },
}

impl ProvisionOutcome {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

/// Drives a [`RemoteShell`] for the provisioning steps.
#[derive(Clone)]
pub struct RemoteExecutor {
    shell: Arc<dyn RemoteShell>,
    ready_attempts: u32,
    ready_backoff: Duration,
}

impl RemoteExecutor {
    pub fn new(shell: Arc<dyn RemoteShell>, tunables: &Tunables) -> Self {
        Self {
            shell,
            ready_attempts: tunables.ssh_ready_attempts.max(1),
            ready_backoff: Duration::from_secs(tunables.ssh_ready_backoff_secs),
        }
    }

    pub fn shell(&self) -> &Arc<dyn RemoteShell> {
        &self.shell
    }

    /// Poll `uptime` until the host answers or the budget runs out.
    pub async fn wait_ready(&self, host: &str) -> bool {
        for attempt in 1..=self.ready_attempts {
            match self.shell.run(host, "uptime").await {
                Ok(out) if out.success() => {
                    debug!(host, attempt, "host is reachable");
                    return true;
                }
                Ok(out) => debug!(host, attempt, status = out.status, "host not ready"),
                Err(e) => debug!(host, attempt, error = %e, "host not ready"),
            }
            if attempt < self.ready_attempts {
                tokio::time::sleep(self.ready_backoff).await;
            }
        }
        warn!(host, attempts = self.ready_attempts, "host never became reachable");
        false
    }

    /// Split VMs into `(ready, unreachable)`. VMs without an IP are
    /// unreachable.
    pub async fn await_ready(&self, vms: Vec<VmRecord>) -> (Vec<VmRecord>, Vec<VmRecord>) {
        let mut ready = Vec::new();
        let mut unreachable = Vec::new();
        for vm in vms {
            let reachable = match vm.ip.as_deref() {
                Some(ip) => self.wait_ready(ip).await,
                None => false,
            };
            if reachable {
                ready.push(vm);
            } else {
                unreachable.push(vm);
            }
        }
        (ready, unreachable)
    }

    /// Copy the bundle's entries into the host's home directory.
    pub async fn ship(&self, bundle: &StageBundle, host: &str) -> StageResult<()> {
        let entries = bundle.entries()?;
        if entries.is_empty() {
            return Err(StageError::Transfer(format!(
                "no files to copy in {}",
                bundle.dir().display()
            )));
        }
        info!(host, files = entries.len(), "copying stage bundle");
        let out = self.shell.copy_to(host, &entries).await?;
        if !out.success() {
            return Err(StageError::Transfer(format!(
                "copy to {host} exited with {}: {}",
                out.status,
                out.stderr.trim()
            )));
        }
        Ok(())
    }

    /// Run `runner.sh` on the host. A nonzero exit is a
    /// [`ProvisionOutcome::ProvisionFailure`], not an error.
    pub async fn execute(&self, bundle: &StageBundle, host: &str) -> StageResult<ProvisionOutcome> {
        debug!(host, stages = bundle.stages().len(), "running stage bundle");
        let out = self.shell.run(host, &format!("bash {RUNNER_SCRIPT}")).await?;
        if out.success() {
            Ok(ProvisionOutcome::Success)
        } else {
            warn!(host, exit_code = out.status, stderr = %out.stderr.trim(), "stage runner failed");
            Ok(ProvisionOutcome::ProvisionFailure { exit_code: out.status })
        }
    }

    /// Ship then execute.
    pub async fn provision(&self, bundle: &StageBundle, host: &str) -> StageResult<ProvisionOutcome> {
        self.ship(bundle, host).await?;
        self.execute(bundle, host).await
    }
}
