pub mod collect;
pub mod kill;
pub mod maintain;
pub mod provision;
pub mod state;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;

use stratus_backend::BackendAdapter;
use stratus_cloud::{CloudInventory, OneCli, RetryingInventory};
use stratus_core::{PoolConfig, VmRecord};
use stratus_pool::{PoolController, Provisioner, RunResults};
use stratus_reconcile::{ReconciliationEngine, ShellProbe};
use stratus_stages::{OpenSsh, RemoteExecutor, RemoteShell};

/// Everything a command needs, wired from one pool config.
pub struct Context {
    pub config: PoolConfig,
    pub inventory: Arc<dyn CloudInventory>,
    pub backend: Arc<dyn BackendAdapter>,
    pub shell: Arc<dyn RemoteShell>,
}

impl Context {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = PoolConfig::from_file(path)
            .with_context(|| format!("loading pool configuration {}", path.display()))?;
        let inventory: Arc<dyn CloudInventory> =
            Arc::new(RetryingInventory::new(Arc::new(OneCli::new()), &config.timing));
        let backend = stratus_backend::from_config(&config)?;
        let shell: Arc<dyn RemoteShell> = Arc::new(OpenSsh::new(&config.ssh));
        Ok(Self {
            config,
            inventory,
            backend,
            shell,
        })
    }

    pub fn controller(&self) -> PoolController {
        let executor = RemoteExecutor::new(self.shell.clone(), &self.config.timing);
        let provisioner = Provisioner::new(self.backend.clone(), executor, &self.config.timing);
        PoolController::new(self.config.clone(), self.inventory.clone(), provisioner)
    }

    pub fn engine(&self) -> ReconciliationEngine {
        let profile = self
            .backend
            .host_profile()
            .with_overrides(&self.config.agent_host);
        let probe = ShellProbe::new(self.shell.clone(), profile, &self.config.garbage_collection);
        ReconciliationEngine::new(
            self.config.name.clone(),
            self.backend.clone(),
            self.inventory.clone(),
            Arc::new(probe),
            self.config.garbage_collection.clone(),
        )
    }

    /// The pool's VMs, narrowed to `ids` when given.
    pub async fn vms(&self, ids: &[String]) -> anyhow::Result<Vec<VmRecord>> {
        let vms = self.inventory.list_vms(&self.config.name).await?;
        Ok(select(vms, ids))
    }
}

/// Keep VMs whose id or IP is listed; an empty list keeps everything.
pub fn select(vms: Vec<VmRecord>, ids: &[String]) -> Vec<VmRecord> {
    if ids.is_empty() {
        return vms;
    }
    vms.into_iter()
        .filter(|vm| {
            ids.iter()
                .any(|want| *want == vm.id || vm.ip.as_deref() == Some(want.as_str()))
        })
        .collect()
}

/// One `SUCCESS`/`FAILED` line per VM; failure if any VM failed.
pub fn report_results(results: &RunResults) -> ExitCode {
    if print_results(results) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Print per-VM lines; true when nothing failed.
pub fn print_results(results: &RunResults) -> bool {
    for vm in &results.succeeded {
        println!("SUCCESS {} ({})", vm.label(), vm.id);
    }
    for vm in &results.failed {
        println!("FAILED {} ({})", vm.label(), vm.id);
    }
    results.is_clean()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_core::VmState;

    fn vm(id: &str, ip: &str) -> VmRecord {
        VmRecord {
            id: id.into(),
            name: format!("linux-{id}"),
            ip: Some(ip.into()),
            start_time: 0,
            pool_tag: Some("linux".into()),
            state: VmState::Running,
            hostname: None,
        }
    }

    #[test]
    fn select_matches_ids_and_ips() {
        let vms = vec![vm("1", "10.0.0.1"), vm("2", "10.0.0.2"), vm("3", "10.0.0.3")];
        let picked = select(vms.clone(), &["1".into(), "10.0.0.3".into()]);
        let ids: Vec<&str> = picked.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert_eq!(select(vms, &[]).len(), 3);
    }
}
