//! In-memory [`CloudInventory`] for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;

use stratus_core::{VmRecord, VmState};

use crate::error::{CloudError, CloudResult};
use crate::inventory::{CloudInventory, TemplateRef};
use crate::naming::belongs_to_pool;

/// State a freshly created VM reports.
type CreatePolicy = dyn Fn(u64) -> VmState + Send + Sync;

pub struct MemoryInventory {
    vms: Mutex<BTreeMap<String, VmRecord>>,
    templates: Mutex<Vec<TemplateRef>>,
    deleted: Mutex<Vec<String>>,
    next_id: AtomicU64,
    failing_lists: AtomicU32,
    list_calls: AtomicU32,
    now: AtomicU64,
    on_create: Box<CreatePolicy>,
}

impl Default for MemoryInventory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryInventory {
    /// New VMs come up running with an IP of `10.0.<id/256>.<id%256>`.
    pub fn new() -> Self {
        Self::with_create_policy(|_| VmState::Running)
    }

    /// `policy` receives the new VM's numeric id and picks its state.
    pub fn with_create_policy(policy: impl Fn(u64) -> VmState + Send + Sync + 'static) -> Self {
        Self {
            vms: Mutex::new(BTreeMap::new()),
            templates: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(100),
            failing_lists: AtomicU32::new(0),
            list_calls: AtomicU32::new(0),
            now: AtomicU64::new(0),
            on_create: Box::new(policy),
        }
    }

    pub fn insert(&self, vm: VmRecord) {
        if let Ok(mut vms) = self.vms.lock() {
            vms.insert(vm.id.clone(), vm);
        }
    }

    pub fn remove_silently(&self, id: &str) {
        if let Ok(mut vms) = self.vms.lock() {
            vms.remove(id);
        }
    }

    pub fn add_template(&self, id: &str, name: &str) {
        if let Ok(mut templates) = self.templates.lock() {
            templates.push(TemplateRef { id: id.into(), name: name.into() });
        }
    }

    /// Start time stamped on VMs created from now on.
    pub fn set_now(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn fail_next_lists(&self, n: u32) {
        self.failing_lists.store(n, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Ids passed to `delete_vm`, in call order, including repeats.
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.vms.lock().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> CloudError {
        CloudError::Command("memory inventory lock poisoned".into())
    }
}

#[async_trait]
impl CloudInventory for MemoryInventory {
    async fn list_vms(&self, pool: &str) -> CloudResult<Vec<VmRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_lists.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_lists.store(failing - 1, Ordering::SeqCst);
            return Err(CloudError::Command("rpc endpoint unavailable".into()));
        }
        let vms = self.vms.lock().map_err(|_| Self::poisoned())?;
        Ok(vms.values().filter(|vm| belongs_to_pool(vm, pool)).cloned().collect())
    }

    async fn list_templates(&self) -> CloudResult<Vec<TemplateRef>> {
        Ok(self.templates.lock().map_err(|_| Self::poisoned())?.clone())
    }

    async fn create_vm(&self, _template: &TemplateRef, name: &str, pool: &str) -> CloudResult<VmRecord> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let vm = VmRecord {
            id: n.to_string(),
            name: name.to_string(),
            ip: Some(format!("10.0.{}.{}", n / 256, n % 256)),
            start_time: self.now.load(Ordering::SeqCst),
            pool_tag: Some(pool.to_string()),
            state: (self.on_create)(n),
            hostname: Some("memory".into()),
        };
        self.insert(vm.clone());
        Ok(vm)
    }

    async fn get_vm(&self, id: &str) -> CloudResult<VmRecord> {
        self.vms
            .lock()
            .map_err(|_| Self::poisoned())?
            .get(id)
            .cloned()
            .ok_or_else(|| CloudError::VmNotFound(id.to_string()))
    }

    async fn delete_vm(&self, id: &str) -> CloudResult<()> {
        self.deleted.lock().map_err(|_| Self::poisoned())?.push(id.to_string());
        self.vms
            .lock()
            .map_err(|_| Self::poisoned())?
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CloudError::VmNotFound(id.to_string()))
    }
}
