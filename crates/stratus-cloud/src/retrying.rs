//! Bounded retry around a [`CloudInventory`].
//!
//! Reads are retried with the inventory budget. Creation and deletion are
//! passed through once so a retry can never double-create or double-delete.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use stratus_core::{Tunables, VmRecord, VmState, retry_fixed};

use crate::error::{CloudError, CloudResult};
use crate::inventory::{CloudInventory, TemplateRef};

pub struct RetryingInventory {
    inner: Arc<dyn CloudInventory>,
    attempts: u32,
    delay: Duration,
}

impl RetryingInventory {
    pub fn new(inner: Arc<dyn CloudInventory>, tunables: &Tunables) -> Self {
        Self {
            inner,
            attempts: tunables.inventory_attempts,
            delay: Duration::from_secs(tunables.inventory_delay_secs),
        }
    }
}

#[async_trait]
impl CloudInventory for RetryingInventory {
    async fn list_vms(&self, pool: &str) -> CloudResult<Vec<VmRecord>> {
        retry_fixed(self.attempts, self.delay, "list vms", || self.inner.list_vms(pool))
            .await
            .map_err(|e| CloudError::PoolInformation(e.to_string()))
    }

    async fn list_templates(&self) -> CloudResult<Vec<TemplateRef>> {
        retry_fixed(self.attempts, self.delay, "list templates", || self.inner.list_templates())
            .await
    }

    async fn create_vm(&self, template: &TemplateRef, name: &str, pool: &str) -> CloudResult<VmRecord> {
        self.inner.create_vm(template, name, pool).await
    }

    async fn get_vm(&self, id: &str) -> CloudResult<VmRecord> {
        retry_fixed(self.attempts, self.delay, "get vm", || self.inner.get_vm(id)).await
    }

    async fn delete_vm(&self, id: &str) -> CloudResult<()> {
        self.inner.delete_vm(id).await
    }

    async fn vm_status(&self, id: &str) -> CloudResult<VmState> {
        retry_fixed(self.attempts, self.delay, "vm status", || self.inner.vm_status(id)).await
    }
}
