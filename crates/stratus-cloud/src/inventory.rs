//! The [`CloudInventory`] seam.

use async_trait::async_trait;

use stratus_core::{VmRecord, VmState};

use crate::error::{CloudError, CloudResult};

/// A resolved VM template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateRef {
    pub id: String,
    pub name: String,
}

/// Narrow interface to the cloud controller.
#[async_trait]
pub trait CloudInventory: Send + Sync {
    /// VMs belonging to `pool`.
    async fn list_vms(&self, pool: &str) -> CloudResult<Vec<VmRecord>>;

    /// All templates visible to the caller.
    async fn list_templates(&self) -> CloudResult<Vec<TemplateRef>>;

    /// Instantiate `template` as `name`, tagged with `pool`.
    async fn create_vm(&self, template: &TemplateRef, name: &str, pool: &str)
    -> CloudResult<VmRecord>;

    /// Fresh record for one VM.
    async fn get_vm(&self, id: &str) -> CloudResult<VmRecord>;

    async fn delete_vm(&self, id: &str) -> CloudResult<()>;

    async fn vm_status(&self, id: &str) -> CloudResult<VmState> {
        Ok(self.get_vm(id).await?.state)
    }

    /// Find the single template whose name contains `name`.
    async fn resolve_template(&self, name: &str) -> CloudResult<TemplateRef> {
        let mut matches: Vec<TemplateRef> = self
            .list_templates()
            .await?
            .into_iter()
            .filter(|t| t.name.contains(name))
            .collect();
        match matches.len() {
            0 => Err(CloudError::TemplateNotFound(name.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(CloudError::SeveralTemplatesMatch {
                name: name.to_string(),
                matches: matches.into_iter().map(|t| t.name).collect(),
            }),
        }
    }
}
