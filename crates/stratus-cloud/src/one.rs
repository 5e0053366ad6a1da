//! OpenNebula driven through its command line tools.
//!
//! Uses `onevm` and `onetemplate` with `--json` output. Endpoint and
//! credentials come from the usual `ONE_XMLRPC` / `~/.one/one_auth`
//! setup of those tools.

use std::io::Write;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info};

use stratus_core::{VmRecord, VmState};

use crate::error::{CloudError, CloudResult};
use crate::inventory::{CloudInventory, TemplateRef};
use crate::naming::belongs_to_pool;

/// LCM sub-states of an ACTIVE VM that indicate a failed transition.
const LCM_FAILURES: &[u64] = &[14, 36, 37, 38, 39, 40, 41, 42, 44, 46, 47, 48, 49, 50];

#[derive(Debug, Clone)]
pub struct OneCli {
    onevm: String,
    onetemplate: String,
}

impl Default for OneCli {
    fn default() -> Self {
        Self {
            onevm: "onevm".into(),
            onetemplate: "onetemplate".into(),
        }
    }
}

impl OneCli {
    pub fn new() -> Self {
        Self::default()
    }

    async fn run(&self, program: &str, args: &[&str]) -> CloudResult<String> {
        debug!(program, ?args, "cloud command");
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| CloudError::Command(format!("{program}: {e}")))?;
        if !output.status.success() {
            return Err(CloudError::Command(format!(
                "{program} {} exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn tag_pool(&self, id: &str, pool: &str) -> CloudResult<()> {
        let mut file = tempfile::NamedTempFile::new()
            .map_err(|e| CloudError::Command(format!("tag file: {e}")))?;
        writeln!(file, "POOL=\"{pool}\"")
            .map_err(|e| CloudError::Command(format!("tag file: {e}")))?;
        let path = file.path().to_string_lossy().into_owned();
        self.run(&self.onevm, &["update", id, &path, "--append"]).await?;
        Ok(())
    }
}

#[async_trait]
impl CloudInventory for OneCli {
    async fn list_vms(&self, pool: &str) -> CloudResult<Vec<VmRecord>> {
        let body = self.run(&self.onevm, &["list", "--json"]).await?;
        let vms = parse_vm_pool(&body)?;
        Ok(vms.into_iter().filter(|vm| belongs_to_pool(vm, pool)).collect())
    }

    async fn list_templates(&self) -> CloudResult<Vec<TemplateRef>> {
        let body = self.run(&self.onetemplate, &["list", "--json"]).await?;
        parse_template_pool(&body)
    }

    async fn create_vm(&self, template: &TemplateRef, name: &str, pool: &str) -> CloudResult<VmRecord> {
        let out = self
            .run(&self.onetemplate, &["instantiate", &template.id, "--name", name])
            .await?;
        let id = parse_instantiated_id(&out)?;
        info!(vm_id = %id, name, template = %template.name, "instantiated vm");
        self.tag_pool(&id, pool).await?;
        self.get_vm(&id).await
    }

    async fn get_vm(&self, id: &str) -> CloudResult<VmRecord> {
        let body = self.run(&self.onevm, &["show", id, "--json"]).await?;
        let value: Value = serde_json::from_str(&body).map_err(|e| CloudError::Parse(e.to_string()))?;
        let vm = value
            .get("VM")
            .ok_or_else(|| CloudError::VmNotFound(id.to_string()))?;
        parse_vm(vm)
    }

    async fn delete_vm(&self, id: &str) -> CloudResult<()> {
        self.run(&self.onevm, &["terminate", "--hard", id]).await?;
        info!(vm_id = %id, "terminated vm");
        Ok(())
    }
}

// ── Response parsing ───────────────────────────────────────────────

/// Parse `onevm list --json`. A single VM is serialized as an object,
/// several as an array, none as a missing key.
pub fn parse_vm_pool(body: &str) -> CloudResult<Vec<VmRecord>> {
    let value: Value = serde_json::from_str(body).map_err(|e| CloudError::Parse(e.to_string()))?;
    let pool = value
        .get("VM_POOL")
        .ok_or_else(|| CloudError::Parse("missing VM_POOL".into()))?;
    one_or_many(pool.get("VM")).into_iter().map(parse_vm).collect()
}

pub fn parse_template_pool(body: &str) -> CloudResult<Vec<TemplateRef>> {
    let value: Value = serde_json::from_str(body).map_err(|e| CloudError::Parse(e.to_string()))?;
    let pool = value
        .get("VM_TEMPLATE_POOL")
        .ok_or_else(|| CloudError::Parse("missing VM_TEMPLATE_POOL".into()))?;
    one_or_many(pool.get("VM_TEMPLATE"))
        .into_iter()
        .map(|t| {
            Ok(TemplateRef {
                id: field(t, "ID").ok_or_else(|| CloudError::Parse("template without ID".into()))?,
                name: field(t, "NAME").unwrap_or_default(),
            })
        })
        .collect()
}

/// `onetemplate instantiate` prints `VM ID: <n>`.
pub fn parse_instantiated_id(out: &str) -> CloudResult<String> {
    out.lines()
        .find_map(|line| line.trim().strip_prefix("VM ID:"))
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CloudError::Parse(format!("no VM ID in {out:?}")))
}

fn parse_vm(vm: &Value) -> CloudResult<VmRecord> {
    let id = field(vm, "ID").ok_or_else(|| CloudError::Parse("vm without ID".into()))?;
    let template = vm.get("TEMPLATE");
    let ip = template
        .map(|t| one_or_many(t.get("NIC")))
        .and_then(|nics| nics.into_iter().find_map(|nic| field(nic, "IP")));
    let hostname = one_or_many(vm.get("HISTORY_RECORDS").and_then(|h| h.get("HISTORY")))
        .last()
        .and_then(|h| field(h, "HOSTNAME"));
    let state = map_state(number(vm, "STATE"), number(vm, "LCM_STATE"));
    Ok(VmRecord {
        name: field(vm, "NAME").unwrap_or_else(|| id.clone()),
        id,
        ip,
        start_time: number(vm, "STIME").unwrap_or(0),
        pool_tag: vm.get("USER_TEMPLATE").and_then(|u| field(u, "POOL")),
        state,
        hostname,
    })
}

fn map_state(state: Option<u64>, lcm: Option<u64>) -> VmState {
    match (state, lcm) {
        (Some(3), Some(3)) => VmState::Running,
        (Some(3), Some(l)) if LCM_FAILURES.contains(&l) => VmState::Failed,
        (Some(7), _) => VmState::Failed,
        (Some(4..=6 | 8 | 9), _) => VmState::Stopped,
        _ => VmState::Pending,
    }
}

fn one_or_many(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    }
}

/// String field that the CLI may emit as either a string or a number.
fn field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(value: &Value, key: &str) -> Option<u64> {
    field(value, key).and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const POOL: &str = r#"{"VM_POOL":{"VM":[
        {"ID":"41","NAME":"ci-linux-aaa","STIME":"1700000000","STATE":"3","LCM_STATE":"3",
         "TEMPLATE":{"NIC":{"IP":"10.0.0.4"}},"USER_TEMPLATE":{"POOL":"linux"},
         "HISTORY_RECORDS":{"HISTORY":[{"HOSTNAME":"kvm-01"},{"HOSTNAME":"kvm-02"}]}},
        {"ID":"42","NAME":"ci-linux-bbb","STIME":"1700000100","STATE":"1","LCM_STATE":"0",
         "TEMPLATE":{"NIC":[{"NETWORK":"x"},{"IP":"10.0.0.5"}]},"USER_TEMPLATE":{}},
        {"ID":"43","NAME":"ci-linux-ccc","STIME":"1700000200","STATE":"3","LCM_STATE":"36",
         "TEMPLATE":{},"USER_TEMPLATE":{}}
    ]}}"#;

    #[test]
    fn parses_vm_pool() {
        let vms = parse_vm_pool(POOL).unwrap();
        assert_eq!(vms.len(), 3);
        assert_eq!(vms[0].ip.as_deref(), Some("10.0.0.4"));
        assert_eq!(vms[0].state, VmState::Running);
        assert_eq!(vms[0].pool_tag.as_deref(), Some("linux"));
        assert_eq!(vms[0].hostname.as_deref(), Some("kvm-02"));
        assert_eq!(vms[0].start_time, 1_700_000_000);
        assert_eq!(vms[1].ip.as_deref(), Some("10.0.0.5"));
        assert_eq!(vms[1].state, VmState::Pending);
        assert_eq!(vms[2].ip, None);
        assert_eq!(vms[2].state, VmState::Failed);
    }

    #[test]
    fn single_vm_is_an_object() {
        let body = r#"{"VM_POOL":{"VM":{"ID":7,"NAME":"p-1","STATE":8,"LCM_STATE":0}}}"#;
        let vms = parse_vm_pool(body).unwrap();
        assert_eq!(vms.len(), 1);
        assert_eq!(vms[0].id, "7");
        assert_eq!(vms[0].state, VmState::Stopped);
    }

    #[test]
    fn empty_pool() {
        assert!(parse_vm_pool(r#"{"VM_POOL":{}}"#).unwrap().is_empty());
        assert!(parse_vm_pool("{}").is_err());
    }

    #[test]
    fn parses_templates_and_instantiate_output() {
        let body = r#"{"VM_TEMPLATE_POOL":{"VM_TEMPLATE":[{"ID":"3","NAME":"ubuntu-22"},{"ID":"4","NAME":"macos"}]}}"#;
        let templates = parse_template_pool(body).unwrap();
        assert_eq!(templates[1], TemplateRef { id: "4".into(), name: "macos".into() });
        assert_eq!(parse_instantiated_id("VM ID: 1234\n").unwrap(), "1234");
        assert!(parse_instantiated_id("error").is_err());
    }
}
