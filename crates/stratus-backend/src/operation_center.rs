//! CloudBees Operation Center: agents as shared-slave items.
//!
//! A shared slave is a job-like item whose `config.xml` carries the SSH
//! launcher and a `<disabled>` flag. Registration fills an XML template;
//! draining flips the flag.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use stratus_core::{AgentRecord, AgentStatus, OperationCenterConfig, Tunables, VmRecord, retry_fixed};

use crate::adapter::{AgentHostProfile, BackendAdapter, BackendKind, agent_name, ip_from_agent_name};
use crate::error::{BackendError, BackendResult};
use crate::http::{Body, HttpClient};
use crate::xml::{element_text, replace_elements};

const JOBS: &str = "api/json?tree=jobs[name,url,color]";

const DEFAULT_TEMPLATE: &str = r#"<?xml version='1.1' encoding='UTF-8'?>
<com.cloudbees.opscenter.server.model.SharedSlave plugin="operations-center-server">
  <description>Ephemeral agent meant to run only 1 job and then die.</description>
  <disabled>false</disabled>
  <properties/>
  <launcher class="hudson.plugins.sshslaves.SSHLauncher" plugin="ssh-slaves">
    <host></host>
    <port>22</port>
    <credentialsId></credentialsId>
  </launcher>
  <remoteFS>/home/jenkins</remoteFS>
  <numExecutors>1</numExecutors>
  <labelString></labelString>
  <mode>NORMAL</mode>
  <retentionStrategy class="com.cloudbees.opscenter.server.model.SharedNodeRetentionStrategy"/>
  <uid></uid>
</com.cloudbees.opscenter.server.model.SharedSlave>
"#;

#[derive(Debug, Deserialize)]
struct JobList {
    #[serde(default)]
    jobs: Vec<Job>,
}

#[derive(Debug, Deserialize)]
struct Job {
    name: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    color: Option<String>,
}

pub struct OperationCenterBackend {
    pool: String,
    credentials_id: String,
    labels: String,
    template: String,
    http: HttpClient,
    registration_attempts: u32,
    registration_delay: Duration,
}

impl OperationCenterBackend {
    pub fn new(pool: &str, config: &OperationCenterConfig, tunables: &Tunables) -> BackendResult<Self> {
        let template = match &config.template_path {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                BackendError::Xml(format!("cannot read template {}: {e}", path.display()))
            })?,
            None => DEFAULT_TEMPLATE.to_string(),
        };
        let http = HttpClient::new(&config.url, &config.username, &config.password, tunables, true)?;
        Ok(Self {
            pool: pool.to_string(),
            credentials_id: config.credentials_id.clone(),
            labels: config.labels.join(" "),
            template,
            http,
            registration_attempts: tunables.registration_attempts,
            registration_delay: Duration::from_secs(tunables.registration_delay_secs),
        })
    }

    /// The item definition for a new shared slave on `ip`.
    pub fn slave_xml(&self, ip: &str) -> BackendResult<String> {
        let uid = uuid::Uuid::new_v4().to_string();
        replace_elements(
            &self.template,
            &[
                ("host", ip),
                ("credentialsId", &self.credentials_id),
                ("uid", &uid),
                ("labelString", &self.labels),
            ],
        )
    }

    /// Create the item, or overwrite its config if it already exists.
    async fn create_or_update(&self, name: &str, xml: &str) -> BackendResult<()> {
        let create = self
            .http
            .post(&format!("createItem?name={name}"), Body::Xml(xml.to_string()))
            .await;
        match create {
            Ok(_) => Ok(()),
            Err(BackendError::Http { status: 400, .. }) => {
                debug!(agent = %name, "item exists, updating config");
                self.http
                    .post(&format!("job/{name}/config.xml"), Body::Xml(xml.to_string()))
                    .await
                    .map(|_| ())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl BackendAdapter for OperationCenterBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ManagedSlave
    }

    async fn list_agents(&self) -> BackendResult<Vec<AgentRecord>> {
        let body = self.http.get_text(JOBS).await?;
        parse_jobs(&body, &self.pool)
    }

    fn is_inactive(&self, agent: &AgentRecord) -> bool {
        agent.status == AgentStatus::Disabled
    }

    async fn register(&self, vm: &VmRecord) -> BackendResult<()> {
        let ip = vm.ip.as_deref().ok_or_else(|| BackendError::RegistrationFailed {
            agent: vm.name.clone(),
            reason: "vm has no ip".into(),
        })?;
        let name = agent_name(&self.pool, ip);
        let xml = self.slave_xml(ip)?;
        retry_fixed(self.registration_attempts, self.registration_delay, "register shared slave", || {
            self.create_or_update(&name, &xml)
        })
        .await
        .map_err(|e| BackendError::RegistrationFailed {
            agent: name.clone(),
            reason: e.to_string(),
        })?;
        info!(agent = %name, "registered shared slave");
        Ok(())
    }

    async fn drain(&self, agent: &AgentRecord) -> BackendResult<()> {
        let path = format!("job/{}/config.xml", agent.name);
        let config = self.http.get_text(&path).await?;
        if element_text(&config, "disabled")?.as_deref() == Some("true") {
            return Ok(());
        }
        let disabled = replace_elements(&config, &[("disabled", "true")])?;
        retry_fixed(self.registration_attempts, self.registration_delay, "disable shared slave", || {
            self.http.post(&path, Body::Xml(disabled.clone()))
        })
        .await?;
        info!(agent = %agent.name, "disabled shared slave");
        Ok(())
    }

    async fn remove(&self, agent: &AgentRecord) -> BackendResult<()> {
        match self.drain(agent).await {
            Ok(()) | Err(BackendError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        match self.http.post(&format!("job/{}/doDelete", agent.name), Body::Empty).await {
            Ok(_) | Err(BackendError::NotFound(_)) => {
                info!(agent = %agent.name, "deleted shared slave");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn host_profile(&self) -> AgentHostProfile {
        AgentHostProfile {
            process_pattern: "remoting.jar".into(),
            main_process: "remoting.jar".into(),
            stop_command: "pkill -f '[r]emoting.jar'".into(),
            config_path: None,
            kill_switch_pattern: "self-disable".into(),
        }
    }
}

/// Shared slaves of `pool` from the top-level item listing.
pub fn parse_jobs(body: &str, pool: &str) -> BackendResult<Vec<AgentRecord>> {
    let list: JobList = serde_json::from_str(body)
        .map_err(|e| BackendError::Unavailable(format!("invalid item list: {e}")))?;
    Ok(list
        .jobs
        .into_iter()
        .filter_map(|job| {
            let ip = ip_from_agent_name(pool, &job.name)?;
            let status = match job.color.as_deref() {
                Some("disabled") => AgentStatus::Disabled,
                Some(c) if c.ends_with("_anime") => AgentStatus::RunningJob,
                Some(_) => AgentStatus::Online,
                None => AgentStatus::Unknown,
            };
            Some(AgentRecord {
                id: job.name.clone(),
                backend_key: job.url,
                name: job.name,
                ip: Some(ip),
                status,
                ephemeral: true,
            })
        })
        .collect())
}
