//! Jenkins: agents as SSH-launched dumb slaves.
//!
//! Agents are named `{pool}-{ip}`, so the IP is recoverable from the name
//! alone. Status comes from the typed `computer/api/json` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use stratus_core::{AgentRecord, AgentStatus, JenkinsConfig, Tunables, VmRecord, retry_fixed};

use crate::adapter::{AgentHostProfile, BackendAdapter, BackendKind, agent_name, ip_from_agent_name};
use crate::error::{BackendError, BackendResult};
use crate::http::{Body, HttpClient};

const EPHEMERAL_DESCRIPTION: &str = "Ephemeral agent meant to run only 1 job and then die.";
const COMPUTERS: &str =
    "computer/api/json?tree=computer[displayName,description,offline,temporarilyOffline,idle]";

#[derive(Debug, Deserialize)]
struct ComputerSet {
    #[serde(default)]
    computer: Vec<Computer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Computer {
    display_name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    offline: bool,
    #[serde(default)]
    temporarily_offline: bool,
    #[serde(default = "default_idle")]
    idle: bool,
}

fn default_idle() -> bool {
    true
}

pub struct JenkinsBackend {
    pool: String,
    config: JenkinsConfig,
    http: HttpClient,
    registration_attempts: u32,
    registration_delay: Duration,
}

impl JenkinsBackend {
    pub fn new(pool: &str, config: &JenkinsConfig, tunables: &Tunables) -> BackendResult<Self> {
        let http = HttpClient::new(&config.url, &config.username, &config.password, tunables, true)?;
        Ok(Self {
            pool: pool.to_string(),
            config: config.clone(),
            http,
            registration_attempts: tunables.registration_attempts,
            registration_delay: Duration::from_secs(tunables.registration_delay_secs),
        })
    }

    async fn exists(&self, name: &str) -> BackendResult<bool> {
        match self.http.get_text(&format!("computer/{name}/api/json")).await {
            Ok(_) => Ok(true),
            Err(BackendError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create_form(&self, name: &str, ip: &str) -> Vec<(String, String)> {
        let node = slave_definition(name, ip, &self.config);
        vec![
            ("name".into(), name.into()),
            ("type".into(), "hudson.slaves.DumbSlave".into()),
            ("json".into(), node.to_string()),
        ]
    }
}

#[async_trait]
impl BackendAdapter for JenkinsBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::SimpleAgent
    }

    async fn list_agents(&self) -> BackendResult<Vec<AgentRecord>> {
        let body = self.http.get_text(COMPUTERS).await?;
        parse_computers(&body, &self.pool)
    }

    fn is_inactive(&self, agent: &AgentRecord) -> bool {
        matches!(agent.status, AgentStatus::Disabled | AgentStatus::Offline)
    }

    async fn register(&self, vm: &VmRecord) -> BackendResult<()> {
        let ip = vm.ip.as_deref().ok_or_else(|| BackendError::RegistrationFailed {
            agent: vm.name.clone(),
            reason: "vm has no ip".into(),
        })?;
        let name = agent_name(&self.pool, ip);
        retry_fixed(self.registration_attempts, self.registration_delay, "register agent", || async {
            if self.exists(&name).await? {
                debug!(agent = %name, "agent already registered");
                return Ok(());
            }
            self.http
                .post("computer/doCreateItem", Body::Form(self.create_form(&name, ip)))
                .await
                .map(|_| ())
        })
        .await
        .map_err(|e| BackendError::RegistrationFailed {
            agent: name.clone(),
            reason: e.to_string(),
        })?;
        info!(agent = %name, "registered jenkins agent");
        Ok(())
    }

    async fn drain(&self, agent: &AgentRecord) -> BackendResult<()> {
        // toggleOffline flips the flag, so never call it twice.
        if matches!(agent.status, AgentStatus::Disabled | AgentStatus::Draining) {
            return Ok(());
        }
        let form = vec![("offlineMessage".to_string(), "drained by stratus".to_string())];
        self.http
            .post(&format!("computer/{}/toggleOffline", agent.backend_key), Body::Form(form))
            .await?;
        info!(agent = %agent.name, "took jenkins agent offline");
        Ok(())
    }

    async fn remove(&self, agent: &AgentRecord) -> BackendResult<()> {
        match self
            .http
            .post(&format!("computer/{}/doDelete", agent.backend_key), Body::Empty)
            .await
        {
            Ok(_) | Err(BackendError::NotFound(_)) => {
                info!(agent = %agent.name, "removed jenkins agent");
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

// ── Parsing ────────────────────────────────────────────────────────

/// Agents of `pool` from a `computer/api/json` document.
pub fn parse_computers(body: &str, pool: &str) -> BackendResult<Vec<AgentRecord>> {
    let set: ComputerSet = serde_json::from_str(body)
        .map_err(|e| BackendError::Unavailable(format!("invalid computer list: {e}")))?;
    Ok(set
        .computer
        .into_iter()
        .filter_map(|c| {
            let ip = ip_from_agent_name(pool, &c.display_name)?;
            let status = match (c.offline, c.temporarily_offline, c.idle) {
                (_, true, false) => AgentStatus::Draining,
                (_, true, true) => AgentStatus::Disabled,
                (true, false, _) => AgentStatus::Offline,
                (false, false, false) => AgentStatus::RunningJob,
                (false, false, true) => AgentStatus::Online,
            };
            let ephemeral = c
                .description
                .as_deref()
                .is_some_and(|d| d.to_ascii_lowercase().contains("ephemeral"));
            Some(AgentRecord {
                id: c.display_name.clone(),
                backend_key: c.display_name.clone(),
                name: c.display_name,
                ip: Some(ip),
                status,
                ephemeral,
            })
        })
        .collect())
}

/// The JSON form `computer/doCreateItem` expects for an SSH dumb slave.
fn slave_definition(name: &str, ip: &str, config: &JenkinsConfig) -> serde_json::Value {
    json!({
        "name": name,
        "nodeDescription": EPHEMERAL_DESCRIPTION,
        "numExecutors": config.executors.to_string(),
        "remoteFS": config.remote_fs,
        "labelString": config.labels.join(" "),
        "mode": config.mode.as_jenkins(),
        "type": "hudson.slaves.DumbSlave",
        "retentionStrategy": { "stapler-class": "hudson.slaves.RetentionStrategy$Always" },
        "nodeProperties": { "stapler-class-bag": "true" },
        "launcher": {
            "stapler-class": "hudson.plugins.sshslaves.SSHLauncher",
            "$class": "hudson.plugins.sshslaves.SSHLauncher",
            "host": ip,
            "port": "22",
            "credentialsId": config.credentials_id,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_core::{AgentMode, Secret};

    const COMPUTERS_JSON: &str = r#"{"computer":[
        {"displayName":"Built-In Node","offline":false,"temporarilyOffline":false,"idle":true},
        {"displayName":"linux-10.0.0.4","description":"Ephemeral agent meant to run only 1 job and then die.","offline":false,"temporarilyOffline":false,"idle":false},
        {"displayName":"linux-10.0.0.5","description":"Ephemeral agent","offline":true,"temporarilyOffline":true,"idle":true},
        {"displayName":"linux-10.0.0.6","description":null,"offline":true,"temporarilyOffline":false,"idle":true},
        {"displayName":"linux-10.0.0.7","offline":false,"temporarilyOffline":true,"idle":false},
        {"displayName":"mac-10.0.1.1","offline":false,"temporarilyOffline":false,"idle":true}
    ]}"#;

    #[test]
    fn parses_only_pool_agents_with_status() {
        let agents = parse_computers(COMPUTERS_JSON, "linux").unwrap();
        let summary: Vec<(&str, AgentStatus, bool)> = agents
            .iter()
            .map(|a| (a.ip.as_deref().unwrap(), a.status, a.ephemeral))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("10.0.0.4", AgentStatus::RunningJob, true),
                ("10.0.0.5", AgentStatus::Disabled, true),
                ("10.0.0.6", AgentStatus::Offline, false),
                ("10.0.0.7", AgentStatus::Draining, false),
            ]
        );
    }

    #[test]
    fn inactive_means_disabled_or_offline() {
        let config = JenkinsConfig {
            url: "https://ci.example.com".into(),
            username: "svc".into(),
            password: Secret::new("pw"),
            credentials_id: "ssh".into(),
            labels: vec![],
            mode: AgentMode::Normal,
            remote_fs: "/home/jenkins".into(),
            executors: 1,
        };
        let backend = JenkinsBackend::new("linux", &config, &Tunables::immediate()).unwrap();
        let agents = parse_computers(COMPUTERS_JSON, "linux").unwrap();
        let inactive: Vec<bool> = agents.iter().map(|a| backend.is_inactive(a)).collect();
        assert_eq!(inactive, vec![false, true, true, false]);
        assert_eq!(backend.default_rounds(), 1);
        assert!(!backend.supports_cross_check());
    }

    #[test]
    fn slave_definition_carries_launcher_details() {
        let config = JenkinsConfig {
            url: "u".into(),
            username: "svc".into(),
            password: Secret::new("pw"),
            credentials_id: "ssh-root".into(),
            labels: vec!["linux".into(), "small".into()],
            mode: AgentMode::Exclusive,
            remote_fs: "/home/jenkins".into(),
            executors: 1,
        };
        let def = slave_definition("linux-10.0.0.4", "10.0.0.4", &config);
        assert_eq!(def["launcher"]["host"], "10.0.0.4");
        assert_eq!(def["launcher"]["credentialsId"], "ssh-root");
        assert_eq!(def["labelString"], "linux small");
        assert_eq!(def["mode"], "EXCLUSIVE");
        assert_eq!(def["numExecutors"], "1");
    }
}
