//! Bamboo: ephemeral remote agents known only through scraped HTML.
//!
//! Agents register themselves while they are provisioned, so registration
//! is a no-op. Status propagation on the agent pages lags, hence three
//! verification rounds by default and a cross-check against the build
//! dashboard feed.

use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use stratus_core::{AgentId, AgentRecord, AgentStatus, BambooConfig, GcConfig, Tunables, VmRecord};

use crate::adapter::{AgentHostProfile, BackendAdapter, BackendKind};
use crate::error::{BackendError, BackendResult};
use crate::http::{Body, HttpClient};

const AGENTS_PAGE: &str = "agent/viewAgents.action";
const DASHBOARD: &str = "build/admin/ajax/getDashboardSummary.action";
/// Every genuine agent page carries this.
const PAGE_SIGNATURE: &str = "Capabilities";
/// How far past the IP label the address may appear.
const IP_WINDOW: usize = 400;

pub struct BambooBackend {
    http: HttpClient,
    activity_samples: u32,
    activity_delay: Duration,
}

impl BambooBackend {
    pub fn new(config: &BambooConfig, tunables: &Tunables, gc: &GcConfig) -> BackendResult<Self> {
        let http = HttpClient::new(&config.url, &config.username, &config.password, tunables, false)?;
        Ok(Self {
            http,
            activity_samples: gc.activity_samples.max(1),
            activity_delay: Duration::from_secs(gc.activity_sample_delay_secs),
        })
    }

    fn agent_path(id: &str) -> String {
        format!("admin/agent/viewAgent.action?agentId={id}")
    }
}

#[async_trait]
impl BackendAdapter for BambooBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::EphemeralScrapedAgent
    }

    async fn list_agents(&self) -> BackendResult<Vec<AgentRecord>> {
        let listing = self.http.get_text(AGENTS_PAGE).await?;
        let mut agents = Vec::new();
        for id in parse_agent_ids(&listing)? {
            let page = self.http.get_text(&Self::agent_path(&id)).await?;
            match parse_agent_page(&id, &page)? {
                Some(agent) => agents.push(agent),
                None => debug!(agent_id = %id, "skipping local agent"),
            }
        }
        Ok(agents)
    }

    fn is_inactive(&self, agent: &AgentRecord) -> bool {
        agent.ephemeral && agent.status == AgentStatus::Disabled
    }

    async fn register(&self, vm: &VmRecord) -> BackendResult<()> {
        debug!(vm_id = %vm.id, "bamboo agents register themselves");
        Ok(())
    }

    async fn drain(&self, agent: &AgentRecord) -> BackendResult<()> {
        if agent.status == AgentStatus::Disabled {
            return Ok(());
        }
        self.http
            .post(
                &format!("admin/agent/disableAgent.action?agentId={}", agent.backend_key),
                Body::Empty,
            )
            .await?;
        info!(agent_id = %agent.id, "disabled bamboo agent");
        Ok(())
    }

    async fn remove(&self, agent: &AgentRecord) -> BackendResult<()> {
        match self
            .http
            .get_text(&format!("admin/agent/removeAgent.action?agentId={}", agent.backend_key))
            .await
        {
            Ok(_) | Err(BackendError::NotFound(_)) => {
                info!(agent_id = %agent.id, "removed bamboo agent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn default_rounds(&self) -> u32 {
        3
    }

    fn supports_cross_check(&self) -> bool {
        true
    }

    /// Sample the dashboard feed several times; any candidate seen running a
    /// build in any sample is busy.
    async fn cross_check_activity(&self, candidates: &[AgentRecord]) -> BackendResult<Vec<AgentId>> {
        let mut seen = BTreeSet::new();
        for sample in 1..=self.activity_samples {
            match self.http.get_text(DASHBOARD).await {
                Ok(body) => seen.extend(parse_dashboard(&body)?),
                Err(e) => {
                    warn!(sample, error = %e, "dashboard sample failed");
                    return Err(e);
                }
            }
            if sample < self.activity_samples {
                tokio::time::sleep(self.activity_delay).await;
            }
        }
        debug!(busy = ?seen, "agents active on dashboard");
        let wanted: HashSet<&str> = candidates.iter().map(|a| a.id.as_str()).collect();
        Ok(seen.into_iter().filter(|id| wanted.contains(id.as_str())).collect())
    }

    fn host_profile(&self) -> AgentHostProfile {
        AgentHostProfile {
            process_pattern: "bamboo".into(),
            main_process: "java".into(),
            stop_command: "./bamboo-agent-home/bin/bamboo-agent.sh stop".into(),
            config_path: Some("./bamboo-agent-home/bamboo-agent.cfg.xml".into()),
            kill_switch_pattern: "self-disable".into(),
        }
    }
}

// ── Scraping ───────────────────────────────────────────────────────

const AGENT_LINK: &str = r"/admin/agent/viewAgent\.action\?agentId=(\d+)";
const DOTTED_QUAD: &str = r"(\d{1,3}(?:\.\d{1,3}){3})";

fn regex(pattern: &str) -> BackendResult<Regex> {
    Regex::new(pattern).map_err(|e| BackendError::Unavailable(format!("bad pattern: {e}")))
}

/// Distinct agent ids linked from the agents overview, in page order.
pub fn parse_agent_ids(html: &str) -> BackendResult<Vec<String>> {
    let link_re = regex(AGENT_LINK)?;
    let mut seen = HashSet::new();
    Ok(link_re
        .captures_iter(html)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .filter(|id| seen.insert(id.clone()))
        .collect())
}

/// Parse one agent detail page. Local agents yield `None`.
pub fn parse_agent_page(id: &str, html: &str) -> BackendResult<Option<AgentRecord>> {
    if !html.contains(PAGE_SIGNATURE) {
        return Err(BackendError::PageSignature(format!("agent {id}")));
    }
    if html.contains("(Local)") {
        return Ok(None);
    }
    let status = if html.contains("Offline") {
        AgentStatus::Offline
    } else if html.contains("(Disabled)") {
        AgentStatus::Disabled
    } else {
        AgentStatus::Online
    };
    Ok(Some(AgentRecord {
        id: id.to_string(),
        name: format!("agent-{id}"),
        ip: extract_ip(html)?,
        status,
        ephemeral: html.contains("ephemeral"),
        backend_key: id.to_string(),
    }))
}

/// First dotted quad within [`IP_WINDOW`] characters after the IP label.
pub fn extract_ip(html: &str) -> BackendResult<Option<String>> {
    let Some(start) = html.find("systemInfo_ipAddress") else {
        return Ok(None);
    };
    let tail = &html[start..];
    let end = tail.char_indices().nth(IP_WINDOW).map_or(tail.len(), |(i, _)| i);
    Ok(regex(DOTTED_QUAD)?.captures(&tail[..end]).map(|c| c[1].to_string()))
}

/// Agent ids of running builds in a dashboard summary document.
pub fn parse_dashboard(body: &str) -> BackendResult<Vec<AgentId>> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| BackendError::Unavailable(format!("invalid dashboard json: {e}")))?;
    let builds = value.get("builds").and_then(Value::as_array).cloned().unwrap_or_default();
    Ok(builds
        .iter()
        .filter_map(|b| match b.get("agent")?.get("id")? {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) => Some(s.clone()),
            _ => None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(markers: &str, ip: &str) -> String {
        format!(
            "<html><h1>agent {markers}</h1><table><tr><th>Capabilities</th></tr>\
             <tr><td id=\"systemInfo_ipAddress\">IP address</td><td>{ip}</td></tr></table></html>"
        )
    }

    #[test]
    fn agent_ids_are_deduplicated() {
        let html = r#"<a href="/admin/agent/viewAgent.action?agentId=101">a</a>
            <a href="/admin/agent/viewAgent.action?agentId=102">b</a>
            <a href="/admin/agent/viewAgent.action?agentId=101">a again</a>"#;
        assert_eq!(parse_agent_ids(html).unwrap(), vec!["101", "102"]);
    }

    #[test]
    fn parses_disabled_ephemeral_agent() {
        let agent = parse_agent_page("7", &page("ephemeral (Disabled)", "10.2.3.4")).unwrap().unwrap();
        assert_eq!(agent.status, AgentStatus::Disabled);
        assert!(agent.ephemeral);
        assert_eq!(agent.ip.as_deref(), Some("10.2.3.4"));
        assert_eq!(agent.backend_key, "7");
    }

    #[test]
    fn offline_and_local_agents() {
        let offline = parse_agent_page("8", &page("ephemeral Offline", "10.2.3.5")).unwrap().unwrap();
        assert!(offline.is_stale_ephemeral());
        assert!(parse_agent_page("9", &page("(Local)", "127.0.0.1")).unwrap().is_none());
    }

    #[test]
    fn missing_signature_is_an_error() {
        assert!(matches!(
            parse_agent_page("1", "<html>login</html>"),
            Err(BackendError::PageSignature(_))
        ));
    }

    #[test]
    fn ip_must_be_near_the_label() {
        let far = format!("systemInfo_ipAddress{}10.0.0.1", " ".repeat(500));
        assert_eq!(extract_ip(&far).unwrap(), None);
        assert_eq!(extract_ip("no label 10.0.0.1").unwrap(), None);
        assert_eq!(
            extract_ip("systemInfo_ipAddress</td><td>10.0.0.1</td>").unwrap().as_deref(),
            Some("10.0.0.1")
        );
    }

    #[test]
    fn dashboard_agent_ids() {
        let body = r#"{"builds":[{"agent":{"id":101}},{"agent":null},{"key":"X"},{"agent":{"id":"102"}}]}"#;
        assert_eq!(parse_dashboard(body).unwrap(), vec!["101", "102"]);
        assert!(parse_dashboard(r#"{"builds":[]}"#).unwrap().is_empty());
    }
}
