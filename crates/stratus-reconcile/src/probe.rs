//! Pre-deletion host checks run over the remote shell.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use stratus_backend::AgentHostProfile;
use stratus_core::GcConfig;
use stratus_stages::{CommandOutput, RemoteShell, shell_quote};

use crate::error::{ReconcileError, ReconcileResult};

/// Exit status `ssh` reports when it could not reach the host.
const SSH_CONNECT_FAILURE: i32 = 255;

/// What the engine needs to know about a candidate host before deleting it.
///
/// The polling methods return `Ok(false)` when their budget runs out with
/// the condition still unmet.
#[async_trait]
pub trait HostProbe: Send + Sync {
    async fn reachable(&self, host: &str) -> bool;

    /// True once no child of the agent process is running.
    async fn children_settled(&self, host: &str) -> ReconcileResult<bool>;

    /// Seconds the main agent process has been running; `None` when no
    /// such process exists.
    async fn agent_uptime(&self, host: &str) -> ReconcileResult<Option<u64>>;

    /// True once no self-disable helper is running.
    async fn kill_switch_settled(&self, host: &str) -> ReconcileResult<bool>;

    /// Ask the agent to stop and wait for its main process to exit.
    async fn stop_agent(&self, host: &str) -> ReconcileResult<bool>;

    /// Contents of the agent's local configuration, if it has one.
    async fn read_agent_config(&self, host: &str) -> ReconcileResult<Option<String>>;
}

/// Bracket the first character so the pattern never matches the shell
/// running the `pgrep` itself: `bamboo` becomes `[b]amboo`.
pub fn grep_safe(pattern: &str) -> String {
    let mut chars = pattern.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => format!("[{first}]{}", chars.as_str()),
        _ => pattern.to_string(),
    }
}

/// [`HostProbe`] built from `pgrep`/`ps` one-liners.
pub struct ShellProbe {
    shell: Arc<dyn RemoteShell>,
    profile: AgentHostProfile,
    gc: GcConfig,
}

impl ShellProbe {
    pub fn new(shell: Arc<dyn RemoteShell>, profile: AgentHostProfile, gc: &GcConfig) -> Self {
        Self {
            shell,
            profile,
            gc: gc.clone(),
        }
    }

    async fn exec(&self, host: &str, command: &str) -> ReconcileResult<CommandOutput> {
        let out = self
            .shell
            .run(host, command)
            .await
            .map_err(|e| probe_error(host, e.to_string()))?;
        if out.status == SSH_CONNECT_FAILURE {
            return Err(probe_error(host, "connection failed"));
        }
        Ok(out)
    }

    async fn count(&self, host: &str, command: &str) -> ReconcileResult<u64> {
        let out = self.exec(host, command).await?;
        out.stdout
            .trim()
            .parse()
            .map_err(|_| probe_error(host, format!("unexpected output {:?}", out.stdout.trim())))
    }

    /// Poll `command` until it prints zero.
    async fn poll_zero(
        &self,
        host: &str,
        command: &str,
        attempts: u32,
        delay_secs: u64,
    ) -> ReconcileResult<bool> {
        let delay = Duration::from_secs(delay_secs);
        for attempt in 1..=attempts.max(1) {
            let n = self.count(host, command).await?;
            if n == 0 {
                return Ok(true);
            }
            debug!(host, attempt, running = n, "waiting for processes to exit");
            if attempt < attempts {
                tokio::time::sleep(delay).await;
            }
        }
        Ok(false)
    }

    fn children_command(&self) -> String {
        let pattern = shell_quote(&grep_safe(&self.profile.process_pattern));
        format!(
            "pids=$(pgrep -f {pattern} | tr '\\n' ' '); n=0; \
             for p in $pids; do for c in $(pgrep -P $p); do \
             case \" $pids \" in *\" $c \"*) ;; *) n=$((n+1));; esac; \
             done; done; echo $n"
        )
    }

    fn pgrep_count(pattern: &str) -> String {
        format!("pgrep -c -f {} || true", shell_quote(&grep_safe(pattern)))
    }
}

#[async_trait]
impl HostProbe for ShellProbe {
    async fn reachable(&self, host: &str) -> bool {
        matches!(self.shell.run(host, "true").await, Ok(out) if out.success())
    }

    async fn children_settled(&self, host: &str) -> ReconcileResult<bool> {
        self.poll_zero(
            host,
            &self.children_command(),
            self.gc.child_poll_attempts,
            self.gc.child_poll_secs,
        )
        .await
    }

    async fn agent_uptime(&self, host: &str) -> ReconcileResult<Option<u64>> {
        let command = format!(
            "pid=$(pgrep -o -f {}); [ -n \"$pid\" ] && ps -o etimes= -p \"$pid\" || true",
            shell_quote(&grep_safe(&self.profile.main_process))
        );
        let out = self.exec(host, &command).await?;
        let text = out.stdout.trim();
        if text.is_empty() {
            return Ok(None);
        }
        text.parse()
            .map(Some)
            .map_err(|_| probe_error(host, format!("unexpected uptime {text:?}")))
    }

    async fn kill_switch_settled(&self, host: &str) -> ReconcileResult<bool> {
        self.poll_zero(
            host,
            &Self::pgrep_count(&self.profile.kill_switch_pattern),
            self.gc.kill_switch_poll_attempts,
            self.gc.kill_switch_poll_secs,
        )
        .await
    }

    async fn stop_agent(&self, host: &str) -> ReconcileResult<bool> {
        let out = self.exec(host, &self.profile.stop_command).await?;
        if !out.success() {
            debug!(host, status = out.status, "stop command returned nonzero");
        }
        self.poll_zero(
            host,
            &Self::pgrep_count(&self.profile.main_process),
            self.gc.stop_poll_attempts,
            self.gc.stop_poll_secs,
        )
        .await
    }

    async fn read_agent_config(&self, host: &str) -> ReconcileResult<Option<String>> {
        let Some(ref path) = self.profile.config_path else {
            return Ok(None);
        };
        let out = self.exec(host, &format!("cat {}", shell_quote(path))).await?;
        Ok(out.success().then_some(out.stdout))
    }
}

fn probe_error(host: &str, reason: impl Into<String>) -> ReconcileError {
    ReconcileError::Probe {
        host: host.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_stages::MemoryShell;

    fn profile() -> AgentHostProfile {
        AgentHostProfile {
            process_pattern: "bamboo".into(),
            main_process: "java".into(),
            stop_command: "agent stop".into(),
            config_path: Some("./agent.cfg".into()),
            kill_switch_pattern: "self-disable".into(),
        }
    }

    fn probe(shell: MemoryShell) -> (Arc<MemoryShell>, ShellProbe) {
        let shell = Arc::new(shell);
        let probe = ShellProbe::new(shell.clone(), profile(), &GcConfig::immediate());
        (shell, probe)
    }

    #[test]
    fn grep_safe_brackets_first_char() {
        assert_eq!(grep_safe("bamboo"), "[b]amboo");
        assert_eq!(grep_safe("self-disable"), "[s]elf-disable");
        assert_eq!(grep_safe(""), "");
        assert_eq!(grep_safe("[j]ava"), "[j]ava");
    }

    #[tokio::test]
    async fn uptime_parses_elapsed_seconds() {
        let (_, probe) = probe(MemoryShell::with_responder(|_, _| CommandOutput::ok("  1234\n")));
        assert_eq!(probe.agent_uptime("10.0.0.1").await.unwrap(), Some(1234));
    }

    #[tokio::test]
    async fn uptime_without_process_is_none() {
        let (_, probe) = probe(MemoryShell::with_responder(|_, _| CommandOutput::ok("")));
        assert_eq!(probe.agent_uptime("10.0.0.1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn kill_switch_poll_gives_up_after_budget() {
        let (shell, probe) = probe(MemoryShell::with_responder(|_, _| CommandOutput::ok("1")));
        assert!(!probe.kill_switch_settled("10.0.0.1").await.unwrap());
        assert_eq!(
            shell.commands_for("10.0.0.1").len(),
            GcConfig::default().kill_switch_poll_attempts as usize
        );
    }

    #[tokio::test]
    async fn stop_agent_waits_for_process_exit() {
        let (shell, probe) = probe(MemoryShell::with_responder(|_, cmd| {
            if cmd == "agent stop" {
                CommandOutput::ok("")
            } else {
                CommandOutput::ok("0")
            }
        }));
        assert!(probe.stop_agent("10.0.0.1").await.unwrap());
        let cmds = shell.commands_for("10.0.0.1");
        assert_eq!(cmds[0], "agent stop");
        assert!(cmds[1].contains("[j]ava"));
    }

    #[tokio::test]
    async fn connection_failure_is_a_probe_error() {
        let (_, probe) = probe(MemoryShell::with_responder(|_, _| CommandOutput::failed(255)));
        assert!(!probe.reachable("10.0.0.1").await);
        assert!(matches!(
            probe.children_settled("10.0.0.1").await,
            Err(ReconcileError::Probe { .. })
        ));
    }

    #[tokio::test]
    async fn missing_config_file_reads_as_none() {
        let (_, probe) = probe(MemoryShell::with_responder(|_, _| CommandOutput::failed(1)));
        assert_eq!(probe.read_agent_config("10.0.0.1").await.unwrap(), None);
    }
}
