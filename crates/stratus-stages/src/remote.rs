//! Remote shell seam and the OpenSSH implementation.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use stratus_core::SshConfig;

use crate::error::{RemoteError, RemoteResult};

/// Exit status and captured output of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// "Run a command on a host" and "copy local files to a host's home
/// directory". A nonzero remote exit is reported in [`CommandOutput`],
/// never as an error.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn run(&self, host: &str, command: &str) -> RemoteResult<CommandOutput>;

    async fn copy_to(&self, host: &str, paths: &[PathBuf]) -> RemoteResult<CommandOutput>;
}

/// `ssh`/`scp` driven as child processes with options suited to freshly
/// booted hosts nobody has seen before.
#[derive(Debug, Clone)]
pub struct OpenSsh {
    user: String,
    identity_file: Option<PathBuf>,
    connect_timeout: Duration,
}

impl OpenSsh {
    pub fn new(config: &SshConfig) -> Self {
        Self {
            user: config.user.clone(),
            identity_file: config.identity_file.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        }
    }

    fn common_options(&self, cmd: &mut Command) {
        cmd.arg("-o").arg("UserKnownHostsFile=/dev/null")
            .arg("-o").arg("StrictHostKeyChecking=no")
            .arg("-o").arg("BatchMode=yes")
            .arg("-o").arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs()))
            .arg("-o").arg("LogLevel=ERROR");
        if let Some(ref identity) = self.identity_file {
            cmd.arg("-i").arg(identity);
        }
    }

    fn target(&self, host: &str) -> String {
        format!("{}@{}", self.user, host)
    }
}

#[async_trait]
impl RemoteShell for OpenSsh {
    async fn run(&self, host: &str, command: &str) -> RemoteResult<CommandOutput> {
        let mut cmd = Command::new("ssh");
        cmd.arg("-T");
        self.common_options(&mut cmd);
        cmd.arg(self.target(host)).arg(command);
        debug!(host, command, "ssh");
        collect(cmd, "ssh").await
    }

    async fn copy_to(&self, host: &str, paths: &[PathBuf]) -> RemoteResult<CommandOutput> {
        let mut cmd = Command::new("scp");
        cmd.arg("-r");
        self.common_options(&mut cmd);
        cmd.args(paths).arg(format!("{}:", self.target(host)));
        debug!(host, files = paths.len(), "scp");
        collect(cmd, "scp").await
    }
}

async fn collect(mut cmd: Command, program: &'static str) -> RemoteResult<CommandOutput> {
    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| RemoteError::Spawn { program, source })?;
    Ok(CommandOutput {
        // Killed by a signal: report like a shell would.
        status: output.status.code().unwrap_or(255),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
