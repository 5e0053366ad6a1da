//! In-process [`RemoteShell`] for tests and dry runs.
//!
//! Commands are answered by a responder closure; every call is recorded.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::RemoteResult;
use crate::remote::{CommandOutput, RemoteShell};

type Responder = dyn Fn(&str, &str) -> CommandOutput + Send + Sync;

/// A recorded call: `(host, command)`; copies are recorded as `copy <n>`.
pub type ShellCall = (String, String);

#[derive(Clone)]
pub struct MemoryShell {
    responder: Arc<Responder>,
    calls: Arc<Mutex<Vec<ShellCall>>>,
}

impl MemoryShell {
    /// Every command and copy succeeds with empty output.
    pub fn succeeding() -> Self {
        Self::with_responder(|_, _| CommandOutput::ok(""))
    }

    pub fn with_responder(
        responder: impl Fn(&str, &str) -> CommandOutput + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Arc::new(responder),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<ShellCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Commands sent to one host, in order.
    pub fn commands_for(&self, host: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(h, _)| h == host)
            .map(|(_, c)| c)
            .collect()
    }

    fn record(&self, host: &str, command: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((host.to_string(), command));
        }
    }
}

#[async_trait]
impl RemoteShell for MemoryShell {
    async fn run(&self, host: &str, command: &str) -> RemoteResult<CommandOutput> {
        self.record(host, command.to_string());
        Ok((self.responder)(host, command))
    }

    async fn copy_to(&self, host: &str, paths: &[PathBuf]) -> RemoteResult<CommandOutput> {
        let label = format!("copy {}", paths.len());
        self.record(host, label.clone());
        Ok((self.responder)(host, &label))
    }
}
