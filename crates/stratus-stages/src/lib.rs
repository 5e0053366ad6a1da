//! stratus-stages: the provisioning stage pipeline.
//!
//! Compiles a declarative stage list into a bundle directory (one file or
//! directory per stage plus a generated `runner.sh`), ships it to a host
//! over the remote shell, and runs it with one blocking command.
//!
//! # Architecture
//!
//! ```text
//! [StageSpec] ──► Stage::from_specs ──► StageBundle::compile(scope)
//!                                            │
//!                                            ▼
//!                       RemoteExecutor ── wait_ready (uptime poll)
//!                         │                ship     (copy_to home dir)
//!                         │                execute  (bash runner.sh)
//!                         ▼
//!                    dyn RemoteShell ── OpenSsh | MemoryShell
//! ```
//!
//! Bundles are scoped per process and worker so concurrently running
//! workers never share a directory.

pub mod bundle;
pub mod error;
pub mod executor;
pub mod memory;
pub mod remote;
pub mod stage;

pub use bundle::{BundleScope, RUNNER_SCRIPT, StageBundle, validate};
pub use error::{RemoteError, RemoteResult, StageError, StageResult};
pub use executor::{ProvisionOutcome, RemoteExecutor};
pub use memory::MemoryShell;
pub use remote::{CommandOutput, OpenSsh, RemoteShell};
pub use stage::{Stage, StageKind, shell_quote};
