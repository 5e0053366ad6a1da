//! stratus-core: shared vocabulary for the Stratus fleet manager.
//!
//! Holds the records exchanged between the cloud inventory, the CI
//! backends and the reconciliation engine, the statically validated pool
//! configuration, and the bounded retry helper every polling loop uses.
//!
//! # Architecture
//!
//! ```text
//! PoolConfig (TOML)
//!   ├── BackendConfig   → stratus-backend adapters
//!   ├── StageSpec list  → stratus-stages bundles
//!   ├── Tunables        → retry counts / delays everywhere
//!   └── GcConfig        → stratus-reconcile campaigns
//!
//! AgentRecord (backend view)  ──┐
//!                               ├── reconciled by IP
//! VmRecord    (cloud view)    ──┘
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock, epoch_secs};
pub use config::{
    AgentHostConfig, AgentMode, BackendConfig, BambooConfig, ConfigIssues, GcConfig,
    JenkinsConfig, OperationCenterConfig, PoolConfig, Secret, SshConfig, StageSpec, Tunables,
    validate_keys,
};
pub use error::{ConfigError, ConfigResult};
pub use retry::{retry_fixed, retry_fixed_if};
pub use types::*;
