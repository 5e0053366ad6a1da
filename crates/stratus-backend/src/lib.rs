//! stratus-backend: CI backend adapters.
//!
//! Each CI server is reached through one [`BackendAdapter`]. The engine
//! only ever sees typed [`AgentRecord`]s; markup scraping and XML editing
//! stay inside the adapter that needs them.
//!
//! # Architecture
//!
//! ```text
//! BackendConfig ──► from_config ──► Arc<dyn BackendAdapter>
//!                                     ├── JenkinsBackend         (SimpleAgent)
//!                                     ├── BambooBackend          (EphemeralScrapedAgent)
//!                                     ├── OperationCenterBackend (ManagedSlave)
//!                                     └── MemoryBackend          (tests, dry runs)
//!                                              │
//!                                              ▼
//!                                        HttpClient (basic auth, cookies,
//!                                                    crumb, bounded retry)
//! ```
//!
//! [`AgentRecord`]: stratus_core::AgentRecord

pub mod adapter;
pub mod bamboo;
pub mod error;
pub mod http;
pub mod jenkins;
pub mod memory;
pub mod operation_center;
pub mod xml;

pub use adapter::{AgentHostProfile, BackendAdapter, BackendKind, from_config};
pub use bamboo::BambooBackend;
pub use error::{BackendError, BackendResult};
pub use http::HttpClient;
pub use jenkins::JenkinsBackend;
pub use memory::MemoryBackend;
pub use operation_center::OperationCenterBackend;
