//! stratus-pool: keeps a pool at its configured size.
//!
//! # Architecture
//!
//! ```text
//! PoolController::fill
//!   ├── delta = count − |list_vms(pool)|
//!   ├── partition(delta, batch) → [b₁, b₂, …]
//!   └── JoinSet: one worker per batch, start staggered
//!         create bᵢ VMs → wait until settled → Provisioner::run_stages
//!           → delete failures → Provisioner::register
//!
//! Provisioner (also used directly by re-provision, check, re-register)
//!   └── RemoteExecutor: await_ready → compile → ship → execute (bounded retries)
//! ```

pub mod controller;
pub mod error;
pub mod outcome;
pub mod provisioner;

pub use controller::{PoolController, partition};
pub use error::{PoolError, PoolResult};
pub use outcome::{PoolOutcome, RunResults, WorkerReport};
pub use provisioner::Provisioner;
