//! stratus-cloud: the cloud inventory collaborator.
//!
//! The cloud controller is the source of truth for which VMs exist in a
//! pool. Everything above this crate talks to it through
//! [`CloudInventory`].
//!
//! # Architecture
//!
//! ```text
//! RetryingInventory (bounded fixed-delay retry → PoolInformation)
//!   └── dyn CloudInventory
//!         ├── OneCli           (onevm / onetemplate, JSON output)
//!         └── MemoryInventory  (tests, dry runs)
//! ```

pub mod error;
pub mod inventory;
pub mod memory;
pub mod naming;
pub mod one;
pub mod retrying;

pub use error::{CloudError, CloudResult};
pub use inventory::{CloudInventory, TemplateRef};
pub use memory::MemoryInventory;
pub use naming::{belongs_to_pool, vm_name};
pub use one::OneCli;
pub use retrying::RetryingInventory;
