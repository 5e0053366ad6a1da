//! stratus-reconcile: the fleet reconciliation engine.
//!
//! Decides which VMs are garbage by cross-referencing two independently
//! consistent systems, and retires them without ever destroying a VM that
//! might still be doing work.
//!
//! # Campaign
//!
//! ```text
//! 1. enumerate      list_agents, drop offline+ephemeral, repeat to fixed point
//! 2. verify         N rounds: VerificationTally per agent
//! 3. select         perfectly confirmed agents are garbage
//! 4. override       cross_check_activity restores busy candidates
//! 5. active set     fresh listing → IPs of everything not garbage
//! 6. cross-ref      VM not in active set AND older than min_safe_age
//! 7. safety checks  children idle → uptime ≥ min → kill switch idle
//! 8. retire         stop agent → archive config → re-confirm → delete once
//! ```
//!
//! Every step errs toward leaving a dead VM alive.

pub mod drain;
pub mod engine;
pub mod error;
pub mod probe;
pub mod report;
pub mod tally;

pub use engine::ReconciliationEngine;
pub use error::{ReconcileError, ReconcileResult};
pub use probe::{HostProbe, ShellProbe, grep_safe};
pub use report::{CampaignReport, SkipReason};
pub use tally::VerificationTally;
