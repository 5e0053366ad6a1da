//! Per-VM and per-worker result records.

use serde::Serialize;

use stratus_core::VmRecord;

/// VMs partitioned into the two outcome sets.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunResults {
    pub succeeded: Vec<VmRecord>,
    pub failed: Vec<VmRecord>,
}

impl RunResults {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What one worker did with its batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerReport {
    pub worker: usize,
    pub batch: u32,
    pub results: RunResults,
    /// Errors that kept VMs from being created at all.
    pub errors: Vec<String>,
}

/// Aggregate of a partitioned provisioning run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolOutcome {
    pub batches: Vec<u32>,
    pub reports: Vec<WorkerReport>,
    /// Workers that panicked; their whole batch counts as failed.
    pub crashed: Vec<usize>,
}

impl PoolOutcome {
    pub fn requested(&self) -> u64 {
        self.batches.iter().map(|&b| u64::from(b)).sum()
    }

    pub fn succeeded(&self) -> u64 {
        self.reports
            .iter()
            .map(|r| r.results.succeeded.len() as u64)
            .sum()
    }

    /// Everything requested that did not succeed, including VMs that were
    /// never created and batches of crashed workers.
    pub fn failed(&self) -> u64 {
        self.requested().saturating_sub(self.succeeded())
    }

    pub fn is_success(&self) -> bool {
        self.crashed.is_empty() && self.failed() == 0
    }

    pub fn results(&self) -> impl Iterator<Item = &RunResults> {
        self.reports.iter().map(|r| &r.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_core::VmState;

    fn vm(id: &str) -> VmRecord {
        VmRecord {
            id: id.into(),
            name: format!("p-{id}"),
            ip: None,
            start_time: 0,
            pool_tag: None,
            state: VmState::Running,
            hostname: None,
        }
    }

    #[test]
    fn crashed_batches_count_as_failed() {
        let outcome = PoolOutcome {
            batches: vec![2, 2, 1],
            reports: vec![
                WorkerReport {
                    worker: 0,
                    batch: 2,
                    results: RunResults {
                        succeeded: vec![vm("1"), vm("2")],
                        failed: vec![],
                    },
                    errors: vec![],
                },
                WorkerReport {
                    worker: 2,
                    batch: 1,
                    results: RunResults {
                        succeeded: vec![],
                        failed: vec![vm("5")],
                    },
                    errors: vec![],
                },
            ],
            crashed: vec![1],
        };
        assert_eq!(outcome.requested(), 5);
        assert_eq!(outcome.succeeded(), 2);
        assert_eq!(outcome.failed(), 3);
        assert!(!outcome.is_success());
    }
}
