//! Per-agent multi-round inactivity confirmation.

/// Counts confirmations and vetoes across verification rounds.
///
/// An agent is garbage only when every round confirmed it inactive. A
/// single veto excludes it for the rest of the campaign, no matter how
/// many later rounds confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationTally {
    rounds: u32,
    confirmations: u32,
    vetoes: u32,
}

impl VerificationTally {
    pub fn new(rounds: u32) -> Self {
        Self {
            rounds: rounds.max(1),
            confirmations: 0,
            vetoes: 0,
        }
    }

    /// Record one round's observation.
    pub fn record(&mut self, confirmed_inactive: bool) {
        if confirmed_inactive {
            self.confirmations += 1;
        } else {
            self.vetoes += 1;
        }
    }

    /// Net score: +1 per confirmation, -1 per veto.
    pub fn score(&self) -> i64 {
        i64::from(self.confirmations) - i64::from(self.vetoes)
    }

    pub fn confirmations(&self) -> u32 {
        self.confirmations
    }

    pub fn vetoed(&self) -> bool {
        self.vetoes > 0
    }

    pub fn is_garbage(&self) -> bool {
        self.vetoes == 0 && self.confirmations == self.rounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_confirmation_is_garbage() {
        let mut t = VerificationTally::new(3);
        for _ in 0..3 {
            t.record(true);
        }
        assert!(t.is_garbage());
        assert_eq!(t.score(), 3);
    }

    #[test]
    fn one_active_round_vetoes() {
        let mut t = VerificationTally::new(3);
        t.record(true);
        t.record(true);
        t.record(false);
        assert!(!t.is_garbage());
        assert_eq!(t.score(), 1);
    }

    #[test]
    fn early_veto_is_not_outweighed_by_later_rounds() {
        let mut t = VerificationTally::new(2);
        t.record(false);
        t.record(true);
        t.record(true);
        assert!(t.vetoed());
        assert!(!t.is_garbage());
    }

    #[test]
    fn incomplete_rounds_are_not_garbage() {
        let mut t = VerificationTally::new(3);
        t.record(true);
        assert!(!t.is_garbage());
        assert!(!VerificationTally::new(1).is_garbage());
    }
}
