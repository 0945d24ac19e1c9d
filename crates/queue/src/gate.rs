//! Batch trigger gate.
//!
//! Draining costs many round trips, so an invocation only drains once the
//! queue's depth estimate has reached the configured minimum batch size.

use serde::Serialize;

/// What to do with the current depth estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Drain,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchGate {
    minimum_batch_size: u64,
}

impl BatchGate {
    pub fn new(minimum_batch_size: u64) -> Self {
        Self { minimum_batch_size }
    }

    pub fn minimum_batch_size(&self) -> u64 {
        self.minimum_batch_size
    }

    pub fn check(&self, depth: u64) -> GateDecision {
        if depth < self.minimum_batch_size {
            GateDecision::Skip
        } else {
            GateDecision::Drain
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_inclusive() {
        let gate = BatchGate::new(300);
        assert_eq!(gate.check(0), GateDecision::Skip);
        assert_eq!(gate.check(299), GateDecision::Skip);
        assert_eq!(gate.check(300), GateDecision::Drain);
        assert_eq!(gate.check(10_000), GateDecision::Drain);
    }

    #[test]
    fn test_zero_minimum_always_drains() {
        assert_eq!(BatchGate::new(0).check(0), GateDecision::Drain);
    }
}
