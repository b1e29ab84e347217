//! Batch accumulation state machine.
//!
//! [`BatchState`] tracks how many records the current batch holds and how
//! long it has been open; [`BatchPolicy`] says when it must close. The
//! policy/state split keeps "is the batch closed" decisions out of the
//! consumer loop, so size-only, time-only, and externally forced policies
//! compose without touching [`crate::consumer::runner::ConsumerRunner`].

use std::time::{Duration, Instant};
use thiserror::Error;

/// Closing rules for one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Maximum records per batch
    pub capacity: usize,
    /// Maximum age of an open batch
    pub time_threshold: Duration,
}

impl BatchPolicy {
    pub fn new(capacity: usize, time_threshold: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            time_threshold,
        }
    }

    /// Degraded policy used while retrying a failed batch: one record per
    /// attempt narrows the blast radius of a repeated failure.
    pub fn no_batching(self) -> Self {
        Self {
            capacity: 1,
            time_threshold: self.time_threshold,
        }
    }
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self::new(10, Duration::from_millis(200))
    }
}

/// Lifecycle of one batch; transitions never go backward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStage {
    /// Accepting records
    Filling,
    /// Capacity reached or boundary forced
    Full,
    /// Time threshold elapsed
    Timeout,
    /// No more input for this run (poison pill or empty read)
    Last,
}

/// Attempt to count a record into a batch that is already closed
#[derive(Debug, Error, PartialEq, Eq)]
#[error("batch is {stage:?}, cannot increment")]
pub struct BatchClosed {
    pub stage: BatchStage,
}

/// Per-batch counter and deadline; one instance per batch, discarded on commit
#[derive(Debug)]
pub struct BatchState {
    policy: BatchPolicy,
    counter: usize,
    deadline: Instant,
    stage: BatchStage,
}

impl BatchState {
    /// Open a fresh batch: counter zero, deadline = now + time threshold
    pub fn start(policy: BatchPolicy) -> Self {
        Self {
            policy,
            counter: 0,
            deadline: Instant::now() + policy.time_threshold,
            stage: BatchStage::Filling,
        }
    }

    /// Count one accepted record; fails outside FILLING.
    ///
    /// Checks the stored stage only: a deadline that elapsed while the
    /// record was being accepted must not lose the count, the upgrade to
    /// TIMEOUT happens on the next [`Self::stage`] call.
    pub fn increment(&mut self) -> Result<(), BatchClosed> {
        if self.stage != BatchStage::Filling {
            return Err(BatchClosed { stage: self.stage });
        }
        self.counter += 1;
        Ok(())
    }

    /// Force the batch boundary (producer-controlled flush)
    pub fn force(&mut self) {
        if self.stage == BatchStage::Filling {
            self.stage = BatchStage::Full;
        }
    }

    /// Mark end of input for this run (poison pill, or nothing left to read)
    pub fn mark_last(&mut self) {
        if self.stage == BatchStage::Filling {
            self.stage = BatchStage::Last;
        }
    }

    /// Current stage, lazily upgrading FILLING on capacity or deadline
    pub fn stage(&mut self) -> BatchStage {
        if self.stage == BatchStage::Filling {
            if self.counter >= self.policy.capacity {
                self.stage = BatchStage::Full;
            } else if Instant::now() > self.deadline {
                self.stage = BatchStage::Timeout;
            }
        }
        self.stage
    }

    /// Records accepted into this batch so far
    pub fn size(&self) -> usize {
        self.counter
    }

    /// True while the batch still accepts records
    pub fn is_filling(&mut self) -> bool {
        self.stage() == BatchStage::Filling
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(capacity: usize, millis: u64) -> BatchPolicy {
        BatchPolicy::new(capacity, Duration::from_millis(millis))
    }

    #[test]
    fn test_fills_to_capacity() {
        let mut batch = BatchState::start(policy(3, 10_000));
        assert_eq!(batch.stage(), BatchStage::Filling);
        batch.increment().unwrap();
        batch.increment().unwrap();
        assert_eq!(batch.stage(), BatchStage::Filling);
        batch.increment().unwrap();
        assert_eq!(batch.stage(), BatchStage::Full);
        assert_eq!(batch.size(), 3);
    }

    #[test]
    fn test_timeout_regardless_of_counter() {
        let mut batch = BatchState::start(policy(100, 0));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(batch.stage(), BatchStage::Timeout);
    }

    #[test]
    fn test_increment_after_close_fails() {
        let mut batch = BatchState::start(policy(1, 10_000));
        batch.increment().unwrap();
        assert_eq!(batch.stage(), BatchStage::Full);
        let err = batch.increment().unwrap_err();
        assert_eq!(err.stage, BatchStage::Full);

        let mut batch = BatchState::start(policy(10, 10_000));
        batch.mark_last();
        assert!(batch.increment().is_err());
    }

    #[test]
    fn test_no_backward_transition() {
        let mut batch = BatchState::start(policy(1, 10_000));
        batch.increment().unwrap();
        assert_eq!(batch.stage(), BatchStage::Full);
        // LAST and force must not demote a closed batch
        batch.mark_last();
        assert_eq!(batch.stage(), BatchStage::Full);
        batch.force();
        assert_eq!(batch.stage(), BatchStage::Full);
    }

    #[test]
    fn test_forced_boundary() {
        let mut batch = BatchState::start(policy(100, 10_000));
        batch.increment().unwrap();
        batch.force();
        assert_eq!(batch.stage(), BatchStage::Full);
    }

    #[test]
    fn test_degraded_policy_is_single_item() {
        let degraded = policy(50, 100).no_batching();
        assert_eq!(degraded.capacity, 1);
        let mut batch = BatchState::start(degraded);
        batch.increment().unwrap();
        assert_eq!(batch.stage(), BatchStage::Full);
    }
}
