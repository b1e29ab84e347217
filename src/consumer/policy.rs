//! Consumer runner configuration.

use crate::batch::BatchPolicy;
use std::time::Duration;

/// Where a runner positions its tailer before the first batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOffset {
    /// Replay the stream from the first record
    Begin,
    /// Only records published after the runner starts
    End,
    /// Resume from the checkpoint; the only option in subscribe mode
    LastCommitted,
}

/// Bounded retry with exponential backoff
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Replay attempts after the initial failure
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            ..Self::default()
        }
    }

    /// No replay at all; the first failure is final
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::ZERO,
            backoff_factor: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Backoff before the given 1-based attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        self.initial_delay.mul_f64(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Full configuration for one [`super::ConsumerRunner`]
#[derive(Debug, Clone)]
pub struct ConsumerPolicy {
    /// Consumer-group name, also the checkpoint namespace
    pub name: String,
    pub batch: BatchPolicy,
    pub retry: RetryPolicy,
    /// Skip a batch whose retries are exhausted instead of terminating
    pub continue_on_failure: bool,
    pub start_offset: StartOffset,
    /// Random start delay bounded by the batch time threshold, applied once
    /// per runner lifetime to de-synchronize fleets started together
    pub salted: bool,
    /// Bounded wait for one read; an empty read closes the batch as LAST
    pub read_timeout: Duration,
}

impl ConsumerPolicy {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            batch: BatchPolicy::default(),
            retry: RetryPolicy::default(),
            continue_on_failure: false,
            start_offset: StartOffset::LastCommitted,
            salted: false,
            read_timeout: Duration::from_millis(200),
        }
    }

    pub fn with_batch(mut self, batch: BatchPolicy) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_continue_on_failure(mut self, continue_on_failure: bool) -> Self {
        self.continue_on_failure = continue_on_failure;
        self
    }

    pub fn with_start_offset(mut self, start_offset: StartOffset) -> Self {
        self.start_offset = start_offset;
        self
    }

    pub fn with_salted(mut self, salted: bool) -> Self {
        self.salted = salted;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}
