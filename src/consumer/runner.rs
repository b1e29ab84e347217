//! # Consumer Runner
//!
//! Drives one partition-group's worth of message consumption for a named
//! consumer group: batch boundaries, commit-on-success, retry with a
//! degraded batch policy, rebalance handling, and optional skip-on-failure.
//!
//! Delivery is at-least-once: the checkpoint only advances after the
//! consumer's commit succeeded, so a crash or failed commit replays the
//! whole batch from the previous checkpoint.

use crate::batch::{BatchPolicy, BatchStage, BatchState};
use crate::consumer::{Consumer, ConsumerError, ConsumerPolicy, StartOffset};
use crate::error::{BulkError, Result};
use crate::metrics::{noop_metrics, SharedMetrics};
use crate::transport::{LogTailer, TailerError};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Outcome counters of one runner invocation
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerReport {
    /// Consumer group this runner served
    pub name: String,
    /// Records delivered to the consumer, failed attempts included
    pub accepted: u64,
    /// Records in successfully committed batches
    pub committed: u64,
    /// Batches committed
    pub batches: u64,
    /// Batches abandoned after exhausted retries (skip-on-failure)
    pub failures: u64,
    /// Rebalance signals handled
    pub rebalances: u64,
    /// Run ended on a poison pill rather than an idle read timeout
    pub poisoned: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug)]
struct BatchOutcome {
    committed: u64,
    last: bool,
}

/// Generic engine reading one stream's partition set for a consumer group
/// and feeding a [`Consumer`] under a [`ConsumerPolicy`]
pub struct ConsumerRunner<C: Consumer> {
    tailer: Box<dyn LogTailer>,
    consumer: C,
    policy: ConsumerPolicy,
    metrics: SharedMetrics,
    /// Tailer came from a group subscription; start offset is forced to
    /// the checkpoint
    subscribed: bool,
    /// Jitter still owed; consumed on the first delivered record
    salt_pending: bool,
    accepted: u64,
    poisoned: bool,
}

impl<C: Consumer> ConsumerRunner<C> {
    pub fn new(tailer: Box<dyn LogTailer>, consumer: C, policy: ConsumerPolicy) -> Self {
        let salt_pending = policy.salted;
        Self {
            tailer,
            consumer,
            policy,
            metrics: noop_metrics(),
            subscribed: false,
            salt_pending,
            accepted: 0,
            poisoned: false,
        }
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Mark the tailer as subscription-based; positioning then always
    /// resumes from the checkpoint regardless of the policy's start offset
    pub fn subscribed(mut self) -> Self {
        self.subscribed = true;
        self
    }

    pub fn consumer(&self) -> &C {
        &self.consumer
    }

    pub fn into_consumer(self) -> C {
        self.consumer
    }

    /// Consume until the stream runs dry (LAST) or a non-continuable
    /// failure terminates the loop
    pub async fn run(&mut self) -> Result<RunnerReport> {
        let started_at = Utc::now();
        let mut report = RunnerReport {
            name: self.policy.name.clone(),
            accepted: 0,
            committed: 0,
            batches: 0,
            failures: 0,
            rebalances: 0,
            poisoned: false,
            started_at,
            finished_at: started_at,
        };
        self.position_tailer();
        info!(
            group = %self.policy.name,
            partitions = ?self.tailer.assignments(),
            "consumer runner starting"
        );

        loop {
            let outcome = match self.process_batch(self.policy.batch).await {
                Ok(outcome) => outcome,
                Err(ConsumerError::Rebalanced) => {
                    self.on_rebalance(&mut report);
                    continue;
                }
                Err(ConsumerError::Retryable(cause)) => {
                    warn!(
                        group = %self.policy.name,
                        error = %cause,
                        "batch failed, retrying without batching"
                    );
                    match self.retry_batch().await {
                        Ok(outcome) => outcome,
                        Err(ConsumerError::Rebalanced) => {
                            self.on_rebalance(&mut report);
                            continue;
                        }
                        Err(err) => {
                            self.handle_terminal_failure(err, &mut report)?;
                            continue;
                        }
                    }
                }
                Err(err @ ConsumerError::Fatal(_)) => {
                    self.handle_terminal_failure(err, &mut report)?;
                    continue;
                }
            };

            if outcome.committed > 0 {
                report.committed += outcome.committed;
                report.batches += 1;
            }
            if outcome.last {
                break;
            }
        }

        self.consumer.close().await;
        report.accepted = self.accepted;
        report.poisoned = self.poisoned;
        report.finished_at = Utc::now();
        info!(
            group = %report.name,
            committed = report.committed,
            batches = report.batches,
            failures = report.failures,
            rebalances = report.rebalances,
            "consumer runner finished"
        );
        Ok(report)
    }

    fn position_tailer(&mut self) {
        let offset = if self.subscribed {
            StartOffset::LastCommitted
        } else {
            self.policy.start_offset
        };
        match offset {
            StartOffset::Begin => self.tailer.to_start(),
            StartOffset::End => self.tailer.to_end(),
            StartOffset::LastCommitted => self.tailer.to_last_committed(),
        }
    }

    /// One batch: begin, fill, commit consumer then checkpoint.
    /// Any error rolls the consumer back before propagating.
    async fn process_batch(&mut self, policy: BatchPolicy) -> std::result::Result<BatchOutcome, ConsumerError> {
        let mut batch = BatchState::start(policy);
        self.consumer.begin().await;
        let result = self.fill_batch(&mut batch).await;
        let outcome = match result {
            Ok(()) => self.commit_batch(&mut batch).await,
            Err(err) => Err(err),
        };
        if outcome.is_err() {
            self.consumer.rollback().await;
        }
        outcome
    }

    async fn fill_batch(&mut self, batch: &mut BatchState) -> std::result::Result<(), ConsumerError> {
        while batch.is_filling() {
            let record = match self.tailer.read(self.policy.read_timeout).await {
                Ok(Some(record)) => record,
                Ok(None) => {
                    // no input right now; end this run after the commit
                    batch.mark_last();
                    break;
                }
                Err(err) => return Err(err.into()),
            };
            if record.flags.poison_pill {
                debug!(group = %self.policy.name, "poison pill received");
                self.poisoned = true;
                batch.mark_last();
                break;
            }
            self.salt_once().await;
            let start = Instant::now();
            self.consumer.accept(&record).await?;
            self.metrics.record_duration("consumer.accept", start.elapsed());
            self.accepted += 1;
            batch
                .increment()
                .map_err(|e| ConsumerError::fatal(anyhow!("batch bookkeeping: {e}")))?;
            if record.flags.force_batch {
                batch.force();
            }
        }
        Ok(())
    }

    async fn commit_batch(&mut self, batch: &mut BatchState) -> std::result::Result<BatchOutcome, ConsumerError> {
        let last = batch.stage() == BatchStage::Last;
        let start = Instant::now();
        // an empty batch still commits: the batch boundary is the flush
        // timer for consumers carrying work across batches, idle or not
        self.consumer.commit().await?;
        self.metrics.record_duration("consumer.commit", start.elapsed());
        // checkpoint only after the downstream side effect is durable
        self.tailer.commit()?;
        if batch.size() > 0 {
            self.metrics.increment("consumer.committed", batch.size() as u64);
            debug!(
                group = %self.policy.name,
                size = batch.size(),
                stage = ?batch.stage(),
                "batch committed"
            );
        }
        Ok(BatchOutcome {
            committed: batch.size() as u64,
            last,
        })
    }

    /// Replay from the checkpoint one record at a time, bounded by the
    /// retry policy. Rebalance aborts the replay without consuming an
    /// attempt.
    async fn retry_batch(&mut self) -> std::result::Result<BatchOutcome, ConsumerError> {
        let degraded = self.policy.batch.no_batching();
        let mut attempt: u32 = 1;
        loop {
            if attempt > self.policy.retry.max_attempts {
                return Err(ConsumerError::retryable(anyhow!(
                    "retries exhausted after {} attempts",
                    self.policy.retry.max_attempts
                )));
            }
            self.tailer.to_last_committed();
            let delay = self.policy.retry.delay_for(attempt);
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
            match self.process_batch(degraded).await {
                Ok(outcome) => return Ok(outcome),
                Err(ConsumerError::Retryable(cause)) => {
                    self.metrics.increment("consumer.retries", 1);
                    warn!(
                        group = %self.policy.name,
                        attempt = attempt,
                        error = %cause,
                        "retry attempt failed"
                    );
                    attempt += 1;
                }
                Err(other) => return Err(other),
            }
        }
    }

    fn on_rebalance(&mut self, report: &mut RunnerReport) {
        report.rebalances += 1;
        self.metrics.increment("consumer.rebalances", 1);
        info!(
            group = %self.policy.name,
            partitions = ?self.tailer.assignments(),
            "rebalanced, restarting batch from checkpoint"
        );
        self.tailer.to_last_committed();
    }

    /// Exhausted-retry or fatal error: skip the batch when the policy
    /// allows, terminate otherwise.
    ///
    /// A skipped batch is fully discarded: the consumer was rolled back
    /// and the checkpoint advances past the failed attempt's reads, so no
    /// partial work is ever committed.
    fn handle_terminal_failure(
        &mut self,
        err: ConsumerError,
        report: &mut RunnerReport,
    ) -> Result<()> {
        if !self.policy.continue_on_failure {
            error!(group = %self.policy.name, error = %err, "terminating consumer runner");
            return Err(BulkError::Generic(anyhow!(err)));
        }
        report.failures += 1;
        self.metrics.increment("consumer.failures", 1);
        error!(
            group = %self.policy.name,
            error = %err,
            "skipping failed batch and continuing"
        );
        match self.tailer.commit() {
            Ok(()) => {}
            Err(TailerError::Rebalanced) => self.on_rebalance(report),
            Err(other) => return Err(BulkError::transport(other.to_string())),
        }
        Ok(())
    }

    /// Start jitter: sleep a random delay bounded by the batch time
    /// threshold, once per runner lifetime, so fleets started together do
    /// not flush in lock-step
    async fn salt_once(&mut self) {
        if !self.salt_pending {
            return;
        }
        self.salt_pending = false;
        let bound = self.policy.batch.time_threshold;
        if bound > Duration::ZERO {
            let jitter = rand::thread_rng().gen_range(Duration::ZERO..bound);
            debug!(group = %self.policy.name, jitter_ms = jitter.as_millis() as u64, "salted start");
            tokio::time::sleep(jitter).await;
        }
    }
}
