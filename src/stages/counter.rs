//! # Counter Stage
//!
//! Folds the stream of per-worker progress counters into periodic status
//! deltas and detects command completion.
//!
//! Increments accumulate in memory and flush when the batch commits; the
//! stage's batch time threshold is the flush timer, so many small counter
//! records become one KV read-modify-merge per command per interval. All
//! counters for a command land on one partition (key routing), so there is
//! no cross-worker race on a command's processed count.
//!
//! Increments for a command whose persisted status does not yet carry a
//! `total` are deferred to a later flush: emitting them earlier would race
//! the Scroller's terminal delta at the blind-writing Status sink. The sink
//! also persists asynchronously, so a KV read can lag this stage's own
//! previous emission; `processed` is therefore floored at the last value
//! emitted here, never trusting the round-trip through the sink. This
//! stage is the single writer of `processed` for its partition's commands,
//! which is what makes the in-memory floor authoritative.

use crate::consumer::{Consumer, ConsumerError};
use crate::kv::KvStore;
use crate::messaging::codec;
use crate::messaging::{BulkCounter, BulkState, BulkStatus};
use crate::stages::STATUS_STREAM;
use crate::transport::{LogTransport, Record};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Consumes the counter stream and emits merged statuses
pub struct CounterComputation {
    transport: Arc<dyn LogTransport>,
    kv: Arc<dyn KvStore>,
    /// Increments accepted in the current batch, per command id
    pending: HashMap<String, u64>,
    /// Increments from committed batches awaiting a known total
    deferred: HashMap<String, u64>,
    /// Last `processed` value emitted per command; floors stale KV reads
    emitted: HashMap<String, u64>,
}

impl CounterComputation {
    pub fn new(transport: Arc<dyn LogTransport>, kv: Arc<dyn KvStore>) -> Self {
        Self {
            transport,
            kv,
            pending: HashMap::new(),
            deferred: HashMap::new(),
            emitted: HashMap::new(),
        }
    }

    /// Merge one command's increment over its persisted status and emit the
    /// result; `Ok(false)` defers the increment because the scroll has not
    /// reported a total yet
    async fn flush_one(&mut self, command_id: &str, increment: u64) -> Result<bool, ConsumerError> {
        let key = BulkStatus::status_key(command_id);
        let current = self
            .kv
            .get(&key)
            .await
            .map_err(ConsumerError::retryable)?;
        let mut status = match current {
            Some(bytes) => codec::decode::<BulkStatus>(&bytes)?,
            None => BulkStatus::delta(command_id),
        };
        let Some(total) = status.total else {
            return Ok(false);
        };
        // the KV may lag the sink; never count from below our own emissions
        let floor = self.emitted.get(command_id).copied().unwrap_or(0);
        if status.processed.unwrap_or(0) < floor {
            status.processed = Some(floor);
        }
        status.merge_delta(&BulkStatus::delta(command_id).with_processed(increment));

        let processed = status.processed.unwrap_or(0);
        if processed >= total && !status.is_completed() {
            status.state = Some(BulkState::Completed);
            status.completed_at = Some(Utc::now());
            info!(
                command_id = %command_id,
                total = total,
                processed = processed,
                "bulk command completed"
            );
        }

        let record = Record::new(command_id.to_string(), codec::encode(&status)?);
        self.transport
            .append(STATUS_STREAM, record)
            .map_err(ConsumerError::retryable)?;
        if status.is_completed() {
            self.emitted.remove(command_id);
        } else {
            self.emitted.insert(command_id.to_string(), processed);
        }
        Ok(true)
    }
}

#[async_trait]
impl Consumer for CounterComputation {
    async fn begin(&mut self) {
        // pending only ever holds the current batch's increments
        debug_assert!(self.pending.is_empty());
    }

    async fn accept(&mut self, record: &Record) -> Result<(), ConsumerError> {
        let counter: BulkCounter = match codec::decode(&record.data) {
            Ok(counter) => counter,
            Err(err) => {
                error!(key = %record.key, error = %err, "dropping undecodable counter");
                return Ok(());
            }
        };
        *self.pending.entry(counter.command_id).or_insert(0) += counter.count;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), ConsumerError> {
        if self.pending.is_empty() && self.deferred.is_empty() {
            // idle interval, nothing to emit
            return Ok(());
        }
        let mut combined = self.deferred.clone();
        for (command_id, increment) in &self.pending {
            *combined.entry(command_id.clone()).or_insert(0) += increment;
        }

        let mut still_deferred = HashMap::new();
        let mut failed = None;
        for (command_id, increment) in combined {
            match self.flush_one(&command_id, increment).await {
                Ok(true) => {}
                Ok(false) => {
                    still_deferred.insert(command_id, increment);
                }
                Err(err) => {
                    failed = Some(err);
                    break;
                }
            }
        }
        if let Some(err) = failed {
            // the batch rolls back and replays from the checkpoint; the
            // deferred map is untouched so committed increments survive
            return Err(err);
        }
        debug!(
            flushed = self.pending.len(),
            deferred = still_deferred.len(),
            "counter flush committed"
        );
        self.pending.clear();
        self.deferred = still_deferred;
        Ok(())
    }

    async fn rollback(&mut self) {
        // the current batch will be redelivered; deferred increments came
        // from batches that already committed and must be kept
        self.pending.clear();
    }
}
