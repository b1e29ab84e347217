//! # Scroller Stage
//!
//! Turns one [`BulkCommand`] into a sequence of [`BulkBucket`] records on
//! the action's stream, updating the command's status before, during, and
//! after the scroll.
//!
//! Statuses are emitted out-of-band the moment they are known (not at this
//! stage's own checkpoint), so progress is visible while a long scroll is
//! still running. Buckets are appended page by page; there is no
//! long-lived transaction spanning the whole scroll.

use crate::config::BulkConfig;
use crate::consumer::{Consumer, ConsumerError};
use crate::messaging::codec;
use crate::messaging::{BulkBucket, BulkCommand, BulkState, BulkStatus};
use crate::scroll::{DocumentScroller, ScrollError};
use crate::stages::{bucket_stream, STATUS_STREAM};
use crate::transport::{LogTransport, Record};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Consumes the command stream and produces buckets plus status deltas
pub struct ScrollerComputation {
    transport: Arc<dyn LogTransport>,
    scroller: Arc<dyn DocumentScroller>,
    config: Arc<BulkConfig>,
}

impl ScrollerComputation {
    pub fn new(
        transport: Arc<dyn LogTransport>,
        scroller: Arc<dyn DocumentScroller>,
        config: Arc<BulkConfig>,
    ) -> Self {
        Self {
            transport,
            scroller,
            config,
        }
    }

    fn emit_status(&self, delta: &BulkStatus) -> Result<(), ConsumerError> {
        let record = Record::new(delta.command_id.clone(), codec::encode(delta)?);
        self.transport
            .append(STATUS_STREAM, record)
            .map_err(ConsumerError::retryable)?;
        Ok(())
    }

    fn emit_bucket(&self, action: &str, bucket: &BulkBucket) -> Result<(), ConsumerError> {
        let record = Record::new(bucket.record_key(), codec::encode(bucket)?);
        self.transport
            .append(&bucket_stream(action), record)
            .map_err(ConsumerError::retryable)?;
        Ok(())
    }

    /// Drain full buckets out of the accumulation buffer
    fn flush_full_buckets(
        &self,
        command: &BulkCommand,
        buffer: &mut Vec<String>,
        bucket_size: usize,
        bucket_number: &mut u64,
    ) -> Result<(), ConsumerError> {
        while buffer.len() >= bucket_size {
            let ids: Vec<String> = buffer.drain(..bucket_size).collect();
            *bucket_number += 1;
            let bucket = BulkBucket::new(command.id.clone(), *bucket_number, ids);
            self.emit_bucket(&command.action, &bucket)?;
        }
        Ok(())
    }

    async fn scroll_command(&self, command: &BulkCommand) -> Result<(), ConsumerError> {
        let bucket_size = self
            .config
            .effective_bucket_size(&command.action, command.bucket_size);
        info!(
            command_id = %command.id,
            action = %command.action,
            username = %command.username,
            repository = %command.repository,
            bucket_size = bucket_size,
            "scrolling bulk command"
        );
        let scroll_start = Utc::now();
        self.emit_status(
            &BulkStatus::delta(&command.id)
                .with_state(BulkState::ScrollingRunning)
                .with_scroll_start(scroll_start),
        )?;

        let first = self
            .scroller
            .scroll(
                &command.query,
                self.config.scroll_batch_size,
                self.config.scroll_keep_alive,
            )
            .await;
        let mut page = match first {
            Ok(page) => page,
            Err(ScrollError::InvalidQuery { message }) => {
                // a bad query matches nothing; it must not stall the pipeline
                error!(command_id = %command.id, error = %message, "invalid query, completing with zero total");
                return self.complete_empty(command, scroll_start);
            }
            Err(other) => return Err(ConsumerError::retryable(other)),
        };

        let mut buffer: Vec<String> = Vec::new();
        let mut total: u64 = 0;
        let mut bucket_number: u64 = 0;
        while !page.ids.is_empty() {
            total += page.ids.len() as u64;
            buffer.extend(page.ids);
            self.flush_full_buckets(command, &mut buffer, bucket_size, &mut bucket_number)?;
            // page boundary: everything emitted so far is durable
            debug!(command_id = %command.id, total = total, "scroll page flushed");
            page = match self.scroller.scroll_next(&page.scroll_id).await {
                Ok(page) => page,
                Err(ScrollError::InvalidQuery { message })
                | Err(ScrollError::Backend { message }) => {
                    return Err(ConsumerError::retryable(anyhow::anyhow!(message)));
                }
                Err(other) => return Err(ConsumerError::retryable(other)),
            };
        }

        if !buffer.is_empty() {
            bucket_number += 1;
            let bucket = BulkBucket::new(command.id.clone(), bucket_number, std::mem::take(&mut buffer));
            self.emit_bucket(&command.action, &bucket)?;
        }

        if total == 0 {
            return self.complete_empty(command, scroll_start);
        }
        info!(
            command_id = %command.id,
            total = total,
            buckets = bucket_number,
            "scroll completed"
        );
        // terminal deltas carry the scroll-start time too: the status sink
        // blind-writes whole records, so every emission from this stage must
        // be complete for the fields it owns
        self.emit_status(
            &BulkStatus::delta(&command.id)
                .with_state(BulkState::Running)
                .with_total(total)
                .with_scroll_start(scroll_start)
                .with_scroll_end(Utc::now()),
        )
    }

    /// Nothing matched (or the query was invalid): the command is done
    fn complete_empty(
        &self,
        command: &BulkCommand,
        scroll_start: chrono::DateTime<Utc>,
    ) -> Result<(), ConsumerError> {
        let now = Utc::now();
        self.emit_status(
            &BulkStatus::delta(&command.id)
                .with_state(BulkState::Completed)
                .with_total(0)
                .with_processed(0)
                .with_scroll_start(scroll_start)
                .with_scroll_end(now)
                .with_completed_at(now),
        )
    }
}

#[async_trait]
impl Consumer for ScrollerComputation {
    async fn begin(&mut self) {}

    async fn accept(&mut self, record: &Record) -> Result<(), ConsumerError> {
        let command: BulkCommand = match codec::decode(&record.data) {
            Ok(command) => command,
            Err(err) => {
                // an undecodable command carries no id to report a status for
                error!(key = %record.key, error = %err, "dropping undecodable bulk command");
                return Ok(());
            }
        };
        self.scroll_command(&command).await
    }

    async fn commit(&mut self) -> Result<(), ConsumerError> {
        // buckets and statuses are already appended; nothing buffered here
        Ok(())
    }

    async fn rollback(&mut self) {
        // emissions cannot be recalled; a replayed command re-emits the
        // same keyed buckets, which idempotent actions absorb
    }
}
