//! # Status Stage
//!
//! The single writer of durable truth for command status. A pure sink: it
//! blind-writes the latest encoded status under `<commandId>:status` and
//! checkpoints. No merge logic lives here; whichever upstream stage emitted
//! the record held the authoritative value for the fields it owns.

use crate::consumer::{Consumer, ConsumerError};
use crate::kv::KvStore;
use crate::messaging::codec;
use crate::messaging::BulkStatus;
use crate::stages; // stream names
use crate::transport::Record;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Consumes status deltas and persists them in the KV store
pub struct StatusComputation {
    kv: Arc<dyn KvStore>,
    ttl: Option<Duration>,
}

impl StatusComputation {
    pub fn new(kv: Arc<dyn KvStore>, ttl: Option<Duration>) -> Self {
        Self { kv, ttl }
    }
}

#[async_trait]
impl Consumer for StatusComputation {
    async fn begin(&mut self) {}

    async fn accept(&mut self, record: &Record) -> Result<(), ConsumerError> {
        // decode only to validate and extract the command id
        let status: BulkStatus = match codec::decode(&record.data) {
            Ok(status) => status,
            Err(err) => {
                error!(
                    stream = stages::STATUS_STREAM,
                    key = %record.key,
                    error = %err,
                    "dropping undecodable status"
                );
                return Ok(());
            }
        };
        let key = BulkStatus::status_key(&status.command_id);
        let write = match self.ttl {
            Some(ttl) => self.kv.put_with_ttl(&key, record.data.clone(), ttl).await,
            None => self.kv.put(&key, record.data.clone()).await,
        };
        write.map_err(ConsumerError::retryable)?;
        debug!(command_id = %status.command_id, state = ?status.state, "status persisted");
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), ConsumerError> {
        Ok(())
    }

    async fn rollback(&mut self) {
        // blind rewrites are idempotent; replay converges on the same value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use crate::messaging::BulkState;

    fn status_record(status: &BulkStatus) -> Record {
        Record::new(status.command_id.clone(), codec::encode(status).unwrap())
    }

    #[tokio::test]
    async fn test_persists_latest_status() {
        let kv = Arc::new(MemoryKvStore::new());
        let mut computation = StatusComputation::new(kv.clone(), None);

        let first = BulkStatus::delta("cmd-1").with_state(BulkState::ScrollingRunning);
        let second = BulkStatus::delta("cmd-1")
            .with_state(BulkState::Running)
            .with_total(42);
        computation.accept(&status_record(&first)).await.unwrap();
        computation.accept(&status_record(&second)).await.unwrap();

        let bytes = kv.get("cmd-1:status").await.unwrap().unwrap();
        let persisted: BulkStatus = codec::decode(&bytes).unwrap();
        assert_eq!(persisted, second);
    }

    #[tokio::test]
    async fn test_undecodable_status_is_dropped() {
        let kv = Arc::new(MemoryKvStore::new());
        let mut computation = StatusComputation::new(kv.clone(), None);
        computation
            .accept(&Record::new("cmd-1", b"garbage".to_vec()))
            .await
            .unwrap();
        assert!(kv.get("cmd-1:status").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ttl_applied() {
        let kv = Arc::new(MemoryKvStore::new());
        let mut computation =
            StatusComputation::new(kv.clone(), Some(Duration::from_millis(10)));
        let status = BulkStatus::delta("cmd-1").with_state(BulkState::Completed);
        computation.accept(&status_record(&status)).await.unwrap();
        assert!(kv.get("cmd-1:status").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(kv.get("cmd-1:status").await.unwrap().is_none());
    }
}
