//! Log transport contract.
//!
//! Named streams of ordered, partitioned, replayable records. Producers
//! publish keyed records; consumers attach tailers either to a static
//! partition set or through a named subscription group that rebalances
//! partitions across members. Checkpoints ("commits") are tracked per
//! (group, partition) and only advance when the tailer commits.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryLog;

/// Semantic flags carried by a record
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordFlags {
    /// Sentinel: no more input will arrive on this partition
    pub poison_pill: bool,
    /// Producer-requested batch boundary after this record
    pub force_batch: bool,
}

/// The unit the log transport transmits: opaque key + encoded payload.
/// The key drives partition routing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub key: String,
    pub data: Vec<u8>,
    #[serde(default)]
    pub flags: RecordFlags,
}

impl Record {
    pub fn new<S: Into<String>>(key: S, data: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            data,
            flags: RecordFlags::default(),
        }
    }

    /// End-of-stream sentinel for one partition
    pub fn poison_pill() -> Self {
        Self {
            key: String::new(),
            data: Vec::new(),
            flags: RecordFlags {
                poison_pill: true,
                force_batch: false,
            },
        }
    }

    pub fn with_force_batch(mut self) -> Self {
        self.flags.force_batch = true;
        self
    }
}

/// Errors surfaced by tailers; rebalance is a control signal, not a failure
#[derive(Debug, Error)]
pub enum TailerError {
    /// Partition assignment changed; the current batch must be abandoned
    #[error("partition assignment changed for group")]
    Rebalanced,

    /// Transport-level failure
    #[error("transport error: {message}")]
    Transport { message: String },
}

impl TailerError {
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

/// Stateful, resumable cursor over one or more partitions of a stream
#[async_trait]
pub trait LogTailer: Send {
    /// Reposition to the first record of every assigned partition
    fn to_start(&mut self);

    /// Reposition past the last record of every assigned partition
    fn to_end(&mut self);

    /// Reposition to the last committed checkpoint of every assigned partition
    fn to_last_committed(&mut self);

    /// Read the next record, waiting at most `timeout`. `None` means no
    /// record arrived in time. `Err(Rebalanced)` means the assignment
    /// changed and the tailer has been repositioned to its new partitions'
    /// checkpoints.
    async fn read(&mut self, timeout: Duration) -> Result<Option<Record>, TailerError>;

    /// Advance the checkpoint to the last read position
    fn commit(&mut self) -> Result<(), TailerError>;

    /// Partitions currently assigned to this tailer
    fn assignments(&self) -> Vec<usize>;
}

/// Named-stream transport: stream admin, publication, tailer creation
pub trait LogTransport: Send + Sync {
    /// Create a stream with the given partition count; idempotent
    fn create_stream(&self, stream: &str, partitions: usize) -> Result<(), TailerError>;

    /// Number of partitions of a stream
    fn partitions(&self, stream: &str) -> Result<usize, TailerError>;

    /// Publish a record, routed to a partition by key hash
    fn append(&self, stream: &str, record: Record) -> Result<u64, TailerError>;

    /// Publish a record to an explicit partition (poison pills, tests)
    fn append_to_partition(
        &self,
        stream: &str,
        partition: usize,
        record: Record,
    ) -> Result<u64, TailerError>;

    /// Attach a tailer to a static partition set for a consumer group
    fn tailer(
        &self,
        stream: &str,
        group: &str,
        partitions: &[usize],
    ) -> Result<Box<dyn LogTailer>, TailerError>;

    /// Join a subscription group; partitions are assigned dynamically and
    /// reassigned as members come and go
    fn subscribe(&self, stream: &str, group: &str) -> Result<Box<dyn LogTailer>, TailerError>;
}
