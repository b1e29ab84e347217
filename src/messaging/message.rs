//! # Message Structures for Bulk Streams
//!
//! Defines the wire formats flowing between pipeline stages: commands in,
//! buckets and counters between stages, statuses out. Producers and
//! consumers of a stream must agree on the codec (see [`super::codec`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// One logical request: apply `action` to every record matching `query`.
/// Immutable once submitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BulkCommand {
    /// Unique command id, assigned at submission
    pub id: String,
    /// Action name; routes the command and names the bucket stream
    pub action: String,
    /// Query selecting the records to act on
    pub query: String,
    /// User the action runs as
    pub username: String,
    /// Repository / target identifier the query runs against
    pub repository: String,
    /// Per-command bucket size override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_size: Option<usize>,
    /// Arbitrary action parameters
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

impl BulkCommand {
    /// Create a command with a fresh id
    pub fn new<S: Into<String>>(action: S, query: S, username: S, repository: S) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action: action.into(),
            query: query.into(),
            username: username.into(),
            repository: repository.into(),
            bucket_size: None,
            params: HashMap::new(),
        }
    }

    pub fn with_bucket_size(mut self, size: usize) -> Self {
        self.bucket_size = Some(size);
        self
    }

    pub fn with_param<S: Into<String>>(mut self, key: S, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// One shard of record ids scrolled for a command.
///
/// Keyed `commandId:bucketNumber` on the wire so a re-processed bucket
/// (after rebalance) is identifiable downstream; the pipeline itself relies
/// on idempotent actions rather than dedup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BulkBucket {
    pub command_id: String,
    /// 1-based position of this bucket in the scroll pass
    pub bucket_number: u64,
    /// Ordered record ids, at most the command's effective bucket size
    pub ids: Vec<String>,
}

impl BulkBucket {
    pub fn new<S: Into<String>>(command_id: S, bucket_number: u64, ids: Vec<String>) -> Self {
        Self {
            command_id: command_id.into(),
            bucket_number,
            ids,
        }
    }

    /// Record key: `commandId:bucketNumber`
    pub fn record_key(&self) -> String {
        format!("{}:{}", self.command_id, self.bucket_number)
    }
}

/// "N records processed for command C", emitted by action processors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BulkCounter {
    pub command_id: String,
    pub count: u64,
}

impl BulkCounter {
    pub fn new<S: Into<String>>(command_id: S, count: u64) -> Self {
        Self {
            command_id: command_id.into(),
            count,
        }
    }
}

/// Lifecycle of a bulk command
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BulkState {
    Scheduled,
    ScrollingRunning,
    Running,
    Completed,
    Aborted,
}

/// Status of a bulk command.
///
/// Emitted as a *delta* (absent fields mean "unchanged") and persisted as a
/// *merged* value. Merging is last-writer-wins per field except `processed`,
/// which accumulates until the command completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BulkStatus {
    pub command_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<BulkState>,
    /// Total matching records, known once the scroll completes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// Records acknowledged by counters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scroll_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scroll_end: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl BulkStatus {
    /// Empty delta for a command
    pub fn delta<S: Into<String>>(command_id: S) -> Self {
        Self {
            command_id: command_id.into(),
            state: None,
            total: None,
            processed: None,
            scroll_start: None,
            scroll_end: None,
            completed_at: None,
        }
    }

    pub fn with_state(mut self, state: BulkState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    pub fn with_processed(mut self, processed: u64) -> Self {
        self.processed = Some(processed);
        self
    }

    pub fn with_scroll_start(mut self, at: DateTime<Utc>) -> Self {
        self.scroll_start = Some(at);
        self
    }

    pub fn with_scroll_end(mut self, at: DateTime<Utc>) -> Self {
        self.scroll_end = Some(at);
        self
    }

    pub fn with_completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    /// KV key under which the merged status is persisted
    pub fn status_key(command_id: &str) -> String {
        format!("{command_id}:status")
    }

    /// True once the command reached a terminal state
    pub fn is_completed(&self) -> bool {
        matches!(self.state, Some(BulkState::Completed | BulkState::Aborted))
    }

    /// Merge a delta into this status.
    ///
    /// Last-writer-wins per present field, except `processed` which is
    /// additive until the status is terminal.
    pub fn merge_delta(&mut self, delta: &BulkStatus) {
        debug_assert_eq!(self.command_id, delta.command_id);
        if let Some(p) = delta.processed {
            self.processed = if self.is_completed() {
                self.processed.or(Some(p))
            } else {
                Some(self.processed.unwrap_or(0) + p)
            };
        }
        if delta.state.is_some() {
            self.state = delta.state;
        }
        if delta.total.is_some() {
            self.total = delta.total;
        }
        if delta.scroll_start.is_some() {
            self.scroll_start = delta.scroll_start;
        }
        if delta.scroll_end.is_some() {
            self.scroll_end = delta.scroll_end;
        }
        if delta.completed_at.is_some() {
            self.completed_at = delta.completed_at;
        }
    }
}
