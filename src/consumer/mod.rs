//! Generic checkpointed consumer framework.
//!
//! A [`Consumer`] owns the downstream side effect of one batch; the
//! [`runner::ConsumerRunner`] owns everything else: batch boundaries,
//! commit ordering, retry, rebalance, skip-on-failure.

pub mod policy;
pub mod runner;

use crate::transport::{Record, TailerError};
use async_trait::async_trait;
use thiserror::Error;

pub use policy::{ConsumerPolicy, RetryPolicy, StartOffset};
pub use runner::{ConsumerRunner, RunnerReport};

/// Consumer failure taxonomy; the runner dispatches on the tag, never on
/// the cause's concrete type
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// Partition ownership changed mid-batch; a control signal, not a failure
    #[error("partition assignment changed")]
    Rebalanced,

    /// Transient failure worth replaying the batch for
    #[error("retryable consumer error: {0}")]
    Retryable(#[source] anyhow::Error),

    /// Failure no retry will fix
    #[error("fatal consumer error: {0}")]
    Fatal(#[source] anyhow::Error),
}

impl ConsumerError {
    pub fn retryable<E: Into<anyhow::Error>>(cause: E) -> Self {
        Self::Retryable(cause.into())
    }

    pub fn fatal<E: Into<anyhow::Error>>(cause: E) -> Self {
        Self::Fatal(cause.into())
    }
}

impl From<crate::error::BulkError> for ConsumerError {
    fn from(err: crate::error::BulkError) -> Self {
        // codec failures on our own emissions are not worth replaying
        Self::Fatal(err.into())
    }
}

impl From<TailerError> for ConsumerError {
    fn from(err: TailerError) -> Self {
        match err {
            TailerError::Rebalanced => Self::Rebalanced,
            other => Self::retryable(other),
        }
    }
}

/// Downstream side of one batch: begin, accept each record, then commit,
/// or roll back everything since begin
#[async_trait]
pub trait Consumer: Send {
    /// A new batch is opening
    async fn begin(&mut self);

    /// Process one record within the current batch
    async fn accept(&mut self, record: &Record) -> Result<(), ConsumerError>;

    /// Make the batch's side effects durable; called before the checkpoint
    /// advances
    async fn commit(&mut self) -> Result<(), ConsumerError>;

    /// Discard everything accepted since begin
    async fn rollback(&mut self);

    /// The runner is done with this consumer
    async fn close(&mut self) {}
}
