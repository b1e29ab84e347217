#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Bulkflow Core
//!
//! Stream-processing pipeline for bulk document actions: one logical
//! command ("apply action X to every record matching query Q") is scrolled
//! into bounded buckets, fanned out to action processors over a
//! checkpointed log-consumer framework, and its progress is aggregated
//! into a durable, globally observable status.
//!
//! ## Architecture
//!
//! ```text
//! commands stream ──► Scroller ──► bucket stream(s) ──► action processors
//!                        │                                     │
//!                        ▼                                     ▼
//!                  status stream ◄──── Counter ◄──── counters stream
//!                        │
//!                        ▼
//!                  Status stage ──► KV store ◄── status queries
//! ```
//!
//! Every stage is a [`consumer::Consumer`] driven by a
//! [`consumer::ConsumerRunner`]: a generic engine enforcing batch
//! boundaries, commit-after-side-effect checkpoints (at-least-once
//! delivery), bounded retries with a degraded one-record batch policy, and
//! rebalance-aware batch abandonment.
//!
//! ## Module Organization
//!
//! - [`batch`] - Batch accumulation state machine
//! - [`consumer`] - Checkpointed consumer framework
//! - [`transport`] - Partitioned log contract and in-process implementation
//! - [`scroll`] - Paged query-cursor contract
//! - [`kv`] - Durable key-value contract
//! - [`messaging`] - Wire messages and codec
//! - [`stages`] - Scroller, Counter, and Status computations
//! - [`service`] - Submit / status external surface
//! - [`pipeline`] - Runner supervision and shutdown
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bulkflow_core::config::{ActionConfig, BulkConfig};
//! use bulkflow_core::kv::MemoryKvStore;
//! use bulkflow_core::messaging::BulkCommand;
//! use bulkflow_core::pipeline::BulkPipeline;
//! use bulkflow_core::scroll::MemoryScroller;
//! use bulkflow_core::transport::MemoryLog;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(BulkConfig::default().with_action(ActionConfig::new("reindex")));
//! let mut pipeline = BulkPipeline::new(
//!     Arc::new(MemoryLog::new()),
//!     Arc::new(MemoryKvStore::new()),
//!     Arc::new(MemoryScroller::new()),
//!     config,
//! );
//! pipeline.start()?;
//!
//! let service = pipeline.service();
//! let id = service
//!     .submit(BulkCommand::new("reindex", "SELECT * FROM Document", "admin", "default"))
//!     .await?;
//! let status = service.status(&id).await?;
//! println!("command {id} is {:?}", status.state);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod config;
pub mod consumer;
pub mod error;
pub mod kv;
pub mod logging;
pub mod messaging;
pub mod metrics;
pub mod pipeline;
pub mod scroll;
pub mod service;
pub mod stages;
pub mod transport;

pub use batch::{BatchPolicy, BatchStage, BatchState};
pub use config::{ActionConfig, BulkConfig};
pub use consumer::{Consumer, ConsumerError, ConsumerPolicy, ConsumerRunner, RetryPolicy, RunnerReport, StartOffset};
pub use error::{BulkError, Result};
pub use messaging::{BulkBucket, BulkCommand, BulkCounter, BulkState, BulkStatus};
pub use pipeline::BulkPipeline;
pub use service::BulkService;
