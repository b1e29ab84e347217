//! # Pipeline Wiring
//!
//! Builds and supervises the stage runners: one [`ConsumerRunner`] per
//! (stream, partition, consumer group) triple, each on its own tokio task
//! with no shared mutable state beyond the transport and the KV store.
//!
//! A runner that ends its run on an idle read timeout is restarted in
//! place; a poison pill ends the task. Shutdown poisons the stage input
//! streams in dataflow order (commands, then counters, then statuses) so
//! every in-flight status delta reaches the KV store. Action processors
//! are external: drain them before calling [`BulkPipeline::shutdown`].

use crate::batch::BatchPolicy;
use crate::config::BulkConfig;
use crate::consumer::{Consumer, ConsumerPolicy, ConsumerRunner};
use crate::error::{BulkError, Result};
use crate::kv::KvStore;
use crate::metrics::{noop_metrics, SharedMetrics};
use crate::scroll::DocumentScroller;
use crate::service::BulkService;
use crate::stages::{
    bucket_stream, CounterComputation, ScrollerComputation, StatusComputation, COMMAND_STREAM,
    COUNTER_STREAM, STATUS_STREAM,
};
use crate::transport::{LogTransport, Record};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

const SCROLLER_GROUP: &str = "bulk/scroller";
const COUNTER_GROUP: &str = "bulk/counter";
const STATUS_GROUP: &str = "bulk/status";

type StageHandle = JoinHandle<Result<()>>;

/// Owns the stage runner tasks over a shared transport and KV store
pub struct BulkPipeline {
    transport: Arc<dyn LogTransport>,
    kv: Arc<dyn KvStore>,
    scroller: Arc<dyn DocumentScroller>,
    config: Arc<BulkConfig>,
    metrics: SharedMetrics,
    scroller_handles: Vec<StageHandle>,
    counter_handles: Vec<StageHandle>,
    status_handles: Vec<StageHandle>,
}

impl BulkPipeline {
    pub fn new(
        transport: Arc<dyn LogTransport>,
        kv: Arc<dyn KvStore>,
        scroller: Arc<dyn DocumentScroller>,
        config: Arc<BulkConfig>,
    ) -> Self {
        Self {
            transport,
            kv,
            scroller,
            config,
            metrics: noop_metrics(),
            scroller_handles: Vec::new(),
            counter_handles: Vec::new(),
            status_handles: Vec::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Client handle sharing this pipeline's transport and KV store
    pub fn service(&self) -> BulkService {
        BulkService::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.kv),
            Arc::clone(&self.config),
        )
    }

    pub fn transport(&self) -> Arc<dyn LogTransport> {
        Arc::clone(&self.transport)
    }

    /// Create the pipeline streams and spawn one runner per stage per
    /// partition
    pub fn start(&mut self) -> Result<()> {
        self.create_streams()?;
        let partitions = self.config.partitions;
        for partition in 0..partitions {
            let scroller = ScrollerComputation::new(
                Arc::clone(&self.transport),
                Arc::clone(&self.scroller),
                Arc::clone(&self.config),
            );
            let handle = self.spawn_stage(
                COMMAND_STREAM,
                partition,
                scroller,
                // one command per batch: a crash replays a single scroll
                ConsumerPolicy::new(SCROLLER_GROUP)
                    .with_batch(BatchPolicy::new(1, Duration::from_millis(500)))
                    .with_continue_on_failure(true),
            )?;
            self.scroller_handles.push(handle);

            let counter =
                CounterComputation::new(Arc::clone(&self.transport), Arc::clone(&self.kv));
            let handle = self.spawn_stage(
                COUNTER_STREAM,
                partition,
                counter,
                ConsumerPolicy::new(COUNTER_GROUP)
                    .with_batch(BatchPolicy::new(500, self.config.counter_flush_interval))
                    .with_continue_on_failure(true),
            )?;
            self.counter_handles.push(handle);

            let status = StatusComputation::new(Arc::clone(&self.kv), self.config.status_ttl);
            let handle = self.spawn_stage(
                STATUS_STREAM,
                partition,
                status,
                ConsumerPolicy::new(STATUS_GROUP).with_continue_on_failure(true),
            )?;
            self.status_handles.push(handle);
        }
        info!(partitions = partitions, "bulk pipeline started");
        Ok(())
    }

    /// Drain and stop the stages in dataflow order
    pub async fn shutdown(&mut self) -> Result<()> {
        self.poison(COMMAND_STREAM)?;
        Self::join(std::mem::take(&mut self.scroller_handles)).await?;
        self.poison(COUNTER_STREAM)?;
        Self::join(std::mem::take(&mut self.counter_handles)).await?;
        self.poison(STATUS_STREAM)?;
        Self::join(std::mem::take(&mut self.status_handles)).await?;
        info!("bulk pipeline stopped");
        Ok(())
    }

    fn create_streams(&self) -> Result<()> {
        let partitions = self.config.partitions;
        for stream in [COMMAND_STREAM, COUNTER_STREAM, STATUS_STREAM] {
            self.transport
                .create_stream(stream, partitions)
                .map_err(|e| BulkError::transport(e.to_string()))?;
        }
        for action in self.config.actions.keys() {
            self.transport
                .create_stream(&bucket_stream(action), partitions)
                .map_err(|e| BulkError::transport(e.to_string()))?;
        }
        Ok(())
    }

    fn spawn_stage<C>(
        &self,
        stream: &str,
        partition: usize,
        consumer: C,
        policy: ConsumerPolicy,
    ) -> Result<StageHandle>
    where
        C: Consumer + 'static,
    {
        let tailer = self
            .transport
            .tailer(stream, &policy.name, &[partition])
            .map_err(|e| BulkError::transport(e.to_string()))?;
        let mut runner =
            ConsumerRunner::new(tailer, consumer, policy).with_metrics(Arc::clone(&self.metrics));
        Ok(tokio::spawn(async move {
            loop {
                let report = runner.run().await?;
                if report.poisoned {
                    return Ok(());
                }
                // idle end-of-run; resume from the checkpoint
            }
        }))
    }

    fn poison(&self, stream: &str) -> Result<()> {
        let partitions = self
            .transport
            .partitions(stream)
            .map_err(|e| BulkError::transport(e.to_string()))?;
        for partition in 0..partitions {
            self.transport
                .append_to_partition(stream, partition, Record::poison_pill())
                .map_err(|e| BulkError::transport(e.to_string()))?;
        }
        Ok(())
    }

    async fn join(handles: Vec<StageHandle>) -> Result<()> {
        for result in futures::future::join_all(handles).await {
            result.map_err(|e| BulkError::transport(format!("stage task panicked: {e}")))??;
        }
        Ok(())
    }
}
