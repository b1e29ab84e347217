//! Consumer runner semantics: commit ordering, at-least-once redelivery,
//! rebalance handling, skip-on-failure, poison pills, forced boundaries.

use async_trait::async_trait;
use bulkflow_core::batch::BatchPolicy;
use bulkflow_core::consumer::{
    Consumer, ConsumerError, ConsumerPolicy, ConsumerRunner, RetryPolicy,
};
use bulkflow_core::transport::{LogTransport, MemoryLog, Record};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

const STREAM: &str = "s";
const GROUP: &str = "g";

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Begin,
    Accept(String),
    Commit,
    Rollback,
}

/// Scriptable consumer recording its lifecycle
#[derive(Default)]
struct RecordingConsumer {
    events: Arc<Mutex<Vec<Event>>>,
    /// Keys whose accept always fails retryably
    poison_keys: Vec<String>,
    /// Commit failures still to inject, as (retryable, rebalanced)
    commit_failures: Arc<Mutex<Vec<ConsumerError>>>,
}

impl RecordingConsumer {
    fn new() -> (Self, Arc<Mutex<Vec<Event>>>) {
        let consumer = Self::default();
        let events = Arc::clone(&consumer.events);
        (consumer, events)
    }

    fn accepted(events: &Mutex<Vec<Event>>) -> Vec<String> {
        events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Accept(key) => Some(key.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(events: &Mutex<Vec<Event>>, wanted: &Event) -> usize {
        events.lock().iter().filter(|e| *e == wanted).count()
    }
}

#[async_trait]
impl Consumer for RecordingConsumer {
    async fn begin(&mut self) {
        self.events.lock().push(Event::Begin);
    }

    async fn accept(&mut self, record: &Record) -> Result<(), ConsumerError> {
        if self.poison_keys.contains(&record.key) {
            return Err(ConsumerError::retryable(anyhow::anyhow!(
                "injected accept failure for {}",
                record.key
            )));
        }
        self.events.lock().push(Event::Accept(record.key.clone()));
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), ConsumerError> {
        if let Some(err) = self.commit_failures.lock().pop() {
            return Err(err);
        }
        self.events.lock().push(Event::Commit);
        Ok(())
    }

    async fn rollback(&mut self) {
        self.events.lock().push(Event::Rollback);
    }
}

fn transport_with(keys: &[&str]) -> Arc<MemoryLog> {
    let log = Arc::new(MemoryLog::new());
    log.create_stream(STREAM, 1).unwrap();
    for key in keys {
        log.append(STREAM, Record::new(*key, key.as_bytes().to_vec()))
            .unwrap();
    }
    log
}

fn fast_policy() -> ConsumerPolicy {
    ConsumerPolicy::new(GROUP)
        .with_batch(BatchPolicy::new(10, Duration::from_secs(10)))
        .with_retry(RetryPolicy::new(3, Duration::from_millis(1)))
        .with_read_timeout(Duration::from_millis(30))
}

#[tokio::test]
async fn test_clean_run_commits_everything() {
    let log = transport_with(&["a", "b", "c"]);
    let (consumer, events) = RecordingConsumer::new();
    let tailer = log.tailer(STREAM, GROUP, &[0]).unwrap();
    let mut runner = ConsumerRunner::new(tailer, consumer, fast_policy());

    let report = runner.run().await.unwrap();
    assert_eq!(report.committed, 3);
    assert_eq!(report.batches, 1);
    assert_eq!(report.failures, 0);
    assert!(!report.poisoned);
    assert_eq!(RecordingConsumer::accepted(&events), vec!["a", "b", "c"]);

    // checkpoint advanced: a fresh run sees nothing
    let (consumer, events) = RecordingConsumer::new();
    let tailer = log.tailer(STREAM, GROUP, &[0]).unwrap();
    let mut runner = ConsumerRunner::new(tailer, consumer, fast_policy());
    let report = runner.run().await.unwrap();
    assert_eq!(report.committed, 0);
    assert!(RecordingConsumer::accepted(&events).is_empty());
}

#[tokio::test]
async fn test_retryable_commit_failure_redelivers_batch() {
    let log = transport_with(&["a", "b", "c"]);
    let (mut consumer, events) = RecordingConsumer::new();
    consumer
        .commit_failures
        .lock()
        .push(ConsumerError::retryable(anyhow::anyhow!("flaky sink")));
    let tailer = log.tailer(STREAM, GROUP, &[0]).unwrap();
    let mut runner = ConsumerRunner::new(tailer, consumer, fast_policy());

    let report = runner.run().await.unwrap();
    // every record of the failed batch was delivered again after recovery
    let accepted = RecordingConsumer::accepted(&events);
    assert_eq!(accepted, vec!["a", "b", "c", "a", "b", "c"]);
    assert_eq!(report.committed, 3);
    assert_eq!(report.failures, 0);
    assert_eq!(RecordingConsumer::count(&events, &Event::Rollback), 1);
}

#[tokio::test]
async fn test_checkpoint_never_passes_failed_commit() {
    let log = transport_with(&["a"]);
    let (consumer, _events) = RecordingConsumer::new();
    {
        let mut failures = consumer.commit_failures.lock();
        // initial attempt plus every retry
        for _ in 0..10 {
            failures.push(ConsumerError::retryable(anyhow::anyhow!("sink down")));
        }
    }
    let tailer = log.tailer(STREAM, GROUP, &[0]).unwrap();
    let policy = fast_policy().with_retry(RetryPolicy::new(2, Duration::from_millis(1)));
    let mut runner = ConsumerRunner::new(tailer, consumer, policy);

    // retries exhausted and no skip-on-failure: the runner terminates
    assert!(runner.run().await.is_err());

    // the record is still uncommitted and redelivered to a healthy runner
    let (consumer, events) = RecordingConsumer::new();
    let tailer = log.tailer(STREAM, GROUP, &[0]).unwrap();
    let mut runner = ConsumerRunner::new(tailer, consumer, fast_policy());
    let report = runner.run().await.unwrap();
    assert_eq!(report.committed, 1);
    assert_eq!(RecordingConsumer::accepted(&events), vec!["a"]);
}

#[tokio::test]
async fn test_rebalance_is_not_a_failure() {
    let log = transport_with(&["a", "b"]);
    let (consumer, events) = RecordingConsumer::new();
    consumer.commit_failures.lock().push(ConsumerError::Rebalanced);
    let tailer = log.tailer(STREAM, GROUP, &[0]).unwrap();
    // no retry budget at all: if the rebalance consumed an attempt the
    // runner would terminate instead of succeeding
    let policy = fast_policy().with_retry(RetryPolicy::none());
    let mut runner = ConsumerRunner::new(tailer, consumer, policy);

    let report = runner.run().await.unwrap();
    assert_eq!(report.rebalances, 1);
    assert_eq!(report.failures, 0);
    assert_eq!(report.committed, 2);
    // rolled back once, then the batch was replayed from the checkpoint
    assert_eq!(RecordingConsumer::count(&events, &Event::Rollback), 1);
    assert_eq!(
        RecordingConsumer::accepted(&events),
        vec!["a", "b", "a", "b"]
    );
}

#[tokio::test]
async fn test_skip_on_failure_discards_whole_batch() {
    let log = transport_with(&["good1", "bad", "good2"]);
    let (mut consumer, events) = RecordingConsumer::new();
    consumer.poison_keys = vec!["bad".to_string()];
    let tailer = log.tailer(STREAM, GROUP, &[0]).unwrap();
    let policy = fast_policy()
        .with_retry(RetryPolicy::new(1, Duration::from_millis(1)))
        .with_continue_on_failure(true);
    let mut runner = ConsumerRunner::new(tailer, consumer, policy);

    let report = runner.run().await.unwrap();
    assert_eq!(report.failures, 1);
    // both healthy records committed despite the poisoned one in between
    assert_eq!(report.committed, 2);
    let accepted = RecordingConsumer::accepted(&events);
    assert!(accepted.contains(&"good1".to_string()));
    assert!(accepted.contains(&"good2".to_string()));
    assert!(!accepted.contains(&"bad".to_string()));
}

#[tokio::test]
async fn test_poison_pill_ends_run_without_delivery() {
    let log = transport_with(&["a"]);
    log.append(STREAM, Record::poison_pill()).unwrap();
    log.append(STREAM, Record::new("after", b"x".to_vec()))
        .unwrap();

    let (consumer, events) = RecordingConsumer::new();
    let tailer = log.tailer(STREAM, GROUP, &[0]).unwrap();
    let mut runner = ConsumerRunner::new(tailer, consumer, fast_policy());

    let report = runner.run().await.unwrap();
    assert!(report.poisoned);
    assert_eq!(report.committed, 1);
    // the pill itself is never handed to the consumer
    assert_eq!(RecordingConsumer::accepted(&events), vec!["a"]);
}

#[tokio::test]
async fn test_force_batch_flag_splits_batches() {
    let log = transport_with(&[]);
    log.append(STREAM, Record::new("a", b"1".to_vec())).unwrap();
    log.append(STREAM, Record::new("b", b"2".to_vec()).with_force_batch())
        .unwrap();
    log.append(STREAM, Record::new("c", b"3".to_vec())).unwrap();

    let (consumer, events) = RecordingConsumer::new();
    let tailer = log.tailer(STREAM, GROUP, &[0]).unwrap();
    let mut runner = ConsumerRunner::new(tailer, consumer, fast_policy());

    let report = runner.run().await.unwrap();
    assert_eq!(report.batches, 2);
    assert_eq!(report.committed, 3);
    let log_events = events.lock().clone();
    let expected = vec![
        Event::Begin,
        Event::Accept("a".into()),
        Event::Accept("b".into()),
        Event::Commit,
        Event::Begin,
        Event::Accept("c".into()),
        Event::Commit,
    ];
    assert_eq!(log_events, expected);
}

#[tokio::test]
async fn test_salted_runner_still_delivers_everything() {
    let log = transport_with(&["a", "b"]);
    let (consumer, events) = RecordingConsumer::new();
    let tailer = log.tailer(STREAM, GROUP, &[0]).unwrap();
    let policy = fast_policy()
        .with_batch(BatchPolicy::new(10, Duration::from_millis(20)))
        .with_salted(true);
    let mut runner = ConsumerRunner::new(tailer, consumer, policy);

    let report = runner.run().await.unwrap();
    assert_eq!(report.committed, 2);
    assert_eq!(RecordingConsumer::accepted(&events), vec!["a", "b"]);
}
