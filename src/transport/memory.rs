//! In-process log transport.
//!
//! Backs the pipeline in tests and single-node embeddings: per-partition
//! ordered record vectors, per-(group, partition) checkpoints, and
//! subscription groups whose membership changes surface as
//! [`TailerError::Rebalanced`] on the next read or commit.

use super::{LogTailer, LogTransport, Record, TailerError};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Upper bound on one wait slice inside `read`, so appends racing the
/// notify registration cannot stall a reader for the whole timeout.
const WAIT_SLICE: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct GroupState {
    members: Vec<u64>,
    generation: u64,
}

#[derive(Debug)]
struct StreamState {
    partitions: Vec<RwLock<Vec<Record>>>,
    /// Checkpoint per (group, partition): index of the next unprocessed record
    committed: DashMap<(String, usize), usize>,
    groups: Mutex<HashMap<String, GroupState>>,
    notify: Notify,
}

impl StreamState {
    fn new(partitions: usize) -> Self {
        Self {
            partitions: (0..partitions).map(|_| RwLock::new(Vec::new())).collect(),
            committed: DashMap::new(),
            groups: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        }
    }

    /// Round-robin assignment of partitions to the member's slot
    fn assignment_for(&self, group: &str, member: u64) -> Vec<usize> {
        let groups = self.groups.lock();
        let Some(state) = groups.get(group) else {
            return Vec::new();
        };
        let mut members = state.members.clone();
        members.sort_unstable();
        let Some(slot) = members.iter().position(|m| *m == member) else {
            return Vec::new();
        };
        (0..self.partitions.len())
            .filter(|p| p % members.len() == slot)
            .collect()
    }

    fn generation(&self, group: &str) -> u64 {
        self.groups
            .lock()
            .get(group)
            .map(|g| g.generation)
            .unwrap_or(0)
    }
}

/// In-memory, partitioned, replayable log
#[derive(Debug, Default)]
pub struct MemoryLog {
    streams: DashMap<String, Arc<StreamState>>,
    member_seq: AtomicU64,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn stream(&self, name: &str) -> Result<Arc<StreamState>, TailerError> {
        self.streams
            .get(name)
            .map(|s| Arc::clone(&s))
            .ok_or_else(|| TailerError::transport(format!("unknown stream: {name}")))
    }

    fn route(key: &str, partitions: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % partitions as u64) as usize
    }
}

impl LogTransport for MemoryLog {
    fn create_stream(&self, stream: &str, partitions: usize) -> Result<(), TailerError> {
        if partitions == 0 {
            return Err(TailerError::transport("stream needs at least one partition"));
        }
        self.streams
            .entry(stream.to_string())
            .or_insert_with(|| Arc::new(StreamState::new(partitions)));
        Ok(())
    }

    fn partitions(&self, stream: &str) -> Result<usize, TailerError> {
        Ok(self.stream(stream)?.partitions.len())
    }

    fn append(&self, stream: &str, record: Record) -> Result<u64, TailerError> {
        let state = self.stream(stream)?;
        let partition = Self::route(&record.key, state.partitions.len());
        self.append_to_partition(stream, partition, record)
    }

    fn append_to_partition(
        &self,
        stream: &str,
        partition: usize,
        record: Record,
    ) -> Result<u64, TailerError> {
        let state = self.stream(stream)?;
        let Some(slot) = state.partitions.get(partition) else {
            return Err(TailerError::transport(format!(
                "stream {stream} has no partition {partition}"
            )));
        };
        let offset = {
            let mut records = slot.write();
            records.push(record);
            records.len() as u64 - 1
        };
        state.notify.notify_waiters();
        Ok(offset)
    }

    fn tailer(
        &self,
        stream: &str,
        group: &str,
        partitions: &[usize],
    ) -> Result<Box<dyn LogTailer>, TailerError> {
        let state = self.stream(stream)?;
        for p in partitions {
            if *p >= state.partitions.len() {
                return Err(TailerError::transport(format!(
                    "stream {stream} has no partition {p}"
                )));
            }
        }
        let mut tailer = MemoryTailer {
            stream: state,
            group: group.to_string(),
            mode: Mode::Static,
            assignment: partitions.to_vec(),
            positions: HashMap::new(),
            rr: 0,
        };
        tailer.to_last_committed();
        Ok(Box::new(tailer))
    }

    fn subscribe(&self, stream: &str, group: &str) -> Result<Box<dyn LogTailer>, TailerError> {
        let state = self.stream(stream)?;
        let member = self.member_seq.fetch_add(1, Ordering::Relaxed);
        let generation = {
            let mut groups = state.groups.lock();
            let entry = groups.entry(group.to_string()).or_default();
            entry.members.push(member);
            entry.generation += 1;
            entry.generation
        };
        state.notify.notify_waiters();
        let assignment = state.assignment_for(group, member);
        let mut tailer = MemoryTailer {
            stream: state,
            group: group.to_string(),
            mode: Mode::Subscribed {
                member,
                seen_generation: generation,
            },
            assignment,
            positions: HashMap::new(),
            rr: 0,
        };
        // subscribe mode always resumes from the checkpoint
        tailer.to_last_committed();
        Ok(Box::new(tailer))
    }
}

#[derive(Debug)]
enum Mode {
    Static,
    Subscribed { member: u64, seen_generation: u64 },
}

struct MemoryTailer {
    stream: Arc<StreamState>,
    group: String,
    mode: Mode,
    assignment: Vec<usize>,
    /// Next index to read, per assigned partition
    positions: HashMap<usize, usize>,
    rr: usize,
}

impl MemoryTailer {
    /// Detect a membership change; on change, adopt the new assignment
    /// positioned at its checkpoints and surface the rebalance once.
    fn check_rebalance(&mut self) -> Result<(), TailerError> {
        let Mode::Subscribed {
            member,
            seen_generation,
        } = &mut self.mode
        else {
            return Ok(());
        };
        let current = self.stream.generation(&self.group);
        if current == *seen_generation {
            return Ok(());
        }
        let member = *member;
        *seen_generation = current;
        self.assignment = self.stream.assignment_for(&self.group, member);
        self.to_last_committed();
        Err(TailerError::Rebalanced)
    }

    fn poll_next(&mut self) -> Option<Record> {
        let count = self.assignment.len();
        for i in 0..count {
            let partition = self.assignment[(self.rr + i) % count];
            let position = self.positions.get(&partition).copied().unwrap_or(0);
            let records = self.stream.partitions[partition].read();
            if position < records.len() {
                let record = records[position].clone();
                drop(records);
                self.positions.insert(partition, position + 1);
                self.rr = (self.rr + i + 1) % count;
                return Some(record);
            }
        }
        None
    }
}

#[async_trait]
impl LogTailer for MemoryTailer {
    fn to_start(&mut self) {
        self.positions = self.assignment.iter().map(|p| (*p, 0)).collect();
    }

    fn to_end(&mut self) {
        self.positions = self
            .assignment
            .iter()
            .map(|p| (*p, self.stream.partitions[*p].read().len()))
            .collect();
    }

    fn to_last_committed(&mut self) {
        self.positions = self
            .assignment
            .iter()
            .map(|p| {
                let committed = self
                    .stream
                    .committed
                    .get(&(self.group.clone(), *p))
                    .map(|c| *c)
                    .unwrap_or(0);
                (*p, committed)
            })
            .collect();
    }

    async fn read(&mut self, timeout: Duration) -> Result<Option<Record>, TailerError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.check_rebalance()?;
            if let Some(record) = self.poll_next() {
                return Ok(Some(record));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wait = (deadline - now).min(WAIT_SLICE);
            let _ = tokio::time::timeout(wait, self.stream.notify.notified()).await;
        }
    }

    fn commit(&mut self) -> Result<(), TailerError> {
        // never checkpoint partitions this tailer no longer owns
        self.check_rebalance()?;
        for partition in &self.assignment {
            let position = self.positions.get(partition).copied().unwrap_or(0);
            self.stream
                .committed
                .insert((self.group.clone(), *partition), position);
        }
        Ok(())
    }

    fn assignments(&self) -> Vec<usize> {
        self.assignment.clone()
    }
}

impl Drop for MemoryTailer {
    fn drop(&mut self) {
        if let Mode::Subscribed { member, .. } = self.mode {
            let mut groups = self.stream.groups.lock();
            if let Some(state) = groups.get_mut(&self.group) {
                state.members.retain(|m| *m != member);
                state.generation += 1;
            }
            drop(groups);
            self.stream.notify.notify_waiters();
        }
    }
}
