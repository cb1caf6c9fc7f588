//! Durable checkpoint metadata.
//!
//! Progress is persisted as a flat `(scope, field) -> value` map committed in
//! transactional batches through the store. After failover the whole
//! `MigrationResult` tree is reconstructed from this map, it is the sole
//! source of truth for resumption.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::MigrationStore;
use crate::types::{
    MigrationPhase, MigrationResult, MigrationState, PhaseResult, WorkerResult,
};

/// Field names within a checkpoint scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckpointField {
    /// Run, phase or worker status
    Status,
    /// Phase the run is currently in
    CurrentPhase,
    /// First sequence number of the scope's range
    StartSequenceNumber,
    /// Last sequence number of the scope's range
    EndSequenceNumber,
    /// Highest sequence number durably applied
    LastAppliedSequenceNumber,
    /// Key changes applied so far
    KeysMigrated,
    /// Workers per phase iteration
    WorkerCount,
    /// Latest phase iteration index
    Iteration,
    /// Scope start timestamp
    StartTime,
    /// Scope end timestamp
    EndTime,
}

impl fmt::Display for CheckpointField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CheckpointField::Status => "Status",
            CheckpointField::CurrentPhase => "CurrentPhase",
            CheckpointField::StartSequenceNumber => "StartSequenceNumber",
            CheckpointField::EndSequenceNumber => "EndSequenceNumber",
            CheckpointField::LastAppliedSequenceNumber => "LastAppliedSequenceNumber",
            CheckpointField::KeysMigrated => "KeysMigrated",
            CheckpointField::WorkerCount => "WorkerCount",
            CheckpointField::Iteration => "Iteration",
            CheckpointField::StartTime => "StartTime",
            CheckpointField::EndTime => "EndTime",
        };
        write!(f, "{}", name)
    }
}

/// Address of one checkpoint metadata entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKey {
    /// Run-level entry
    Run {
        /// Field within the run scope
        field: CheckpointField,
    },
    /// Phase-level entry
    Phase {
        /// Phase the entry belongs to
        phase: MigrationPhase,
        /// Field within the phase scope
        field: CheckpointField,
    },
    /// Worker-level entry
    Worker {
        /// Phase the worker ran in
        phase: MigrationPhase,
        /// Phase iteration the worker ran in
        iteration: u32,
        /// Worker index within the iteration
        worker_id: u32,
        /// Field within the worker scope
        field: CheckpointField,
    },
}

impl fmt::Display for MetadataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataKey::Run { field } => write!(f, "Run_{}", field),
            MetadataKey::Phase { phase, field } => write!(f, "Phase_{}_{}", phase, field),
            MetadataKey::Worker {
                phase,
                iteration,
                worker_id,
                field,
            } => write!(f, "Worker_{}_{}_{}_{}", phase, iteration, worker_id, field),
        }
    }
}

/// Typed checkpoint value, encoded with bincode in the durable map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    /// Sequence number
    Seq(i64),
    /// Key-change count
    Count(u64),
    /// Status value
    State(MigrationState),
    /// Phase value
    Phase(MigrationPhase),
    /// Timestamp value
    Time(DateTime<Utc>),
}

impl MetadataValue {
    fn as_seq(&self) -> Option<i64> {
        match self {
            MetadataValue::Seq(v) => Some(*v),
            _ => None,
        }
    }

    fn as_count(&self) -> Option<u64> {
        match self {
            MetadataValue::Count(v) => Some(*v),
            _ => None,
        }
    }

    fn as_state(&self) -> Option<MigrationState> {
        match self {
            MetadataValue::State(v) => Some(*v),
            _ => None,
        }
    }

    fn as_phase(&self) -> Option<MigrationPhase> {
        match self {
            MetadataValue::Phase(v) => Some(*v),
            _ => None,
        }
    }

    fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            MetadataValue::Time(v) => Some(*v),
            _ => None,
        }
    }
}

/// Build the durable entries for one worker record
pub fn worker_entries(result: &WorkerResult) -> Vec<(MetadataKey, MetadataValue)> {
    let key = |field| MetadataKey::Worker {
        phase: result.phase,
        iteration: result.iteration,
        worker_id: result.worker_id,
        field,
    };
    let mut entries = vec![
        (key(CheckpointField::Status), MetadataValue::State(result.status)),
        (
            key(CheckpointField::StartSequenceNumber),
            MetadataValue::Seq(result.start_seq),
        ),
        (
            key(CheckpointField::EndSequenceNumber),
            MetadataValue::Seq(result.end_seq),
        ),
        (
            key(CheckpointField::LastAppliedSequenceNumber),
            MetadataValue::Seq(result.last_applied_seq),
        ),
        (
            key(CheckpointField::KeysMigrated),
            MetadataValue::Count(result.keys_migrated),
        ),
    ];
    if let Some(start) = result.start_time {
        entries.push((key(CheckpointField::StartTime), MetadataValue::Time(start)));
    }
    if let Some(end) = result.end_time {
        entries.push((key(CheckpointField::EndTime), MetadataValue::Time(end)));
    }
    entries
}

/// Build the durable entries for one phase aggregate
pub fn phase_entries(result: &PhaseResult) -> Vec<(MetadataKey, MetadataValue)> {
    let key = |field| MetadataKey::Phase {
        phase: result.phase,
        field,
    };
    vec![
        (key(CheckpointField::Status), MetadataValue::State(result.status)),
        (
            key(CheckpointField::StartSequenceNumber),
            MetadataValue::Seq(result.start_seq),
        ),
        (
            key(CheckpointField::EndSequenceNumber),
            MetadataValue::Seq(result.end_seq),
        ),
        (
            key(CheckpointField::LastAppliedSequenceNumber),
            MetadataValue::Seq(result.last_applied_seq),
        ),
        (
            key(CheckpointField::KeysMigrated),
            MetadataValue::Count(result.keys_migrated),
        ),
        (
            key(CheckpointField::WorkerCount),
            MetadataValue::Count(u64::from(result.worker_count)),
        ),
        (
            key(CheckpointField::Iteration),
            MetadataValue::Count(u64::from(result.iteration)),
        ),
    ]
}

/// Build the durable run-level entries
pub fn run_entries(result: &MigrationResult) -> Vec<(MetadataKey, MetadataValue)> {
    let key = |field| MetadataKey::Run { field };
    let mut entries = vec![
        (key(CheckpointField::Status), MetadataValue::State(result.status)),
        (
            key(CheckpointField::CurrentPhase),
            MetadataValue::Phase(result.current_phase),
        ),
        (
            key(CheckpointField::StartSequenceNumber),
            MetadataValue::Seq(result.start_seq),
        ),
        (
            key(CheckpointField::EndSequenceNumber),
            MetadataValue::Seq(result.end_seq),
        ),
        (
            key(CheckpointField::LastAppliedSequenceNumber),
            MetadataValue::Seq(result.last_applied_seq),
        ),
        (
            key(CheckpointField::KeysMigrated),
            MetadataValue::Count(result.keys_migrated),
        ),
    ];
    if let Some(start) = result.start_time {
        entries.push((key(CheckpointField::StartTime), MetadataValue::Time(start)));
    }
    if let Some(end) = result.end_time {
        entries.push((key(CheckpointField::EndTime), MetadataValue::Time(end)));
    }
    entries
}

/// Typed view over the store's checkpoint metadata map
#[derive(Clone)]
pub struct CheckpointStore {
    store: Arc<dyn MigrationStore>,
}

impl CheckpointStore {
    /// Wrap a migration store
    pub fn new(store: Arc<dyn MigrationStore>) -> Self {
        CheckpointStore { store }
    }

    /// Commit a batch of typed entries atomically
    pub async fn commit(&self, entries: Vec<(MetadataKey, MetadataValue)>) -> Result<()> {
        let mut encoded = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            encoded.push((key.to_string(), bincode::serialize(&value)?));
        }
        self.store.metadata_commit(encoded).await
    }

    /// Read and decode the full metadata map
    pub async fn snapshot(&self) -> Result<CheckpointSnapshot> {
        let raw = self.store.metadata_snapshot().await?;
        let mut entries = HashMap::with_capacity(raw.len());
        for (key, bytes) in raw {
            let value: MetadataValue = bincode::deserialize(&bytes)?;
            entries.insert(key, value);
        }
        Ok(CheckpointSnapshot { entries })
    }
}

/// Decoded point-in-time view of the checkpoint metadata map
pub struct CheckpointSnapshot {
    entries: HashMap<String, MetadataValue>,
}

impl CheckpointSnapshot {
    fn value(&self, key: &MetadataKey) -> Option<&MetadataValue> {
        self.entries.get(&key.to_string())
    }

    /// Whether the snapshot holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reconstruct one worker record, if it was ever checkpointed
    pub fn worker_result(
        &self,
        phase: MigrationPhase,
        iteration: u32,
        worker_id: u32,
    ) -> Option<WorkerResult> {
        let key = |field| MetadataKey::Worker {
            phase,
            iteration,
            worker_id,
            field,
        };
        let status = self.value(&key(CheckpointField::Status))?.as_state()?;
        Some(WorkerResult {
            worker_id,
            iteration,
            phase,
            start_seq: self
                .value(&key(CheckpointField::StartSequenceNumber))?
                .as_seq()?,
            end_seq: self
                .value(&key(CheckpointField::EndSequenceNumber))?
                .as_seq()?,
            last_applied_seq: self
                .value(&key(CheckpointField::LastAppliedSequenceNumber))?
                .as_seq()?,
            status,
            keys_migrated: self.value(&key(CheckpointField::KeysMigrated))?.as_count()?,
            start_time: self
                .value(&key(CheckpointField::StartTime))
                .and_then(MetadataValue::as_time),
            end_time: self
                .value(&key(CheckpointField::EndTime))
                .and_then(MetadataValue::as_time),
        })
    }

    /// Reconstruct one phase aggregate with all of its worker records
    pub fn phase_result(&self, phase: MigrationPhase) -> Option<PhaseResult> {
        let key = |field| MetadataKey::Phase { phase, field };
        let status = self.value(&key(CheckpointField::Status))?.as_state()?;
        let worker_count = self.value(&key(CheckpointField::WorkerCount))?.as_count()? as u32;
        let iteration = self.value(&key(CheckpointField::Iteration))?.as_count()? as u32;
        let mut worker_results = Vec::new();
        for it in 0..=iteration {
            for id in 0..worker_count {
                if let Some(worker) = self.worker_result(phase, it, id) {
                    worker_results.push(worker);
                }
            }
        }
        Some(PhaseResult {
            phase,
            status,
            start_seq: self
                .value(&key(CheckpointField::StartSequenceNumber))?
                .as_seq()?,
            end_seq: self
                .value(&key(CheckpointField::EndSequenceNumber))?
                .as_seq()?,
            last_applied_seq: self
                .value(&key(CheckpointField::LastAppliedSequenceNumber))?
                .as_seq()?,
            worker_count,
            iteration,
            keys_migrated: self.value(&key(CheckpointField::KeysMigrated))?.as_count()?,
            worker_results,
        })
    }

    /// Reconstruct the full run record, if a run was ever started
    pub fn migration_result(&self) -> Option<MigrationResult> {
        let key = |field| MetadataKey::Run { field };
        let status = self.value(&key(CheckpointField::Status))?.as_state()?;
        let current_phase = self.value(&key(CheckpointField::CurrentPhase))?.as_phase()?;
        let phase_results = MigrationPhase::WORK_PHASES
            .iter()
            .filter_map(|p| self.phase_result(*p))
            .collect();
        Some(MigrationResult {
            status,
            current_phase,
            start_seq: self
                .value(&key(CheckpointField::StartSequenceNumber))?
                .as_seq()?,
            end_seq: self
                .value(&key(CheckpointField::EndSequenceNumber))?
                .as_seq()?,
            last_applied_seq: self
                .value(&key(CheckpointField::LastAppliedSequenceNumber))?
                .as_seq()?,
            keys_migrated: self.value(&key(CheckpointField::KeysMigrated))?.as_count()?,
            start_time: self
                .value(&key(CheckpointField::StartTime))
                .and_then(MetadataValue::as_time),
            end_time: self
                .value(&key(CheckpointField::EndTime))
                .and_then(MetadataValue::as_time),
            phase_results,
        })
    }
}
