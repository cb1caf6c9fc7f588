//! Core data types shared across the migration engine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordered phases of the migration state machine.
///
/// The phase only ever moves forward. Abort is not a phase, it is recorded
/// in [`MigrationState`] so the phase a run died in remains visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MigrationPhase {
    /// Migration has not started
    None,
    /// Bulk copy of the initial sequence-number range
    Copy,
    /// Iterative catch-up of writes that landed during Copy
    Catchup,
    /// Source writes are fenced and a final bounded catch-up runs
    Downtime,
    /// Content digests of source and target are compared
    DataValidation,
    /// Cutover finished, target is authoritative
    Completed,
}

impl MigrationPhase {
    /// All phases that perform work, in execution order
    pub const WORK_PHASES: [MigrationPhase; 4] = [
        MigrationPhase::Copy,
        MigrationPhase::Catchup,
        MigrationPhase::Downtime,
        MigrationPhase::DataValidation,
    ];
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationPhase::None => "None",
            MigrationPhase::Copy => "Copy",
            MigrationPhase::Catchup => "Catchup",
            MigrationPhase::Downtime => "Downtime",
            MigrationPhase::DataValidation => "DataValidation",
            MigrationPhase::Completed => "Completed",
        };
        write!(f, "{}", name)
    }
}

/// Status of a migration run, phase or worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MigrationState {
    /// Not started
    None,
    /// Running, resumable after failover
    InProgress,
    /// Finished successfully
    Completed,
    /// Terminally failed or cancelled, never resumed
    Aborted,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationState::None => "None",
            MigrationState::InProgress => "InProgress",
            MigrationState::Completed => "Completed",
            MigrationState::Aborted => "Aborted",
        };
        write!(f, "{}", name)
    }
}

/// How the migration run is triggered and gated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationMode {
    /// Start at service activation and enter downtime automatically
    Auto,
    /// Require an explicit trigger to start and to enter downtime
    Manual,
    /// Start at activation but hold before downtime until triggered
    ManualDowntime,
}

/// Which service instance an orchestrator runs inside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceSide {
    /// The legacy service being migrated away from
    Source,
    /// The new service being migrated onto
    Target,
}

impl fmt::Display for ServiceSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceSide::Source => write!(f, "Source"),
            ServiceSide::Target => write!(f, "Target"),
        }
    }
}

/// One state mutation read from the source store.
///
/// Immutable once enumerated. `version` is the source sequence number and
/// re-applying the same item is idempotent on the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationItem {
    /// Storage key, `<ActorId>_<StateName>` encoded
    pub key: String,
    /// Value bytes, empty for tombstones
    pub value: Vec<u8>,
    /// Source sequence number of the mutation
    pub version: i64,
    /// Whether this mutation is a recorded deletion
    pub is_deleted: bool,
}

impl MigrationItem {
    /// Create a live key-value item
    pub fn new(key: impl Into<String>, value: Vec<u8>, version: i64) -> Self {
        MigrationItem {
            key: key.into(),
            value,
            version,
            is_deleted: false,
        }
    }

    /// Create a tombstone item
    pub fn tombstone(key: impl Into<String>, version: i64) -> Self {
        MigrationItem {
            key: key.into(),
            value: Vec::new(),
            version,
            is_deleted: true,
        }
    }
}

/// Inclusive range of source sequence numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceRange {
    /// First sequence number in the range
    pub start: i64,
    /// Last sequence number in the range
    pub end: i64,
}

impl SequenceRange {
    /// Create a new inclusive range
    pub fn new(start: i64, end: i64) -> Self {
        SequenceRange { start, end }
    }

    /// Number of sequence numbers covered, zero when `end < start`
    pub fn len(&self) -> i64 {
        (self.end - self.start + 1).max(0)
    }

    /// Whether the range covers no sequence numbers
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// Whether the range contains the given sequence number
    pub fn contains(&self, seq: i64) -> bool {
        seq >= self.start && seq <= self.end
    }

    /// Split into up to `parts` contiguous, non-overlapping sub-ranges.
    ///
    /// Sub-ranges are equal sized with the remainder assigned to the last
    /// one. An empty range yields itself so a single worker can record a
    /// trivially completed result.
    pub fn partition(&self, parts: u32) -> Vec<SequenceRange> {
        let len = self.len();
        if len == 0 {
            return vec![*self];
        }
        let parts = i64::from(parts.max(1)).min(len);
        let size = len / parts;
        let mut ranges = Vec::with_capacity(parts as usize);
        let mut cursor = self.start;
        for i in 0..parts {
            let end = if i == parts - 1 {
                self.end
            } else {
                cursor + size - 1
            };
            ranges.push(SequenceRange::new(cursor, end));
            cursor = end + 1;
        }
        ranges
    }
}

impl fmt::Display for SequenceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Progress record of one worker's assigned, disjoint sub-range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResult {
    /// Worker index within its phase iteration
    pub worker_id: u32,
    /// Phase iteration this worker ran in
    pub iteration: u32,
    /// Phase the worker ran in
    pub phase: MigrationPhase,
    /// First sequence number assigned
    pub start_seq: i64,
    /// Last sequence number assigned
    pub end_seq: i64,
    /// Highest sequence number durably applied to the target
    pub last_applied_seq: i64,
    /// Worker status
    pub status: MigrationState,
    /// Number of key changes applied, tombstones included
    pub keys_migrated: u64,
    /// When the worker first started
    pub start_time: Option<DateTime<Utc>>,
    /// When the worker reached a terminal status
    pub end_time: Option<DateTime<Utc>>,
}

impl WorkerResult {
    /// Create a fresh worker record for an assigned range
    pub fn new(phase: MigrationPhase, iteration: u32, worker_id: u32, range: SequenceRange) -> Self {
        WorkerResult {
            worker_id,
            iteration,
            phase,
            start_seq: range.start,
            end_seq: range.end,
            last_applied_seq: range.start - 1,
            status: MigrationState::None,
            keys_migrated: 0,
            start_time: None,
            end_time: None,
        }
    }

    /// The worker's assigned range
    pub fn range(&self) -> SequenceRange {
        SequenceRange::new(self.start_seq, self.end_seq)
    }
}

/// Aggregated outcome of one phase, including every iteration it ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    /// Phase this result describes
    pub phase: MigrationPhase,
    /// Phase status, `Completed` iff every worker completed
    pub status: MigrationState,
    /// First sequence number covered by the phase
    pub start_seq: i64,
    /// Last sequence number covered by the phase
    pub end_seq: i64,
    /// Highest sequence number durably applied
    pub last_applied_seq: i64,
    /// Workers per iteration
    pub worker_count: u32,
    /// Latest iteration index that ran
    pub iteration: u32,
    /// Total key changes applied across all iterations
    pub keys_migrated: u64,
    /// Per-worker records, one per worker per iteration
    pub worker_results: Vec<WorkerResult>,
}

impl PhaseResult {
    /// Create a fresh phase record for the first iteration
    pub fn new(phase: MigrationPhase, range: SequenceRange, worker_count: u32) -> Self {
        PhaseResult {
            phase,
            status: MigrationState::InProgress,
            start_seq: range.start,
            end_seq: range.end,
            last_applied_seq: range.start - 1,
            worker_count,
            iteration: 0,
            keys_migrated: 0,
            worker_results: Vec::new(),
        }
    }

    /// Whether every worker in every iteration completed
    pub fn is_complete(&self) -> bool {
        self.status == MigrationState::Completed
            && self
                .worker_results
                .iter()
                .all(|w| w.status == MigrationState::Completed)
    }
}

/// Top-level resumable record for one migration run.
///
/// This is the operator-facing status payload. After failover it is
/// reconstructed from checkpoint metadata, never trusted from memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationResult {
    /// Run status
    pub status: MigrationState,
    /// Phase the run is currently in
    pub current_phase: MigrationPhase,
    /// First sequence number the run covers
    pub start_seq: i64,
    /// Last sequence number the run covers so far
    pub end_seq: i64,
    /// Highest sequence number durably applied
    pub last_applied_seq: i64,
    /// Total key changes applied
    pub keys_migrated: u64,
    /// When the run started
    pub start_time: Option<DateTime<Utc>>,
    /// When the run reached a terminal status
    pub end_time: Option<DateTime<Utc>>,
    /// One record per phase ever entered
    pub phase_results: Vec<PhaseResult>,
}

impl MigrationResult {
    /// Create an empty record for a run that has not started
    pub fn new() -> Self {
        MigrationResult {
            status: MigrationState::None,
            current_phase: MigrationPhase::None,
            start_seq: 0,
            end_seq: 0,
            last_applied_seq: -1,
            keys_migrated: 0,
            start_time: None,
            end_time: None,
            phase_results: Vec::new(),
        }
    }

    /// Look up the record for a phase, if it was ever entered
    pub fn phase_result(&self, phase: MigrationPhase) -> Option<&PhaseResult> {
        self.phase_results.iter().find(|p| p.phase == phase)
    }

    /// Mutable lookup of a phase record
    pub fn phase_result_mut(&mut self, phase: MigrationPhase) -> Option<&mut PhaseResult> {
        self.phase_results.iter_mut().find(|p| p.phase == phase)
    }
}

impl Default for MigrationResult {
    fn default() -> Self {
        Self::new()
    }
}
