//! Structured telemetry for migration progress.
//!
//! Components receive an injected [`Telemetry`] trait object instead of
//! emitting through globals, carrying phase and worker identifiers as
//! structured fields. [`LogTelemetry`] is the default sink.

use crate::types::{
    MigrationMode, MigrationPhase, MigrationResult, PhaseResult, SequenceRange, ServiceSide,
    WorkerResult,
};

/// Structured event sink for migration progress
pub trait Telemetry: Send + Sync {
    /// A migration run started
    fn migration_started(&self, _side: ServiceSide, _mode: MigrationMode) {}

    /// A phase iteration started over the given range
    fn phase_started(&self, _phase: MigrationPhase, _iteration: u32, _range: SequenceRange) {}

    /// A phase finished an iteration
    fn phase_completed(&self, _result: &PhaseResult) {}

    /// A worker committed a checkpoint
    fn worker_progress(&self, _result: &WorkerResult) {}

    /// A worker reached a terminal or suspended status
    fn worker_finished(&self, _result: &WorkerResult) {}

    /// The run reached `Completed`
    fn migration_completed(&self, _result: &MigrationResult) {}

    /// The run was aborted
    fn migration_aborted(&self, _reason: &str) {}

    /// An inbound call was forwarded to the remote side
    fn call_forwarded(&self, _actor_id: &str) {}

    /// An inbound call was rejected during the downtime window
    fn call_rejected(&self, _actor_id: &str) {}
}

/// Telemetry sink that emits through the `log` facade
pub struct LogTelemetry;

impl Telemetry for LogTelemetry {
    fn migration_started(&self, side: ServiceSide, mode: MigrationMode) {
        log::info!("migration started side={} mode={:?}", side, mode);
    }

    fn phase_started(&self, phase: MigrationPhase, iteration: u32, range: SequenceRange) {
        log::info!(
            "phase started phase={} iteration={} range={}",
            phase,
            iteration,
            range
        );
    }

    fn phase_completed(&self, result: &PhaseResult) {
        log::info!(
            "phase finished phase={} status={} keys_migrated={} last_applied={}",
            result.phase,
            result.status,
            result.keys_migrated,
            result.last_applied_seq
        );
    }

    fn worker_progress(&self, result: &WorkerResult) {
        log::debug!(
            "worker checkpoint phase={} iteration={} worker={} last_applied={} keys_migrated={}",
            result.phase,
            result.iteration,
            result.worker_id,
            result.last_applied_seq,
            result.keys_migrated
        );
    }

    fn worker_finished(&self, result: &WorkerResult) {
        log::info!(
            "worker finished phase={} iteration={} worker={} status={} keys_migrated={}",
            result.phase,
            result.iteration,
            result.worker_id,
            result.status,
            result.keys_migrated
        );
    }

    fn migration_completed(&self, result: &MigrationResult) {
        log::info!(
            "migration completed keys_migrated={} range=[{}, {}]",
            result.keys_migrated,
            result.start_seq,
            result.end_seq
        );
    }

    fn migration_aborted(&self, reason: &str) {
        log::error!("migration aborted reason={}", reason);
    }

    fn call_forwarded(&self, actor_id: &str) {
        log::debug!("call forwarded actor={}", actor_id);
    }

    fn call_rejected(&self, actor_id: &str) {
        log::debug!("call rejected during downtime actor={}", actor_id);
    }
}

/// Telemetry sink that drops every event, for tests
pub struct NullTelemetry;

impl Telemetry for NullTelemetry {}
