//! Phase workload: fans a phase's range out to concurrent workers.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::watch;

use crate::checkpoint::CheckpointStore;
use crate::config::MigrationSettings;
use crate::error::{MigrationError, Result};
use crate::retry::RetryPolicy;
use crate::source::SequenceReader;
use crate::store::MigrationStore;
use crate::telemetry::Telemetry;
use crate::types::{MigrationPhase, MigrationState, PhaseResult, SequenceRange};
use crate::worker::MigrationWorker;

/// One phase iteration to execute
#[derive(Debug, Clone, Copy)]
pub struct PhaseWorkloadSpec {
    /// Phase being executed
    pub phase: MigrationPhase,
    /// Iteration index within the phase
    pub iteration: u32,
    /// Sequence-number range the iteration covers
    pub range: SequenceRange,
    /// Requested worker count, capped by the range length
    pub worker_count: u32,
}

/// Partitions a phase range into disjoint sub-ranges, runs one worker per
/// sub-range concurrently and aggregates their results.
pub struct PhaseWorkload {
    reader: Arc<dyn SequenceReader>,
    store: Arc<dyn MigrationStore>,
    checkpoints: CheckpointStore,
    settings: Arc<MigrationSettings>,
    retry: RetryPolicy,
    telemetry: Arc<dyn Telemetry>,
    cancel: watch::Receiver<bool>,
}

impl PhaseWorkload {
    /// Create a workload over the engine's shared collaborators
    pub fn new(
        reader: Arc<dyn SequenceReader>,
        store: Arc<dyn MigrationStore>,
        checkpoints: CheckpointStore,
        settings: Arc<MigrationSettings>,
        retry: RetryPolicy,
        telemetry: Arc<dyn Telemetry>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        PhaseWorkload {
            reader,
            store,
            checkpoints,
            settings,
            retry,
            telemetry,
            cancel,
        }
    }

    /// Run one phase iteration to completion or safe suspension.
    ///
    /// Blocks until every spawned worker reports a terminal or suspended
    /// status. The first fatal worker error aborts the iteration after the
    /// remaining workers have drained.
    pub async fn run(&self, spec: PhaseWorkloadSpec) -> Result<PhaseResult> {
        self.telemetry
            .phase_started(spec.phase, spec.iteration, spec.range);
        let ranges = spec.range.partition(spec.worker_count);

        let mut handles = Vec::with_capacity(ranges.len());
        for (worker_id, range) in ranges.iter().enumerate() {
            let worker = MigrationWorker::new(
                spec.phase,
                spec.iteration,
                worker_id as u32,
                *range,
                Arc::clone(&self.reader),
                Arc::clone(&self.store),
                self.checkpoints.clone(),
                Arc::clone(&self.settings),
                self.retry.clone(),
                Arc::clone(&self.telemetry),
                self.cancel.clone(),
            );
            handles.push(tokio::spawn(worker.run()));
        }

        let mut workers = Vec::with_capacity(handles.len());
        let mut failure: Option<MigrationError> = None;
        for joined in join_all(handles).await {
            match joined {
                Ok(Ok(worker)) => workers.push(worker),
                Ok(Err(err)) => failure = failure.or(Some(err)),
                Err(join_err) => {
                    failure = failure.or(Some(MigrationError::Protocol(format!(
                        "worker task failed: {}",
                        join_err
                    ))));
                }
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        workers.sort_by_key(|w| w.worker_id);
        let all_completed = workers
            .iter()
            .all(|w| w.status == MigrationState::Completed);
        let mut result = PhaseResult::new(spec.phase, spec.range, ranges.len() as u32);
        result.iteration = spec.iteration;
        result.status = if all_completed {
            MigrationState::Completed
        } else {
            MigrationState::InProgress
        };
        // the safe resume point is the lowest boundary any worker guarantees
        result.last_applied_seq = if all_completed {
            spec.range.end
        } else {
            workers
                .iter()
                .map(|w| {
                    if w.status == MigrationState::Completed {
                        w.end_seq
                    } else {
                        w.last_applied_seq
                    }
                })
                .min()
                .unwrap_or(spec.range.end)
        };
        result.keys_migrated = workers.iter().map(|w| w.keys_migrated).sum();
        result.worker_results = workers;
        self.telemetry.phase_completed(&result);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrySettings;
    use crate::store::InMemoryStore;
    use crate::telemetry::NullTelemetry;
    use crate::testing::InMemorySource;

    fn workload(
        source: Arc<InMemorySource>,
        store: Arc<InMemoryStore>,
    ) -> (PhaseWorkload, watch::Sender<bool>) {
        let settings = Arc::new(
            MigrationSettings::new()
                .source_service_uri("fabric:/app/kvs")
                .target_service_uri("fabric:/app/rc")
                .chunks_per_enumeration(2)
                .key_value_pairs_per_chunk(4)
                .build()
                .unwrap(),
        );
        let (tx, rx) = watch::channel(false);
        let workload = PhaseWorkload::new(
            source,
            Arc::clone(&store) as Arc<dyn MigrationStore>,
            CheckpointStore::new(store),
            settings,
            RetryPolicy::new(RetrySettings::default()),
            Arc::new(NullTelemetry),
            rx,
        );
        (workload, tx)
    }

    #[tokio::test]
    async fn test_workers_partition_range_exactly() {
        let source = Arc::new(InMemorySource::new());
        for i in 0..40 {
            source.push(format!("String_A_S{}", i), vec![i as u8], false);
        }
        let store = Arc::new(InMemoryStore::new());
        let (workload, _tx) = workload(Arc::clone(&source), Arc::clone(&store));

        let result = workload
            .run(PhaseWorkloadSpec {
                phase: MigrationPhase::Copy,
                iteration: 0,
                range: SequenceRange::new(1, 40),
                worker_count: 4,
            })
            .await
            .unwrap();

        assert_eq!(result.status, MigrationState::Completed);
        assert_eq!(result.worker_results.len(), 4);
        // ranges cover [1, 40] with no gaps and no overlaps
        let mut expected_start = 1;
        for worker in &result.worker_results {
            assert_eq!(worker.start_seq, expected_start);
            expected_start = worker.end_seq + 1;
        }
        assert_eq!(expected_start, 41);
        assert_eq!(result.keys_migrated, 40);
        assert_eq!(result.last_applied_seq, 40);
        assert_eq!(store.key_count(), 40);
    }

    #[tokio::test]
    async fn test_cancelled_workload_stays_resumable() {
        let source = Arc::new(InMemorySource::new());
        for i in 0..20 {
            source.push(format!("String_A_S{}", i), vec![i as u8], false);
        }
        let store = Arc::new(InMemoryStore::new());
        let (workload, tx) = workload(Arc::clone(&source), Arc::clone(&store));
        tx.send(true).unwrap();

        let result = workload
            .run(PhaseWorkloadSpec {
                phase: MigrationPhase::Copy,
                iteration: 0,
                range: SequenceRange::new(1, 20),
                worker_count: 2,
            })
            .await
            .unwrap();

        assert_eq!(result.status, MigrationState::InProgress);
        assert!(result.last_applied_seq < 20);
    }
}
