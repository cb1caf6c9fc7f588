//! Migration worker: checkpointed copy of one sequence-number sub-range.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;

use crate::checkpoint::{worker_entries, CheckpointStore};
use crate::config::MigrationSettings;
use crate::error::{MigrationError, Result};
use crate::keys::is_internal_key;
use crate::retry::RetryPolicy;
use crate::source::{EnumerationBatch, EnumerationRequest, SequenceReader};
use crate::store::MigrationStore;
use crate::telemetry::Telemetry;
use crate::types::{MigrationItem, MigrationPhase, MigrationState, SequenceRange, WorkerResult};

/// Copies one assigned, disjoint sequence-number sub-range from the source
/// reader into the target store.
///
/// Progress is checkpointed after every chunk, so the worker can die at any
/// point and be restarted from `last_applied_seq + 1`. Data apply and
/// checkpoint commit are two separate steps; a crash between them only causes
/// an idempotent re-apply of the same chunk.
pub struct MigrationWorker {
    phase: MigrationPhase,
    iteration: u32,
    worker_id: u32,
    range: SequenceRange,
    reader: Arc<dyn SequenceReader>,
    store: Arc<dyn MigrationStore>,
    checkpoints: CheckpointStore,
    settings: Arc<MigrationSettings>,
    retry: RetryPolicy,
    telemetry: Arc<dyn Telemetry>,
    cancel: watch::Receiver<bool>,
}

enum Step {
    Batch(Result<EnumerationBatch>),
    Cancelled,
}

impl MigrationWorker {
    /// Create a worker for an assigned sub-range
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        phase: MigrationPhase,
        iteration: u32,
        worker_id: u32,
        range: SequenceRange,
        reader: Arc<dyn SequenceReader>,
        store: Arc<dyn MigrationStore>,
        checkpoints: CheckpointStore,
        settings: Arc<MigrationSettings>,
        retry: RetryPolicy,
        telemetry: Arc<dyn Telemetry>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        MigrationWorker {
            phase,
            iteration,
            worker_id,
            range,
            reader,
            store,
            checkpoints,
            settings,
            retry,
            telemetry,
            cancel,
        }
    }

    /// Run the copy loop to a terminal or safely-suspended state.
    ///
    /// Returns the final worker record. Cancellation yields `Ok` with status
    /// `InProgress` so the workload can aggregate a resumable phase; fatal
    /// errors are checkpointed as `Aborted` and propagated.
    pub async fn run(mut self) -> Result<WorkerResult> {
        let retry = self.retry.clone();
        let checkpoints = self.checkpoints.clone();

        let snapshot = checkpoints.snapshot().await?;
        let mut result = snapshot
            .worker_result(self.phase, self.iteration, self.worker_id)
            .unwrap_or_else(|| {
                WorkerResult::new(self.phase, self.iteration, self.worker_id, self.range)
            });
        if result.status == MigrationState::Completed {
            return Ok(result);
        }
        if result.start_time.is_none() {
            result.start_time = Some(Utc::now());
        }
        result.status = MigrationState::InProgress;
        checkpoints.commit(worker_entries(&result)).await?;

        // the checkpointed range wins over the constructor assignment on resume
        let range = result.range();
        let mut next = result.last_applied_seq + 1;

        while next <= range.end {
            if *self.cancel.borrow() {
                return self.suspend(result).await;
            }
            let request = EnumerationRequest {
                start_sequence_number: next,
                end_sequence_number: range.end,
                chunks: self.settings.chunks_per_enumeration,
                items_per_chunk: self.settings.key_value_pairs_per_chunk,
            };
            let reader = Arc::clone(&self.reader);
            let enumerate = retry.run("enumerate source range", move || {
                let request = request.clone();
                let reader = Arc::clone(&reader);
                async move { reader.enumerate_by_sequence_number(request).await }
            });
            let step = tokio::select! {
                batch = enumerate => Step::Batch(batch),
                _ = self.cancel.changed() => Step::Cancelled,
            };
            let batch = match step {
                Step::Cancelled => return self.suspend(result).await,
                Step::Batch(Ok(batch)) => batch,
                Step::Batch(Err(err)) => return self.fail(result, err).await,
            };

            if batch.is_empty() {
                break;
            }
            let end_reached = batch.end_sequence_number_reached;
            for chunk in batch.chunks {
                if chunk.items.is_empty() {
                    continue;
                }
                let boundary = chunk.last_sequence_number;
                let user_items: Vec<MigrationItem> = chunk
                    .items
                    .into_iter()
                    .filter(|item| !is_internal_key(&item.key))
                    .collect();
                if !user_items.is_empty() {
                    let store = Arc::clone(&self.store);
                    let apply = retry.run("apply chunk to target", move || {
                        let items = user_items.clone();
                        let store = Arc::clone(&store);
                        async move { store.save_state(&items).await }
                    });
                    match apply.await {
                        Ok(applied) => result.keys_migrated += applied,
                        Err(err) => return self.fail(result, err).await,
                    }
                }
                result.last_applied_seq = boundary;
                if let Err(err) = checkpoints.commit(worker_entries(&result)).await {
                    return self.fail(result, err).await;
                }
                self.telemetry.worker_progress(&result);
                next = boundary + 1;
            }
            if end_reached {
                break;
            }
        }

        // range exhausted, everything at or below the range end is applied
        result.last_applied_seq = result.last_applied_seq.max(range.end);
        result.status = MigrationState::Completed;
        result.end_time = Some(Utc::now());
        checkpoints.commit(worker_entries(&result)).await?;
        self.telemetry.worker_finished(&result);
        Ok(result)
    }

    async fn suspend(self, result: WorkerResult) -> Result<WorkerResult> {
        // status stays InProgress at the last committed checkpoint
        self.checkpoints.commit(worker_entries(&result)).await?;
        self.telemetry.worker_finished(&result);
        Ok(result)
    }

    async fn fail(self, mut result: WorkerResult, err: MigrationError) -> Result<WorkerResult> {
        result.status = MigrationState::Aborted;
        result.end_time = Some(Utc::now());
        if let Err(commit_err) = self.checkpoints.commit(worker_entries(&result)).await {
            log::error!(
                "failed to checkpoint aborted worker phase={} worker={} error={}",
                result.phase,
                result.worker_id,
                commit_err
            );
        }
        self.telemetry.worker_finished(&result);
        Err(err)
    }
}
