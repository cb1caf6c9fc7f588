//! Migration orchestrator: the phase state machine.
//!
//! Exactly one orchestrator runs per service replica, on the current primary
//! only. The target-side orchestrator owns phase execution; the source-side
//! orchestrator fences writes at downtime and gates live traffic. Both are
//! created through an explicit registry keyed by [`ServiceSide`], never
//! discovered dynamically.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Notify};

use crate::checkpoint::{phase_entries, run_entries, CheckpointStore};
use crate::config::MigrationSettings;
use crate::error::{MigrationError, Result};
use crate::retry::RetryPolicy;
use crate::source::SequenceReader;
use crate::store::MigrationStore;
use crate::telemetry::Telemetry;
use crate::types::{
    MigrationMode, MigrationPhase, MigrationResult, MigrationState, PhaseResult, SequenceRange,
    ServiceSide,
};
use crate::validation::source_content_summary;
use crate::workload::{PhaseWorkload, PhaseWorkloadSpec};

/// Callback invoked once when the run reaches `Completed` or `Aborted`
pub type CompletionCallback = Box<dyn FnOnce(bool) + Send>;

/// Control and gating surface of a migration orchestrator
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Which side of the migration this orchestrator runs on
    fn side(&self) -> ServiceSide;

    /// Start the migration run. Idempotent.
    ///
    /// Under `Manual` mode the run only proceeds when `user_triggered` is
    /// set. Drives every phase to completion before returning, so hosts
    /// normally spawn this onto their runtime at activation.
    async fn start_migration(&self, user_triggered: bool) -> Result<MigrationResult>;

    /// Resume a prior in-progress run from checkpoint metadata.
    ///
    /// Returns whether a run was resumed, as opposed to nothing to do.
    async fn try_resume_migration(&self) -> Result<bool>;

    /// Enter the downtime window.
    ///
    /// Valid only once catch-up lag is within the downtime threshold.
    /// Requires an explicit trigger under `Manual` and `ManualDowntime`.
    async fn start_downtime(&self, user_triggered: bool) -> Result<()>;

    /// Cancel all in-flight work and mark the run terminally aborted.
    ///
    /// Waits for every worker to reach a terminal or safely-suspended state.
    /// Already-applied data is not rolled back.
    async fn abort_migration(&self) -> Result<()>;

    /// Operator-facing status snapshot
    fn migration_status(&self) -> MigrationResult;

    /// Whether the local replica is authoritative for actor calls right now
    fn are_actor_calls_allowed(&self) -> bool;

    /// Whether the authoritative side is currently the other service
    fn is_call_to_be_forwarded(&self) -> bool;

    /// Reject calls that fall into the mutual downtime window.
    ///
    /// The error is transient; callers retry after downtime ends.
    fn ensure_actor_calls_allowed(&self) -> Result<()>;

    /// Register a callback fired once with the run's success flag
    fn register_completion_callback(&self, callback: CompletionCallback);
}

/// Collaborators injected into orchestrator constructors
#[derive(Clone)]
pub struct OrchestratorDeps {
    /// Validated migration settings
    pub settings: Arc<MigrationSettings>,
    /// Sequence-ordered reader over the source store
    pub reader: Arc<dyn SequenceReader>,
    /// Local migration state store
    pub store: Arc<dyn MigrationStore>,
    /// Structured telemetry sink
    pub telemetry: Arc<dyn Telemetry>,
}

/// Constructor function registered per service side
pub type OrchestratorCtor = Box<dyn Fn(OrchestratorDeps) -> Arc<dyn Orchestrator> + Send + Sync>;

/// Explicit side-to-constructor registry.
///
/// Hosts pass the registry at construction instead of relying on runtime
/// type discovery, and may override either side for testing.
pub struct OrchestratorRegistry {
    ctors: HashMap<ServiceSide, OrchestratorCtor>,
}

impl OrchestratorRegistry {
    /// Registry with the built-in source and target orchestrators
    pub fn with_defaults() -> Self {
        let mut registry = OrchestratorRegistry {
            ctors: HashMap::new(),
        };
        registry.register(
            ServiceSide::Source,
            Box::new(|deps| Arc::new(SourceOrchestrator::new(deps)) as Arc<dyn Orchestrator>),
        );
        registry.register(
            ServiceSide::Target,
            Box::new(|deps| Arc::new(TargetOrchestrator::new(deps)) as Arc<dyn Orchestrator>),
        );
        registry
    }

    /// Register or replace the constructor for a side
    pub fn register(&mut self, side: ServiceSide, ctor: OrchestratorCtor) {
        self.ctors.insert(side, ctor);
    }

    /// Construct the orchestrator for a side
    pub fn create(&self, side: ServiceSide, deps: OrchestratorDeps) -> Result<Arc<dyn Orchestrator>> {
        let ctor = self.ctors.get(&side).ok_or_else(|| {
            MigrationError::Configuration(format!("no orchestrator registered for side {}", side))
        })?;
        Ok(ctor(deps))
    }
}

struct TargetState {
    result: MigrationResult,
    catchup_converged: bool,
    downtime_requested: bool,
    terminal_recorded: bool,
}

/// Target-side orchestrator, owns the phase state machine
pub struct TargetOrchestrator {
    settings: Arc<MigrationSettings>,
    reader: Arc<dyn SequenceReader>,
    store: Arc<dyn MigrationStore>,
    checkpoints: CheckpointStore,
    retry: RetryPolicy,
    telemetry: Arc<dyn Telemetry>,
    state: RwLock<TargetState>,
    callbacks: Mutex<Vec<CompletionCallback>>,
    downtime_notify: Notify,
    cancel_tx: watch::Sender<bool>,
    run_gate: tokio::sync::Mutex<()>,
}

impl TargetOrchestrator {
    /// Create a target orchestrator over the injected collaborators
    pub fn new(deps: OrchestratorDeps) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        TargetOrchestrator {
            retry: RetryPolicy::new(deps.settings.retry.clone()),
            checkpoints: CheckpointStore::new(Arc::clone(&deps.store)),
            settings: deps.settings,
            reader: deps.reader,
            store: deps.store,
            telemetry: deps.telemetry,
            state: RwLock::new(TargetState {
                result: MigrationResult::new(),
                catchup_converged: false,
                downtime_requested: false,
                terminal_recorded: false,
            }),
            callbacks: Mutex::new(Vec::new()),
            downtime_notify: Notify::new(),
            cancel_tx,
            run_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Replace the retry policy, e.g. to inject a custom failure classifier
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    fn workload(&self) -> PhaseWorkload {
        PhaseWorkload::new(
            Arc::clone(&self.reader),
            Arc::clone(&self.store),
            self.checkpoints.clone(),
            Arc::clone(&self.settings),
            self.retry.clone(),
            Arc::clone(&self.telemetry),
            self.cancel_tx.subscribe(),
        )
    }

    async fn read_last_sequence_number(&self) -> Result<i64> {
        let reader = Arc::clone(&self.reader);
        self.retry
            .run("read last sequence number", move || {
                let reader = Arc::clone(&reader);
                async move { reader.get_last_sequence_number().await }
            })
            .await
    }

    async fn persist_run(&self) -> Result<()> {
        let result = self.state.read().result.clone();
        self.checkpoints.commit(run_entries(&result)).await
    }

    async fn persist_phase(&self, phase: MigrationPhase) -> Result<()> {
        let Some(snapshot) = self.state.read().result.phase_result(phase).cloned() else {
            return Ok(());
        };
        self.checkpoints.commit(phase_entries(&snapshot)).await
    }

    fn current_phase(&self) -> MigrationPhase {
        self.state.read().result.current_phase
    }

    async fn advance_to(&self, phase: MigrationPhase) -> Result<()> {
        self.state.write().result.current_phase = phase;
        self.persist_run().await
    }

    /// Install a fresh phase aggregate and return its workload spec
    fn open_phase(&self, phase: MigrationPhase, range: SequenceRange, workers: u32) -> PhaseWorkloadSpec {
        let worker_count = range.partition(workers).len() as u32;
        let aggregate = PhaseResult::new(phase, range, worker_count);
        let iteration = aggregate.iteration;
        let mut st = self.state.write();
        st.result.phase_results.push(aggregate);
        PhaseWorkloadSpec {
            phase,
            iteration,
            range,
            worker_count,
        }
    }

    /// Fold one finished workload iteration into the phase aggregate.
    ///
    /// Re-run iterations replace their previous worker records so a resumed
    /// iteration never double counts.
    fn record_iteration(&self, phase: MigrationPhase, iteration: PhaseResult) {
        let mut st = self.state.write();
        let run = &mut st.result;
        run.end_seq = run.end_seq.max(iteration.end_seq);
        let aggregate = run
            .phase_result_mut(phase)
            .expect("phase aggregate present when recording");
        aggregate
            .worker_results
            .retain(|w| w.iteration != iteration.iteration);
        aggregate.worker_results.extend(iteration.worker_results);
        aggregate
            .worker_results
            .sort_by_key(|w| (w.iteration, w.worker_id));
        aggregate.end_seq = aggregate.end_seq.max(iteration.end_seq);
        aggregate.last_applied_seq = iteration.last_applied_seq;
        aggregate.iteration = iteration.iteration;
        aggregate.status = iteration.status;
        aggregate.keys_migrated = aggregate
            .worker_results
            .iter()
            .map(|w| w.keys_migrated)
            .sum();
        run.last_applied_seq = iteration.last_applied_seq;
        run.keys_migrated = run.phase_results.iter().map(|p| p.keys_migrated).sum();
    }

    async fn run_iteration(&self, spec: PhaseWorkloadSpec) -> Result<()> {
        // the phase aggregate is durable before any worker spawns, so a
        // failover mid-iteration resumes the exact same assignment
        self.persist_phase(spec.phase).await?;
        self.persist_run().await?;
        let iteration = self.workload().run(spec).await?;
        let finished = iteration.status == MigrationState::Completed;
        self.record_iteration(spec.phase, iteration);
        self.persist_phase(spec.phase).await?;
        self.persist_run().await?;
        if !finished {
            return Err(MigrationError::Aborted(format!(
                "phase {} cancelled before completion",
                spec.phase
            )));
        }
        Ok(())
    }

    /// Re-run a persisted, unfinished iteration with its original assignment
    async fn resume_iteration(&self, phase: MigrationPhase) -> Result<()> {
        let spec = {
            let st = self.state.read();
            let aggregate = match st.result.phase_result(phase) {
                Some(p) if p.status != MigrationState::Completed => p,
                _ => return Ok(()),
            };
            let iteration = aggregate.iteration;
            let range = aggregate
                .worker_results
                .iter()
                .filter(|w| w.iteration == iteration)
                .map(|w| w.range())
                .reduce(|a, b| SequenceRange::new(a.start.min(b.start), a.end.max(b.end)))
                .unwrap_or_else(|| {
                    SequenceRange::new(aggregate.last_applied_seq + 1, aggregate.end_seq)
                });
            PhaseWorkloadSpec {
                phase,
                iteration,
                range,
                worker_count: aggregate.worker_count,
            }
        };
        self.run_iteration(spec).await
    }

    async fn run_copy(&self) -> Result<()> {
        let existing = {
            let st = self.state.read();
            st.result.phase_result(MigrationPhase::Copy).map(|p| p.status)
        };
        match existing {
            Some(MigrationState::Completed) => Ok(()),
            Some(_) => self.resume_iteration(MigrationPhase::Copy).await,
            None => {
                let reader = Arc::clone(&self.reader);
                let first = self
                    .retry
                    .run("read first sequence number", move || {
                        let reader = Arc::clone(&reader);
                        async move { reader.get_first_sequence_number().await }
                    })
                    .await?;
                let last = self.read_last_sequence_number().await?;
                let range = SequenceRange::new(first, last);
                {
                    let mut st = self.state.write();
                    st.result.start_seq = range.start;
                    st.result.end_seq = range.end;
                    st.result.last_applied_seq = range.start - 1;
                }
                let spec =
                    self.open_phase(MigrationPhase::Copy, range, self.settings.copy_phase_parallelism);
                self.run_iteration(spec).await
            }
        }
    }

    async fn run_catchup(&self) -> Result<()> {
        // finish a persisted in-flight iteration first
        self.resume_iteration(MigrationPhase::Catchup).await?;

        loop {
            if self.cancelled() {
                return Err(MigrationError::Aborted("migration cancelled".into()));
            }
            let last_applied = self.state.read().result.last_applied_seq;
            let last_seq = self.read_last_sequence_number().await?;
            let lag = last_seq - last_applied;
            if lag <= self.settings.downtime_threshold {
                break;
            }
            let range = SequenceRange::new(last_applied + 1, last_seq);
            let spec = {
                let has_aggregate = self
                    .state
                    .read()
                    .result
                    .phase_result(MigrationPhase::Catchup)
                    .is_some();
                if has_aggregate {
                    let mut st = self.state.write();
                    let aggregate = st
                        .result
                        .phase_result_mut(MigrationPhase::Catchup)
                        .expect("catchup aggregate present");
                    aggregate.iteration += 1;
                    aggregate.status = MigrationState::InProgress;
                    aggregate.end_seq = range.end;
                    PhaseWorkloadSpec {
                        phase: MigrationPhase::Catchup,
                        iteration: aggregate.iteration,
                        range,
                        worker_count: 1,
                    }
                } else {
                    self.open_phase(MigrationPhase::Catchup, range, 1)
                }
            };
            self.run_iteration(spec).await?;
        }

        // lag is within the threshold, close the phase out
        {
            let mut st = self.state.write();
            st.catchup_converged = true;
            if st.result.phase_result(MigrationPhase::Catchup).is_none() {
                // no iteration was needed, record the phase as trivially done
                let last_applied = st.result.last_applied_seq;
                let mut aggregate = PhaseResult::new(
                    MigrationPhase::Catchup,
                    SequenceRange::new(last_applied + 1, last_applied),
                    0,
                );
                aggregate.status = MigrationState::Completed;
                aggregate.last_applied_seq = last_applied;
                st.result.phase_results.push(aggregate);
            } else {
                let aggregate = st
                    .result
                    .phase_result_mut(MigrationPhase::Catchup)
                    .expect("catchup aggregate present");
                aggregate.status = MigrationState::Completed;
            }
        }
        self.persist_phase(MigrationPhase::Catchup).await?;
        self.persist_run().await
    }

    async fn await_downtime_trigger(&self) -> Result<()> {
        if self.settings.mode == MigrationMode::Auto {
            self.state.write().downtime_requested = true;
        }
        loop {
            let notified = self.downtime_notify.notified();
            if self.cancelled() {
                return Err(MigrationError::Aborted("migration cancelled".into()));
            }
            if self.state.read().downtime_requested {
                return Ok(());
            }
            log::info!("catch-up converged, holding before downtime until triggered");
            let mut cancel = self.cancel_tx.subscribe();
            tokio::select! {
                _ = notified => {}
                _ = cancel.changed() => {}
            }
        }
    }

    async fn run_downtime(&self) -> Result<()> {
        let existing = {
            let st = self.state.read();
            st.result
                .phase_result(MigrationPhase::Downtime)
                .map(|p| p.status)
        };
        if existing == Some(MigrationState::Completed) {
            return Ok(());
        }

        // fence the source, idempotent on resume
        let reader = Arc::clone(&self.reader);
        self.retry
            .run("reject writes on source", move || {
                let reader = Arc::clone(&reader);
                async move {
                    reader
                        .try_abort_existing_transactions_and_reject_writes()
                        .await
                }
            })
            .await?;

        if existing.is_some() {
            return self.resume_iteration(MigrationPhase::Downtime).await;
        }
        let last_applied = self.state.read().result.last_applied_seq;
        let last_seq = self.read_last_sequence_number().await?;
        let range = SequenceRange::new(last_applied + 1, last_seq);
        let spec = self.open_phase(MigrationPhase::Downtime, range, 1);
        self.run_iteration(spec).await
    }

    async fn run_validation(&self) -> Result<()> {
        let existing = {
            let st = self.state.read();
            st.result
                .phase_result(MigrationPhase::DataValidation)
                .map(|p| p.status)
        };
        if existing == Some(MigrationState::Completed) {
            return Ok(());
        }
        let range = {
            let st = self.state.read();
            SequenceRange::new(st.result.start_seq, st.result.end_seq)
        };
        if existing.is_none() {
            let mut aggregate = PhaseResult::new(MigrationPhase::DataValidation, range, 0);
            aggregate.last_applied_seq = range.end;
            self.state.write().result.phase_results.push(aggregate);
            self.persist_phase(MigrationPhase::DataValidation).await?;
        }
        self.telemetry
            .phase_started(MigrationPhase::DataValidation, 0, range);

        let summary =
            source_content_summary(self.reader.as_ref(), range, &self.settings, &self.retry).await?;
        self.store.validate_post_migration(&summary).await?;

        {
            let mut st = self.state.write();
            let aggregate = st
                .result
                .phase_result_mut(MigrationPhase::DataValidation)
                .expect("validation aggregate present");
            aggregate.status = MigrationState::Completed;
        }
        self.persist_phase(MigrationPhase::DataValidation).await
    }

    async fn run_phases(&self) -> Result<()> {
        loop {
            if self.cancelled() {
                return Err(MigrationError::Aborted("migration cancelled".into()));
            }
            match self.current_phase() {
                MigrationPhase::None => {
                    self.advance_to(MigrationPhase::Copy).await?;
                }
                MigrationPhase::Copy => {
                    self.run_copy().await?;
                    self.advance_to(MigrationPhase::Catchup).await?;
                }
                MigrationPhase::Catchup => {
                    self.run_catchup().await?;
                    self.await_downtime_trigger().await?;
                    self.advance_to(MigrationPhase::Downtime).await?;
                }
                MigrationPhase::Downtime => {
                    self.run_downtime().await?;
                    self.advance_to(MigrationPhase::DataValidation).await?;
                }
                MigrationPhase::DataValidation => {
                    self.run_validation().await?;
                    return Ok(());
                }
                MigrationPhase::Completed => return Ok(()),
            }
        }
    }

    async fn drive(&self) -> Result<MigrationResult> {
        let _gate = self.run_gate.lock().await;
        match self.run_phases().await {
            Ok(()) => {
                self.finish(true, None).await?;
                Ok(self.migration_status())
            }
            Err(err) => {
                if let Err(finish_err) = self.finish(false, Some(&err)).await {
                    log::error!("failed to record aborted run: {}", finish_err);
                }
                Err(err)
            }
        }
    }

    async fn finish(&self, succeeded: bool, err: Option<&MigrationError>) -> Result<()> {
        {
            let mut st = self.state.write();
            if st.terminal_recorded {
                return Ok(());
            }
            st.terminal_recorded = true;
            st.result.status = if succeeded {
                MigrationState::Completed
            } else {
                MigrationState::Aborted
            };
            if succeeded {
                st.result.current_phase = MigrationPhase::Completed;
            }
            st.result.end_time = Some(Utc::now());
        }
        self.persist_run().await?;
        if succeeded {
            let result = self.migration_status();
            self.telemetry.migration_completed(&result);
        } else {
            let reason = err.map(|e| e.to_string()).unwrap_or_else(|| "aborted".into());
            self.telemetry.migration_aborted(&reason);
            // the source must keep serving after a failed cutover
            if let Err(resume_err) = self.reader.resume_writes().await {
                log::warn!("failed to resume source writes after abort: {}", resume_err);
            }
        }
        let callbacks: Vec<CompletionCallback> = self.callbacks.lock().drain(..).collect();
        for callback in callbacks {
            callback(succeeded);
        }
        Ok(())
    }
}

#[async_trait]
impl Orchestrator for TargetOrchestrator {
    fn side(&self) -> ServiceSide {
        ServiceSide::Target
    }

    async fn start_migration(&self, user_triggered: bool) -> Result<MigrationResult> {
        if self.settings.mode == MigrationMode::Manual && !user_triggered {
            log::info!("manual migration holds until explicitly triggered");
            return Ok(self.migration_status());
        }
        {
            let mut st = self.state.write();
            match st.result.status {
                MigrationState::None => {
                    st.result.status = MigrationState::InProgress;
                    st.result.start_time = Some(Utc::now());
                }
                // an earlier call already owns the run
                _ => return Ok(st.result.clone()),
            }
        }
        self.telemetry
            .migration_started(ServiceSide::Target, self.settings.mode);
        self.persist_run().await?;
        self.drive().await
    }

    async fn try_resume_migration(&self) -> Result<bool> {
        let snapshot = self.checkpoints.snapshot().await?;
        let Some(result) = snapshot.migration_result() else {
            return Ok(false);
        };
        if result.status != MigrationState::InProgress {
            // terminal run, load it for status visibility only
            let mut st = self.state.write();
            st.result = result;
            st.terminal_recorded = true;
            return Ok(false);
        }
        log::info!(
            "resuming migration from checkpoint phase={} last_applied={}",
            result.current_phase,
            result.last_applied_seq
        );
        {
            let mut st = self.state.write();
            st.result = result;
            st.catchup_converged = false;
            st.downtime_requested = st.result.current_phase >= MigrationPhase::Downtime;
        }
        self.telemetry
            .migration_started(ServiceSide::Target, self.settings.mode);
        self.drive().await?;
        Ok(true)
    }

    async fn start_downtime(&self, user_triggered: bool) -> Result<()> {
        {
            let st = self.state.read();
            if st.result.status != MigrationState::InProgress {
                return Err(MigrationError::InvalidOperation(
                    "no migration in progress".into(),
                ));
            }
            if st.result.current_phase > MigrationPhase::Catchup {
                return Ok(());
            }
            if !st.catchup_converged {
                return Err(MigrationError::InvalidOperation(
                    "catch-up lag still exceeds the downtime threshold".into(),
                ));
            }
        }
        if !user_triggered
            && matches!(
                self.settings.mode,
                MigrationMode::Manual | MigrationMode::ManualDowntime
            )
        {
            return Err(MigrationError::InvalidOperation(
                "downtime requires an explicit trigger in manual modes".into(),
            ));
        }
        self.state.write().downtime_requested = true;
        self.downtime_notify.notify_one();
        Ok(())
    }

    async fn abort_migration(&self) -> Result<()> {
        {
            let st = self.state.read();
            if matches!(
                st.result.status,
                MigrationState::Completed | MigrationState::Aborted
            ) {
                return Ok(());
            }
        }
        let _ = self.cancel_tx.send(true);
        self.downtime_notify.notify_one();
        // wait for the driver and its workers to drain
        let _gate = self.run_gate.lock().await;
        let already_terminal = {
            let st = self.state.read();
            matches!(
                st.result.status,
                MigrationState::Completed | MigrationState::Aborted
            )
        };
        if !already_terminal {
            self.finish(false, Some(&MigrationError::Aborted("operator abort".into())))
                .await?;
        }
        Ok(())
    }

    fn migration_status(&self) -> MigrationResult {
        self.state.read().result.clone()
    }

    fn are_actor_calls_allowed(&self) -> bool {
        self.state.read().result.status == MigrationState::Completed
    }

    fn is_call_to_be_forwarded(&self) -> bool {
        let st = self.state.read();
        match st.result.status {
            MigrationState::Completed => false,
            MigrationState::None | MigrationState::Aborted => true,
            MigrationState::InProgress => st.result.current_phase < MigrationPhase::Downtime,
        }
    }

    fn ensure_actor_calls_allowed(&self) -> Result<()> {
        if self.are_actor_calls_allowed() || self.is_call_to_be_forwarded() {
            Ok(())
        } else {
            Err(MigrationError::CallsDisallowed)
        }
    }

    fn register_completion_callback(&self, callback: CompletionCallback) {
        let terminal = {
            let st = self.state.read();
            match st.result.status {
                MigrationState::Completed => Some(true),
                MigrationState::Aborted => Some(false),
                _ => None,
            }
        };
        match terminal {
            Some(succeeded) => callback(succeeded),
            None => self.callbacks.lock().push(callback),
        }
    }
}

struct SourceState {
    result: MigrationResult,
    fenced: bool,
}

/// Source-side orchestrator: write fencing and traffic gating.
///
/// Phase execution happens on the target side. The source side mirrors the
/// run far enough to answer gating queries and to fence its local store when
/// downtime begins.
pub struct SourceOrchestrator {
    settings: Arc<MigrationSettings>,
    store: Arc<dyn MigrationStore>,
    telemetry: Arc<dyn Telemetry>,
    state: RwLock<SourceState>,
    callbacks: Mutex<Vec<CompletionCallback>>,
}

impl SourceOrchestrator {
    /// Create a source orchestrator over the injected collaborators
    pub fn new(deps: OrchestratorDeps) -> Self {
        SourceOrchestrator {
            settings: deps.settings,
            store: deps.store,
            telemetry: deps.telemetry,
            state: RwLock::new(SourceState {
                result: MigrationResult::new(),
                fenced: false,
            }),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Record that cutover finished and the target is now authoritative.
    ///
    /// Invoked by the host once the target side reports `Completed`. The
    /// write fence stays up, all future traffic belongs to the target.
    pub fn complete_cutover(&self) {
        {
            let mut st = self.state.write();
            st.result.status = MigrationState::Completed;
            st.result.current_phase = MigrationPhase::Completed;
            st.result.end_time = Some(Utc::now());
        }
        let callbacks: Vec<CompletionCallback> = self.callbacks.lock().drain(..).collect();
        for callback in callbacks {
            callback(true);
        }
    }
}

#[async_trait]
impl Orchestrator for SourceOrchestrator {
    fn side(&self) -> ServiceSide {
        ServiceSide::Source
    }

    async fn start_migration(&self, user_triggered: bool) -> Result<MigrationResult> {
        if self.settings.mode == MigrationMode::Manual && !user_triggered {
            return Ok(self.migration_status());
        }
        let mut st = self.state.write();
        if st.result.status == MigrationState::None {
            st.result.status = MigrationState::InProgress;
            st.result.start_time = Some(Utc::now());
            self.telemetry
                .migration_started(ServiceSide::Source, self.settings.mode);
        }
        Ok(st.result.clone())
    }

    async fn try_resume_migration(&self) -> Result<bool> {
        // the source holds no checkpoints, nothing to resume
        Ok(false)
    }

    async fn start_downtime(&self, user_triggered: bool) -> Result<()> {
        if !user_triggered
            && matches!(
                self.settings.mode,
                MigrationMode::Manual | MigrationMode::ManualDowntime
            )
        {
            return Err(MigrationError::InvalidOperation(
                "downtime requires an explicit trigger in manual modes".into(),
            ));
        }
        self.store.reject_writes().await?;
        let mut st = self.state.write();
        st.fenced = true;
        st.result.status = MigrationState::InProgress;
        st.result.current_phase = MigrationPhase::Downtime;
        log::info!("source writes fenced for migration downtime");
        Ok(())
    }

    async fn abort_migration(&self) -> Result<()> {
        self.store.resume_writes().await?;
        {
            let mut st = self.state.write();
            st.fenced = false;
            st.result.status = MigrationState::Aborted;
            st.result.end_time = Some(Utc::now());
        }
        self.telemetry.migration_aborted("aborted on source side");
        let callbacks: Vec<CompletionCallback> = self.callbacks.lock().drain(..).collect();
        for callback in callbacks {
            callback(false);
        }
        Ok(())
    }

    fn migration_status(&self) -> MigrationResult {
        self.state.read().result.clone()
    }

    fn are_actor_calls_allowed(&self) -> bool {
        let st = self.state.read();
        match st.result.status {
            MigrationState::Completed => false,
            MigrationState::Aborted => true,
            _ => !st.fenced,
        }
    }

    fn is_call_to_be_forwarded(&self) -> bool {
        self.state.read().result.status == MigrationState::Completed
    }

    fn ensure_actor_calls_allowed(&self) -> Result<()> {
        if self.are_actor_calls_allowed() || self.is_call_to_be_forwarded() {
            Ok(())
        } else {
            Err(MigrationError::CallsDisallowed)
        }
    }

    fn register_completion_callback(&self, callback: CompletionCallback) {
        let terminal = {
            let st = self.state.read();
            match st.result.status {
                MigrationState::Completed => Some(true),
                MigrationState::Aborted => Some(false),
                _ => None,
            }
        };
        match terminal {
            Some(succeeded) => callback(succeeded),
            None => self.callbacks.lock().push(callback),
        }
    }
}
