// End-to-end migration runs against in-memory source and target stores.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use actor_migration::checkpoint::{
    phase_entries, run_entries, worker_entries, CheckpointStore,
};
use actor_migration::source::{EnumerationBatch, EnumerationRequest, SequenceReader};
use actor_migration::testing::InMemorySource;
use actor_migration::{
    InMemoryStore, MigrationError, MigrationMode, MigrationPhase, MigrationResult, MigrationSettings,
    MigrationState, MigrationStore, NullTelemetry, Orchestrator, OrchestratorDeps,
    OrchestratorRegistry, PhaseResult, Result, SequenceRange, ServiceSide, TargetOrchestrator,
    WorkerResult,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn settings(mode: MigrationMode) -> Arc<MigrationSettings> {
    Arc::new(
        MigrationSettings::new()
            .source_service_uri("fabric:/app/kvs")
            .target_service_uri("fabric:/app/rc")
            .mode(mode)
            .copy_phase_parallelism(3)
            .chunks_per_enumeration(2)
            .key_value_pairs_per_chunk(4)
            .downtime_threshold(2)
            .build()
            .unwrap(),
    )
}

fn orchestrator(
    mode: MigrationMode,
    source: Arc<InMemorySource>,
    store: Arc<InMemoryStore>,
) -> Arc<TargetOrchestrator> {
    Arc::new(TargetOrchestrator::new(OrchestratorDeps {
        settings: settings(mode),
        reader: source,
        store,
        telemetry: Arc::new(NullTelemetry),
    }))
}

fn seed_source(source: &InMemorySource, count: usize) {
    for i in 0..count {
        source.push(format!("String_Actor{}_State", i), vec![i as u8; 8], false);
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within five seconds");
}

#[tokio::test]
async fn test_auto_mode_runs_to_completion() {
    init_logging();
    let source = Arc::new(InMemorySource::new());
    seed_source(&source, 25);
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = orchestrator(MigrationMode::Auto, Arc::clone(&source), Arc::clone(&store));

    let succeeded = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&succeeded);
    orchestrator.register_completion_callback(Box::new(move |ok| {
        flag.store(ok, Ordering::SeqCst);
    }));

    let result = orchestrator.start_migration(false).await.unwrap();

    assert_eq!(result.status, MigrationState::Completed);
    assert_eq!(result.current_phase, MigrationPhase::Completed);
    assert_eq!(result.keys_migrated, 25);
    assert_eq!(store.key_count(), 25);
    assert_eq!(store.content_summary(), source.content_summary());
    assert!(source.writes_rejected());
    assert!(succeeded.load(Ordering::SeqCst));
    assert!(orchestrator.are_actor_calls_allowed());
    assert!(!orchestrator.is_call_to_be_forwarded());

    // copy phase workers partition the full range with no gaps or overlaps
    let copy = result.phase_result(MigrationPhase::Copy).unwrap();
    let mut expected_start = copy.start_seq;
    for worker in &copy.worker_results {
        assert_eq!(worker.start_seq, expected_start);
        expected_start = worker.end_seq + 1;
    }
    assert_eq!(expected_start, copy.end_seq + 1);
}

#[tokio::test]
async fn test_auto_mode_with_tombstones_and_internal_keys() {
    init_logging();
    let source = Arc::new(InMemorySource::new());
    source.push("String_Actor1_State", b"first".to_vec(), false);
    source.push("String_Actor2_State", b"second".to_vec(), false);
    source.push("String_Actor1_State", Vec::new(), true);
    source.push("@@reject_writes", b"marker".to_vec(), false);
    source.push("@@logical_timestamp", b"42".to_vec(), false);
    source.push("String_Actor3_State", b"third".to_vec(), false);

    let store = Arc::new(InMemoryStore::new());
    let orchestrator = orchestrator(MigrationMode::Auto, Arc::clone(&source), Arc::clone(&store));
    let result = orchestrator.start_migration(false).await.unwrap();

    assert_eq!(result.status, MigrationState::Completed);
    // the tombstone propagated and the marker keys never migrated
    assert!(store.is_tombstoned("String_Actor1_State"));
    assert_eq!(store.get("String_Actor2_State").unwrap(), b"second");
    assert_eq!(store.key_count(), 3);
    // four user mutations applied, two marker mutations skipped
    assert_eq!(result.keys_migrated, 4);
}

#[tokio::test]
async fn test_auto_mode_empty_source_completes() {
    init_logging();
    let source = Arc::new(InMemorySource::new());
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = orchestrator(MigrationMode::Auto, source, Arc::clone(&store));
    let result = orchestrator.start_migration(false).await.unwrap();
    assert_eq!(result.status, MigrationState::Completed);
    assert_eq!(result.keys_migrated, 0);
    assert_eq!(store.key_count(), 0);
}

#[tokio::test]
async fn test_manual_mode_holds_until_triggered() {
    init_logging();
    let source = Arc::new(InMemorySource::new());
    seed_source(&source, 10);
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = orchestrator(MigrationMode::Manual, Arc::clone(&source), Arc::clone(&store));

    // activation without a trigger never leaves the initial phase
    let untriggered = orchestrator.start_migration(false).await.unwrap();
    assert_eq!(untriggered.status, MigrationState::None);
    assert_eq!(store.key_count(), 0);

    let driver = Arc::clone(&orchestrator);
    let handle = tokio::spawn(async move { driver.start_migration(true).await });

    // the run converges through Copy and Catchup, then holds for downtime
    {
        let orchestrator = Arc::clone(&orchestrator);
        wait_until(move || {
            let status = orchestrator.migration_status();
            status
                .phase_result(MigrationPhase::Catchup)
                .map(|p| p.status == MigrationState::Completed)
                .unwrap_or(false)
        })
        .await;
    }
    assert!(!source.writes_rejected());
    assert_eq!(
        orchestrator.migration_status().current_phase,
        MigrationPhase::Catchup
    );

    orchestrator.start_downtime(true).await.unwrap();
    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.status, MigrationState::Completed);
    assert_eq!(store.key_count(), 10);
    assert!(source.writes_rejected());
}

#[tokio::test]
async fn test_downtime_requires_converged_catchup() {
    init_logging();
    let source = Arc::new(InMemorySource::new());
    seed_source(&source, 5);
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = orchestrator(MigrationMode::Manual, source, store);

    let err = orchestrator.start_downtime(true).await.unwrap_err();
    assert!(matches!(err, MigrationError::InvalidOperation(_)));
}

#[tokio::test]
async fn test_manual_downtime_copies_writes_landed_while_holding() {
    init_logging();
    let source = Arc::new(InMemorySource::new());
    seed_source(&source, 8);
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = orchestrator(
        MigrationMode::ManualDowntime,
        Arc::clone(&source),
        Arc::clone(&store),
    );

    let driver = Arc::clone(&orchestrator);
    let handle = tokio::spawn(async move { driver.start_migration(false).await });
    {
        let orchestrator = Arc::clone(&orchestrator);
        wait_until(move || {
            orchestrator
                .migration_status()
                .phase_result(MigrationPhase::Catchup)
                .map(|p| p.status == MigrationState::Completed)
                .unwrap_or(false)
        })
        .await;
    }

    // live traffic keeps writing while the operator waits
    source.push("String_Late1_State", b"late".to_vec(), false);
    source.push("String_Late2_State", b"later".to_vec(), false);

    orchestrator.start_downtime(true).await.unwrap();
    let result = handle.await.unwrap().unwrap();

    assert_eq!(result.status, MigrationState::Completed);
    assert_eq!(store.key_count(), 10);
    assert_eq!(store.content_summary(), source.content_summary());
    let downtime = result.phase_result(MigrationPhase::Downtime).unwrap();
    assert_eq!(downtime.keys_migrated, 2);
}

#[tokio::test]
async fn test_abort_while_holding_before_downtime() {
    init_logging();
    let source = Arc::new(InMemorySource::new());
    seed_source(&source, 6);
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = orchestrator(
        MigrationMode::ManualDowntime,
        Arc::clone(&source),
        Arc::clone(&store),
    );

    let outcome = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&outcome);
    orchestrator.register_completion_callback(Box::new(move |ok| {
        *sink.lock() = Some(ok);
    }));

    let driver = Arc::clone(&orchestrator);
    let handle = tokio::spawn(async move { driver.start_migration(false).await });
    {
        let orchestrator = Arc::clone(&orchestrator);
        wait_until(move || {
            orchestrator
                .migration_status()
                .phase_result(MigrationPhase::Catchup)
                .map(|p| p.status == MigrationState::Completed)
                .unwrap_or(false)
        })
        .await;
    }

    orchestrator.abort_migration().await.unwrap();
    let driven = handle.await.unwrap();
    assert!(matches!(driven, Err(MigrationError::Aborted(_))));

    let status = orchestrator.migration_status();
    assert_eq!(status.status, MigrationState::Aborted);
    assert_eq!(*outcome.lock(), Some(false));
    // the source keeps serving after a failed cutover
    assert!(!source.writes_rejected());
    // copied data is not rolled back
    assert_eq!(store.key_count(), 6);
}

#[tokio::test]
async fn test_resume_continues_from_worker_checkpoints() {
    init_logging();
    let source = Arc::new(InMemorySource::new());
    seed_source(&source, 20);
    let store = Arc::new(InMemoryStore::new());

    // stage the aftermath of a replica crash mid-Copy: worker 0 finished
    // [1, 10], worker 1 died after applying sequence number 12 of [11, 20]
    let applied: Vec<_> = source
        .items()
        .into_iter()
        .filter(|item| item.version <= 12)
        .collect();
    store.save_state(&applied).await.unwrap();

    let mut run = MigrationResult::new();
    run.status = MigrationState::InProgress;
    run.current_phase = MigrationPhase::Copy;
    run.start_seq = 1;
    run.end_seq = 20;
    run.last_applied_seq = 10;
    run.start_time = Some(chrono::Utc::now());

    let copy = PhaseResult::new(MigrationPhase::Copy, SequenceRange::new(1, 20), 2);
    let mut w0 = WorkerResult::new(MigrationPhase::Copy, 0, 0, SequenceRange::new(1, 10));
    w0.status = MigrationState::Completed;
    w0.last_applied_seq = 10;
    w0.keys_migrated = 10;
    let mut w1 = WorkerResult::new(MigrationPhase::Copy, 0, 1, SequenceRange::new(11, 20));
    w1.status = MigrationState::InProgress;
    w1.last_applied_seq = 12;
    w1.keys_migrated = 2;

    let checkpoints = CheckpointStore::new(Arc::clone(&store) as Arc<dyn MigrationStore>);
    let mut entries = run_entries(&run);
    entries.extend(phase_entries(&copy));
    entries.extend(worker_entries(&w0));
    entries.extend(worker_entries(&w1));
    checkpoints.commit(entries).await.unwrap();

    let orchestrator = orchestrator(MigrationMode::Auto, Arc::clone(&source), Arc::clone(&store));
    let resumed = orchestrator.try_resume_migration().await.unwrap();
    assert!(resumed);

    let result = orchestrator.migration_status();
    assert_eq!(result.status, MigrationState::Completed);
    assert_eq!(result.keys_migrated, 20);
    assert_eq!(store.key_count(), 20);
    assert_eq!(store.content_summary(), source.content_summary());
    // the surviving worker resumed past its checkpoint, nothing was re-read
    assert_eq!(source.enumerated_from(), Some(13));
}

#[tokio::test]
async fn test_resume_without_prior_run_is_a_fresh_start() {
    init_logging();
    let source = Arc::new(InMemorySource::new());
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = orchestrator(MigrationMode::Auto, source, store);
    let resumed = orchestrator.try_resume_migration().await.unwrap();
    assert!(!resumed);
    assert_eq!(orchestrator.migration_status().status, MigrationState::None);
}

#[tokio::test]
async fn test_validation_mismatch_aborts_the_run() {
    init_logging();
    let source = Arc::new(InMemorySource::new());
    seed_source(&source, 9);
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = orchestrator(
        MigrationMode::ManualDowntime,
        Arc::clone(&source),
        Arc::clone(&store),
    );

    let driver = Arc::clone(&orchestrator);
    let handle = tokio::spawn(async move { driver.start_migration(false).await });
    {
        let orchestrator = Arc::clone(&orchestrator);
        wait_until(move || {
            orchestrator
                .migration_status()
                .phase_result(MigrationPhase::Catchup)
                .map(|p| p.status == MigrationState::Completed)
                .unwrap_or(false)
        })
        .await;
    }

    // corrupt one copied value on the target before validation runs
    store.tamper("String_Actor4_State", b"corrupted".to_vec());
    orchestrator.start_downtime(true).await.unwrap();

    let driven = handle.await.unwrap();
    match driven {
        Err(MigrationError::Validation(msg)) => assert!(msg.contains("digest")),
        other => panic!("expected Validation error, got {:?}", other),
    }
    assert_eq!(orchestrator.migration_status().status, MigrationState::Aborted);
    assert!(!source.writes_rejected());
}

/// Reader wrapper that lands a burst of writes the first time the catch-up
/// loop measures lag, forcing a real catch-up iteration.
struct SpurtSource {
    inner: Arc<InMemorySource>,
    last_seq_calls: AtomicU32,
    spurt: Mutex<Vec<(String, Vec<u8>)>>,
}

impl SpurtSource {
    fn new(inner: Arc<InMemorySource>, spurt: Vec<(String, Vec<u8>)>) -> Self {
        SpurtSource {
            inner,
            last_seq_calls: AtomicU32::new(0),
            spurt: Mutex::new(spurt),
        }
    }
}

#[async_trait]
impl SequenceReader for SpurtSource {
    async fn get_first_sequence_number(&self) -> Result<i64> {
        self.inner.get_first_sequence_number().await
    }

    async fn get_last_sequence_number(&self) -> Result<i64> {
        if self.last_seq_calls.fetch_add(1, Ordering::SeqCst) == 1 {
            for (key, value) in self.spurt.lock().drain(..) {
                self.inner.push(key, value, false);
            }
        }
        self.inner.get_last_sequence_number().await
    }

    async fn enumerate_by_sequence_number(
        &self,
        request: EnumerationRequest,
    ) -> Result<EnumerationBatch> {
        self.inner.enumerate_by_sequence_number(request).await
    }

    async fn enumerate_keys_and_tombstones(
        &self,
        request: EnumerationRequest,
    ) -> Result<EnumerationBatch> {
        self.inner.enumerate_keys_and_tombstones(request).await
    }

    async fn try_abort_existing_transactions_and_reject_writes(&self) -> Result<()> {
        self.inner
            .try_abort_existing_transactions_and_reject_writes()
            .await
    }

    async fn resume_writes(&self) -> Result<()> {
        self.inner.resume_writes().await
    }
}

#[tokio::test]
async fn test_catchup_iterates_over_writes_landed_during_copy() {
    init_logging();
    let inner = Arc::new(InMemorySource::new());
    seed_source(&inner, 10);
    let spurt: Vec<_> = (0..6)
        .map(|i| (format!("String_Spurt{}_State", i), vec![0xAB; 4]))
        .collect();
    let reader = Arc::new(SpurtSource::new(Arc::clone(&inner), spurt));
    let store = Arc::new(InMemoryStore::new());

    let orchestrator = Arc::new(TargetOrchestrator::new(OrchestratorDeps {
        settings: settings(MigrationMode::Auto),
        reader,
        store: Arc::clone(&store) as Arc<dyn MigrationStore>,
        telemetry: Arc::new(NullTelemetry),
    }));
    let result = orchestrator.start_migration(false).await.unwrap();

    assert_eq!(result.status, MigrationState::Completed);
    assert_eq!(result.keys_migrated, 16);
    assert_eq!(store.key_count(), 16);
    let catchup = result.phase_result(MigrationPhase::Catchup).unwrap();
    assert!(catchup.keys_migrated >= 4);
    assert_eq!(catchup.status, MigrationState::Completed);
    // catch-up ranges continue exactly where copy stopped
    let copy = result.phase_result(MigrationPhase::Copy).unwrap();
    assert_eq!(catchup.start_seq, copy.end_seq + 1);
    assert_eq!(store.content_summary(), inner.content_summary());
}

#[tokio::test]
async fn test_factory_builds_both_sides() {
    init_logging();
    let registry = OrchestratorRegistry::with_defaults();
    let deps = OrchestratorDeps {
        settings: settings(MigrationMode::Auto),
        reader: Arc::new(InMemorySource::new()),
        store: Arc::new(InMemoryStore::new()),
        telemetry: Arc::new(NullTelemetry),
    };
    let target = registry.create(ServiceSide::Target, deps.clone()).unwrap();
    let source = registry.create(ServiceSide::Source, deps).unwrap();
    assert_eq!(target.side(), ServiceSide::Target);
    assert_eq!(source.side(), ServiceSide::Source);
    // before any migration, the target forwards and the source serves
    assert!(target.is_call_to_be_forwarded());
    assert!(source.are_actor_calls_allowed());
}

#[tokio::test]
async fn test_status_payload_serializes_for_operators() {
    init_logging();
    let source = Arc::new(InMemorySource::new());
    seed_source(&source, 4);
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = orchestrator(MigrationMode::Auto, source, store);
    let result = orchestrator.start_migration(false).await.unwrap();

    let json = serde_json::to_string(&result).unwrap();
    assert!(json.contains("\"status\":\"Completed\""));
    assert!(json.contains("\"current_phase\":\"Completed\""));
    assert!(json.contains("\"phase_results\""));
}
