// Live-traffic routing across both sides of a migration.

use std::sync::Arc;

use bytes::Bytes;
use uuid::Uuid;

use actor_migration::testing::{
    EchoHandler, InMemorySource, LoopbackRemote, NullEventSink, RecordingEventSink,
};
use actor_migration::{
    ActorCall, ActorCallHandler, ActorEvent, EventCallback, EventSubscriptionCache, InMemoryStore,
    MigrationError, MigrationMode, MigrationSettings, NullTelemetry, Orchestrator,
    OrchestratorDeps, RemoteClient, RequestDispatcher, SourceOrchestrator, TargetOrchestrator,
};

fn settings() -> Arc<MigrationSettings> {
    Arc::new(
        MigrationSettings::new()
            .source_service_uri("fabric:/app/kvs")
            .target_service_uri("fabric:/app/rc")
            .mode(MigrationMode::Manual)
            .build()
            .unwrap(),
    )
}

fn deps() -> OrchestratorDeps {
    OrchestratorDeps {
        settings: settings(),
        reader: Arc::new(InMemorySource::new()),
        store: Arc::new(InMemoryStore::new()),
        telemetry: Arc::new(NullTelemetry),
    }
}

struct Side {
    dispatcher: Arc<RequestDispatcher>,
    handler: Arc<EchoHandler>,
    remote: Arc<LoopbackRemote>,
}

fn build_side(orchestrator: Arc<dyn Orchestrator>) -> Side {
    let handler = Arc::new(EchoHandler::new());
    let remote = Arc::new(LoopbackRemote::new());
    let dispatcher = Arc::new(RequestDispatcher::new(
        orchestrator,
        Arc::clone(&handler) as Arc<dyn ActorCallHandler>,
        Arc::clone(&remote) as Arc<dyn RemoteClient>,
        Arc::new(NullEventSink),
        Arc::new(EventSubscriptionCache::new()),
        Arc::new(NullTelemetry),
    ));
    Side {
        dispatcher,
        handler,
        remote,
    }
}

/// Wire a source side and a target side into each other, the topology a real
/// deployment has during migration.
fn build_pair() -> (Side, Arc<SourceOrchestrator>, Side, Arc<TargetOrchestrator>) {
    let source_orchestrator = Arc::new(SourceOrchestrator::new(deps()));
    let target_orchestrator = Arc::new(TargetOrchestrator::new(deps()));
    let source = build_side(Arc::clone(&source_orchestrator) as Arc<dyn Orchestrator>);
    let target = build_side(Arc::clone(&target_orchestrator) as Arc<dyn Orchestrator>);
    source.remote.connect(Arc::clone(&target.dispatcher));
    target.remote.connect(Arc::clone(&source.dispatcher));
    (source, source_orchestrator, target, target_orchestrator)
}

#[tokio::test]
async fn test_target_forwards_to_source_before_migration() {
    let (source, _source_orch, target, _target_orch) = build_pair();

    // a call landing on the target before cutover belongs to the source
    let call = ActorCall::new("MyActor1", 1, 2, Bytes::from_static(b"payload"));
    let response = target.dispatcher.dispatch(call).await.unwrap();

    assert_eq!(response.payload, Bytes::from_static(b"payload"));
    assert_eq!(source.handler.handled(), 1);
    assert_eq!(target.handler.handled(), 0);
}

#[tokio::test]
async fn test_source_serves_locally_before_migration() {
    let (source, _source_orch, _target, _target_orch) = build_pair();
    let call = ActorCall::new("MyActor1", 1, 2, Bytes::from_static(b"payload"));
    let response = source.dispatcher.dispatch(call).await.unwrap();
    assert_eq!(response.payload, Bytes::from_static(b"payload"));
    assert_eq!(source.handler.handled(), 1);
}

#[tokio::test]
async fn test_mutual_forwarding_window_breaks_the_loop() {
    let (source, source_orch, target, _target_orch) = build_pair();

    // the most dangerous window: the source already considers cutover done
    // and forwards to the target, while the target still forwards back
    source_orch.start_migration(true).await.unwrap();
    source_orch.start_downtime(true).await.unwrap();
    source_orch.complete_cutover();

    let call = ActorCall::new("MyActor1", 1, 2, Bytes::from_static(b"payload"));
    let err = source.dispatcher.dispatch(call).await.unwrap_err();

    // the second hop sees the forwarded marker and rejects instead of
    // bouncing forever; the caller retries after downtime
    assert!(matches!(err, MigrationError::CallsDisallowed));
    assert!(err.is_transient());
    assert_eq!(source.handler.handled(), 0);
    assert_eq!(target.handler.handled(), 0);
}

#[tokio::test]
async fn test_downtime_rejection_is_retryable() {
    let (source, source_orch, _target, _target_orch) = build_pair();
    source_orch.start_migration(true).await.unwrap();
    source_orch.start_downtime(true).await.unwrap();

    let call = ActorCall::new("MyActor1", 1, 2, Bytes::from_static(b"payload"));
    let err = source.dispatcher.dispatch(call).await.unwrap_err();
    assert!(matches!(err, MigrationError::CallsDisallowed));
    assert_eq!(source.handler.handled(), 0);
}

#[tokio::test]
async fn test_subscriptions_survive_across_the_boundary() {
    let orchestrator = Arc::new(SourceOrchestrator::new(deps()));
    let handler = Arc::new(EchoHandler::new());
    let remote = Arc::new(LoopbackRemote::new());
    let local_events = Arc::new(RecordingEventSink::new());
    let dispatcher = RequestDispatcher::new(
        orchestrator,
        handler as Arc<dyn ActorCallHandler>,
        remote as Arc<dyn RemoteClient>,
        Arc::clone(&local_events) as Arc<dyn EventCallback>,
        Arc::new(EventSubscriptionCache::new()),
        Arc::new(NullTelemetry),
    );

    let remote_subscriber = Arc::new(RecordingEventSink::new());
    let subscription = Uuid::new_v4();
    dispatcher.subscribe(
        "MyActor1",
        7,
        subscription,
        Arc::clone(&remote_subscriber) as Arc<dyn EventCallback>,
    );

    let event = ActorEvent {
        actor_id: "MyActor1".to_string(),
        interface_id: 7,
        payload: Bytes::from_static(b"event"),
    };
    // events reach both the local manager and the cached remote subscriber
    let delivered = dispatcher.publish_event(event.clone()).await;
    assert_eq!(delivered, 2);
    assert_eq!(local_events.delivered(), 1);
    assert_eq!(remote_subscriber.delivered(), 1);

    assert!(dispatcher.unsubscribe("MyActor1", 7, subscription));
    let delivered = dispatcher.publish_event(event).await;
    assert_eq!(delivered, 1);
    assert_eq!(remote_subscriber.delivered(), 1);
}
