//! Live state migration engine for partitioned, replicated actor services.
//!
//! Moves persisted actor state from a legacy key-value store to a new
//! log-structured collection store while the service keeps serving traffic.
//! The engine owns the phase state machine (Copy, Catchup, Downtime,
//! DataValidation), a checkpointed parallel copy pipeline, content-digest
//! validation and the request-forwarding layer that hands live traffic off
//! at cutover. Transports, wire framing and the actor runtime itself stay
//! outside and are consumed through narrow traits.

#![deny(rust_2018_idioms, nonstandard_style, future_incompatible)]
#![warn(missing_docs)]

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod events;
pub mod forwarding;
pub mod keys;
pub mod orchestrator;
pub mod resolver;
pub mod retry;
pub mod source;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod validation;
pub mod worker;
pub mod workload;

#[doc(hidden)]
pub mod testing;

pub use config::{MigrationSettings, RetrySettings};
pub use error::{ErrorResponse, MigrationError, Result};
pub use events::{ActorEvent, EventCallback, EventSubscriptionCache};
pub use forwarding::{
    ActorCall, ActorCallHandler, ActorCallResponse, RemoteClient, RequestDispatcher,
};
pub use orchestrator::{
    CompletionCallback, Orchestrator, OrchestratorDeps, OrchestratorRegistry, SourceOrchestrator,
    TargetOrchestrator,
};
pub use resolver::{ActorIdResolver, KeyResolver, ResolvedKey};
pub use retry::{DefaultClassifier, FailureClassifier, RetryPolicy};
pub use source::{EnumerationBatch, EnumerationRequest, KeyChunk, SequenceReader};
pub use store::{InMemoryStore, MigrationStore};
pub use telemetry::{LogTelemetry, NullTelemetry, Telemetry};
pub use types::{
    MigrationItem, MigrationMode, MigrationPhase, MigrationResult, MigrationState, PhaseResult,
    SequenceRange, ServiceSide, WorkerResult,
};
pub use validation::{ContentDigest, ContentSummary};

/// Commonly used engine types
pub mod prelude {
    pub use crate::{
        ActorCall, ActorCallHandler, ActorCallResponse, EventSubscriptionCache, KeyResolver,
        MigrationError, MigrationItem, MigrationMode, MigrationPhase, MigrationResult,
        MigrationSettings, MigrationState, MigrationStore, Orchestrator, OrchestratorDeps,
        OrchestratorRegistry, RequestDispatcher, SequenceRange, SequenceReader, ServiceSide,
    };
}
