//! In-memory doubles shared by unit and integration tests.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use crate::error::{MigrationError, Result};
use crate::events::{ActorEvent, EventCallback};
use crate::forwarding::{ActorCall, ActorCallHandler, ActorCallResponse, RemoteClient, RequestDispatcher};
use crate::source::{EnumerationBatch, EnumerationRequest, KeyChunk, SequenceReader};
use crate::types::MigrationItem;
use crate::validation::{summarize_items, ContentSummary};

/// In-memory sequence-ordered source store.
///
/// Sequence numbers start at 1 and every pushed mutation gets the next one.
pub struct InMemorySource {
    records: RwLock<Vec<MigrationItem>>,
    next_seq: AtomicI64,
    rejecting: AtomicBool,
    first_enumerated: Mutex<Option<i64>>,
    fail_enumerations: AtomicU32,
}

impl InMemorySource {
    /// Create an empty source
    pub fn new() -> Self {
        InMemorySource {
            records: RwLock::new(Vec::new()),
            next_seq: AtomicI64::new(1),
            rejecting: AtomicBool::new(false),
            first_enumerated: Mutex::new(None),
            fail_enumerations: AtomicU32::new(0),
        }
    }

    /// Append one mutation, returning its assigned sequence number
    pub fn push(&self, key: impl Into<String>, value: Vec<u8>, is_deleted: bool) -> i64 {
        let version = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let item = MigrationItem {
            key: key.into(),
            value: if is_deleted { Vec::new() } else { value },
            version,
            is_deleted,
        };
        self.records.write().push(item);
        version
    }

    /// Snapshot of every recorded mutation
    pub fn items(&self) -> Vec<MigrationItem> {
        self.records.read().clone()
    }

    /// Content summary over the source's final key states
    pub fn content_summary(&self) -> ContentSummary {
        summarize_items(self.records.read().iter())
    }

    /// Highest assigned sequence number, 0 when empty
    pub fn last_seq(&self) -> i64 {
        self.next_seq.load(Ordering::SeqCst) - 1
    }

    /// First start sequence number any enumeration asked for
    pub fn enumerated_from(&self) -> Option<i64> {
        *self.first_enumerated.lock()
    }

    /// Fail the next `n` enumeration calls with a timeout
    pub fn fail_next_enumerations(&self, n: u32) {
        self.fail_enumerations.store(n, Ordering::SeqCst);
    }

    /// Whether the write fence is up
    pub fn writes_rejected(&self) -> bool {
        self.rejecting.load(Ordering::SeqCst)
    }

    fn enumerate(&self, request: &EnumerationRequest) -> Result<EnumerationBatch> {
        if self
            .fail_enumerations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(MigrationError::Timeout("simulated enumeration timeout".into()));
        }
        {
            let mut first = self.first_enumerated.lock();
            if first.is_none() {
                *first = Some(request.start_sequence_number);
            }
        }
        let records = self.records.read();
        let mut in_range: Vec<MigrationItem> = records
            .iter()
            .filter(|item| {
                item.version >= request.start_sequence_number
                    && item.version <= request.end_sequence_number
            })
            .cloned()
            .collect();
        in_range.sort_by_key(|item| item.version);

        let limit = (request.chunks as usize) * (request.items_per_chunk as usize);
        let taken: Vec<MigrationItem> = in_range.iter().take(limit).cloned().collect();
        let last_taken = taken.last().map(|item| item.version);
        let end_reached = match last_taken {
            Some(last) => !in_range.iter().any(|item| item.version > last),
            None => true,
        };
        let chunks = taken
            .chunks(request.items_per_chunk as usize)
            .map(|items| KeyChunk::new(items.to_vec()))
            .collect();
        Ok(EnumerationBatch {
            chunks,
            end_sequence_number_reached: end_reached,
        })
    }
}

impl Default for InMemorySource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SequenceReader for InMemorySource {
    async fn get_first_sequence_number(&self) -> Result<i64> {
        let records = self.records.read();
        Ok(records.iter().map(|item| item.version).min().unwrap_or(1))
    }

    async fn get_last_sequence_number(&self) -> Result<i64> {
        Ok(self.last_seq())
    }

    async fn enumerate_by_sequence_number(
        &self,
        request: EnumerationRequest,
    ) -> Result<EnumerationBatch> {
        self.enumerate(&request)
    }

    async fn enumerate_keys_and_tombstones(
        &self,
        request: EnumerationRequest,
    ) -> Result<EnumerationBatch> {
        self.enumerate(&request)
    }

    async fn try_abort_existing_transactions_and_reject_writes(&self) -> Result<()> {
        self.rejecting.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume_writes(&self) -> Result<()> {
        self.rejecting.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Local handler that echoes the request payload and counts calls
pub struct EchoHandler {
    handled: AtomicUsize,
}

impl EchoHandler {
    /// Create a handler with a zero call count
    pub fn new() -> Self {
        EchoHandler {
            handled: AtomicUsize::new(0),
        }
    }

    /// Number of calls served locally
    pub fn handled(&self) -> usize {
        self.handled.load(Ordering::SeqCst)
    }
}

impl Default for EchoHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActorCallHandler for EchoHandler {
    async fn handle(&self, call: ActorCall) -> Result<ActorCallResponse> {
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(ActorCallResponse {
            payload: call.payload,
        })
    }
}

/// Remote client that records forwarded calls and echoes their payload
pub struct RecordingRemote {
    calls: Mutex<Vec<ActorCall>>,
}

impl RecordingRemote {
    /// Create a remote with no recorded calls
    pub fn new() -> Self {
        RecordingRemote {
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Number of calls forwarded to this remote
    pub fn forwarded(&self) -> usize {
        self.calls.lock().len()
    }

    /// The most recent forwarded call
    pub fn last_call(&self) -> Option<ActorCall> {
        self.calls.lock().last().cloned()
    }
}

impl Default for RecordingRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteClient for RecordingRemote {
    async fn forward(&self, call: ActorCall) -> Result<ActorCallResponse> {
        let payload = call.payload.clone();
        self.calls.lock().push(call);
        Ok(ActorCallResponse { payload })
    }
}

/// Remote client that hands forwarded calls to another dispatcher.
///
/// Wires two dispatchers into the mutual-forwarding topology that exists
/// during cutover, which is what the loop-prevention marker guards against.
pub struct LoopbackRemote {
    peer: Mutex<Option<Arc<RequestDispatcher>>>,
}

impl LoopbackRemote {
    /// Create a disconnected remote
    pub fn new() -> Self {
        LoopbackRemote {
            peer: Mutex::new(None),
        }
    }

    /// Connect the peer dispatcher forwarded calls are delivered to
    pub fn connect(&self, peer: Arc<RequestDispatcher>) {
        *self.peer.lock() = Some(peer);
    }
}

impl Default for LoopbackRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteClient for LoopbackRemote {
    async fn forward(&self, call: ActorCall) -> Result<ActorCallResponse> {
        let peer = self
            .peer
            .lock()
            .clone()
            .ok_or_else(|| MigrationError::EndpointNotFound("peer dispatcher not connected".into()))?;
        peer.dispatch(call).await
    }
}

/// Event sink that drops every delivery
pub struct NullEventSink;

#[async_trait]
impl EventCallback for NullEventSink {
    async fn deliver(&self, _event: ActorEvent) -> Result<()> {
        Ok(())
    }
}

/// Event sink that records every delivered event
pub struct RecordingEventSink {
    events: Mutex<Vec<ActorEvent>>,
}

impl RecordingEventSink {
    /// Create an empty sink
    pub fn new() -> Self {
        RecordingEventSink {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Number of events delivered so far
    pub fn delivered(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for RecordingEventSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventCallback for RecordingEventSink {
    async fn deliver(&self, event: ActorEvent) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}
