//! Sequence-ordered enumeration surface of the source service.
//!
//! The engine consumes the legacy store through this trait only. Transport,
//! wire framing and proxy generation live outside the engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{MigrationItem, SequenceRange};

/// One paged enumeration request against the source store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumerationRequest {
    /// First sequence number to enumerate, inclusive
    pub start_sequence_number: i64,
    /// Last sequence number to enumerate, inclusive
    pub end_sequence_number: i64,
    /// Maximum chunks returned by this call
    pub chunks: u32,
    /// Maximum key-value pairs per chunk
    pub items_per_chunk: u32,
}

impl EnumerationRequest {
    /// Build a request covering `range` with the given chunking limits
    pub fn over(range: SequenceRange, chunks: u32, items_per_chunk: u32) -> Self {
        EnumerationRequest {
            start_sequence_number: range.start,
            end_sequence_number: range.end,
            chunks,
            items_per_chunk,
        }
    }
}

/// One chunk of sequence-ordered items.
///
/// `last_sequence_number` is the checkpoint boundary. Applying the chunk and
/// committing that boundary must happen before the next chunk is requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyChunk {
    /// Items in ascending sequence-number order
    pub items: Vec<MigrationItem>,
    /// Highest sequence number contained in this chunk
    pub last_sequence_number: i64,
}

impl KeyChunk {
    /// Build a chunk from sequence-ordered items
    pub fn new(items: Vec<MigrationItem>) -> Self {
        let last_sequence_number = items.iter().map(|i| i.version).max().unwrap_or(0);
        KeyChunk {
            items,
            last_sequence_number,
        }
    }
}

/// Result of one enumeration call, up to the requested number of chunks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumerationBatch {
    /// Returned chunks in ascending sequence-number order
    pub chunks: Vec<KeyChunk>,
    /// Whether the requested end sequence number was reached
    pub end_sequence_number_reached: bool,
}

impl EnumerationBatch {
    /// Batch carrying no items with the end-reached signal set
    pub fn end_reached() -> Self {
        EnumerationBatch {
            chunks: Vec::new(),
            end_sequence_number_reached: true,
        }
    }

    /// Whether the batch carries no items
    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(|c| c.items.is_empty())
    }

    /// Highest sequence number carried by the batch, if any
    pub fn last_sequence_number(&self) -> Option<i64> {
        self.chunks
            .iter()
            .filter(|c| !c.items.is_empty())
            .map(|c| c.last_sequence_number)
            .max()
    }
}

/// Sequence-ordered reader over the source store.
///
/// Implementations wrap the remote RPC surface of the legacy service. All
/// calls may fail transiently and are retried by the engine.
#[async_trait]
pub trait SequenceReader: Send + Sync {
    /// First sequence number retained by the source store
    async fn get_first_sequence_number(&self) -> Result<i64>;

    /// Last sequence number written to the source store
    async fn get_last_sequence_number(&self) -> Result<i64>;

    /// Enumerate key-value mutations over a sequence-number range
    async fn enumerate_by_sequence_number(
        &self,
        request: EnumerationRequest,
    ) -> Result<EnumerationBatch>;

    /// Enumerate keys and tombstones for validation over a range
    async fn enumerate_keys_and_tombstones(
        &self,
        request: EnumerationRequest,
    ) -> Result<EnumerationBatch>;

    /// Abort in-flight transactions and fence new writes on the source
    async fn try_abort_existing_transactions_and_reject_writes(&self) -> Result<()>;

    /// Lift the write fence on the source
    async fn resume_writes(&self) -> Result<()>;
}
