//! Target-side migration state store.
//!
//! The engine writes through [`MigrationStore`] only: bulk apply of migrated
//! items, post-migration validation, the durable checkpoint metadata map and
//! the local write fence used on the source side during downtime.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;
use crate::keys::is_internal_key;
use crate::types::MigrationItem;
use crate::validation::{ContentDigest, ContentSummary};

/// Bulk state apply, validation and checkpoint persistence surface
#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// Atomically apply a chunk of migrated items.
    ///
    /// Returns the number of changes written. Tombstones count as writes,
    /// internal marker keys are never applied and contribute zero.
    /// Re-applying an already-applied chunk is idempotent.
    async fn save_state(&self, items: &[MigrationItem]) -> Result<u64>;

    /// Summarize local content and verify it against the expected summary
    async fn validate_post_migration(&self, expected: &ContentSummary) -> Result<()>;

    /// Read the full checkpoint metadata map
    async fn metadata_snapshot(&self) -> Result<HashMap<String, Vec<u8>>>;

    /// Commit a batch of checkpoint metadata entries atomically.
    ///
    /// A concurrent snapshot never observes a partially applied batch.
    async fn metadata_commit(&self, entries: Vec<(String, Vec<u8>)>) -> Result<()>;

    /// Fence user writes on the local store
    async fn reject_writes(&self) -> Result<()>;

    /// Lift the local write fence
    async fn resume_writes(&self) -> Result<()>;

    /// Whether user writes are currently fenced
    fn writes_rejected(&self) -> bool;
}

#[derive(Debug, Clone)]
struct StoredRecord {
    value: Vec<u8>,
    version: i64,
    is_deleted: bool,
}

/// In-memory reference implementation of [`MigrationStore`].
///
/// Backs the integration tests and serves as the behavioral model for real
/// store adapters: latest version wins, checkpoint batches commit atomically.
pub struct InMemoryStore {
    records: RwLock<BTreeMap<String, StoredRecord>>,
    metadata: RwLock<HashMap<String, Vec<u8>>>,
    writes_rejected: AtomicBool,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        InMemoryStore {
            records: RwLock::new(BTreeMap::new()),
            metadata: RwLock::new(HashMap::new()),
            writes_rejected: AtomicBool::new(false),
        }
    }

    /// Read the live value for a key, `None` for absent or tombstoned keys
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let records = self.records.read();
        records
            .get(key)
            .filter(|r| !r.is_deleted)
            .map(|r| r.value.clone())
    }

    /// Whether the key is present as a tombstone
    pub fn is_tombstoned(&self, key: &str) -> bool {
        self.records.read().get(key).map_or(false, |r| r.is_deleted)
    }

    /// Number of keys present, tombstones included
    pub fn key_count(&self) -> usize {
        self.records.read().len()
    }

    /// Summarize the store's current content
    pub fn content_summary(&self) -> ContentSummary {
        let records = self.records.read();
        let mut digest = ContentDigest::new();
        for (key, record) in records.iter() {
            if is_internal_key(key) {
                continue;
            }
            digest.record(key, &record.value, record.is_deleted);
        }
        digest.summarize()
    }

    /// Overwrite a stored value directly, bypassing version checks.
    ///
    /// Test hook for simulating corruption on one side.
    pub fn tamper(&self, key: &str, value: Vec<u8>) {
        if let Some(record) = self.records.write().get_mut(key) {
            record.value = value;
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MigrationStore for InMemoryStore {
    async fn save_state(&self, items: &[MigrationItem]) -> Result<u64> {
        let mut records = self.records.write();
        let mut applied = 0u64;
        for item in items {
            if is_internal_key(&item.key) {
                continue;
            }
            match records.get(&item.key) {
                // stale replay of an older mutation, the newer value stays
                Some(existing) if existing.version > item.version => {}
                _ => {
                    records.insert(
                        item.key.clone(),
                        StoredRecord {
                            value: item.value.clone(),
                            version: item.version,
                            is_deleted: item.is_deleted,
                        },
                    );
                }
            }
            applied += 1;
        }
        Ok(applied)
    }

    async fn validate_post_migration(&self, expected: &ContentSummary) -> Result<()> {
        let found = self.content_summary();
        expected.verify_matches(&found)
    }

    async fn metadata_snapshot(&self) -> Result<HashMap<String, Vec<u8>>> {
        Ok(self.metadata.read().clone())
    }

    async fn metadata_commit(&self, entries: Vec<(String, Vec<u8>)>) -> Result<()> {
        let mut metadata = self.metadata.write();
        for (key, value) in entries {
            metadata.insert(key, value);
        }
        Ok(())
    }

    async fn reject_writes(&self) -> Result<()> {
        self.writes_rejected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume_writes(&self) -> Result<()> {
        self.writes_rejected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn writes_rejected(&self) -> bool {
        self.writes_rejected.load(Ordering::SeqCst)
    }
}
