//! Post-migration data validation.
//!
//! Both sides summarize their migrated key set into an order-independent
//! content digest. Keys are folded in canonical ascending order, live values
//! contribute their bytes, tombstones contribute presence only. A mismatch
//! on digest or counts is fatal and aborts the run.

use std::collections::BTreeMap;

use crc::{Crc, CRC_64_XZ};
use serde::{Deserialize, Serialize};

use crate::config::MigrationSettings;
use crate::error::{MigrationError, Result};
use crate::keys::is_internal_key;
use crate::retry::RetryPolicy;
use crate::source::{EnumerationRequest, SequenceReader};
use crate::types::{MigrationItem, SequenceRange};

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// Content summary of one side's migrated key set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSummary {
    /// CRC-64 over keys and live value bytes in canonical key order
    pub digest: u64,
    /// Number of distinct keys, tombstones included
    pub key_count: u64,
    /// Number of tombstoned keys
    pub tombstone_count: u64,
}

impl ContentSummary {
    /// Compare two summaries, reporting the first mismatch as a fatal error
    pub fn verify_matches(&self, other: &ContentSummary) -> Result<()> {
        if self.key_count != other.key_count {
            return Err(MigrationError::Validation(format!(
                "key count mismatch: expected {}, found {}",
                self.key_count, other.key_count
            )));
        }
        if self.tombstone_count != other.tombstone_count {
            return Err(MigrationError::Validation(format!(
                "tombstone count mismatch: expected {}, found {}",
                self.tombstone_count, other.tombstone_count
            )));
        }
        if self.digest != other.digest {
            return Err(MigrationError::Validation(format!(
                "content digest mismatch: expected {:#018x}, found {:#018x}",
                self.digest, other.digest
            )));
        }
        Ok(())
    }
}

/// Accumulator for a content summary.
///
/// Items must be recorded in ascending key order with one record per key.
pub struct ContentDigest {
    digest: crc::Digest<'static, u64>,
    key_count: u64,
    tombstone_count: u64,
}

impl ContentDigest {
    /// Create an empty accumulator
    pub fn new() -> Self {
        ContentDigest {
            digest: CRC64.digest(),
            key_count: 0,
            tombstone_count: 0,
        }
    }

    /// Fold one key's final state into the digest
    pub fn record(&mut self, key: &str, value: &[u8], is_deleted: bool) {
        self.digest.update(key.as_bytes());
        if is_deleted {
            self.tombstone_count += 1;
        } else {
            self.digest.update(value);
        }
        self.key_count += 1;
    }

    /// Finish and produce the summary
    pub fn summarize(self) -> ContentSummary {
        ContentSummary {
            digest: self.digest.finalize(),
            key_count: self.key_count,
            tombstone_count: self.tombstone_count,
        }
    }
}

impl Default for ContentDigest {
    fn default() -> Self {
        Self::new()
    }
}

/// Summarize a set of items, keeping only each key's latest version.
///
/// Internal marker keys never participate in validation.
pub fn summarize_items<'a, I>(items: I) -> ContentSummary
where
    I: IntoIterator<Item = &'a MigrationItem>,
{
    let mut latest: BTreeMap<&str, &MigrationItem> = BTreeMap::new();
    for item in items {
        if is_internal_key(&item.key) {
            continue;
        }
        match latest.get(item.key.as_str()) {
            Some(existing) if existing.version >= item.version => {}
            _ => {
                latest.insert(&item.key, item);
            }
        }
    }
    let mut digest = ContentDigest::new();
    for item in latest.values() {
        digest.record(&item.key, &item.value, item.is_deleted);
    }
    digest.summarize()
}

/// Stream the source's migrated key set and summarize it.
///
/// Pages through `enumerate_keys_and_tombstones` over the full migrated
/// range, retrying each page against transient failures.
pub async fn source_content_summary(
    reader: &dyn SequenceReader,
    range: SequenceRange,
    settings: &MigrationSettings,
    retry: &RetryPolicy,
) -> Result<ContentSummary> {
    let mut collected: Vec<MigrationItem> = Vec::new();
    let mut next = range.start;
    while next <= range.end {
        let request = EnumerationRequest {
            start_sequence_number: next,
            end_sequence_number: range.end,
            chunks: settings.chunks_per_enumeration,
            items_per_chunk: settings.key_value_pairs_per_chunk,
        };
        let batch = retry
            .run("enumerate keys and tombstones", || {
                let request = request.clone();
                async move { reader.enumerate_keys_and_tombstones(request).await }
            })
            .await?;
        match batch.last_sequence_number() {
            Some(last) => {
                for chunk in batch.chunks {
                    collected.extend(chunk.items);
                }
                next = last + 1;
            }
            None => break,
        }
        if batch.end_sequence_number_reached {
            break;
        }
    }
    Ok(summarize_items(collected.iter()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_items() -> Vec<MigrationItem> {
        (0..10)
            .map(|i| MigrationItem::new(format!("String_Actor{}_State", i), vec![i as u8; 4], i))
            .collect()
    }

    #[test]
    fn test_identical_sets_match() {
        let items = sample_items();
        let a = summarize_items(items.iter());
        let b = summarize_items(items.iter());
        assert_eq!(a, b);
        assert!(a.verify_matches(&b).is_ok());
        assert_eq!(a.key_count, 10);
    }

    #[test]
    fn test_order_independent() {
        let items = sample_items();
        let mut reversed = items.clone();
        reversed.reverse();
        assert_eq!(summarize_items(items.iter()), summarize_items(reversed.iter()));
    }

    #[test]
    fn test_single_mutated_byte_detected() {
        let items = sample_items();
        let mut tampered = items.clone();
        tampered[3].value[0] ^= 0x01;
        let expected = summarize_items(items.iter());
        let found = summarize_items(tampered.iter());
        let err = expected.verify_matches(&found).unwrap_err();
        assert!(matches!(err, MigrationError::Validation(_)));
    }

    #[test]
    fn test_missing_key_detected() {
        let items = sample_items();
        let mut short = items.clone();
        short.pop();
        let err = summarize_items(items.iter())
            .verify_matches(&summarize_items(short.iter()))
            .unwrap_err();
        match err {
            MigrationError::Validation(msg) => assert!(msg.contains("key count")),
            other => panic!("expected Validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_tombstone_presence_counted_without_value_bytes() {
        let live = vec![MigrationItem::new("String_A_S", b"payload".to_vec(), 1)];
        let dead = vec![MigrationItem::tombstone("String_A_S", 2)];
        let live_summary = summarize_items(live.iter());
        let dead_summary = summarize_items(dead.iter());
        // same presence, different digest and tombstone count
        assert_eq!(live_summary.key_count, dead_summary.key_count);
        assert_eq!(dead_summary.tombstone_count, 1);
        assert_ne!(live_summary.digest, dead_summary.digest);
    }

    #[test]
    fn test_latest_version_wins() {
        let items = vec![
            MigrationItem::new("String_A_S", b"old".to_vec(), 1),
            MigrationItem::new("String_A_S", b"new".to_vec(), 5),
        ];
        let only_new = vec![MigrationItem::new("String_A_S", b"new".to_vec(), 5)];
        assert_eq!(summarize_items(items.iter()), summarize_items(only_new.iter()));
    }

    #[test]
    fn test_internal_keys_excluded() {
        let items = vec![
            MigrationItem::new("String_A_S", b"v".to_vec(), 1),
            MigrationItem::new(crate::keys::WRITE_REJECTION_MARKER_KEY, b"x".to_vec(), 2),
        ];
        assert_eq!(summarize_items(items.iter()).key_count, 1);
    }
}
