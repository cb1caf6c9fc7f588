//! Configuration for the migration engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};
use crate::types::MigrationMode;

/// Default number of concurrent workers in the Copy phase
pub const DEFAULT_COPY_PHASE_PARALLELISM: u32 = 4;

/// Default number of chunks requested per enumeration call
pub const DEFAULT_CHUNKS_PER_ENUMERATION: u32 = 16;

/// Default number of key-value pairs per chunk
pub const DEFAULT_KEY_VALUE_PAIRS_PER_CHUNK: u32 = 512;

/// Default maximum sequence-number lag before downtime may begin
pub const DEFAULT_DOWNTIME_THRESHOLD: i64 = 1024;

/// Default maximum attempts for transient remote-call failures
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;

/// Default base delay between retry attempts in milliseconds
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;

/// Default ceiling on the retry delay in milliseconds
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;

/// Backoff settings for transient remote-call failures
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Maximum attempts before the error propagates
    pub max_attempts: u32,
    /// Base delay, doubled on each attempt
    pub base_delay: Duration,
    /// Ceiling on the per-attempt delay
    pub max_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
        }
    }
}

/// Migration settings builder.
///
/// Populated by the host before construction and validated by [`build`].
/// Configuration errors are fatal at startup, the migration never begins.
///
/// [`build`]: MigrationSettings::build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationSettings {
    /// URI of the legacy service being migrated away from
    pub source_service_uri: String,

    /// URI of the new service being migrated onto
    pub target_service_uri: String,

    /// How the run is triggered and gated
    pub mode: MigrationMode,

    /// Number of concurrent workers in the Copy phase
    pub copy_phase_parallelism: u32,

    /// Chunks requested per enumeration call
    pub chunks_per_enumeration: u32,

    /// Key-value pairs per chunk
    pub key_value_pairs_per_chunk: u32,

    /// Maximum sequence-number lag before downtime may begin, inclusive
    pub downtime_threshold: i64,

    /// Backoff settings for transient failures
    pub retry: RetrySettings,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        MigrationSettings {
            source_service_uri: String::new(),
            target_service_uri: String::new(),
            mode: MigrationMode::Auto,
            copy_phase_parallelism: DEFAULT_COPY_PHASE_PARALLELISM,
            chunks_per_enumeration: DEFAULT_CHUNKS_PER_ENUMERATION,
            key_value_pairs_per_chunk: DEFAULT_KEY_VALUE_PAIRS_PER_CHUNK,
            downtime_threshold: DEFAULT_DOWNTIME_THRESHOLD,
            retry: RetrySettings::default(),
        }
    }
}

impl MigrationSettings {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source service URI
    pub fn source_service_uri(mut self, uri: impl Into<String>) -> Self {
        self.source_service_uri = uri.into();
        self
    }

    /// Set the target service URI
    pub fn target_service_uri(mut self, uri: impl Into<String>) -> Self {
        self.target_service_uri = uri.into();
        self
    }

    /// Set the migration mode
    pub fn mode(mut self, mode: MigrationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the Copy phase worker count
    pub fn copy_phase_parallelism(mut self, workers: u32) -> Self {
        self.copy_phase_parallelism = workers;
        self
    }

    /// Set the number of chunks per enumeration call
    pub fn chunks_per_enumeration(mut self, chunks: u32) -> Self {
        self.chunks_per_enumeration = chunks;
        self
    }

    /// Set the number of key-value pairs per chunk
    pub fn key_value_pairs_per_chunk(mut self, pairs: u32) -> Self {
        self.key_value_pairs_per_chunk = pairs;
        self
    }

    /// Set the downtime entry threshold in sequence numbers
    pub fn downtime_threshold(mut self, threshold: i64) -> Self {
        self.downtime_threshold = threshold;
        self
    }

    /// Set the retry settings
    pub fn retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<Self> {
        if self.source_service_uri.is_empty() {
            return Err(MigrationError::Configuration(
                "source service URI must not be empty".to_string(),
            ));
        }
        if self.target_service_uri.is_empty() {
            return Err(MigrationError::Configuration(
                "target service URI must not be empty".to_string(),
            ));
        }
        if self.source_service_uri == self.target_service_uri {
            return Err(MigrationError::Configuration(
                "source and target service URIs must differ".to_string(),
            ));
        }
        if self.copy_phase_parallelism == 0 {
            return Err(MigrationError::Configuration(
                "copy phase parallelism must be at least 1".to_string(),
            ));
        }
        if self.chunks_per_enumeration == 0 || self.key_value_pairs_per_chunk == 0 {
            return Err(MigrationError::Configuration(
                "enumeration chunk sizes must be at least 1".to_string(),
            ));
        }
        if self.downtime_threshold < 0 {
            return Err(MigrationError::Configuration(
                "downtime threshold must not be negative".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(MigrationError::Configuration(
                "retry attempts must be at least 1".to_string(),
            ));
        }
        Ok(self)
    }
}
