//! Bounded retry with exponential backoff for transient remote failures.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use rand::Rng;

use crate::config::RetrySettings;
use crate::error::{MigrationError, Result};

/// Decides which failures are worth retrying.
///
/// Injected at construction so hosts can widen or narrow the transient set
/// without touching the engine.
pub trait FailureClassifier: Send + Sync {
    /// Whether the error is expected to clear on retry
    fn is_transient(&self, error: &MigrationError) -> bool;
}

/// Classifier backed by the error type's own transience taxonomy
pub struct DefaultClassifier;

impl FailureClassifier for DefaultClassifier {
    fn is_transient(&self, error: &MigrationError) -> bool {
        error.is_transient()
    }
}

/// Retry loop with exponential backoff and jitter
#[derive(Clone)]
pub struct RetryPolicy {
    settings: RetrySettings,
    classifier: Arc<dyn FailureClassifier>,
}

impl RetryPolicy {
    /// Create a policy with the default classifier
    pub fn new(settings: RetrySettings) -> Self {
        RetryPolicy {
            settings,
            classifier: Arc::new(DefaultClassifier),
        }
    }

    /// Create a policy with an injected classifier
    pub fn with_classifier(settings: RetrySettings, classifier: Arc<dyn FailureClassifier>) -> Self {
        RetryPolicy {
            settings,
            classifier,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.settings.base_delay.saturating_mul(1 << attempt.min(16));
        let capped = base.min(self.settings.max_delay);
        let jitter_ceiling = (capped.as_millis() as u64 / 2).max(1);
        let jitter = rand::thread_rng().gen_range(0..jitter_ceiling);
        capped + Duration::from_millis(jitter)
    }

    /// Run `op`, retrying transient failures up to the configured attempts.
    ///
    /// Non-transient failures and the final transient failure propagate
    /// unchanged.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err)
                    if attempt + 1 < self.settings.max_attempts
                        && self.classifier.is_transient(&err) =>
                {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "transient failure op={} attempt={} delay_ms={} error={}",
                        label,
                        attempt + 1,
                        delay.as_millis(),
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
