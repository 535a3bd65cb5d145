//! Configuration for the sync engine.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use zonesync_protocol::{ConflictPolicy, Snapshot};

/// Picks the winner of a conflict: `(client, server) -> winner`.
pub type ConflictCallback = Arc<dyn Fn(&Snapshot, &Snapshot) -> Snapshot + Send + Sync>;

/// Default number of extra rounds for records with dangling references.
pub const DEFAULT_MISSING_REFERENCE_RETRY_LIMIT: u32 = 5;

/// Default page size when reading the change log and the remote feed.
pub const DEFAULT_CHANGE_PAGE_SIZE: usize = 50;

/// Configuration for sync passes.
#[derive(Clone)]
pub struct SyncConfig {
    /// Remote zone name.
    pub zone_name: String,
    /// How conflicts are resolved.
    pub conflict_policy: ConflictPolicy,
    /// Callback used by [`ConflictPolicy::CallerDecides`].
    pub conflict_callback: Option<ConflictCallback>,
    /// Extra apply rounds for records whose references are missing.
    pub missing_reference_retry_limit: u32,
    /// Page size for change log and change feed reads.
    pub change_page_size: usize,
    /// Retry configuration for whole passes.
    pub retry: RetryConfig,
    /// Interval for scheduled passes.
    pub sync_interval: Option<Duration>,
    /// Timeout handed to remote calls.
    pub timeout: Duration,
}

impl SyncConfig {
    /// Creates a configuration for a zone.
    pub fn new(zone_name: impl Into<String>) -> Self {
        Self {
            zone_name: zone_name.into(),
            conflict_policy: ConflictPolicy::ServerWins,
            conflict_callback: None,
            missing_reference_retry_limit: DEFAULT_MISSING_REFERENCE_RETRY_LIMIT,
            change_page_size: DEFAULT_CHANGE_PAGE_SIZE,
            retry: RetryConfig::default(),
            sync_interval: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Sets the callback for [`ConflictPolicy::CallerDecides`].
    pub fn with_conflict_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Snapshot, &Snapshot) -> Snapshot + Send + Sync + 'static,
    {
        self.conflict_callback = Some(Arc::new(callback));
        self
    }

    /// Sets the number of extra rounds for dangling references.
    pub fn with_missing_reference_retry_limit(mut self, limit: u32) -> Self {
        self.missing_reference_retry_limit = limit;
        self
    }

    /// Sets the page size. Zero is treated as one.
    pub fn with_change_page_size(mut self, size: usize) -> Self {
        self.change_page_size = size.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the interval for scheduled passes.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Sets the remote call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("zonesync")
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("zone_name", &self.zone_name)
            .field("conflict_policy", &self.conflict_policy)
            .field("conflict_callback", &self.conflict_callback.is_some())
            .field(
                "missing_reference_retry_limit",
                &self.missing_reference_retry_limit,
            )
            .field("change_page_size", &self.change_page_size)
            .field("retry", &self.retry)
            .field("sync_interval", &self.sync_interval)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Configuration for retrying failed passes.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Disables jitter.
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Delay before the given attempt (0-indexed). The first attempt has none.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // up to 25% extra
            Duration::from_secs_f64(capped + capped * 0.25 * jitter_fraction())
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Pseudo-random fraction in `[0, 1)` derived from the clock.
fn jitter_fraction() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_config_defaults() {
        let config = SyncConfig::new("Routes");
        assert_eq!(config.zone_name, "Routes");
        assert_eq!(config.conflict_policy, ConflictPolicy::ServerWins);
        assert_eq!(config.missing_reference_retry_limit, 5);
        assert_eq!(config.change_page_size, 50);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.sync_interval.is_none());
    }

    #[test]
    fn sync_config_builder() {
        let config = SyncConfig::new("Routes")
            .with_conflict_policy(ConflictPolicy::CallerDecides)
            .with_conflict_callback(|client, _server| client.clone())
            .with_missing_reference_retry_limit(2)
            .with_change_page_size(0)
            .with_timeout(Duration::from_secs(5));

        assert_eq!(config.conflict_policy, ConflictPolicy::CallerDecides);
        assert!(config.conflict_callback.is_some());
        assert_eq!(config.missing_reference_retry_limit, 2);
        assert_eq!(config.change_page_size, 1);
        assert!(format!("{config:?}").contains("conflict_callback: true"));
    }

    #[test]
    fn retry_config_no_retry() {
        assert_eq!(RetryConfig::no_retry().max_attempts, 1);
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        let delay3 = config.without_jitter().delay_for_attempt(3);
        assert_eq!(delay3, Duration::from_millis(400));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        assert!(config.delay_for_attempt(5) <= Duration::from_millis(6250));
    }
}
