//! Runtime tunables for the sync service.
//!
//! Persisted per-profile state lives in [`crate::models::SyncPrefs`]; this
//! module only holds knobs chosen by the embedding application.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RESEND_MIN_INTERVAL_SECS: u64 = 60;
/// Legacy cap on records per outbound message
pub const DEFAULT_SEND_BATCH_SIZE: usize = 1000;
const DEFAULT_FETCH_PAGE_SIZE: usize = 1000;
const DEFAULT_BACKOFF_INITIAL_SECS: u64 = 10 * 60;
const DEFAULT_BACKOFF_MAX_SECS: u64 = 80 * 60;

/// Device class; the first segment of every order key minted on this device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Desktop,
    Mobile,
}

impl Platform {
    pub const fn order_prefix(self) -> &'static str {
        match self {
            Self::Desktop => "1",
            Self::Mobile => "2",
        }
    }
}

/// Sync service configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Time between two sync ticks
    pub poll_interval: Duration,
    /// Upper bound on one relay request
    pub fetch_timeout: Duration,
    /// Unconfirmed records are not resent more often than this
    pub resend_min_interval: Duration,
    pub send_batch_size: usize,
    pub fetch_page_size: usize,
    /// First wait after a failed tick
    pub backoff_initial: Duration,
    /// Longest wait between failed ticks
    pub backoff_max: Duration,
    pub platform: Platform,
    /// Hold records whose parent has not arrived under the pending root
    /// instead of falling back to a permanent root
    pub park_orphans: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            resend_min_interval: Duration::from_secs(DEFAULT_RESEND_MIN_INTERVAL_SECS),
            send_batch_size: DEFAULT_SEND_BATCH_SIZE,
            fetch_page_size: DEFAULT_FETCH_PAGE_SIZE,
            backoff_initial: Duration::from_secs(DEFAULT_BACKOFF_INITIAL_SECS),
            backoff_max: Duration::from_secs(DEFAULT_BACKOFF_MAX_SECS),
            platform: Platform::Desktop,
            park_orphans: true,
        }
    }
}

impl SyncConfig {
    /// Set the time between sync ticks
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the relay request timeout
    #[must_use]
    pub const fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_resend_min_interval(mut self, interval: Duration) -> Self {
        self.resend_min_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_send_batch_size(mut self, size: usize) -> Self {
        self.send_batch_size = size;
        self
    }

    #[must_use]
    pub const fn with_fetch_page_size(mut self, size: usize) -> Self {
        self.fetch_page_size = size;
        self
    }

    #[must_use]
    pub const fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff_initial = initial;
        self.backoff_max = max;
        self
    }

    #[must_use]
    pub const fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    #[must_use]
    pub const fn with_park_orphans(mut self, park: bool) -> Self {
        self.park_orphans = park;
        self
    }

    /// Resend interval in milliseconds, saturating
    pub fn resend_min_interval_ms(&self) -> i64 {
        i64::try_from(self.resend_min_interval.as_millis()).unwrap_or(i64::MAX)
    }
}
