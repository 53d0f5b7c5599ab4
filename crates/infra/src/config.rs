//! Ledger configuration loading and representation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use ledgerlock_accounts::{BackoffStrategy, OverdraftPolicy, RetryPolicy};

use crate::store::StoreOptions;

/// Settings recognised by the store and the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Attempts made by the retrying strategy, the first one included.
    pub max_retry_attempts: u32,
    pub backoff_base_delay: Duration,
    pub backoff: BackoffStrategy,
    /// `None` waits for locks forever.
    pub lock_timeout: Option<Duration>,
    pub deadlock_detection: bool,
    pub overdraft: OverdraftPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            backoff_base_delay: Duration::from_millis(200),
            backoff: BackoffStrategy::Fixed,
            lock_timeout: None,
            deadlock_detection: true,
            overdraft: OverdraftPolicy::Allow,
        }
    }
}

impl LedgerConfig {
    /// Reads `LEDGER_*` environment variables on top of the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, with an arbitrary key lookup.
    ///
    /// Unparsable values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("LEDGER_MAX_RETRY_ATTEMPTS") {
            match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => config.max_retry_attempts = n,
                _ => warn!(value = %raw, "invalid LEDGER_MAX_RETRY_ATTEMPTS; keeping default"),
            }
        }

        if let Some(raw) = lookup("LEDGER_BACKOFF_BASE_MS") {
            match raw.trim().parse::<u64>() {
                Ok(ms) => config.backoff_base_delay = Duration::from_millis(ms),
                Err(_) => warn!(value = %raw, "invalid LEDGER_BACKOFF_BASE_MS; keeping default"),
            }
        }

        if let Some(raw) = lookup("LEDGER_BACKOFF_STRATEGY") {
            match BackoffStrategy::parse(&raw) {
                Some(strategy) => config.backoff = strategy,
                None => warn!(value = %raw, "invalid LEDGER_BACKOFF_STRATEGY; keeping default"),
            }
        }

        if let Some(raw) = lookup("LEDGER_LOCK_TIMEOUT_MS") {
            match raw.trim().parse::<u64>() {
                Ok(0) => config.lock_timeout = None,
                Ok(ms) => config.lock_timeout = Some(Duration::from_millis(ms)),
                Err(_) => warn!(value = %raw, "invalid LEDGER_LOCK_TIMEOUT_MS; keeping default"),
            }
        }

        if let Some(raw) = lookup("LEDGER_DEADLOCK_DETECTION") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "on" => config.deadlock_detection = true,
                "false" | "0" | "off" => config.deadlock_detection = false,
                _ => warn!(value = %raw, "invalid LEDGER_DEADLOCK_DETECTION; keeping default"),
            }
        }

        if let Some(raw) = lookup("LEDGER_OVERDRAFT") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "allow" => config.overdraft = OverdraftPolicy::Allow,
                "reject" => config.overdraft = OverdraftPolicy::Reject,
                _ => warn!(value = %raw, "invalid LEDGER_OVERDRAFT; keeping default"),
            }
        }

        config
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    pub fn with_deadlock_detection(mut self, enabled: bool) -> Self {
        self.deadlock_detection = enabled;
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_retry_attempts = max_attempts;
        self.backoff_base_delay = base_delay;
        self
    }

    pub fn with_overdraft(mut self, overdraft: OverdraftPolicy) -> Self {
        self.overdraft = overdraft;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retry_attempts,
            base_delay: self.backoff_base_delay,
            strategy: self.backoff,
            ..RetryPolicy::default()
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            lock_timeout: self.lock_timeout,
            for_update_timeout: None,
            deadlock_detection: self.deadlock_detection,
        }
    }
}
