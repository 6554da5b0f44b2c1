//! Runtime configuration for the ledger.
//!
//! Defaults suit a single local database file. The CLI exposes each knob as a
//! flag that also reads an environment variable (`WALLET_MAX_RETRIES`,
//! `WALLET_BUSY_TIMEOUT_MS`, ...).

use std::time::Duration;

/// Knobs for the storage adapter and the conflict-retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// How many times a unit that hit a write conflict is re-run before the
    /// operation gives up.
    pub max_retries: u32,
    /// Pause before retry `n` is `n * retry_backoff`.
    pub retry_backoff: Duration,
    /// How long SQLite waits on a locked database before reporting busy.
    pub busy_timeout: Duration,
    /// Upper bound on pooled SQLite connections.
    pub max_connections: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_backoff: Duration::from_millis(10),
            busy_timeout: Duration::from_secs(5),
            max_connections: 8,
        }
    }
}

impl LedgerConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        // A pool of zero would never hand out a connection
        self.max_connections = max_connections.max(1);
        self
    }

    /// Backoff before the given retry (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_backoff.saturating_mul(attempt)
    }
}
