//! Coordinator configuration

use crate::{AccessError, Result};

/// Default transaction timeout in milliseconds, used to derive the lock
/// timeout when neither is configured
pub const DEFAULT_TXN_TIMEOUT: u64 = 100;

/// Proportion of the transaction timeout used as the default lock timeout
pub const DEFAULT_LOCK_TIMEOUT_PROPORTION: f64 = 0.1;

/// Default number of key-map shards
pub const DEFAULT_NUM_KEY_MAPS: usize = 8;

/// Access coordinator configuration.
///
/// Passed at construction; there is no process-wide mutable state.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Transaction timeout in milliseconds, used for the default lock
    /// timeout. The effective wait deadline additionally honors each
    /// transaction's own timeout.
    pub txn_timeout: u64,
    /// Maximum wait for a single lock acquisition in milliseconds; when
    /// unset, a tenth of the transaction timeout with a floor of 1 ms
    pub lock_timeout: Option<u64>,
    /// Number of shards for the key map; controls concurrency
    pub num_key_maps: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            txn_timeout: DEFAULT_TXN_TIMEOUT,
            lock_timeout: None,
            num_key_maps: DEFAULT_NUM_KEY_MAPS,
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the transaction timeout in milliseconds
    pub fn with_txn_timeout(mut self, txn_timeout: u64) -> Self {
        self.txn_timeout = txn_timeout;
        self
    }

    /// Set an explicit lock timeout in milliseconds
    pub fn with_lock_timeout(mut self, lock_timeout: u64) -> Self {
        self.lock_timeout = Some(lock_timeout);
        self
    }

    /// Set the number of key-map shards
    pub fn with_num_key_maps(mut self, num_key_maps: usize) -> Self {
        self.num_key_maps = num_key_maps;
        self
    }

    /// The lock timeout to use, derived from the transaction timeout
    /// when not set explicitly
    pub fn effective_lock_timeout(&self) -> u64 {
        self.lock_timeout
            .unwrap_or_else(|| compute_lock_timeout(self.txn_timeout))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.txn_timeout == 0 {
            return Err(AccessError::InvalidArgument(
                "The transaction timeout must be greater than 0".to_string(),
            ));
        }
        if self.lock_timeout == Some(0) {
            return Err(AccessError::InvalidArgument(
                "The lock timeout must be greater than 0".to_string(),
            ));
        }
        if self.num_key_maps == 0 {
            return Err(AccessError::InvalidArgument(
                "The number of key maps must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// The default lock timeout for a transaction timeout: a tenth of it,
/// never less than 1 ms
fn compute_lock_timeout(txn_timeout: u64) -> u64 {
    ((txn_timeout as f64 * DEFAULT_LOCK_TIMEOUT_PROPORTION) as u64).max(1)
}
