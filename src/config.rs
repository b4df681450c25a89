//! Kernel configuration
//!
//! Plain structs with defaults; both deserialize from any serde format with
//! missing fields taking their default values.

use crate::error::{KernelError, KernelResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default timeout for bounded transactions, in milliseconds
pub const BOUNDED_TIMEOUT_DEFAULT_MS: u64 = 100;

/// Default timeout for unbounded transactions (no limit)
pub const UNBOUNDED_TIMEOUT_DEFAULT_MS: u64 = u64::MAX;

/// Default number of finished access details kept by the access coordinator
pub const BACKLOG_SIZE_DEFAULT: usize = 256;

/// Configuration for the transaction coordinator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionCoordinatorConfig {
    /// Timeout for ordinary transactions
    pub timeout_ms: u64,
    /// Timeout for administrative / long-running transactions
    pub unbounded_timeout_ms: u64,
    /// Always use separate prepare and commit, even for the last participant
    pub disable_prepare_and_commit_opt: bool,
}

impl Default for TransactionCoordinatorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: BOUNDED_TIMEOUT_DEFAULT_MS,
            unbounded_timeout_ms: UNBOUNDED_TIMEOUT_DEFAULT_MS,
            disable_prepare_and_commit_opt: false,
        }
    }
}

impl TransactionCoordinatorConfig {
    pub fn validate(&self) -> KernelResult<()> {
        if self.timeout_ms == 0 {
            return Err(KernelError::InvalidConfig(
                "timeout_ms must be greater than 0".into(),
            ));
        }
        if self.unbounded_timeout_ms == 0 {
            return Err(KernelError::InvalidConfig(
                "unbounded_timeout_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn bounded_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn unbounded_timeout(&self) -> Duration {
        Duration::from_millis(self.unbounded_timeout_ms)
    }
}

/// Configuration for the access coordinator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessCoordinatorConfig {
    /// Finished transactions' access details kept for conflict diagnosis
    /// (0 = none)
    pub backlog_size: usize,
    /// Conflict table shard count (0 = table default, else a power of two)
    pub num_shards: usize,
}

impl Default for AccessCoordinatorConfig {
    fn default() -> Self {
        Self {
            backlog_size: BACKLOG_SIZE_DEFAULT,
            num_shards: 0,
        }
    }
}

impl AccessCoordinatorConfig {
    pub fn validate(&self) -> KernelResult<()> {
        if self.num_shards != 0 && (self.num_shards < 2 || !self.num_shards.is_power_of_two()) {
            return Err(KernelError::InvalidConfig(format!(
                "num_shards must be 0 or a power of two greater than 1: {}",
                self.num_shards
            )));
        }
        Ok(())
    }
}
