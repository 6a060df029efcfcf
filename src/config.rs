//! Engine configuration

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::*;

/// Reconciliation engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of records processed concurrently by a bulk operation.
    pub bulk_concurrency: usize,

    /// Attempts per record in a bulk operation before reporting a failure.
    pub bulk_max_attempts: u32,

    /// Pause between attempts on the same record (in milliseconds).
    pub retry_backoff_ms: u64,

    /// Whether closed records may be reopened back to `confirmado`.
    pub allow_reopen: bool,

    /// Absolute difference still classified as balanced.
    pub diff_tolerance: BigDecimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bulk_concurrency: 4,
            bulk_max_attempts: 3,
            retry_backoff_ms: 50,
            allow_reopen: false,
            diff_tolerance: BigDecimal::from(0),
        }
    }
}

impl EngineConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn validate(&self) -> ReconciliationResult<()> {
        if self.bulk_concurrency == 0 {
            return Err(ReconciliationError::Validation(
                "bulk_concurrency must be at least 1".to_string(),
            ));
        }

        if self.bulk_max_attempts == 0 {
            return Err(ReconciliationError::Validation(
                "bulk_max_attempts must be at least 1".to_string(),
            ));
        }

        if self.diff_tolerance < BigDecimal::from(0) {
            return Err(ReconciliationError::Validation(
                "diff_tolerance cannot be negative".to_string(),
            ));
        }

        Ok(())
    }
}
