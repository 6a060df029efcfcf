//! Traits for storage abstraction and the external collaborators

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::types::*;

/// Storage abstraction for reconciliation records
///
/// Implementations persist one record per `(company_id, date)` and enforce
/// optimistic versioning: every successful write bumps `version` by one.
/// Records are never deleted. Backend failures are reported as
/// `ReconciliationError::UpstreamUnavailable`.
#[async_trait]
pub trait ReconciliationStorage: Send + Sync {
    /// Get a record by key
    async fn get(&self, key: &ReconciliationKey) -> ReconciliationResult<Option<ReconciliationRecord>>;

    /// Store a new record with version 1, failing with `Conflict` if the key exists
    async fn insert(&self, record: &ReconciliationRecord)
        -> ReconciliationResult<ReconciliationRecord>;

    /// Replace a record if its stored version still equals `expected_version`
    ///
    /// Returns the stored record carrying `expected_version + 1`.
    async fn put(
        &self,
        record: &ReconciliationRecord,
        expected_version: u64,
    ) -> ReconciliationResult<ReconciliationRecord>;

    /// All records stored for a date
    async fn list_by_date(&self, date: NaiveDate) -> ReconciliationResult<Vec<ReconciliationRecord>>;
}

/// Source of truth for the pagaduria and tesoreria subtotals
#[async_trait]
pub trait TotalsAggregator: Send + Sync {
    async fn get_totals(&self, company_id: &str, date: NaiveDate) -> ReconciliationResult<Totals>;
}

/// Enumerates the companies that take part in a day's reconciliation
#[async_trait]
pub trait CompanyDirectory: Send + Sync {
    async fn active_companies(&self) -> ReconciliationResult<Vec<String>>;
}
