//! Bulk transitions across every company of a date
//!
//! Each record is processed independently on a bounded pool of tasks. A
//! failure on one record is attached to that record's outcome and never
//! aborts or rolls back the others.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::reconciliation::engine::{Eligibility, ReconciliationEngine};
use crate::traits::*;
use crate::types::*;

/// Shared flag that stops a bulk operation from dispatching more records
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Records already dispatched still complete.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// What happened to one record during a bulk operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum BulkOutcome {
    Succeeded { from: Estado, to: Estado },
    /// The action does not apply from the record's state; nothing changed
    Skipped { estado: Estado },
    Failed { kind: ErrorKind, reason: String },
    /// Never dispatched because the operation was cancelled
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkEntry {
    pub company_id: String,
    pub outcome: BulkOutcome,
    /// Attempts made on this record (0 when never dispatched)
    pub attempts: u32,
}

/// Per-record report of a bulk operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkReport {
    pub operation_id: Uuid,
    pub date: NaiveDate,
    pub action: Action,
    /// Sorted by company
    pub entries: Vec<BulkEntry>,
}

impl BulkReport {
    pub fn succeeded(&self) -> usize {
        self.count(|o| matches!(o, BulkOutcome::Succeeded { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, BulkOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, BulkOutcome::Failed { .. }))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|o| matches!(o, BulkOutcome::Cancelled))
    }

    /// Outcome for one company, if it took part
    pub fn outcome(&self, company_id: &str) -> Option<&BulkOutcome> {
        self.entries
            .iter()
            .find(|entry| entry.company_id == company_id)
            .map(|entry| &entry.outcome)
    }

    fn count(&self, predicate: impl Fn(&BulkOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| predicate(&e.outcome)).count()
    }
}

/// Fans a lifecycle action out over every record of a date
pub struct BulkOperationCoordinator<S, T, C> {
    engine: ReconciliationEngine<S, T, C>,
}

impl<S, T, C> BulkOperationCoordinator<S, T, C>
where
    S: ReconciliationStorage + 'static,
    T: TotalsAggregator + 'static,
    C: CompanyDirectory + 'static,
{
    pub fn new(engine: ReconciliationEngine<S, T, C>) -> Self {
        Self { engine }
    }

    /// Apply `action` to every eligible record of `date`.
    ///
    /// Only a failure to enumerate the day's records fails the whole call.
    /// Dispatched records run on detached tasks, so each one finishes its
    /// transition even if this future is dropped.
    #[instrument(skip(self, cancel))]
    pub async fn run(
        &self,
        date: NaiveDate,
        action: Action,
        cancel: &CancellationFlag,
    ) -> ReconciliationResult<BulkReport> {
        let operation_id = Uuid::new_v4();
        let keys = self.engine.keys_for_date(date).await?;
        let concurrency = self.engine.config().bulk_concurrency;

        info!(
            %operation_id,
            %date,
            %action,
            records = keys.len(),
            concurrency,
            "Starting bulk operation"
        );

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut entries = Vec::with_capacity(keys.len());
        let mut handles = Vec::with_capacity(keys.len());

        for key in keys {
            if cancel.is_cancelled() {
                entries.push(cancelled_entry(key.company_id));
                continue;
            }

            let permit = Arc::clone(&semaphore).acquire_owned().await.map_err(|_| {
                ReconciliationError::UpstreamUnavailable("bulk worker pool closed".to_string())
            })?;

            // cancellation may have arrived while waiting for a slot
            if cancel.is_cancelled() {
                entries.push(cancelled_entry(key.company_id));
                continue;
            }

            let engine = self.engine.clone();
            let company_id = key.company_id.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                process_record(engine, key, action).await
            });
            handles.push((company_id, handle));
        }

        for (company_id, handle) in handles {
            let entry = match handle.await {
                Ok(entry) => entry,
                Err(e) => BulkEntry {
                    company_id,
                    outcome: BulkOutcome::Failed {
                        kind: ErrorKind::UpstreamUnavailable,
                        reason: format!("worker task failed: {}", e),
                    },
                    attempts: 1,
                },
            };
            entries.push(entry);
        }

        entries.sort_by(|a, b| a.company_id.cmp(&b.company_id));
        let report = BulkReport {
            operation_id,
            date,
            action,
            entries,
        };

        info!(
            %operation_id,
            succeeded = report.succeeded(),
            skipped = report.skipped(),
            failed = report.failed(),
            cancelled = report.cancelled(),
            "Bulk operation finished"
        );
        Ok(report)
    }
}

fn cancelled_entry(company_id: String) -> BulkEntry {
    debug!(%company_id, "Bulk operation cancelled before dispatch");
    BulkEntry {
        company_id,
        outcome: BulkOutcome::Cancelled,
        attempts: 0,
    }
}

/// Process one record, retrying transient failures
#[instrument(skip(engine, key), fields(company_id = %key.company_id, date = %key.date))]
async fn process_record<S, T, C>(
    engine: ReconciliationEngine<S, T, C>,
    key: ReconciliationKey,
    action: Action,
) -> BulkEntry
where
    S: ReconciliationStorage + 'static,
    T: TotalsAggregator + 'static,
    C: CompanyDirectory + 'static,
{
    let max_attempts = engine.config().bulk_max_attempts.max(1);
    let mut attempts = 0;

    let outcome = loop {
        attempts += 1;
        match engine.transition_if_eligible(&key, action).await {
            Ok(Eligibility::Applied { from, record }) => {
                debug!(%from, to = %record.estado, "Record transitioned");
                break BulkOutcome::Succeeded {
                    from,
                    to: record.estado,
                };
            }
            Ok(Eligibility::NotEligible(estado)) => {
                debug!(%estado, "Record skipped");
                break BulkOutcome::Skipped { estado };
            }
            Err(e) if e.is_transient() && attempts < max_attempts => {
                warn!(error = %e, attempt = attempts, "Retrying record");
                tokio::time::sleep(engine.config().retry_backoff()).await;
            }
            Err(e) => {
                warn!(error = %e, attempts, "Record failed");
                break BulkOutcome::Failed {
                    kind: e.kind(),
                    reason: e.to_string(),
                };
            }
        }
    };

    BulkEntry {
        company_id: key.company_id,
        outcome,
        attempts,
    }
}
