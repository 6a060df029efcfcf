//! Reconciliation engine: the operations exposed to the UI layer

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::reconciliation::bulk::{BulkOperationCoordinator, BulkReport, CancellationFlag};
use crate::reconciliation::centralizadora::{CentralizadoraUpdate, CentralizadoraUpdater};
use crate::reconciliation::diff::{DiffCalculator, DiffClassification};
use crate::reconciliation::locks::KeyLocks;
use crate::reconciliation::state::{next_state, StateMachine};
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::{validate_company_id, validate_reopen_reason};

/// Result of a transition that only applies to eligible records
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Eligibility {
    Applied { from: Estado, record: ReconciliationRecord },
    NotEligible(Estado),
}

/// Daily reconciliation engine
///
/// Every single-record mutation holds the record's key lock for the whole
/// load-modify-store cycle and writes with an optimistic version check, so
/// concurrent callers never lose each other's updates.
pub struct ReconciliationEngine<S, T, C> {
    storage: Arc<S>,
    totals: Arc<T>,
    companies: Arc<C>,
    locks: KeyLocks,
    config: EngineConfig,
    calculator: DiffCalculator,
}

impl<S, T, C> Clone for ReconciliationEngine<S, T, C> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            totals: Arc::clone(&self.totals),
            companies: Arc::clone(&self.companies),
            locks: self.locks.clone(),
            config: self.config.clone(),
            calculator: self.calculator.clone(),
        }
    }
}

impl<S, T, C> ReconciliationEngine<S, T, C>
where
    S: ReconciliationStorage + 'static,
    T: TotalsAggregator + 'static,
    C: CompanyDirectory + 'static,
{
    /// Create a new engine with the default configuration
    pub fn new(storage: S, totals: T, companies: C) -> Self {
        Self {
            storage: Arc::new(storage),
            totals: Arc::new(totals),
            companies: Arc::new(companies),
            locks: KeyLocks::new(),
            config: EngineConfig::default(),
            calculator: DiffCalculator::default(),
        }
    }

    /// Create a new engine with a custom configuration
    pub fn with_config(
        storage: S,
        totals: T,
        companies: C,
        config: EngineConfig,
    ) -> ReconciliationResult<Self> {
        config.validate()?;
        let calculator = DiffCalculator::with_tolerance(config.diff_tolerance.clone());
        Ok(Self {
            storage: Arc::new(storage),
            totals: Arc::new(totals),
            companies: Arc::new(companies),
            locks: KeyLocks::new(),
            config,
            calculator,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn calculator(&self) -> &DiffCalculator {
        &self.calculator
    }

    /// Classify a record with the configured tolerance, as summaries do
    pub fn classify(&self, record: &ReconciliationRecord) -> DiffClassification {
        self.calculator
            .diff(&record.total_calculado(), &record.total_centralizadora)
            .classification
    }

    /// Load the record for `(company_id, date)`, creating it if needed.
    ///
    /// New records start in `pendiente` with a zero centralizadora total and
    /// the aggregator's subtotals. Existing records that are not closed get
    /// their subtotals refreshed from the aggregator; closed records keep
    /// the subtotals they were closed with.
    #[instrument(skip(self))]
    pub async fn ensure_record(
        &self,
        company_id: &str,
        date: NaiveDate,
    ) -> ReconciliationResult<ReconciliationRecord> {
        validate_company_id(company_id)?;
        let key = ReconciliationKey::new(company_id, date);
        let _guard = self.locks.acquire(&key).await?;
        self.load_or_create(&key).await
    }

    /// Every record for `date`: one per active company plus any record
    /// already stored for that day, sorted by company.
    ///
    /// Directory entries with an invalid company ID are logged and left out
    /// rather than failing the whole day.
    #[instrument(skip(self))]
    pub async fn get_reconciliation_for_date(
        &self,
        date: NaiveDate,
    ) -> ReconciliationResult<Vec<ReconciliationRecord>> {
        let keys = self.keys_for_date(date).await?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            if let Err(e) = validate_company_id(&key.company_id) {
                warn!(company_id = ?key.company_id, error = %e, "Skipping invalid company");
                continue;
            }
            records.push(self.ensure_record(&key.company_id, date).await?);
        }
        Ok(records)
    }

    /// Same as `get_reconciliation_for_date` with derived values materialized
    pub async fn summaries_for_date(
        &self,
        date: NaiveDate,
    ) -> ReconciliationResult<Vec<ReconciliationSummary>> {
        let records = self.get_reconciliation_for_date(date).await?;
        Ok(records
            .iter()
            .map(|record| ReconciliationSummary::from_record(record, &self.calculator))
            .collect())
    }

    /// Counts per state and aggregate totals across every company for `date`
    pub async fn daily_summary(&self, date: NaiveDate) -> ReconciliationResult<DailySummary> {
        let summaries = self.summaries_for_date(date).await?;

        let mut by_estado: BTreeMap<Estado, usize> =
            Estado::ALL.iter().map(|estado| (*estado, 0)).collect();
        let mut total_calculado = BigDecimal::from(0);
        let mut total_centralizadora = BigDecimal::from(0);
        let mut unbalanced = 0;

        for summary in &summaries {
            *by_estado.entry(summary.estado).or_default() += 1;
            total_calculado += &summary.total_calculado;
            total_centralizadora += &summary.total_centralizadora;
            if summary.classification != DiffClassification::Balanced {
                unbalanced += 1;
            }
        }

        let diferencia = self
            .calculator
            .diff(&total_calculado, &total_centralizadora)
            .diferencia;

        Ok(DailySummary {
            date,
            records: summaries.len(),
            by_estado,
            total_calculado,
            total_centralizadora,
            diferencia,
            unbalanced,
        })
    }

    /// pendiente → evaluado
    pub async fn evaluate(
        &self,
        company_id: &str,
        date: NaiveDate,
    ) -> ReconciliationResult<ReconciliationRecord> {
        self.transition(company_id, date, Action::Evaluate).await
    }

    /// evaluado → confirmado
    pub async fn confirm(
        &self,
        company_id: &str,
        date: NaiveDate,
    ) -> ReconciliationResult<ReconciliationRecord> {
        self.transition(company_id, date, Action::Confirm).await
    }

    /// evaluado | confirmado → cerrado
    pub async fn close(
        &self,
        company_id: &str,
        date: NaiveDate,
    ) -> ReconciliationResult<ReconciliationRecord> {
        self.transition(company_id, date, Action::Close).await
    }

    /// One step back; never out of `cerrado`
    pub async fn revert(
        &self,
        company_id: &str,
        date: NaiveDate,
    ) -> ReconciliationResult<ReconciliationRecord> {
        self.transition(company_id, date, Action::Revert).await
    }

    /// cerrado → confirmado, only when enabled and with a stated reason
    #[instrument(skip(self))]
    pub async fn reopen(
        &self,
        company_id: &str,
        date: NaiveDate,
        reason: &str,
    ) -> ReconciliationResult<ReconciliationRecord> {
        if !self.config.allow_reopen {
            return Err(ReconciliationError::ReopenDisabled);
        }
        validate_reopen_reason(reason)?;

        let record = self
            .mutate(company_id, date, |record| {
                StateMachine::reopen(record, reason).map(|_| ())
            })
            .await?;

        warn!(
            company_id,
            %date,
            reason = reason.trim(),
            version = record.version,
            "Reopened closed reconciliation"
        );
        Ok(record)
    }

    /// Set the centralizadora total and/or observations of an open record
    #[instrument(skip(self))]
    pub async fn set_centralizadora(
        &self,
        company_id: &str,
        date: NaiveDate,
        update: CentralizadoraUpdate,
    ) -> ReconciliationResult<ReconciliationRecord> {
        let record = self
            .mutate(company_id, date, |record| {
                CentralizadoraUpdater::apply(record, &update)
            })
            .await?;

        info!(
            company_id,
            %date,
            total_centralizadora = %record.total_centralizadora,
            diferencia = %record.diferencia(),
            version = record.version,
            "Updated centralizadora"
        );
        Ok(record)
    }

    /// Evaluate every `pendiente` record of `date`
    pub async fn evaluate_all(&self, date: NaiveDate) -> ReconciliationResult<BulkReport> {
        self.evaluate_all_with_cancel(date, &CancellationFlag::new())
            .await
    }

    pub async fn evaluate_all_with_cancel(
        &self,
        date: NaiveDate,
        cancel: &CancellationFlag,
    ) -> ReconciliationResult<BulkReport> {
        BulkOperationCoordinator::new(self.clone())
            .run(date, Action::Evaluate, cancel)
            .await
    }

    /// Close every `evaluado` or `confirmado` record of `date`
    pub async fn close_all(&self, date: NaiveDate) -> ReconciliationResult<BulkReport> {
        self.close_all_with_cancel(date, &CancellationFlag::new())
            .await
    }

    pub async fn close_all_with_cancel(
        &self,
        date: NaiveDate,
        cancel: &CancellationFlag,
    ) -> ReconciliationResult<BulkReport> {
        BulkOperationCoordinator::new(self.clone())
            .run(date, Action::Close, cancel)
            .await
    }

    #[instrument(skip(self))]
    async fn transition(
        &self,
        company_id: &str,
        date: NaiveDate,
        action: Action,
    ) -> ReconciliationResult<ReconciliationRecord> {
        let mut from = None;
        let record = self
            .mutate(company_id, date, |record| {
                from = Some(StateMachine::apply(record, action)?);
                Ok(())
            })
            .await?;

        info!(
            company_id,
            %date,
            %action,
            from = ?from,
            to = %record.estado,
            version = record.version,
            "Applied transition"
        );
        Ok(record)
    }

    /// Apply `action` only when it is legal from the record's current state.
    ///
    /// The state is read under the key lock, so a record that moved since the
    /// caller enumerated it is reported as not eligible instead of failing.
    /// Eligibility is judged on the stored state (a missing record counts as
    /// `pendiente`) before the aggregator is consulted, so an aggregator
    /// outage never turns a skip into a failure.
    pub(crate) async fn transition_if_eligible(
        &self,
        key: &ReconciliationKey,
        action: Action,
    ) -> ReconciliationResult<Eligibility> {
        validate_company_id(&key.company_id)?;
        let _guard = self.locks.acquire(key).await?;

        let stored = self
            .storage
            .get(key)
            .await?
            .map_or(Estado::Pendiente, |record| record.estado);
        if next_state(stored, action).is_none() {
            return Ok(Eligibility::NotEligible(stored));
        }

        let mut record = self.load_or_create(key).await?;
        if next_state(record.estado, action).is_none() {
            return Ok(Eligibility::NotEligible(record.estado));
        }

        let expected = record.version;
        let from = StateMachine::apply(&mut record, action)?;
        let record = self.storage.put(&record, expected).await?;
        Ok(Eligibility::Applied { from, record })
    }

    /// Keys of every record that belongs to `date`
    pub(crate) async fn keys_for_date(
        &self,
        date: NaiveDate,
    ) -> ReconciliationResult<Vec<ReconciliationKey>> {
        let mut companies: BTreeSet<String> =
            self.companies.active_companies().await?.into_iter().collect();
        for record in self.storage.list_by_date(date).await? {
            companies.insert(record.company_id);
        }

        Ok(companies
            .into_iter()
            .map(|company_id| ReconciliationKey::new(company_id, date))
            .collect())
    }

    async fn mutate<F>(
        &self,
        company_id: &str,
        date: NaiveDate,
        apply: F,
    ) -> ReconciliationResult<ReconciliationRecord>
    where
        F: FnOnce(&mut ReconciliationRecord) -> ReconciliationResult<()>,
    {
        validate_company_id(company_id)?;
        let key = ReconciliationKey::new(company_id, date);
        let _guard = self.locks.acquire(&key).await?;

        let mut record = self.load_or_create(&key).await?;
        let expected = record.version;
        apply(&mut record)?;
        self.storage.put(&record, expected).await
    }

    /// Caller must hold the key lock
    async fn load_or_create(
        &self,
        key: &ReconciliationKey,
    ) -> ReconciliationResult<ReconciliationRecord> {
        let mut record = match self.storage.get(key).await? {
            Some(record) => record,
            None => {
                let totals = self.totals.get_totals(&key.company_id, key.date).await?;
                let record = ReconciliationRecord::new(key.company_id.clone(), key.date, totals);
                match self.storage.insert(&record).await {
                    Ok(stored) => {
                        debug!(company_id = %key.company_id, date = %key.date, "Created reconciliation record");
                        return Ok(stored);
                    }
                    // another process created it first
                    Err(ReconciliationError::Conflict { .. }) => self
                        .storage
                        .get(key)
                        .await?
                        .ok_or_else(|| ReconciliationError::Conflict {
                            key: key.clone(),
                            expected: 0,
                            found: None,
                        })?,
                    Err(e) => return Err(e),
                }
            }
        };

        if !record.estado.is_editable() {
            return Ok(record);
        }

        let totals = self.totals.get_totals(&key.company_id, key.date).await?;
        if totals.total_pagaduria == record.total_pagaduria
            && totals.total_tesoreria == record.total_tesoreria
        {
            return Ok(record);
        }

        debug!(
            company_id = %key.company_id,
            date = %key.date,
            total_pagaduria = %totals.total_pagaduria,
            total_tesoreria = %totals.total_tesoreria,
            "Refreshed subtotals from aggregator"
        );
        let expected = record.version;
        record.total_pagaduria = totals.total_pagaduria;
        record.total_tesoreria = totals.total_tesoreria;
        record.touch();
        self.storage.put(&record, expected).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{MemoryStorage, StaticDirectory, StaticTotals};

    type TestEngine = ReconciliationEngine<MemoryStorage, StaticTotals, StaticDirectory>;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    fn engine() -> (TestEngine, MemoryStorage, StaticTotals) {
        let storage = MemoryStorage::new();
        let totals = StaticTotals::new();
        totals.set(
            "acme",
            date(),
            Totals::new(BigDecimal::from(1_000_000), BigDecimal::from(500_000)),
        );
        let engine = ReconciliationEngine::new(
            storage.clone(),
            totals.clone(),
            StaticDirectory::new(["acme", "beta"]),
        );
        (engine, storage, totals)
    }

    #[tokio::test]
    async fn test_ensure_record_creates_once() {
        let (engine, storage, _) = engine();

        let record = engine.ensure_record("acme", date()).await.unwrap();
        assert_eq!(record.estado, Estado::Pendiente);
        assert_eq!(record.version, 1);
        assert_eq!(record.total_calculado(), BigDecimal::from(1_500_000));
        assert_eq!(record.total_centralizadora, BigDecimal::from(0));

        let again = engine.ensure_record("acme", date()).await.unwrap();
        assert_eq!(again.version, 1);
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_record_rejects_bad_company_id() {
        let (engine, storage, _) = engine();
        let err = engine.ensure_record("", date()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_subtotals_refresh_until_closed() {
        let (engine, _, totals) = engine();
        engine.ensure_record("acme", date()).await.unwrap();

        totals.set(
            "acme",
            date(),
            Totals::new(BigDecimal::from(2_000_000), BigDecimal::from(500_000)),
        );
        let record = engine.ensure_record("acme", date()).await.unwrap();
        assert_eq!(record.total_calculado(), BigDecimal::from(2_500_000));
        assert_eq!(record.version, 2);

        engine.evaluate("acme", date()).await.unwrap();
        engine.close("acme", date()).await.unwrap();

        totals.set("acme", date(), Totals::zero());
        let record = engine.ensure_record("acme", date()).await.unwrap();
        assert_eq!(record.total_calculado(), BigDecimal::from(2_500_000));
    }

    #[tokio::test]
    async fn test_aggregator_outage_surfaces() {
        let (engine, _, totals) = engine();
        totals.set_unavailable("acme", true);
        let err = engine.evaluate("acme", date()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    }

    #[tokio::test]
    async fn test_reopen_disabled_by_default() {
        let (engine, _, _) = engine();
        engine.evaluate("acme", date()).await.unwrap();
        engine.close("acme", date()).await.unwrap();

        let err = engine.reopen("acme", date(), "ledger reissued").await.unwrap_err();
        assert_eq!(err, ReconciliationError::ReopenDisabled);

        let record = engine.ensure_record("acme", date()).await.unwrap();
        assert_eq!(record.estado, Estado::Cerrado);
    }

    #[tokio::test]
    async fn test_reopen_when_enabled() {
        let config = EngineConfig {
            allow_reopen: true,
            ..EngineConfig::default()
        };
        let engine = ReconciliationEngine::with_config(
            MemoryStorage::new(),
            StaticTotals::new(),
            StaticDirectory::new(["acme"]),
            config,
        )
        .unwrap();

        engine.evaluate("acme", date()).await.unwrap();
        engine.close("acme", date()).await.unwrap();

        let err = engine.reopen("acme", date(), "  ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let record = engine.reopen("acme", date(), "ledger reissued").await.unwrap();
        assert_eq!(record.estado, Estado::Confirmado);
        assert_eq!(
            record.last_reopening.unwrap().reason,
            "ledger reissued".to_string()
        );
    }

    #[tokio::test]
    async fn test_failed_transition_does_not_write() {
        let (engine, _, _) = engine();
        let created = engine.ensure_record("acme", date()).await.unwrap();

        assert!(engine.confirm("acme", date()).await.is_err());
        let record = engine.ensure_record("acme", date()).await.unwrap();
        assert_eq!(record.version, created.version);
    }

    #[tokio::test]
    async fn test_concurrent_edits_are_serialized() {
        let (engine, _, _) = engine();
        engine.ensure_record("acme", date()).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                engine
                    .set_centralizadora(
                        "acme",
                        date(),
                        CentralizadoraUpdate::total(BigDecimal::from(i)),
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let record = engine.ensure_record("acme", date()).await.unwrap();
        assert_eq!(record.version, 11);
    }

    #[tokio::test]
    async fn test_daily_summary() {
        let (engine, _, _) = engine();
        engine
            .set_centralizadora(
                "acme",
                date(),
                CentralizadoraUpdate::total(BigDecimal::from(1_400_000)),
            )
            .await
            .unwrap();
        engine.evaluate("acme", date()).await.unwrap();

        let summary = engine.daily_summary(date()).await.unwrap();
        assert_eq!(summary.records, 2);
        assert_eq!(summary.by_estado[&Estado::Evaluado], 1);
        assert_eq!(summary.by_estado[&Estado::Pendiente], 1);
        assert_eq!(summary.by_estado[&Estado::Cerrado], 0);
        assert_eq!(summary.total_calculado, BigDecimal::from(1_500_000));
        assert_eq!(summary.diferencia, BigDecimal::from(100_000));
        // beta has zero totals on both sides
        assert_eq!(summary.unbalanced, 1);
    }

    #[tokio::test]
    async fn test_classify_applies_tolerance() {
        let config = EngineConfig {
            diff_tolerance: BigDecimal::from(1),
            ..EngineConfig::default()
        };
        let totals = StaticTotals::new();
        totals.set(
            "acme",
            date(),
            Totals::new(BigDecimal::from(100), BigDecimal::from(0)),
        );
        let engine = ReconciliationEngine::with_config(
            MemoryStorage::new(),
            totals,
            StaticDirectory::new(["acme"]),
            config,
        )
        .unwrap();

        let record = engine
            .set_centralizadora(
                "acme",
                date(),
                CentralizadoraUpdate::total(BigDecimal::from(99)),
            )
            .await
            .unwrap();

        // the record itself is strict; the engine honours the tolerance
        assert_eq!(record.classification(), DiffClassification::Surplus);
        assert_eq!(engine.classify(&record), DiffClassification::Balanced);
        let summaries = engine.summaries_for_date(date()).await.unwrap();
        assert_eq!(summaries[0].classification, engine.classify(&record));
    }
}
