//! Core types and data structures for the reconciliation system

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::reconciliation::diff::{round_cents, DiffCalculator, DiffClassification};

/// Approval lifecycle of a daily reconciliation, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Estado {
    /// Created, totals not yet reviewed
    Pendiente,
    /// Difference reviewed by an operator
    Evaluado,
    /// Review confirmed by a supervisor
    Confirmado,
    /// Period closed; totals and observations are frozen
    Cerrado,
}

impl Estado {
    /// All states in lifecycle order
    pub const ALL: [Estado; 4] = [
        Estado::Pendiente,
        Estado::Evaluado,
        Estado::Confirmado,
        Estado::Cerrado,
    ];

    /// Position of the state in the lifecycle (0..=3)
    pub fn index(self) -> usize {
        match self {
            Estado::Pendiente => 0,
            Estado::Evaluado => 1,
            Estado::Confirmado => 2,
            Estado::Cerrado => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Estado::Pendiente => "pendiente",
            Estado::Evaluado => "evaluado",
            Estado::Confirmado => "confirmado",
            Estado::Cerrado => "cerrado",
        }
    }

    /// Whether totals and observations may still be edited
    pub fn is_editable(self) -> bool {
        self != Estado::Cerrado
    }
}

impl fmt::Display for Estado {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Estado {
    type Err = ReconciliationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pendiente" => Ok(Estado::Pendiente),
            "evaluado" => Ok(Estado::Evaluado),
            "confirmado" => Ok(Estado::Confirmado),
            "cerrado" => Ok(Estado::Cerrado),
            other => Err(ReconciliationError::Validation(format!(
                "Unknown reconciliation state '{}'",
                other
            ))),
        }
    }
}

/// Lifecycle actions a caller can request on a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Evaluate,
    Confirm,
    Close,
    /// Undo the last forward step
    Revert,
    /// Move a closed record back to confirmado
    Reopen,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Evaluate => "evaluate",
            Action::Confirm => "confirm",
            Action::Close => "close",
            Action::Revert => "revert",
            Action::Reopen => "reopen",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a reconciliation record: one per company and day
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReconciliationKey {
    pub company_id: String,
    pub date: NaiveDate,
}

impl ReconciliationKey {
    pub fn new(company_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            company_id: company_id.into(),
            date,
        }
    }
}

impl fmt::Display for ReconciliationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.company_id, self.date)
    }
}

/// Subtotals reported by the external aggregator for one company and day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub total_pagaduria: BigDecimal,
    pub total_tesoreria: BigDecimal,
}

impl Totals {
    pub fn new(total_pagaduria: BigDecimal, total_tesoreria: BigDecimal) -> Self {
        Self {
            total_pagaduria: round_cents(&total_pagaduria),
            total_tesoreria: round_cents(&total_tesoreria),
        }
    }

    pub fn zero() -> Self {
        Self::new(BigDecimal::from(0), BigDecimal::from(0))
    }
}

/// Audit trace of the last time a closed record was reopened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reopening {
    pub reason: String,
    pub from: Estado,
    pub to: Estado,
    pub at: NaiveDateTime,
}

/// Daily reconciliation of one company
///
/// `total_calculado` and `diferencia` are not fields: they are derived from
/// the subtotals and the centralizadora total every time they are read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationRecord {
    /// Owning company (not managed by this crate)
    pub company_id: String,
    /// Reconciliation period, day granularity
    pub date: NaiveDate,
    /// Pagaduria subtotal, supplied by the aggregator
    pub total_pagaduria: BigDecimal,
    /// Tesoreria subtotal, supplied by the aggregator
    pub total_tesoreria: BigDecimal,
    /// Externally reported ledger total; 0 until first set
    pub total_centralizadora: BigDecimal,
    pub estado: Estado,
    pub observaciones: Option<String>,
    /// Optimistic concurrency version, bumped by the store on every write
    pub version: u64,
    pub last_reopening: Option<Reopening>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ReconciliationRecord {
    /// Create a fresh record in `pendiente` with a zero centralizadora total
    pub fn new(company_id: impl Into<String>, date: NaiveDate, totals: Totals) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            company_id: company_id.into(),
            date,
            total_pagaduria: totals.total_pagaduria,
            total_tesoreria: totals.total_tesoreria,
            total_centralizadora: BigDecimal::from(0),
            estado: Estado::Pendiente,
            observaciones: None,
            version: 0,
            last_reopening: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> ReconciliationKey {
        ReconciliationKey::new(self.company_id.clone(), self.date)
    }

    /// Pagaduria plus tesoreria, rounded to cents
    pub fn total_calculado(&self) -> BigDecimal {
        round_cents(&(&self.total_pagaduria + &self.total_tesoreria))
    }

    /// Calculated total minus centralizadora total, rounded to cents
    pub fn diferencia(&self) -> BigDecimal {
        DiffCalculator::default()
            .diff(&self.total_calculado(), &self.total_centralizadora)
            .diferencia
    }

    /// Strict classification: any non-zero rounded difference is a surplus
    /// or a deficit. Use `ReconciliationEngine::classify` to apply the
    /// engine's configured tolerance.
    pub fn classification(&self) -> DiffClassification {
        DiffCalculator::default()
            .diff(&self.total_calculado(), &self.total_centralizadora)
            .classification
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().naive_utc();
    }
}

/// Read model of a record with its derived values materialized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub company_id: String,
    pub date: NaiveDate,
    pub total_pagaduria: BigDecimal,
    pub total_tesoreria: BigDecimal,
    pub total_calculado: BigDecimal,
    pub total_centralizadora: BigDecimal,
    pub diferencia: BigDecimal,
    pub classification: DiffClassification,
    pub estado: Estado,
    pub observaciones: Option<String>,
    pub version: u64,
}

impl ReconciliationSummary {
    pub fn from_record(record: &ReconciliationRecord, calculator: &DiffCalculator) -> Self {
        let total_calculado = record.total_calculado();
        let diff = calculator.diff(&total_calculado, &record.total_centralizadora);
        Self {
            company_id: record.company_id.clone(),
            date: record.date,
            total_pagaduria: record.total_pagaduria.clone(),
            total_tesoreria: record.total_tesoreria.clone(),
            total_calculado,
            total_centralizadora: record.total_centralizadora.clone(),
            diferencia: diff.diferencia,
            classification: diff.classification,
            estado: record.estado,
            observaciones: record.observaciones.clone(),
            version: record.version,
        }
    }
}

impl From<&ReconciliationRecord> for ReconciliationSummary {
    fn from(record: &ReconciliationRecord) -> Self {
        Self::from_record(record, &DiffCalculator::default())
    }
}

/// Aggregate view of every company for one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub records: usize,
    /// Record count per state; every state is present, possibly with 0
    pub by_estado: BTreeMap<Estado, usize>,
    pub total_calculado: BigDecimal,
    pub total_centralizadora: BigDecimal,
    pub diferencia: BigDecimal,
    /// Records whose difference is not balanced
    pub unbalanced: usize,
}

/// Stable machine-readable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidTransition,
    RecordLocked,
    Conflict,
    UpstreamUnavailable,
    Validation,
    ReopenDisabled,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::InvalidTransition => "INVALID_TRANSITION",
            ErrorKind::RecordLocked => "RECORD_LOCKED",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::ReopenDisabled => "REOPEN_DISABLED",
        }
    }
}

/// Errors that can occur in the reconciliation system
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReconciliationError {
    #[error("Invalid transition: cannot {action} a record in state {from}")]
    InvalidTransition { from: Estado, action: Action },
    #[error("Record locked: {0} is closed")]
    RecordLocked(ReconciliationKey),
    #[error("Conflict on {key}: expected version {expected}, found {found:?}")]
    Conflict {
        key: ReconciliationKey,
        expected: u64,
        found: Option<u64>,
    },
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Reopening closed records is disabled")]
    ReopenDisabled,
}

impl ReconciliationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconciliationError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            ReconciliationError::RecordLocked(_) => ErrorKind::RecordLocked,
            ReconciliationError::Conflict { .. } => ErrorKind::Conflict,
            ReconciliationError::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            ReconciliationError::Validation(_) => ErrorKind::Validation,
            ReconciliationError::ReopenDisabled => ErrorKind::ReopenDisabled,
        }
    }

    /// Conflicts and upstream outages may succeed when tried again
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReconciliationError::Conflict { .. } | ReconciliationError::UpstreamUnavailable(_)
        )
    }
}

/// Result type for reconciliation operations
pub type ReconciliationResult<T> = Result<T, ReconciliationError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    #[test]
    fn test_new_record_defaults() {
        let record = ReconciliationRecord::new(
            "acme",
            date(),
            Totals::new(BigDecimal::from(1000), BigDecimal::from(500)),
        );

        assert_eq!(record.estado, Estado::Pendiente);
        assert_eq!(record.total_centralizadora, BigDecimal::from(0));
        assert!(record.observaciones.is_none());
        assert_eq!(record.version, 0);
        assert_eq!(record.total_calculado(), BigDecimal::from(1500));
        assert_eq!(record.diferencia(), BigDecimal::from(1500));
    }

    #[test]
    fn test_derived_totals_follow_inputs() {
        let mut record = ReconciliationRecord::new(
            "acme",
            date(),
            Totals::new(BigDecimal::from(1_000_000), BigDecimal::from(500_000)),
        );
        record.total_centralizadora = BigDecimal::from(1_400_000);

        assert_eq!(record.total_calculado(), BigDecimal::from(1_500_000));
        assert_eq!(record.diferencia(), BigDecimal::from(100_000));
        assert_eq!(record.classification(), DiffClassification::Surplus);

        record.total_centralizadora = BigDecimal::from(1_600_000);
        assert_eq!(record.diferencia(), BigDecimal::from(-100_000));
        assert_eq!(record.classification(), DiffClassification::Deficit);
    }

    #[test]
    fn test_estado_parsing() {
        assert_eq!("cerrado".parse::<Estado>().unwrap(), Estado::Cerrado);
        assert_eq!(" Evaluado ".parse::<Estado>().unwrap(), Estado::Evaluado);
        let err = "aprobado".parse::<Estado>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_estado_order() {
        for (i, estado) in Estado::ALL.iter().enumerate() {
            assert_eq!(estado.index(), i);
        }
        assert!(Estado::Pendiente < Estado::Cerrado);
        assert!(!Estado::Cerrado.is_editable());
    }

    #[test]
    fn test_error_codes() {
        let err = ReconciliationError::InvalidTransition {
            from: Estado::Pendiente,
            action: Action::Close,
        };
        assert_eq!(err.kind().code(), "INVALID_TRANSITION");
        assert!(!err.is_transient());
        assert_eq!(
            err.to_string(),
            "Invalid transition: cannot close a record in state pendiente"
        );
        assert!(ReconciliationError::UpstreamUnavailable("db".into()).is_transient());
    }

    #[test]
    fn test_summary_serialization() {
        let record = ReconciliationRecord::new("acme", date(), Totals::zero());
        let summary = ReconciliationSummary::from(&record);
        let json = serde_json::to_value(&summary).unwrap();

        assert_eq!(json["estado"], "pendiente");
        assert_eq!(json["classification"], "balanced");
        assert_eq!(json["company_id"], "acme");
    }
}
