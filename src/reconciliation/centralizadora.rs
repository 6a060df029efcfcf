//! Applies externally reported ledger totals and observations to a record

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::reconciliation::diff::round_cents;
use crate::types::*;
use crate::utils::validation::validate_observaciones;

/// Edit to the centralizadora total and/or the observations of a record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CentralizadoraUpdate {
    pub total: Option<BigDecimal>,
    /// Replacement text; blank text clears the observations
    pub observaciones: Option<String>,
}

impl CentralizadoraUpdate {
    pub fn total(total: BigDecimal) -> Self {
        Self {
            total: Some(total),
            observaciones: None,
        }
    }

    pub fn observaciones(observaciones: impl Into<String>) -> Self {
        Self {
            total: None,
            observaciones: Some(observaciones.into()),
        }
    }

    pub fn with_observaciones(mut self, observaciones: impl Into<String>) -> Self {
        self.observaciones = Some(observaciones.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.total.is_none() && self.observaciones.is_none()
    }
}

/// Guarded entry point for every edit to totals or observations
pub struct CentralizadoraUpdater;

impl CentralizadoraUpdater {
    /// Apply the update in place.
    ///
    /// Closed records are rejected with `RecordLocked` and left untouched.
    pub fn apply(
        record: &mut ReconciliationRecord,
        update: &CentralizadoraUpdate,
    ) -> ReconciliationResult<()> {
        if !record.estado.is_editable() {
            return Err(ReconciliationError::RecordLocked(record.key()));
        }

        if update.is_empty() {
            return Err(ReconciliationError::Validation(
                "Update must change the total or the observaciones".to_string(),
            ));
        }

        if let Some(ref observaciones) = update.observaciones {
            validate_observaciones(observaciones)?;
        }

        if let Some(ref total) = update.total {
            record.total_centralizadora = round_cents(total);
        }

        if let Some(ref observaciones) = update.observaciones {
            let trimmed = observaciones.trim();
            record.observaciones = if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            };
        }

        record.touch();
        Ok(())
    }
}
