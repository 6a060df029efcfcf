//! Difference between the calculated total and the centralizadora total

use bigdecimal::{BigDecimal, RoundingMode};
use serde::{Deserialize, Serialize};

/// Monetary precision used throughout the crate
pub const CENTS_SCALE: i64 = 2;

/// Round an amount to cents, half away from zero
pub fn round_cents(amount: &BigDecimal) -> BigDecimal {
    amount.with_scale_round(CENTS_SCALE, RoundingMode::HalfUp)
}

/// Sign of a reconciliation difference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffClassification {
    /// Calculated and reported totals agree
    Balanced,
    /// Calculated total exceeds the reported ledger
    Surplus,
    /// Reported ledger exceeds the calculated total
    Deficit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffResult {
    pub diferencia: BigDecimal,
    pub classification: DiffClassification,
}

/// Computes rounded differences and classifies them
#[derive(Debug, Clone, PartialEq)]
pub struct DiffCalculator {
    tolerance: BigDecimal,
}

impl Default for DiffCalculator {
    fn default() -> Self {
        Self {
            tolerance: BigDecimal::from(0),
        }
    }
}

impl DiffCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Treat differences whose absolute value is within `tolerance` as balanced
    pub fn with_tolerance(tolerance: BigDecimal) -> Self {
        Self {
            tolerance: round_cents(&tolerance.abs()),
        }
    }

    pub fn tolerance(&self) -> &BigDecimal {
        &self.tolerance
    }

    /// `round(calculado - centralizadora, 2)` and its classification.
    ///
    /// Classification always looks at the rounded value, so sub-cent noise
    /// never turns a balanced day into a surplus or deficit.
    pub fn diff(&self, calculado: &BigDecimal, centralizadora: &BigDecimal) -> DiffResult {
        let diferencia = round_cents(&(calculado - centralizadora));
        let zero = BigDecimal::from(0);

        let classification = if diferencia.abs() <= self.tolerance {
            DiffClassification::Balanced
        } else if diferencia > zero {
            DiffClassification::Surplus
        } else {
            DiffClassification::Deficit
        };

        DiffResult {
            diferencia,
            classification,
        }
    }
}
