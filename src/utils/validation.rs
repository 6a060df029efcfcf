//! Validation utilities

use crate::types::*;

/// Maximum length of the free-text observations on a record
pub const MAX_OBSERVACIONES_LEN: usize = 1000;

/// Validate that a company ID is valid
///
/// Company IDs come from the directory (tax IDs such as `900.123.456-7` are
/// common), so only empty or control-character IDs are rejected.
pub fn validate_company_id(company_id: &str) -> ReconciliationResult<()> {
    if company_id.trim().is_empty() {
        return Err(ReconciliationError::Validation(
            "Company ID cannot be empty".to_string(),
        ));
    }

    if company_id.chars().any(char::is_control) {
        return Err(ReconciliationError::Validation(
            "Company ID cannot contain control characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate free-text observations
pub fn validate_observaciones(observaciones: &str) -> ReconciliationResult<()> {
    if observaciones.chars().count() > MAX_OBSERVACIONES_LEN {
        return Err(ReconciliationError::Validation(format!(
            "Observaciones cannot exceed {} characters",
            MAX_OBSERVACIONES_LEN
        )));
    }

    Ok(())
}

/// Validate the reason given for reopening a closed record
pub fn validate_reopen_reason(reason: &str) -> ReconciliationResult<()> {
    if reason.trim().is_empty() {
        return Err(ReconciliationError::Validation(
            "A reason is required to reopen a closed reconciliation".to_string(),
        ));
    }

    validate_observaciones(reason)
}
