//! Lifecycle transitions of a reconciliation record

use crate::types::*;

/// The transition table. Every legal `(state, action)` pair is listed;
/// anything else is rejected.
pub fn next_state(estado: Estado, action: Action) -> Option<Estado> {
    use Action::*;
    use Estado::*;

    match (estado, action) {
        (Pendiente, Evaluate) => Some(Evaluado),
        (Evaluado, Confirm) => Some(Confirmado),
        (Evaluado, Close) | (Confirmado, Close) => Some(Cerrado),
        (Evaluado, Revert) => Some(Pendiente),
        (Confirmado, Revert) => Some(Evaluado),
        (Cerrado, Reopen) => Some(Confirmado),
        _ => None,
    }
}

/// Validates and applies lifecycle transitions
pub struct StateMachine;

impl StateMachine {
    /// Whether `action` is legal from `estado`
    pub fn can_apply(estado: Estado, action: Action) -> bool {
        next_state(estado, action).is_some()
    }

    /// Actions available from `estado`, in a stable order
    pub fn available_actions(estado: Estado) -> Vec<Action> {
        [
            Action::Evaluate,
            Action::Confirm,
            Action::Close,
            Action::Revert,
            Action::Reopen,
        ]
        .into_iter()
        .filter(|action| Self::can_apply(estado, *action))
        .collect()
    }

    /// Apply `action` to the record, returning the previous state.
    ///
    /// The record is left untouched when the transition is rejected.
    pub fn apply(record: &mut ReconciliationRecord, action: Action) -> ReconciliationResult<Estado> {
        let from = record.estado;
        let to = next_state(from, action)
            .ok_or(ReconciliationError::InvalidTransition { from, action })?;

        record.estado = to;
        record.touch();
        Ok(from)
    }

    pub fn evaluate(record: &mut ReconciliationRecord) -> ReconciliationResult<Estado> {
        Self::apply(record, Action::Evaluate)
    }

    pub fn confirm(record: &mut ReconciliationRecord) -> ReconciliationResult<Estado> {
        Self::apply(record, Action::Confirm)
    }

    pub fn close(record: &mut ReconciliationRecord) -> ReconciliationResult<Estado> {
        Self::apply(record, Action::Close)
    }

    pub fn revert(record: &mut ReconciliationRecord) -> ReconciliationResult<Estado> {
        Self::apply(record, Action::Revert)
    }

    /// Reopen a closed record, leaving a trace of why
    pub fn reopen(record: &mut ReconciliationRecord, reason: &str) -> ReconciliationResult<Estado> {
        let from = Self::apply(record, Action::Reopen)?;
        record.last_reopening = Some(Reopening {
            reason: reason.trim().to_string(),
            from,
            to: record.estado,
            at: record.updated_at,
        });
        Ok(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record_in(estado: Estado) -> ReconciliationRecord {
        let mut record = ReconciliationRecord::new(
            "acme",
            NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            Totals::zero(),
        );
        record.estado = estado;
        record
    }

    #[test]
    fn test_forward_path() {
        let mut record = record_in(Estado::Pendiente);
        StateMachine::evaluate(&mut record).unwrap();
        assert_eq!(record.estado, Estado::Evaluado);
        StateMachine::confirm(&mut record).unwrap();
        assert_eq!(record.estado, Estado::Confirmado);
        StateMachine::close(&mut record).unwrap();
        assert_eq!(record.estado, Estado::Cerrado);
    }

    #[test]
    fn test_close_from_evaluado() {
        let mut record = record_in(Estado::Evaluado);
        assert_eq!(StateMachine::close(&mut record).unwrap(), Estado::Evaluado);
        assert_eq!(record.estado, Estado::Cerrado);
    }

    #[test]
    fn test_pendiente_only_reaches_evaluado() {
        for action in [Action::Confirm, Action::Close, Action::Revert, Action::Reopen] {
            let mut record = record_in(Estado::Pendiente);
            let err = StateMachine::apply(&mut record, action).unwrap_err();
            assert_eq!(
                err,
                ReconciliationError::InvalidTransition {
                    from: Estado::Pendiente,
                    action
                }
            );
            assert_eq!(record.estado, Estado::Pendiente);
        }
    }

    #[test]
    fn test_evaluate_twice_fails() {
        let mut record = record_in(Estado::Pendiente);
        StateMachine::evaluate(&mut record).unwrap();
        let err = StateMachine::evaluate(&mut record).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        assert_eq!(record.estado, Estado::Evaluado);
    }

    #[test]
    fn test_revert_is_single_step() {
        let mut record = record_in(Estado::Confirmado);
        StateMachine::revert(&mut record).unwrap();
        assert_eq!(record.estado, Estado::Evaluado);
        StateMachine::revert(&mut record).unwrap();
        assert_eq!(record.estado, Estado::Pendiente);
        assert!(StateMachine::revert(&mut record).is_err());
    }

    #[test]
    fn test_revert_from_cerrado_rejected() {
        let mut record = record_in(Estado::Cerrado);
        let err = StateMachine::revert(&mut record).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        assert_eq!(record.estado, Estado::Cerrado);
    }

    #[test]
    fn test_reopen_records_reason() {
        let mut record = record_in(Estado::Cerrado);
        StateMachine::reopen(&mut record, "  ledger reissued ").unwrap();
        assert_eq!(record.estado, Estado::Confirmado);

        let reopening = record.last_reopening.unwrap();
        assert_eq!(reopening.reason, "ledger reissued");
        assert_eq!(reopening.from, Estado::Cerrado);
        assert_eq!(reopening.to, Estado::Confirmado);
    }

    #[test]
    fn test_no_transition_skips_a_step() {
        for from in Estado::ALL {
            for action in StateMachine::available_actions(from) {
                let to = next_state(from, action).unwrap();
                let step = to.index() as i64 - from.index() as i64;
                if action == Action::Reopen {
                    assert_eq!(step, -1);
                } else if action == Action::Close {
                    // close is also allowed straight from evaluado
                    assert!(step == 1 || (step == 2 && from == Estado::Evaluado));
                } else {
                    assert_eq!(step.abs(), 1);
                }
            }
        }
    }

    #[test]
    fn test_available_actions() {
        assert_eq!(
            StateMachine::available_actions(Estado::Evaluado),
            vec![Action::Confirm, Action::Close, Action::Revert]
        );
        assert_eq!(
            StateMachine::available_actions(Estado::Cerrado),
            vec![Action::Reopen]
        );
    }
}
