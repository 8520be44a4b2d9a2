//! VALIDATING
//!
//! Re-run the full validation pass over the cumulative history and replace
//! the per-field results wholesale.

use super::state::{RunPhase, RunState};
use super::validate::validate_history;
use super::RoundOrchestrator;
use crate::error::CoreResult;
use specfab_common::events::RunEvent;

impl RoundOrchestrator {
    pub(super) fn phase_validating(&self, state: &mut RunState, round: u32) -> CoreResult<()> {
        let newly_filled = self.revalidate(state, round);
        state.round_scratch.newly_filled = newly_filled;

        tracing::info!(
            run_id = %state.run_id,
            round,
            candidates = state.history.len(),
            known = state.selected.len(),
            unresolved = state.unresolved.len(),
            newly_filled,
            coverage = state.coverage,
            "Validation pass complete"
        );

        self.advance(state, RunPhase::RoundComplete { round })
    }

    /// Apply a fresh validation pass; returns how many fields became known
    pub(super) fn revalidate(&self, state: &mut RunState, round: u32) -> usize {
        let pass = validate_history(
            &self.table,
            self.components.as_ref(),
            &self.auditor,
            &state.history,
            &state.evidence,
        );
        if pass.unmapped > 0 {
            tracing::debug!(
                run_id = %state.run_id,
                unmapped = pass.unmapped,
                "Ignoring candidates for undeclared fields"
            );
        }

        let newly_filled = pass
            .selected
            .keys()
            .filter(|k| !state.selected.contains_key(*k))
            .count();
        state.coverage = pass.coverage(&self.table);
        state.selected = pass.selected;
        state.unresolved = pass.unresolved;
        state.field_status = pass.field_status;
        state.warnings = pass.warnings;

        for key in self.table.field_order() {
            let (decision, confidence) = if let Some(selected) = state.selected.get(key) {
                (selected.agreement.as_str(), Some(selected.confidence))
            } else if let Some(conflict) = state.unresolved.get(key) {
                ("conflict", Some(conflict.provisional.confidence))
            } else if state
                .field_status
                .get(key)
                .is_some_and(|s| s.forced_by_cross_validation)
            {
                ("forced_unknown", None)
            } else {
                ("unknown", None)
            };
            self.event_bus.emit_lossy(RunEvent::FieldDecision {
                run_id: state.run_id,
                round,
                field_key: key.clone(),
                decision: decision.to_string(),
                confidence,
            });
        }

        newly_filled
    }
}
