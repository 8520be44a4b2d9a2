//! Stop conditions evaluated at each round boundary
//!
//! Checked in order, first match wins:
//! 1. cancellation requested
//! 2. every completion-gating field known and nothing unresolved
//! 3. coverage target met and another round no longer affordable
//! 4. too many consecutive rounds below the new-field floor
//! 5. a budget ceiling reached
//! 6. no untried source covers any open field

use super::planner::build_worklist;
use super::state::{RunState, StopReason};
use crate::config::OrchestratorSettings;
use crate::rules::FieldRuleTable;

/// Whether the run can stop without losing anything it was asked to find
pub fn required_resolved(state: &RunState, table: &FieldRuleTable) -> bool {
    if !state.unresolved.is_empty() {
        return false;
    }
    let gated = table.gated_fields();
    if gated.is_empty() {
        table.keys().all(|k| state.selected.contains_key(k))
    } else {
        gated.iter().all(|k| state.selected.contains_key(*k))
    }
}

/// First stop condition that holds after `state.current_round`, if any
pub fn stop_reason(
    state: &RunState,
    table: &FieldRuleTable,
    settings: &OrchestratorSettings,
    cancelled: bool,
) -> Option<StopReason> {
    if cancelled {
        return Some(StopReason::Cancelled);
    }
    if required_resolved(state, table) {
        return Some(StopReason::AllRequiredResolved);
    }
    if state.coverage >= settings.coverage_target && !state.budget.can_afford_round(&state.usage) {
        return Some(StopReason::CoverageTargetMet);
    }
    if settings.stale_round_limit > 0 && state.stale_rounds >= settings.stale_round_limit {
        return Some(StopReason::DiminishingReturns);
    }
    if let Some(ceiling) = state.budget.reached(&state.usage, state.elapsed_secs()) {
        return Some(StopReason::BudgetExhausted { ceiling });
    }
    let next = build_worklist(
        state,
        table,
        state.current_round + 1,
        settings.confidence_threshold,
        settings.sources_per_round,
    );
    if next.is_empty() {
        return Some(StopReason::SourcesExhausted);
    }
    None
}
