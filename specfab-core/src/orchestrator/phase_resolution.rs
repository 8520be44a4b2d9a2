//! CONFLICT_RESOLUTION
//!
//! Conflicts consensus refused to settle go to a reviewer; nothing is
//! auto-picked here.

use super::state::{RunPhase, RunState};
use super::RoundOrchestrator;
use crate::error::CoreResult;

impl RoundOrchestrator {
    pub(super) fn phase_resolution(&self, state: &mut RunState) -> CoreResult<()> {
        if state.unresolved.is_empty() {
            return self.advance(state, RunPhase::Complete);
        }

        for conflict in state.unresolved.values() {
            let provisional = conflict
                .provisional
                .value
                .as_ref()
                .map(|v| v.render())
                .unwrap_or_default();
            let note = format!(
                "{}: {} competing value(s), provisional {}",
                conflict.field_key,
                conflict.clusters.len(),
                provisional
            );
            if !state.review_notes.contains(&note) {
                state.review_notes.push(note);
            }
        }

        tracing::info!(
            run_id = %state.run_id,
            conflicts = state.unresolved.len(),
            "Routing open conflicts to review"
        );
        self.advance(state, RunPhase::HumanReviewPending)
    }
}
