//! PLANNING
//!
//! Guards the round boundary (cancellation, hard ceilings) and builds the
//! source worklist for the fields still open.

use super::budget::BudgetCeiling;
use super::planner::build_worklist;
use super::state::{RoundScratch, RunPhase, RunState, StopReason};
use super::RoundOrchestrator;
use crate::error::CoreResult;
use specfab_common::events::RunEvent;

impl RoundOrchestrator {
    pub(super) fn phase_planning(&self, state: &mut RunState, round: u32) -> CoreResult<()> {
        if self.cancel_token.is_cancelled() {
            tracing::info!(run_id = %state.run_id, round, "Cancellation requested before round start");
            return self.settle(state, StopReason::Cancelled);
        }

        let elapsed_secs = state.elapsed_secs();
        if let Some(ceiling) = state.budget.reached(&state.usage, elapsed_secs) {
            if ceiling == BudgetCeiling::WallClock {
                self.event_bus.emit_lossy(RunEvent::MaxRunSecondsReached {
                    run_id: state.run_id,
                    elapsed_secs,
                });
            }
            return self.settle(state, StopReason::BudgetExhausted { ceiling });
        }

        let plan = build_worklist(
            state,
            &self.table,
            round,
            self.settings.confidence_threshold,
            self.settings.sources_per_round,
        );
        if plan.is_empty() {
            let reason = if super::stop::required_resolved(state, &self.table) {
                StopReason::AllRequiredResolved
            } else {
                StopReason::SourcesExhausted
            };
            return self.settle(state, reason);
        }

        tracing::info!(
            run_id = %state.run_id,
            round,
            sources = plan.len(),
            source_ids = ?plan.iter().map(|p| p.source.source_id.as_str()).collect::<Vec<_>>(),
            "Round planned"
        );

        state.current_round = round;
        state.usage.rounds += 1;
        state.round_scratch = RoundScratch {
            sources_planned: plan.len(),
            ..Default::default()
        };
        state.pending_plan = plan;
        self.advance(state, RunPhase::Crawling { round })
    }
}
