//! ROUND_COMPLETE
//!
//! Record the round summary, then either stop or plan the next round.

use super::budget::BudgetCeiling;
use super::state::{RoundSummary, RunPhase, RunState, StopReason};
use super::stop::stop_reason;
use super::RoundOrchestrator;
use crate::error::CoreResult;
use specfab_common::events::RunEvent;

impl RoundOrchestrator {
    pub(super) fn phase_round_complete(&self, state: &mut RunState, round: u32) -> CoreResult<()> {
        let scratch = std::mem::take(&mut state.round_scratch);
        if scratch.newly_filled < self.settings.min_new_fields_per_round {
            state.stale_rounds += 1;
        } else {
            state.stale_rounds = 0;
        }

        state.rounds.push(RoundSummary {
            round,
            sources_planned: scratch.sources_planned,
            sources_fetched: scratch.sources_fetched,
            sources_failed: scratch.sources_failed,
            candidates: scratch.candidates,
            newly_filled: scratch.newly_filled,
            coverage: state.coverage,
            timed_out: scratch.timed_out,
        });
        self.event_bus.emit_lossy(RunEvent::RoundCompleted {
            run_id: state.run_id,
            round,
            newly_filled: scratch.newly_filled,
            coverage: state.coverage,
        });

        match stop_reason(state, &self.table, &self.settings, self.cancel_token.is_cancelled()) {
            Some(reason) => {
                if reason
                    == (StopReason::BudgetExhausted {
                        ceiling: BudgetCeiling::WallClock,
                    })
                {
                    self.event_bus.emit_lossy(RunEvent::MaxRunSecondsReached {
                        run_id: state.run_id,
                        elapsed_secs: state.elapsed_secs(),
                    });
                }
                self.settle(state, reason)
            }
            None => {
                tracing::debug!(
                    run_id = %state.run_id,
                    round,
                    stale_rounds = state.stale_rounds,
                    "Continuing to next round"
                );
                self.advance(state, RunPhase::Planning { round: round + 1 })
            }
        }
    }
}
