//! EXTRACTING
//!
//! Charge the round's usage, confirm page identity and append the surviving
//! candidates to the run history.

use super::state::{RunPhase, RunState, StopReason};
use super::RoundOrchestrator;
use crate::error::{CoreError, CoreResult};
use specfab_common::events::RunEvent;
use std::collections::HashSet;

impl RoundOrchestrator {
    pub(super) async fn phase_extracting(&self, state: &mut RunState, round: u32) -> CoreResult<()> {
        let batches = std::mem::take(&mut state.pending_batches);

        for batch in &batches {
            state
                .usage
                .charge(batch.usage.pages, batch.usage.model_calls, batch.usage.cost);
        }
        if let Some((ceiling, detail)) = state.budget.overrun(&state.usage) {
            tracing::error!(
                run_id = %state.run_id,
                round,
                ceiling = %ceiling,
                "Budget ceiling overrun mid-round: {}",
                detail
            );
            return Err(CoreError::BudgetExceeded(detail));
        }

        for batch in batches {
            let mut dropped_urls = HashSet::new();
            for page in &batch.pages {
                match self.identity.confirm_identity(page, &state.target).await {
                    Ok(verdict) if verdict.confidence >= self.settings.identity_min_confidence => {}
                    Ok(verdict) => {
                        tracing::debug!(
                            run_id = %state.run_id,
                            url = %page.url,
                            confidence = verdict.confidence,
                            reasons = ?verdict.reason_codes,
                            "Dropping page below identity threshold"
                        );
                        dropped_urls.insert(page.url.clone());
                    }
                    Err(e) => {
                        // Never retried: a reviewer has to settle identity
                        tracing::warn!(
                            run_id = %state.run_id,
                            round,
                            source = %batch.source_id,
                            "Identity gate failed: {}",
                            e
                        );
                        state.stop_reason = Some(StopReason::IdentityUnconfirmed);
                        state.review_notes.push(e.to_string());
                        return self.advance(state, RunPhase::HumanReviewPending);
                    }
                }
            }

            let offered = batch.candidates.len();
            let accepted: Vec<_> = batch
                .candidates
                .into_iter()
                .filter(|c| !dropped_urls.contains(&c.evidence.url))
                .map(|c| c.with_round(round))
                .collect();

            tracing::debug!(
                run_id = %state.run_id,
                round,
                source = %batch.source_id,
                offered,
                accepted = accepted.len(),
                pages = batch.pages.len(),
                "Source batch extracted"
            );
            self.event_bus.emit_lossy(RunEvent::SourceProcessed {
                run_id: state.run_id,
                round,
                source_id: batch.source_id.clone(),
                candidates: accepted.len(),
                pages: batch.pages.len(),
            });

            state.round_scratch.candidates += accepted.len();
            state.history.extend(accepted);
            state.evidence.extend(batch.pack);
        }

        self.advance(state, RunPhase::Validating { round })
    }
}
