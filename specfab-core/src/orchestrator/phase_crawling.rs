//! CRAWLING
//!
//! Fetch the planned sources and stash the batches for extraction. A source
//! that exhausts its retries (or fails permanently) is excluded for the rest
//! of this run; a source still in flight at the round deadline is not.

use super::crawl::{crawl_round, CrawlContext, SourceOutcome};
use super::state::{RunPhase, RunState};
use super::RoundOrchestrator;
use crate::error::CoreResult;
use specfab_common::events::RunEvent;

impl RoundOrchestrator {
    pub(super) async fn phase_crawling(&self, state: &mut RunState, round: u32) -> CoreResult<()> {
        let plans = std::mem::take(&mut state.pending_plan);

        // A planned (field, source) pair counts as tried whatever the outcome
        for plan in &plans {
            for field in &plan.fields {
                state.mark_tried(field, &plan.source.source_id, round);
            }
        }

        let report = {
            let ctx = CrawlContext {
                run_id: state.run_id,
                round,
                target: &state.target,
                fetcher: self.fetcher.as_ref(),
                frontier: self.frontier.as_ref(),
                events: &self.event_bus,
                retry: self.settings.retry,
                concurrency: self.settings.crawl_concurrency,
                round_timeout: self.settings.round_timeout,
            };
            crawl_round(&ctx, plans).await
        };

        for outcome in report.outcomes {
            match outcome {
                SourceOutcome::Fetched { batch, .. } => {
                    state.usage.sources += 1;
                    state.round_scratch.sources_fetched += 1;
                    state.pending_batches.push(batch);
                }
                SourceOutcome::Failed {
                    plan,
                    failure,
                    attempts,
                } => {
                    state.usage.sources += 1;
                    state.round_scratch.sources_failed += 1;
                    let reason = format!("{} (after {} attempt(s))", failure, attempts);
                    tracing::warn!(
                        run_id = %state.run_id,
                        round,
                        source = %plan.source.source_id,
                        "Excluding source for this run: {}",
                        reason
                    );
                    self.event_bus.emit_lossy(RunEvent::SourceExcluded {
                        run_id: state.run_id,
                        round,
                        source_id: plan.source.source_id.clone(),
                        reason: reason.clone(),
                    });
                    state.excluded_sources.insert(plan.source.source_id, reason);
                }
                SourceOutcome::Skipped { plan } => {
                    tracing::debug!(
                        run_id = %state.run_id,
                        round,
                        source = %plan.source.source_id,
                        "Source skipped by frontier cooldown"
                    );
                }
            }
        }

        if !report.timed_out.is_empty() {
            state.usage.sources += report.timed_out.len() as u32;
            state.round_scratch.timed_out = true;
        }

        tracing::info!(
            run_id = %state.run_id,
            round,
            fetched = state.round_scratch.sources_fetched,
            failed = state.round_scratch.sources_failed,
            timed_out = report.timed_out.len(),
            "Crawl finished"
        );

        self.advance(state, RunPhase::Extracting { round })
    }
}
