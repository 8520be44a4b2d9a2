//! Round crawling: frontier check, bounded fan-out, retry with backoff
//!
//! Each planned source is fetched independently; one failing source never
//! fails the round. The round deadline stops waiting for stragglers and moves
//! on with whatever arrived.

use super::collaborators::{EvidenceFetcher, FrontierStore, ProductTarget, SourceBatch, SourcePlan};
use crate::config::RetryPolicy;
use crate::error::SourceFailure;
use futures::stream::{self, StreamExt};
use specfab_common::events::{EventBus, RunEvent};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of one planned source
#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    Fetched { plan: SourcePlan, batch: SourceBatch },
    /// Retries exhausted or permanent failure: exclude for this run
    Failed { plan: SourcePlan, failure: SourceFailure, attempts: u32 },
    /// Frontier denied the URL (cooldown)
    Skipped { plan: SourcePlan },
}

/// Everything one crawl phase produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlReport {
    pub outcomes: Vec<SourceOutcome>,
    /// Plans still in flight when the round deadline passed
    pub timed_out: Vec<SourcePlan>,
}

/// Shared collaborators and knobs for one crawl phase
pub struct CrawlContext<'a> {
    pub run_id: Uuid,
    pub round: u32,
    pub target: &'a ProductTarget,
    pub fetcher: &'a dyn EvidenceFetcher,
    pub frontier: &'a dyn FrontierStore,
    pub events: &'a EventBus,
    pub retry: RetryPolicy,
    pub concurrency: usize,
    pub round_timeout: Duration,
}

/// Fetch every planned source, at most `concurrency` at a time
pub async fn crawl_round(ctx: &CrawlContext<'_>, plans: Vec<SourcePlan>) -> CrawlReport {
    let deadline = Instant::now() + ctx.round_timeout;
    let mut report = CrawlReport::default();

    // Frontier check first so denied URLs never occupy a fetch slot
    let mut allowed = Vec::with_capacity(plans.len());
    for plan in plans {
        let decision = ctx.frontier.check_and_mark(&plan.source.url).await;
        if decision.allowed {
            allowed.push(plan);
        } else {
            debug!(
                run_id = %ctx.run_id,
                source = %plan.source.source_id,
                cooldown_until = ?decision.cooldown_until,
                "Frontier denied source"
            );
            report.outcomes.push(SourceOutcome::Skipped { plan });
        }
    }

    let mut in_flight: Vec<SourcePlan> = allowed.clone();
    let mut results = stream::iter(allowed)
        .map(|plan| fetch_with_retry(ctx, plan))
        .buffer_unordered(ctx.concurrency.max(1));

    loop {
        match tokio::time::timeout_at(deadline, results.next()).await {
            Ok(Some(outcome)) => {
                let finished = match &outcome {
                    SourceOutcome::Fetched { plan, .. }
                    | SourceOutcome::Failed { plan, .. }
                    | SourceOutcome::Skipped { plan } => plan.source.source_id.clone(),
                };
                in_flight.retain(|p| p.source.source_id != finished);
                report.outcomes.push(outcome);
            }
            Ok(None) => break,
            Err(_) => {
                warn!(
                    run_id = %ctx.run_id,
                    round = ctx.round,
                    pending = in_flight.len(),
                    "Round timeout reached, continuing with arrived results"
                );
                report.timed_out = in_flight;
                break;
            }
        }
    }

    report
}

async fn fetch_with_retry(ctx: &CrawlContext<'_>, plan: SourcePlan) -> SourceOutcome {
    let source_id = plan.source.source_id.clone();
    let max_attempts = ctx.retry.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        ctx.events.emit_lossy(RunEvent::SourceFetchStarted {
            run_id: ctx.run_id,
            round: ctx.round,
            source_id: source_id.clone(),
            attempt,
        });

        match ctx.fetcher.fetch_evidence(ctx.target, ctx.round, &plan).await {
            Ok(batch) => return SourceOutcome::Fetched { plan, batch },
            Err(failure) => {
                ctx.events.emit_lossy(RunEvent::SourceFetchFailed {
                    run_id: ctx.run_id,
                    round: ctx.round,
                    source_id: source_id.clone(),
                    attempt,
                    error: failure.to_string(),
                });

                if !failure.is_retryable() || attempt >= max_attempts {
                    warn!(
                        run_id = %ctx.run_id,
                        source = %source_id,
                        attempts = attempt,
                        "Source failed: {}",
                        failure
                    );
                    return SourceOutcome::Failed {
                        plan,
                        failure,
                        attempts: attempt,
                    };
                }

                let backoff = ctx.retry.backoff(attempt);
                debug!(
                    run_id = %ctx.run_id,
                    source = %source_id,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Retrying source after transient failure: {}",
                    failure
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
