//! Round orchestrator
//!
//! Drives one product run through bounded rounds of evidence collection.
//!
//! # State Progression
//! QUEUED → (PLANNING → CRAWLING → EXTRACTING → VALIDATING → ROUND_COMPLETE)×N
//! → CONFLICT_RESOLUTION → HUMAN_REVIEW_PENDING | COMPLETE
//!
//! Any live state may fall to FAILED on a fatal error or a mid-round budget
//! overrun.
//!
//! # Architecture
//! [`RoundOrchestrator::step`] takes a [`RunState`] by value and returns its
//! successor after exactly one phase. Each phase lives in a `phase_*` module:
//!
//! - **PLANNING**: pick sources for the fields still open
//! - **CRAWLING**: frontier check, bounded fan-out, retry with backoff
//! - **EXTRACTING**: identity gate, budget charge, history append
//! - **VALIDATING**: normalize → audit → consensus → cross-validate over the
//!   whole history
//! - **ROUND_COMPLETE**: round summary and stop conditions
//! - **CONFLICT_RESOLUTION**: route open conflicts to review
//!
//! Errors never escape `step`: they are recorded on the state, which moves to
//! FAILED.

pub mod budget;
pub mod collaborators;
pub mod crawl;
pub mod planner;
pub mod pool;
pub mod state;
pub mod stop;
pub mod validate;

mod phase_crawling;
mod phase_extracting;
mod phase_planning;
mod phase_resolution;
mod phase_round_complete;
mod phase_validating;

pub use budget::{BudgetCeiling, BudgetUsage, RunBudget};
pub use collaborators::{
    AcceptAllIdentity, EvidenceFetcher, FetchUsage, FetchedPage, FrontierDecision, FrontierStore,
    IdentityFailure, IdentityGate, IdentityVerdict, InMemoryFrontier, ProductTarget, SourceBatch,
    SourceDescriptor, SourcePlan,
};
pub use pool::RunPool;
pub use state::{FieldStatus, PhaseTransition, RoundSummary, RunPhase, RunState, StopReason};
pub use validate::{validate_history, ValidationPass};

use crate::config::OrchestratorSettings;
use crate::error::{CoreError, CoreResult};
use crate::evidence::{EvidenceAuditor, EvidencePack};
use crate::normalize::ComponentLookup;
use crate::record::ProductRecord;
use crate::rules::FieldRuleTable;
use crate::types::{ExtractionMethod, RawCandidate};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use specfab_common::events::{EventBus, RunEvent};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One product to run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub target: ProductTarget,
    pub sources: Vec<SourceDescriptor>,
    /// Falls back to the orchestrator's default budget
    #[serde(default)]
    pub budget: Option<RunBudget>,
}

/// Round orchestrator service
///
/// Cheap to clone; every collaborator is shared.
#[derive(Clone)]
pub struct RoundOrchestrator {
    table: Arc<FieldRuleTable>,
    components: Arc<dyn ComponentLookup>,
    fetcher: Arc<dyn EvidenceFetcher>,
    identity: Arc<dyn IdentityGate>,
    frontier: Arc<dyn FrontierStore>,
    event_bus: EventBus,
    settings: OrchestratorSettings,
    auditor: EvidenceAuditor,
    cancel_token: CancellationToken,
}

impl RoundOrchestrator {
    /// Create an orchestrator that accepts every page and dedups URLs in memory
    pub fn new(
        table: Arc<FieldRuleTable>,
        components: Arc<dyn ComponentLookup>,
        fetcher: Arc<dyn EvidenceFetcher>,
        event_bus: EventBus,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            table,
            components,
            fetcher,
            identity: Arc::new(AcceptAllIdentity),
            frontier: Arc::new(InMemoryFrontier::default()),
            event_bus,
            settings,
            auditor: EvidenceAuditor::default(),
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityGate>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_frontier(mut self, frontier: Arc<dyn FrontierStore>) -> Self {
        self.frontier = frontier;
        self
    }

    pub fn with_cancellation(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    pub fn table(&self) -> &FieldRuleTable {
        &self.table
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    /// Create the run state for `request` (QUEUED)
    pub fn start(&self, request: RunRequest) -> RunState {
        let budget = request.budget.unwrap_or(self.settings.default_budget);
        let state = RunState::new(request.target, request.sources, budget);

        tracing::info!(
            run_id = %state.run_id,
            product_id = %state.target.product_id,
            category = %state.target.category,
            sources = state.sources.len(),
            max_rounds = budget.max_rounds,
            "Starting product run"
        );
        if state.target.category != self.table.category {
            tracing::warn!(
                run_id = %state.run_id,
                product_category = %state.target.category,
                table_category = %self.table.category,
                "Product category differs from rule table category"
            );
        }

        self.event_bus.emit_lossy(RunEvent::RunStarted {
            run_id: state.run_id,
            product_id: state.target.product_id.clone(),
            timestamp: Utc::now(),
        });
        state
    }

    /// Advance the run by exactly one phase
    ///
    /// Settled states (COMPLETE, FAILED, HUMAN_REVIEW_PENDING) come back
    /// unchanged.
    pub async fn step(&self, mut state: RunState) -> RunState {
        let result = match state.phase {
            RunPhase::Queued => self.advance(&mut state, RunPhase::Planning { round: 1 }),
            RunPhase::Planning { round } => self.phase_planning(&mut state, round),
            RunPhase::Crawling { round } => self.phase_crawling(&mut state, round).await,
            RunPhase::Extracting { round } => self.phase_extracting(&mut state, round).await,
            RunPhase::Validating { round } => self.phase_validating(&mut state, round),
            RunPhase::RoundComplete { round } => self.phase_round_complete(&mut state, round),
            RunPhase::ConflictResolution => self.phase_resolution(&mut state),
            RunPhase::HumanReviewPending | RunPhase::Complete | RunPhase::Failed => Ok(()),
        };

        if let Err(e) = result {
            let old_phase = state.phase;
            state.fail(&e);
            self.emit_state_change(&state, old_phase);
        }
        state
    }

    /// Step until the current round has been decided (next round planned, or
    /// the run settled)
    pub async fn run_round(&self, mut state: RunState) -> RunState {
        loop {
            let before = state.phase;
            state = self.step(state).await;
            if state.phase.is_settled() || matches!(before, RunPhase::RoundComplete { .. }) {
                return state;
            }
        }
    }

    /// Step until the run settles
    pub async fn run_to_completion(&self, mut state: RunState) -> RunState {
        // Every round is five steps; planning, resolution and the queue add a few more
        let step_limit = (state.budget.max_rounds as usize + 2) * 6;
        let mut steps = 0;
        while !state.phase.is_settled() {
            if steps >= step_limit {
                let e = CoreError::InvalidState(format!("run did not settle within {} steps", step_limit));
                let old_phase = state.phase;
                state.fail(&e);
                self.emit_state_change(&state, old_phase);
                break;
            }
            state = self.step(state).await;
            steps += 1;
        }
        state
    }

    /// Start, drive and finalize one product
    pub async fn run(&self, request: RunRequest) -> CoreResult<(RunState, ProductRecord)> {
        let state = self.start(request);
        let state = self.run_to_completion(state).await;
        let record = self.finalize(&state)?;
        Ok((state, record))
    }

    /// Feed reviewer overrides back through normalization and audit
    ///
    /// Only valid while the run waits for review. Overrides are manual
    /// candidates that carry their own evidence; the pass re-runs over the
    /// whole history and the run re-enters CONFLICT_RESOLUTION.
    pub fn apply_overrides(
        &self,
        mut state: RunState,
        overrides: Vec<RawCandidate>,
        pack: EvidencePack,
    ) -> CoreResult<RunState> {
        if state.phase != RunPhase::HumanReviewPending {
            return Err(CoreError::InvalidState(format!(
                "overrides require {}, run is in {}",
                RunPhase::HumanReviewPending,
                state.phase
            )));
        }

        let round = state.current_round;
        let count = overrides.len();
        state.evidence.extend(pack);
        for mut candidate in overrides {
            candidate.method = ExtractionMethod::Manual;
            candidate.round = round;
            state.history.push(candidate);
        }

        tracing::info!(
            run_id = %state.run_id,
            overrides = count,
            "Applying reviewer overrides"
        );

        self.revalidate(&mut state, round);
        self.advance(&mut state, RunPhase::ConflictResolution)?;
        Ok(state)
    }

    /// Produce the product record for a settled run
    pub fn finalize(&self, state: &RunState) -> CoreResult<ProductRecord> {
        let record = ProductRecord::from_state(state, &self.table)?;

        tracing::info!(
            run_id = %state.run_id,
            product_id = %record.product_id,
            status = record.status.as_str(),
            known = record.metrics.known_fields,
            unknown = record.metrics.unknown_fields,
            coverage = record.metrics.coverage,
            "Run finalized"
        );

        self.event_bus.emit_lossy(RunEvent::RunCompleted {
            run_id: state.run_id,
            product_id: record.product_id.clone(),
            status: record.status.as_str().to_string(),
            coverage: record.metrics.coverage,
            rounds_used: record.metrics.rounds_used,
            timestamp: Utc::now(),
        });
        Ok(record)
    }

    /// Legal transition plus state_changed event
    fn advance(&self, state: &mut RunState, next: RunPhase) -> CoreResult<()> {
        let old_phase = state.phase;
        state.transition_to(next)?;
        self.emit_state_change(state, old_phase);
        Ok(())
    }

    fn emit_state_change(&self, state: &RunState, old_phase: RunPhase) {
        if old_phase == state.phase {
            return;
        }
        self.event_bus.emit_lossy(RunEvent::StateChanged {
            run_id: state.run_id,
            old_state: old_phase.to_string(),
            new_state: state.phase.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Stop collecting: open conflicts go through resolution, otherwise done
    fn settle(&self, state: &mut RunState, reason: StopReason) -> CoreResult<()> {
        if state.stop_reason.is_none() {
            state.stop_reason = Some(reason);
        }
        tracing::info!(
            run_id = %state.run_id,
            round = state.current_round,
            reason = ?reason,
            coverage = state.coverage,
            "Stopping run"
        );
        let next = if state.unresolved.is_empty() {
            RunPhase::Complete
        } else {
            RunPhase::ConflictResolution
        };
        self.advance(state, next)
    }
}
