//! Run state machine data
//!
//! [`RunState`] is owned by exactly one driver at a time. Every mutation goes
//! through the orchestrator's step function, which takes the state by value
//! and returns the successor, so the whole state can be serialized between
//! steps and resumed elsewhere.

use super::budget::{BudgetCeiling, BudgetUsage, RunBudget};
use super::collaborators::{ProductTarget, SourceBatch, SourceDescriptor, SourcePlan};
use crate::cross_validation::Violation;
use crate::error::{CoreError, RunFailure};
use crate::evidence::EvidencePack;
use crate::types::{RawCandidate, SelectedValue, UnresolvedConflict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Orchestrator FSM states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunPhase {
    Queued,
    Planning { round: u32 },
    Crawling { round: u32 },
    Extracting { round: u32 },
    Validating { round: u32 },
    RoundComplete { round: u32 },
    ConflictResolution,
    HumanReviewPending,
    Complete,
    Failed,
}

impl RunPhase {
    /// Terminal states (no further automatic progress)
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// States where a driver loop stops stepping
    pub fn is_settled(self) -> bool {
        self.is_terminal() || self == Self::HumanReviewPending
    }

    /// Whether `self → next` is a legal transition
    pub fn can_transition_to(self, next: RunPhase) -> bool {
        use RunPhase::*;
        if next == Failed {
            return !self.is_terminal();
        }
        match (self, next) {
            (Queued, Planning { round }) => round == 1,
            (Planning { round: a }, Crawling { round: b }) => a == b,
            (Planning { .. }, Complete | ConflictResolution) => true,
            (Crawling { round: a }, Extracting { round: b }) => a == b,
            (Extracting { round: a }, Validating { round: b }) => a == b,
            (Extracting { .. }, HumanReviewPending) => true,
            (Validating { round: a }, RoundComplete { round: b }) => a == b,
            (RoundComplete { round: a }, Planning { round: b }) => b == a + 1,
            (RoundComplete { .. }, ConflictResolution | Complete) => true,
            (ConflictResolution, HumanReviewPending | Complete) => true,
            (HumanReviewPending, ConflictResolution) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "QUEUED"),
            Self::Planning { round } => write!(f, "ROUND_{}_PLANNING", round),
            Self::Crawling { round } => write!(f, "ROUND_{}_CRAWLING", round),
            Self::Extracting { round } => write!(f, "ROUND_{}_EXTRACTING", round),
            Self::Validating { round } => write!(f, "ROUND_{}_VALIDATING", round),
            Self::RoundComplete { round } => write!(f, "ROUND_{}_COMPLETE", round),
            Self::ConflictResolution => write!(f, "CONFLICT_RESOLUTION"),
            Self::HumanReviewPending => write!(f, "HUMAN_REVIEW_PENDING"),
            Self::Complete => write!(f, "COMPLETE"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Why the run stopped collecting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    Cancelled,
    AllRequiredResolved,
    CoverageTargetMet,
    DiminishingReturns,
    BudgetExhausted { ceiling: BudgetCeiling },
    SourcesExhausted,
    IdentityUnconfirmed,
    BudgetExceeded,
    Fatal,
}

impl StopReason {
    /// Stops that leave reachable work undone
    pub fn cut_short(self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::BudgetExhausted { .. } | Self::BudgetExceeded
        )
    }
}

/// Recorded FSM transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: RunPhase,
    pub to: RunPhase,
    pub at: DateTime<Utc>,
}

/// Per-field diagnostics from the latest validation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldStatus {
    pub candidates_seen: usize,
    pub passed: usize,
    pub null_tokens: usize,
    pub normalization_failures: usize,
    pub audit_failures: usize,
    pub insufficient_evidence: bool,
    pub unresolved: bool,
    pub forced_by_cross_validation: bool,
    pub notes: Vec<String>,
}

/// Summary of one completed round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: u32,
    pub sources_planned: usize,
    pub sources_fetched: usize,
    pub sources_failed: usize,
    pub candidates: usize,
    pub newly_filled: usize,
    pub coverage: f64,
    pub timed_out: bool,
}

/// Everything the orchestrator knows about one product run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    pub target: ProductTarget,
    pub phase: RunPhase,
    pub current_round: u32,
    pub budget: RunBudget,
    pub usage: BudgetUsage,
    pub sources: Vec<SourceDescriptor>,
    /// source_id → reason, for this run only
    pub excluded_sources: BTreeMap<String, String>,
    pub field_sources_tried: BTreeMap<String, BTreeSet<String>>,
    pub field_rounds_tried: BTreeMap<String, BTreeSet<u32>>,
    /// Planning output consumed by crawling
    pub pending_plan: Vec<SourcePlan>,
    /// Crawl output consumed by extraction
    pub pending_batches: Vec<SourceBatch>,
    /// Every accepted raw candidate, all rounds
    pub history: Vec<RawCandidate>,
    pub evidence: EvidencePack,
    pub selected: BTreeMap<String, SelectedValue>,
    pub unresolved: BTreeMap<String, UnresolvedConflict>,
    pub field_status: BTreeMap<String, FieldStatus>,
    pub warnings: Vec<Violation>,
    pub coverage: f64,
    pub rounds: Vec<RoundSummary>,
    pub stale_rounds: u32,
    pub stop_reason: Option<StopReason>,
    pub failure: Option<RunFailure>,
    pub review_notes: Vec<String>,
    pub transitions: Vec<PhaseTransition>,
    pub started_at: DateTime<Utc>,
    /// Round-level bookkeeping carried from crawl to round completion
    #[serde(default)]
    pub round_scratch: RoundScratch,
}

/// Counters for the round in flight
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundScratch {
    pub sources_planned: usize,
    pub sources_fetched: usize,
    pub sources_failed: usize,
    pub candidates: usize,
    pub newly_filled: usize,
    pub timed_out: bool,
}

impl RunState {
    pub fn new(target: ProductTarget, sources: Vec<SourceDescriptor>, budget: RunBudget) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            target,
            phase: RunPhase::Queued,
            current_round: 0,
            budget,
            usage: BudgetUsage::default(),
            sources,
            excluded_sources: BTreeMap::new(),
            field_sources_tried: BTreeMap::new(),
            field_rounds_tried: BTreeMap::new(),
            pending_plan: Vec::new(),
            pending_batches: Vec::new(),
            history: Vec::new(),
            evidence: EvidencePack::new(),
            selected: BTreeMap::new(),
            unresolved: BTreeMap::new(),
            field_status: BTreeMap::new(),
            warnings: Vec::new(),
            coverage: 0.0,
            rounds: Vec::new(),
            stale_rounds: 0,
            stop_reason: None,
            failure: None,
            review_notes: Vec::new(),
            transitions: Vec::new(),
            started_at: Utc::now(),
            round_scratch: RoundScratch::default(),
        }
    }

    /// Move to `next`, refusing transitions outside the legal table
    pub fn transition_to(&mut self, next: RunPhase) -> Result<(), CoreError> {
        if !self.phase.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        tracing::debug!(
            run_id = %self.run_id,
            "State transition: {} -> {}",
            self.phase,
            next
        );
        self.transitions.push(PhaseTransition {
            from: self.phase,
            to: next,
            at: Utc::now(),
        });
        self.phase = next;
        Ok(())
    }

    /// Record a fatal error and move to FAILED
    pub fn fail(&mut self, error: &CoreError) {
        tracing::error!(run_id = %self.run_id, phase = %self.phase, "Run failed: {}", error);
        self.failure = Some(RunFailure::from(error));
        if self.stop_reason.is_none() {
            self.stop_reason = Some(match error {
                CoreError::BudgetExceeded(_) => StopReason::BudgetExceeded,
                _ => StopReason::Fatal,
            });
        }
        if !self.phase.is_terminal() {
            self.transitions.push(PhaseTransition {
                from: self.phase,
                to: RunPhase::Failed,
                at: Utc::now(),
            });
            self.phase = RunPhase::Failed;
        }
    }

    pub fn elapsed_secs(&self) -> u64 {
        (Utc::now() - self.started_at).num_seconds().max(0) as u64
    }

    pub fn is_excluded(&self, source_id: &str) -> bool {
        self.excluded_sources.contains_key(source_id)
    }

    pub fn mark_tried(&mut self, field_key: &str, source_id: &str, round: u32) {
        self.field_sources_tried
            .entry(field_key.to_string())
            .or_default()
            .insert(source_id.to_string());
        self.field_rounds_tried
            .entry(field_key.to_string())
            .or_default()
            .insert(round);
    }

    pub fn was_tried(&self, field_key: &str, source_id: &str) -> bool {
        self.field_sources_tried
            .get(field_key)
            .is_some_and(|s| s.contains(source_id))
    }

    /// Serialize for persistence between driver invocations
    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> RunState {
        RunState::new(
            ProductTarget {
                product_id: "razer-viper-v3-pro".into(),
                category: "mouse".into(),
                brand: Some("Razer".into()),
                model: Some("Viper V3 Pro".into()),
                variant: None,
                hard_ids: vec![],
            },
            vec![],
            RunBudget::default(),
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut s = state();
        for next in [
            RunPhase::Planning { round: 1 },
            RunPhase::Crawling { round: 1 },
            RunPhase::Extracting { round: 1 },
            RunPhase::Validating { round: 1 },
            RunPhase::RoundComplete { round: 1 },
            RunPhase::Planning { round: 2 },
            RunPhase::Complete,
        ] {
            s.transition_to(next).unwrap();
        }
        assert_eq!(s.transitions.len(), 7);
        assert!(s.phase.is_terminal());
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        let mut s = state();
        let err = s.transition_to(RunPhase::Crawling { round: 1 }).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
        s.transition_to(RunPhase::Planning { round: 1 }).unwrap();
        assert!(s.transition_to(RunPhase::Crawling { round: 2 }).is_err());
        assert!(!RunPhase::Complete.can_transition_to(RunPhase::Failed));
    }

    #[test]
    fn test_fail_from_any_live_state() {
        let mut s = state();
        s.fail(&CoreError::BudgetExceeded("pages 121 > 120".into()));
        assert_eq!(s.phase, RunPhase::Failed);
        assert_eq!(s.stop_reason, Some(StopReason::BudgetExceeded));
        assert_eq!(s.failure.as_ref().unwrap().kind, "budget_exceeded");
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(RunPhase::Validating { round: 2 }.to_string(), "ROUND_2_VALIDATING");
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let mut s = state();
        s.transition_to(RunPhase::Planning { round: 1 }).unwrap();
        s.mark_tried("weight", "maker", 1);
        let restored = RunState::from_json(&s.to_json().unwrap()).unwrap();
        assert_eq!(restored.phase, RunPhase::Planning { round: 1 });
        assert!(restored.was_tried("weight", "maker"));
        assert_eq!(restored.run_id, s.run_id);
    }
}
