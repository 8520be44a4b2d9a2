// Product Record
//
// Concept: The single externally visible result of a run.
//
// Every declared field appears exactly once, either known (value, confidence,
// agreement, cited evidence) or unknown with one reason code and a trace of
// what was tried. Every cited location of a known value is audited again
// against the run's evidence pack with the field's quote threshold; a value
// that fails is demoted to unknown(evidence_missing) at this point, so nothing
// leaves the core without verifiable provenance.
//
// Unknown reason precedence:
// 1. run cancelled → budget_exhausted
// 2. conflict left open, or forced out by cross-validation → conflicting_sources_unresolved
// 3. candidates failed audit or cited too little evidence → evidence_missing
// 4. identity could not be confirmed → identity_unconfirmed
// 5. run cut short with sources still untried → budget_exhausted
// 6. null tokens seen and nothing unparseable → not_publicly_disclosed
// 7. candidates failed normalization → normalization_failed
// 8. otherwise → not_found_after_search

use crate::cross_validation::Violation;
use crate::error::{CoreError, CoreResult, RunFailure};
use crate::evidence::{EvidenceAuditor, EvidencePack};
use crate::orchestrator::planner::has_untried_source;
use crate::orchestrator::{BudgetUsage, FieldStatus, RunBudget, RunPhase, RunState, StopReason};
use crate::rules::FieldRuleTable;
use crate::types::{
    Agreement, Alternate, AttemptTrace, ClusterSummary, Confidence, EvidenceRef, SelectedValue, TypedValue,
    UnknownReason, UnknownValue,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

// ============================================================================
// Record Types
// ============================================================================

/// Final run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Complete,
    HumanReviewPending,
    Failed,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::HumanReviewPending => "human_review_pending",
            Self::Failed => "failed",
        }
    }
}

/// Outcome of one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FieldOutcome {
    Known {
        /// `None` for source-dependent fields (values live in `alternates`)
        value: Option<TypedValue>,
        confidence: Confidence,
        agreement: Agreement,
        provenance: Vec<EvidenceRef>,
        origin_candidate_id: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        alternates: Vec<Alternate>,
        #[serde(default)]
        needs_curation: bool,
    },
    Unknown(UnknownValue),
}

impl FieldOutcome {
    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known { .. })
    }

    pub fn value(&self) -> Option<&TypedValue> {
        match self {
            Self::Known { value, .. } => value.as_ref(),
            Self::Unknown(_) => None,
        }
    }

    pub fn unknown_reason(&self) -> Option<UnknownReason> {
        match self {
            Self::Known { .. } => None,
            Self::Unknown(unknown) => Some(unknown.reason),
        }
    }
}

/// Open conflict handed to reviewers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub field_key: String,
    pub provisional: SelectedValue,
    pub clusters: Vec<ClusterSummary>,
}

/// Run-level metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub coverage: f64,
    pub rounds_used: u32,
    pub budget: RunBudget,
    pub budget_used: BudgetUsage,
    pub known_fields: usize,
    pub unknown_fields: usize,
    pub candidates_total: usize,
    pub sources_excluded: usize,
    pub elapsed_secs: u64,
}

/// Final product record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub run_id: Uuid,
    pub product_id: String,
    pub category: String,
    pub status: RecordStatus,
    pub fields: BTreeMap<String, FieldOutcome>,
    #[serde(default)]
    pub review: Vec<ReviewItem>,
    #[serde(default)]
    pub review_notes: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<Violation>,
    pub metrics: RunMetrics,
    pub stop_reason: Option<StopReason>,
    pub error: Option<RunFailure>,
    pub finalized_at: DateTime<Utc>,
}

impl ProductRecord {
    /// Build the record for a settled run
    pub fn from_state(state: &RunState, table: &FieldRuleTable) -> CoreResult<Self> {
        let status = match state.phase {
            RunPhase::Complete => RecordStatus::Complete,
            RunPhase::HumanReviewPending => RecordStatus::HumanReviewPending,
            RunPhase::Failed => RecordStatus::Failed,
            other => {
                return Err(CoreError::InvalidState(format!(
                    "cannot finalize a run in {}",
                    other
                )))
            }
        };

        let auditor = EvidenceAuditor::default();
        let mut fields = BTreeMap::new();
        for key in table.field_order() {
            let threshold = table
                .get(key)
                .map_or(auditor.default_threshold(), |rule| rule.evidence.quote_threshold);
            let outcome = match state.selected.get(key) {
                Some(selected) if evidence_supports(&auditor, selected, &state.evidence, threshold) => {
                    known(selected)
                }
                Some(_) => {
                    tracing::warn!(
                        run_id = %state.run_id,
                        field = %key,
                        "Known value cites evidence the pack does not support, demoting to unknown"
                    );
                    FieldOutcome::Unknown(UnknownValue {
                        field_key: key.clone(),
                        reason: UnknownReason::EvidenceMissing,
                        attempt_trace: attempt_trace(state, key),
                    })
                }
                None => FieldOutcome::Unknown(UnknownValue {
                    field_key: key.clone(),
                    reason: unknown_reason(state, key),
                    attempt_trace: attempt_trace(state, key),
                }),
            };
            fields.insert(key.clone(), outcome);
        }

        let review = state
            .unresolved
            .values()
            .map(|conflict| ReviewItem {
                field_key: conflict.field_key.clone(),
                provisional: conflict.provisional.clone(),
                clusters: conflict.clusters.clone(),
            })
            .collect();

        let known_fields = fields.values().filter(|f| f.is_known()).count();
        let metrics = RunMetrics {
            coverage: state.coverage,
            rounds_used: state.usage.rounds,
            budget: state.budget,
            budget_used: state.usage,
            known_fields,
            unknown_fields: fields.len() - known_fields,
            candidates_total: state.history.len(),
            sources_excluded: state.excluded_sources.len(),
            elapsed_secs: state.elapsed_secs(),
        };

        Ok(Self {
            run_id: state.run_id,
            product_id: state.target.product_id.clone(),
            category: state.target.category.clone(),
            status,
            fields,
            review,
            review_notes: state.review_notes.clone(),
            warnings: state.warnings.clone(),
            metrics,
            stop_reason: state.stop_reason,
            error: state.failure.clone(),
            finalized_at: Utc::now(),
        })
    }

    pub fn field(&self, key: &str) -> Option<&FieldOutcome> {
        self.fields.get(key)
    }

    pub fn to_json_pretty(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn known(selected: &SelectedValue) -> FieldOutcome {
    FieldOutcome::Known {
        value: selected.value.clone(),
        confidence: selected.confidence,
        agreement: selected.agreement,
        provenance: selected.evidence.clone(),
        origin_candidate_id: selected.origin_candidate_id.clone(),
        alternates: selected.alternates.clone(),
        needs_curation: selected.needs_curation,
    }
}

/// At least one cited location, and every cited quote still supported by the pack
fn evidence_supports(auditor: &EvidenceAuditor, selected: &SelectedValue, pack: &EvidencePack, threshold: f64) -> bool {
    let cited = selected.cited_evidence();
    !cited.is_empty()
        && cited
            .iter()
            .all(|e| auditor.check(e, pack, threshold).is_passed())
}

fn unknown_reason(state: &RunState, key: &str) -> UnknownReason {
    let default_status = FieldStatus::default();
    let status = state.field_status.get(key).unwrap_or(&default_status);

    if state.stop_reason == Some(StopReason::Cancelled) {
        return UnknownReason::BudgetExhausted;
    }
    if state.unresolved.contains_key(key) || status.unresolved || status.forced_by_cross_validation {
        return UnknownReason::ConflictingSourcesUnresolved;
    }
    if status.audit_failures > 0 || status.insufficient_evidence {
        return UnknownReason::EvidenceMissing;
    }
    if state.stop_reason == Some(StopReason::IdentityUnconfirmed) {
        return UnknownReason::IdentityUnconfirmed;
    }
    if state.stop_reason.is_some_and(StopReason::cut_short) && has_untried_source(state, key) {
        return UnknownReason::BudgetExhausted;
    }
    if status.null_tokens > 0 && status.normalization_failures == 0 {
        return UnknownReason::NotPubliclyDisclosed;
    }
    if status.normalization_failures > 0 {
        return UnknownReason::NormalizationFailed;
    }
    UnknownReason::NotFoundAfterSearch
}

fn attempt_trace(state: &RunState, key: &str) -> AttemptTrace {
    let rounds = state
        .field_rounds_tried
        .get(key)
        .map(|r| r.iter().copied().collect())
        .unwrap_or_default();
    let sources = state
        .field_sources_tried
        .get(key)
        .map(|s| s.iter().cloned().collect())
        .unwrap_or_default();
    let (candidates_seen, notes) = state
        .field_status
        .get(key)
        .map(|s| (s.candidates_seen, dedupe(&s.notes)))
        .unwrap_or_default();
    AttemptTrace {
        rounds,
        sources,
        candidates_seen,
        notes,
    }
}

fn dedupe(notes: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    notes.iter().filter(|n| seen.insert(n.as_str())).cloned().collect()
}
