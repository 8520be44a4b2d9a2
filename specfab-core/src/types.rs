// Shared Types and Data Contracts
//
// This module defines the explicit contracts between the pipeline stages:
// raw candidates from the extraction layer, validated candidates produced by
// normalization + audit, and the per-field outcomes produced by consensus.
//
// Every type here is plain data. Stages never mutate a value they received;
// a later round supersedes earlier values by producing new ones.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Confidence score in [0.0, 1.0]
pub type Confidence = f64;

// ============================================================================
// Sources and Evidence
// ============================================================================

/// Source trust tier (1 = manufacturer … 5 = aggregator)
///
/// Ordering follows trust: `Manufacturer < Lab` means the manufacturer ranks
/// higher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    Manufacturer, // weight: 1.0
    Lab,          // weight: 0.8
    Retailer,     // weight: 0.5
    Community,    // weight: 0.3
    Aggregator,   // weight: 0.15
}

impl SourceTier {
    pub const ALL: [SourceTier; 5] = [
        SourceTier::Manufacturer,
        SourceTier::Lab,
        SourceTier::Retailer,
        SourceTier::Community,
        SourceTier::Aggregator,
    ];

    /// Fixed consensus weight for this tier
    pub fn weight(self) -> f64 {
        match self {
            Self::Manufacturer => 1.0,
            Self::Lab => 0.8,
            Self::Retailer => 0.5,
            Self::Community => 0.3,
            Self::Aggregator => 0.15,
        }
    }

    /// Numeric rank 1–5
    pub fn rank(self) -> u8 {
        match self {
            Self::Manufacturer => 1,
            Self::Lab => 2,
            Self::Retailer => 3,
            Self::Community => 4,
            Self::Aggregator => 5,
        }
    }

    pub fn from_rank(rank: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.rank() == rank)
    }
}

impl fmt::Display for SourceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Manufacturer => "manufacturer",
            Self::Lab => "lab",
            Self::Retailer => "retailer",
            Self::Community => "community",
            Self::Aggregator => "aggregator",
        };
        write!(f, "{}", name)
    }
}

/// How a candidate value was extracted from its evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Parser / table reader
    Deterministic,
    /// Language-model extraction
    Llm,
    /// Human override carrying its own evidence
    Manual,
}

/// Character span of a quote inside its snippet text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteSpan {
    pub start: usize,
    pub end: usize,
}

/// Provenance tuple proving a candidate appeared on a real page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub url: String,
    pub snippet_id: String,
    pub quote: String,
    #[serde(default)]
    pub quote_span: Option<QuoteSpan>,
}

impl EvidenceRef {
    pub fn new(url: impl Into<String>, snippet_id: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            snippet_id: snippet_id.into(),
            quote: quote.into(),
            quote_span: None,
        }
    }

    /// (url, snippet_id) pair identifying the cited snippet
    pub fn locator(&self) -> (&str, &str) {
        (self.url.as_str(), self.snippet_id.as_str())
    }
}

// ============================================================================
// Candidates
// ============================================================================

/// A single proposed field value from one source and one piece of evidence
///
/// Produced by the extraction layer (or a human override) and never modified
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCandidate {
    #[serde(default = "new_candidate_id")]
    pub candidate_id: String,
    pub field_key: String,
    pub value: serde_json::Value,
    pub source_id: String,
    pub source_tier: SourceTier,
    pub evidence: EvidenceRef,
    pub method: ExtractionMethod,
    pub raw_confidence: Confidence,
    /// Round that produced the candidate (0 for overrides submitted before a run)
    #[serde(default)]
    pub round: u32,
}

fn new_candidate_id() -> String {
    Uuid::new_v4().to_string()
}

impl RawCandidate {
    pub fn new(
        field_key: impl Into<String>,
        value: serde_json::Value,
        source_id: impl Into<String>,
        source_tier: SourceTier,
        evidence: EvidenceRef,
        method: ExtractionMethod,
        raw_confidence: Confidence,
    ) -> Self {
        Self {
            candidate_id: new_candidate_id(),
            field_key: field_key.into(),
            value,
            source_id: source_id.into(),
            source_tier,
            evidence,
            method,
            raw_confidence,
            round: 0,
        }
    }

    pub fn with_id(mut self, candidate_id: impl Into<String>) -> Self {
        self.candidate_id = candidate_id.into();
        self
    }

    pub fn with_round(mut self, round: u32) -> Self {
        self.round = round;
        self
    }
}

/// Typed, rule-compliant value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypedValue {
    Boolean(bool),
    Integer(i64),
    Number(f64),
    Text(String),
    List(Vec<TypedValue>),
}

impl TypedValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(i) => Some(*i as f64),
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[TypedValue]> {
        match self {
            Self::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Equality key used for clustering and dedupe (text is case-folded)
    pub fn cluster_key(&self) -> String {
        match self {
            Self::Boolean(b) => format!("b:{}", b),
            Self::Integer(i) => format!("n:{}", *i as f64),
            Self::Number(n) => format!("n:{}", n),
            Self::Text(s) => format!("t:{}", s.trim().to_lowercase()),
            Self::List(items) => {
                let keys: Vec<String> = items.iter().map(|i| i.cluster_key()).collect();
                format!("l:[{}]", keys.join("|"))
            }
        }
    }

    /// Human-readable rendering
    pub fn render(&self) -> String {
        match self {
            Self::Boolean(b) => b.to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
            Self::List(items) => items
                .iter()
                .map(|i| i.render())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    /// Loose comparison against a JSON literal from the rule table
    pub fn matches_json(&self, literal: &serde_json::Value) -> bool {
        match (self, literal) {
            (Self::Boolean(a), serde_json::Value::Bool(b)) => a == b,
            (Self::Text(a), serde_json::Value::String(b)) => a.eq_ignore_ascii_case(b.trim()),
            (Self::List(items), _) => items.iter().any(|i| i.matches_json(literal)),
            (value, serde_json::Value::Number(n)) => match (value.as_f64(), n.as_f64()) {
                (Some(a), Some(b)) => (a - b).abs() < 1e-9,
                _ => false,
            },
            _ => false,
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Normalization pipeline step identifiers (in pipeline order)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizationStep {
    Coerce,
    Unit,
    Shape,
    Rounding,
    Enum,
    Component,
    Range,
    Custom,
}

impl NormalizationStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Coerce => "coerce",
            Self::Unit => "unit",
            Self::Shape => "shape",
            Self::Rounding => "rounding",
            Self::Enum => "enum",
            Self::Component => "component",
            Self::Range => "range",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for NormalizationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A successfully applied step with a short description of what it did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedStep {
    pub step: NormalizationStep,
    pub detail: String,
}

/// Outcome of the evidence audit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Pending,
    Passed,
    Rejected,
}

/// Component record matched during normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentMatch {
    pub component_type: String,
    pub name: String,
    /// 1.0 for exact/alias matches, similarity for fuzzy matches
    pub score: f64,
    pub properties: BTreeMap<String, f64>,
}

/// A candidate that passed normalization (and, once audited, the evidence check)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedCandidate {
    pub raw: RawCandidate,
    pub normalized_value: TypedValue,
    pub steps: Vec<AppliedStep>,
    pub audit_status: AuditStatus,
    /// Raw confidence adjusted by normalization
    pub confidence: Confidence,
    /// Open-enum / new-component value awaiting curation
    pub needs_curation: bool,
    pub component: Option<ComponentMatch>,
    /// Quote support score recorded by the auditor
    pub audit_similarity: Option<f64>,
}

impl ValidatedCandidate {
    pub fn field_key(&self) -> &str {
        &self.raw.field_key
    }

    pub fn candidate_id(&self) -> &str {
        &self.raw.candidate_id
    }

    pub fn tier(&self) -> SourceTier {
        self.raw.source_tier
    }

    pub fn evidence(&self) -> &EvidenceRef {
        &self.raw.evidence
    }

    pub fn is_passed(&self) -> bool {
        self.audit_status == AuditStatus::Passed
    }

    /// Consensus support contributed by this candidate
    pub fn support(&self) -> f64 {
        self.tier().weight() * self.confidence
    }
}

/// Structured normalization failure
///
/// Local and non-fatal: the candidate simply does not count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{failed_step} rejected {field_key} candidate {candidate_id}: {reason}")]
pub struct Rejection {
    pub field_key: String,
    pub candidate_id: String,
    pub source_id: String,
    pub failed_step: NormalizationStep,
    pub reason: String,
    pub raw_input: serde_json::Value,
    /// Every step attempted, the failing one last
    pub attempted: Vec<NormalizationStep>,
    /// Source explicitly stated the value is not available ("n/a", "-")
    pub null_token: bool,
}

/// All passed candidates for one field (cumulative across rounds)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictSet {
    pub field_key: String,
    pub candidates: Vec<ValidatedCandidate>,
}

impl ConflictSet {
    pub fn new(field_key: impl Into<String>) -> Self {
        Self {
            field_key: field_key.into(),
            candidates: Vec::new(),
        }
    }

    pub fn push(&mut self, candidate: ValidatedCandidate) {
        self.candidates.push(candidate);
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }
}

// ============================================================================
// Consensus Outputs
// ============================================================================

/// Agreement level behind a selected value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Agreement {
    /// Every passing candidate landed in one cluster
    Unanimous,
    /// A clear winner over dissenting clusters
    Majority,
    /// Per-source values retained, no single value forced
    SourceDependent,
    /// Top clusters too close to call across tiers
    Conflict,
}

impl Agreement {
    /// Highest confidence a value with this agreement may carry
    pub fn confidence_cap(self) -> f64 {
        match self {
            Self::Unanimous => 1.0,
            Self::Majority => 0.85,
            Self::SourceDependent => 0.85,
            Self::Conflict => 0.5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unanimous => "unanimous",
            Self::Majority => "majority",
            Self::SourceDependent => "source_dependent",
            Self::Conflict => "conflict",
        }
    }
}

/// A retained per-source value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alternate {
    pub candidate_id: String,
    pub source_id: String,
    pub source_tier: SourceTier,
    pub value: TypedValue,
    pub confidence: Confidence,
    pub evidence: EvidenceRef,
}

impl Alternate {
    pub fn from_candidate(candidate: &ValidatedCandidate) -> Self {
        Self {
            candidate_id: candidate.raw.candidate_id.clone(),
            source_id: candidate.raw.source_id.clone(),
            source_tier: candidate.raw.source_tier,
            value: candidate.normalized_value.clone(),
            confidence: candidate.confidence,
            evidence: candidate.raw.evidence.clone(),
        }
    }
}

/// Consensus result for one field
///
/// `value` is `None` only for source-dependent fields, whose values live in
/// `alternates`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedValue {
    pub field_key: String,
    pub value: Option<TypedValue>,
    pub confidence: Confidence,
    pub origin_candidate_id: Option<String>,
    pub agreement: Agreement,
    pub alternates: Vec<Alternate>,
    /// Evidence of the candidates backing `value`
    pub evidence: Vec<EvidenceRef>,
    /// Winning cluster score (tier weight × confidence, plus policy bonus)
    pub support: f64,
    pub needs_curation: bool,
}

impl SelectedValue {
    /// Every evidence ref the value relies on (value + alternates for source-dependent fields)
    pub fn cited_evidence(&self) -> Vec<&EvidenceRef> {
        if self.value.is_some() {
            self.evidence.iter().collect()
        } else {
            self.alternates.iter().map(|a| &a.evidence).collect()
        }
    }
}

/// Summary of one value cluster, kept for review payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub value: TypedValue,
    pub score: f64,
    pub best_tier: SourceTier,
    pub candidate_ids: Vec<String>,
}

/// A conflict consensus refused to auto-resolve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedConflict {
    pub field_key: String,
    /// Best guess with agreement=conflict and capped confidence, for reviewers
    pub provisional: SelectedValue,
    pub clusters: Vec<ClusterSummary>,
}

// ============================================================================
// Unknowns
// ============================================================================

/// Why a field finalized without a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownReason {
    NotFoundAfterSearch,
    NotPubliclyDisclosed,
    ConflictingSourcesUnresolved,
    EvidenceMissing,
    BudgetExhausted,
    NormalizationFailed,
    IdentityUnconfirmed,
}

impl UnknownReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFoundAfterSearch => "not_found_after_search",
            Self::NotPubliclyDisclosed => "not_publicly_disclosed",
            Self::ConflictingSourcesUnresolved => "conflicting_sources_unresolved",
            Self::EvidenceMissing => "evidence_missing",
            Self::BudgetExhausted => "budget_exhausted",
            Self::NormalizationFailed => "normalization_failed",
            Self::IdentityUnconfirmed => "identity_unconfirmed",
        }
    }
}

impl fmt::Display for UnknownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What was tried for a field before it was declared unknown
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptTrace {
    pub rounds: Vec<u32>,
    pub sources: Vec<String>,
    pub candidates_seen: usize,
    pub notes: Vec<String>,
}

/// Explicit unknown for one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnknownValue {
    pub field_key: String,
    pub reason: UnknownReason,
    pub attempt_trace: AttemptTrace,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tier_weights_descend_with_rank() {
        let weights: Vec<f64> = SourceTier::ALL.iter().map(|t| t.weight()).collect();
        assert_eq!(weights, vec![1.0, 0.8, 0.5, 0.3, 0.15]);
        assert!(SourceTier::Manufacturer < SourceTier::Aggregator);
        assert_eq!(SourceTier::from_rank(2), Some(SourceTier::Lab));
        assert_eq!(SourceTier::from_rank(6), None);
    }

    #[test]
    fn test_cluster_key_case_folds_text() {
        let a = TypedValue::Text("PixArt PAW3395".to_string());
        let b = TypedValue::Text("pixart paw3395".to_string());
        assert_eq!(a.cluster_key(), b.cluster_key());
        assert_eq!(TypedValue::Integer(54).cluster_key(), TypedValue::Number(54.0).cluster_key());
    }

    #[test]
    fn test_matches_json_literal() {
        assert!(TypedValue::Text("Wireless".into()).matches_json(&json!("wireless")));
        assert!(TypedValue::Number(2.0).matches_json(&json!(2)));
        assert!(TypedValue::Boolean(true).matches_json(&json!(true)));
        assert!(!TypedValue::Boolean(true).matches_json(&json!("true")));
        let list = TypedValue::List(vec![TypedValue::Text("usb-c".into()), TypedValue::Text("2.4ghz".into())]);
        assert!(list.matches_json(&json!("2.4GHz")));
    }

    #[test]
    fn test_agreement_caps() {
        assert_eq!(Agreement::Conflict.confidence_cap(), 0.5);
        assert!(Agreement::Majority.confidence_cap() < Agreement::Unanimous.confidence_cap());
    }
}
