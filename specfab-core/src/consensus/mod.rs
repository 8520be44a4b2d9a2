// Consensus Engine
//
// Concept: Merge every passing candidate for one field, across sources and
// rounds, into one trusted value or an explicit unresolved conflict.
//
// Algorithm:
// 1. Cluster candidates by normalized value (numbers within tolerance)
// 2. Score each cluster: Σ tier_weight × confidence
// 3. Add the declared selection-policy bonus (up to +0.3, graded by the
//    cluster's best member)
// 4. Highest-scoring cluster wins; its best-ranked member supplies the value
// 5. Top two within epsilon of the top score and from different tiers
//    → conflict, confidence capped, never auto-resolved
// 6. source_dependent fields keep every per-source value as an alternate
//
// List-shaped fields use a union reducer instead of single selection.

pub mod cluster;
pub mod union;

pub use cluster::{cluster_candidates, Cluster};
pub use union::{union_lists, ListUnionResult};

use crate::rules::{FieldRule, SelectionPolicy, Shape};
use crate::types::{
    Agreement, Alternate, ClusterSummary, ConflictSet, EvidenceRef, ExtractionMethod,
    SelectedValue, TypedValue, UnresolvedConflict, ValidatedCandidate,
};
use std::collections::{HashMap, HashSet};

/// Score bonus for clusters favored by the declared selection policy
pub const POLICY_BONUS: f64 = 0.3;

/// Consensus result for one field
#[derive(Debug, Clone, PartialEq)]
pub enum ConsensusOutcome {
    Selected(SelectedValue),
    Unresolved(UnresolvedConflict),
    /// Winner cites fewer distinct evidence locations than the rule requires
    InsufficientEvidence {
        field_key: String,
        found: usize,
        required: usize,
    },
    /// No passing candidates
    NoCandidates,
}

impl ConsensusOutcome {
    pub fn selected(&self) -> Option<&SelectedValue> {
        match self {
            Self::Selected(value) => Some(value),
            _ => None,
        }
    }

    pub fn decision(&self) -> &'static str {
        match self {
            Self::Selected(v) => v.agreement.as_str(),
            Self::Unresolved(_) => "conflict",
            Self::InsufficientEvidence { .. } => "insufficient_evidence",
            Self::NoCandidates => "no_candidates",
        }
    }
}

/// Consensus engine (stateless)
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsensusEngine;

impl ConsensusEngine {
    pub fn new() -> Self {
        Self
    }

    /// Resolve one field's conflict set
    ///
    /// Candidates that have not passed the evidence audit are ignored.
    pub fn resolve(&self, rule: &FieldRule, set: &ConflictSet) -> ConsensusOutcome {
        let candidates: Vec<ValidatedCandidate> = set
            .candidates
            .iter()
            .filter(|c| c.is_passed())
            .cloned()
            .collect();
        if candidates.is_empty() {
            return ConsensusOutcome::NoCandidates;
        }

        if rule.is_source_dependent() {
            return self.resolve_source_dependent(rule, &candidates);
        }

        let clusters = self.scored_clusters(rule, &candidates);
        if let Shape::List(list) = &rule.shape {
            return self.resolve_list(rule, &candidates, &clusters, list.union, list.max_items);
        }

        let winner = &clusters[0];
        let total: f64 = clusters.iter().map(|c| c.score()).sum();

        let conflicted = clusters.get(1).is_some_and(|runner_up| {
            winner.score() - runner_up.score() < rule.consensus.epsilon * winner.score()
                && winner.best_tier != runner_up.best_tier
        });

        let agreement = if conflicted {
            Agreement::Conflict
        } else if clusters.len() == 1 {
            Agreement::Unanimous
        } else {
            Agreement::Majority
        };

        let representative = &candidates[winner.representative];
        let share = if total > 0.0 { winner.score() / total } else { 0.0 };
        let confidence = (representative.confidence * share).min(agreement.confidence_cap());

        let alternates = clusters[1..]
            .iter()
            .map(|c| Alternate::from_candidate(&candidates[c.representative]))
            .collect();

        let selected = SelectedValue {
            field_key: rule.key.clone(),
            value: Some(representative.normalized_value.clone()),
            confidence,
            origin_candidate_id: Some(representative.candidate_id().to_string()),
            agreement,
            alternates,
            evidence: ranked_evidence(&candidates, &winner.members),
            support: winner.score(),
            needs_curation: representative.needs_curation,
        };

        if conflicted {
            tracing::debug!(
                field = %rule.key,
                top = winner.score(),
                runner_up = clusters[1].score(),
                "Top clusters within epsilon across tiers, leaving unresolved"
            );
            return ConsensusOutcome::Unresolved(UnresolvedConflict {
                field_key: rule.key.clone(),
                provisional: selected,
                clusters: clusters
                    .iter()
                    .map(|c| ClusterSummary {
                        value: candidates[c.representative].normalized_value.clone(),
                        score: c.score(),
                        best_tier: c.best_tier,
                        candidate_ids: c
                            .members
                            .iter()
                            .map(|i| candidates[*i].candidate_id().to_string())
                            .collect(),
                    })
                    .collect(),
            });
        }

        check_min_refs(rule, selected)
    }

    /// Score of the winning cluster (base support plus policy bonus)
    pub fn winning_support(&self, rule: &FieldRule, set: &ConflictSet) -> f64 {
        let candidates: Vec<ValidatedCandidate> =
            set.candidates.iter().filter(|c| c.is_passed()).cloned().collect();
        if candidates.is_empty() {
            return 0.0;
        }
        self.scored_clusters(rule, &candidates)
            .first()
            .map(|c| c.score())
            .unwrap_or(0.0)
    }

    fn scored_clusters(&self, rule: &FieldRule, candidates: &[ValidatedCandidate]) -> Vec<Cluster> {
        let mut clusters = cluster_candidates(candidates, rule.consensus.tolerance);
        if let Some(policy) = rule.consensus.selection_policy {
            apply_policy_bonus(policy, candidates, &mut clusters);
            cluster::sort_clusters(&mut clusters);
        }
        clusters
    }

    fn resolve_list(
        &self,
        rule: &FieldRule,
        candidates: &[ValidatedCandidate],
        clusters: &[Cluster],
        mode: crate::rules::ListUnion,
        max_items: Option<usize>,
    ) -> ConsensusOutcome {
        let winner = &clusters[0];
        let representative = &candidates[winner.representative];

        // Winner's representative first, then every candidate by rank
        let mut ranked: Vec<usize> = (0..candidates.len()).collect();
        ranked.sort_by(|a, b| cluster::rank_candidates(candidates, *a, *b));
        ranked.retain(|i| *i != winner.representative);
        ranked.insert(0, winner.representative);

        let merged = union_lists(candidates, &ranked, mode, max_items);
        let agreement = if clusters.len() == 1 {
            Agreement::Unanimous
        } else {
            Agreement::Majority
        };
        let total: f64 = clusters.iter().map(|c| c.score()).sum();
        let share = if total > 0.0 { winner.score() / total } else { 0.0 };
        // Items agreed by every cluster count as full agreement for the union
        let confidence = if agreement == Agreement::Unanimous {
            representative.confidence
        } else {
            representative.confidence * share.max(0.5)
        }
        .min(agreement.confidence_cap());

        let selected = SelectedValue {
            field_key: rule.key.clone(),
            value: Some(TypedValue::List(merged.items)),
            confidence,
            origin_candidate_id: Some(representative.candidate_id().to_string()),
            agreement,
            alternates: Vec::new(),
            evidence: ranked_evidence(candidates, &merged.contributors),
            support: winner.score(),
            needs_curation: merged
                .contributors
                .iter()
                .any(|i| candidates[*i].needs_curation),
        };
        check_min_refs(rule, selected)
    }

    fn resolve_source_dependent(&self, rule: &FieldRule, candidates: &[ValidatedCandidate]) -> ConsensusOutcome {
        // One alternate per (source, value), keeping the most confident
        let mut best: HashMap<(String, String), usize> = HashMap::new();
        for (i, candidate) in candidates.iter().enumerate() {
            let key = (
                candidate.raw.source_id.clone(),
                candidate.normalized_value.cluster_key(),
            );
            match best.get(&key) {
                Some(existing) if candidates[*existing].confidence >= candidate.confidence => {}
                _ => {
                    best.insert(key, i);
                }
            }
        }
        let mut kept: Vec<usize> = best.into_values().collect();
        kept.sort_by(|a, b| cluster::rank_candidates(candidates, *a, *b));

        let alternates: Vec<Alternate> = kept
            .iter()
            .map(|i| Alternate::from_candidate(&candidates[*i]))
            .collect();
        let top = &candidates[kept[0]];
        let support = kept.iter().map(|i| candidates[*i].support()).sum();

        let selected = SelectedValue {
            field_key: rule.key.clone(),
            value: None,
            confidence: top.confidence.min(Agreement::SourceDependent.confidence_cap()),
            origin_candidate_id: Some(top.candidate_id().to_string()),
            agreement: Agreement::SourceDependent,
            evidence: ranked_evidence(candidates, &kept),
            alternates,
            support,
            needs_curation: kept.iter().any(|i| candidates[*i].needs_curation),
        };
        check_min_refs(rule, selected)
    }
}

/// Bonus earned by each cluster from its own members
///
/// Every policy grades a cluster by the best member it holds, scaled into
/// `0..=POLICY_BONUS`. A cluster's bonus never shrinks when it gains members
/// or merges, so neither does the winning score.
fn apply_policy_bonus(policy: SelectionPolicy, candidates: &[ValidatedCandidate], clusters: &mut [Cluster]) {
    let grade = |i: usize| -> f64 {
        let candidate = &candidates[i];
        match policy {
            SelectionPolicy::BestConfidence => candidate.confidence,
            SelectionPolicy::BestEvidence => candidate.audit_similarity.unwrap_or(0.0),
            // Later rounds approach the full bonus: 1/2, 2/3, 3/4, ...
            SelectionPolicy::PreferLatest => {
                let round = f64::from(candidate.raw.round);
                round / (round + 1.0)
            }
            SelectionPolicy::PreferDeterministic => {
                if candidate.raw.method == ExtractionMethod::Deterministic {
                    1.0
                } else {
                    0.0
                }
            }
            SelectionPolicy::PreferLlm => {
                if candidate.raw.method == ExtractionMethod::Llm {
                    1.0
                } else {
                    0.0
                }
            }
        }
    };

    for cluster in clusters.iter_mut() {
        let best = cluster
            .members
            .iter()
            .map(|i| grade(*i).clamp(0.0, 1.0))
            .fold(0.0, f64::max);
        cluster.bonus = POLICY_BONUS * best;
    }
}

/// Evidence refs of the given members, best-ranked first, unique per (url, snippet)
fn ranked_evidence(candidates: &[ValidatedCandidate], members: &[usize]) -> Vec<EvidenceRef> {
    let mut ordered = members.to_vec();
    ordered.sort_by(|a, b| cluster::rank_candidates(candidates, *a, *b));
    let mut seen = HashSet::new();
    ordered
        .into_iter()
        .map(|i| candidates[i].evidence())
        .filter(|e| seen.insert((e.url.clone(), e.snippet_id.clone())))
        .cloned()
        .collect()
}

fn check_min_refs(rule: &FieldRule, selected: SelectedValue) -> ConsensusOutcome {
    let found = selected.evidence.len();
    let required = rule.evidence.min_refs;
    if found < required {
        return ConsensusOutcome::InsufficientEvidence {
            field_key: rule.key.clone(),
            found,
            required,
        };
    }
    ConsensusOutcome::Selected(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{ClusterTolerance, FieldType, ListRules};
    use crate::types::{AuditStatus, RawCandidate, SourceTier};
    use serde_json::json;

    fn candidate(id: &str, value: TypedValue, tier: SourceTier, confidence: f64) -> ValidatedCandidate {
        ValidatedCandidate {
            raw: RawCandidate::new(
                "f",
                json!(null),
                format!("src-{}", id),
                tier,
                EvidenceRef::new(format!("https://{}.example/p", id), "s1", "q"),
                ExtractionMethod::Deterministic,
                confidence,
            )
            .with_id(id),
            normalized_value: value,
            steps: Vec::new(),
            audit_status: AuditStatus::Passed,
            confidence,
            needs_curation: false,
            component: None,
            audit_similarity: Some(1.0),
        }
    }

    fn set(candidates: Vec<ValidatedCandidate>) -> ConflictSet {
        ConflictSet {
            field_key: "f".into(),
            candidates,
        }
    }

    fn number_rule() -> FieldRule {
        let mut rule = FieldRule::new("f", FieldType::Number);
        rule.consensus.tolerance = ClusterTolerance::Relative { pct: 0.05 };
        rule
    }

    #[test]
    fn test_majority_caps_confidence() {
        let engine = ConsensusEngine::new();
        let outcome = engine.resolve(
            &number_rule(),
            &set(vec![
                candidate("a", TypedValue::Number(54.0), SourceTier::Manufacturer, 1.0),
                candidate("b", TypedValue::Number(80.0), SourceTier::Community, 0.5),
            ]),
        );
        let selected = outcome.selected().unwrap();
        assert_eq!(selected.agreement, Agreement::Majority);
        assert_eq!(selected.value, Some(TypedValue::Number(54.0)));
        assert!(selected.confidence <= 0.85);
        assert_eq!(selected.alternates.len(), 1);
    }

    #[test]
    fn test_close_cross_tier_clusters_are_unresolved() {
        let engine = ConsensusEngine::new();
        // 0.8 × 1.0 = 0.8 vs 1.0 × 0.78 = 0.78, within 10%
        let outcome = engine.resolve(
            &number_rule(),
            &set(vec![
                candidate("lab", TypedValue::Number(60.0), SourceTier::Lab, 1.0),
                candidate("maker", TypedValue::Number(54.0), SourceTier::Manufacturer, 0.78),
            ]),
        );
        match outcome {
            ConsensusOutcome::Unresolved(conflict) => {
                assert_eq!(conflict.provisional.agreement, Agreement::Conflict);
                assert!(conflict.provisional.confidence <= 0.5);
                assert_eq!(conflict.clusters.len(), 2);
            }
            other => panic!("expected unresolved, got {:?}", other),
        }
    }

    #[test]
    fn test_same_tier_tie_resolves_by_rank() {
        let engine = ConsensusEngine::new();
        let outcome = engine.resolve(
            &number_rule(),
            &set(vec![
                candidate("a", TypedValue::Number(60.0), SourceTier::Retailer, 0.8),
                candidate("b", TypedValue::Number(54.0), SourceTier::Retailer, 0.8),
            ]),
        );
        let selected = outcome.selected().unwrap();
        assert_eq!(selected.agreement, Agreement::Majority);
        assert_eq!(selected.value, Some(TypedValue::Number(60.0)));
    }

    #[test]
    fn test_rejected_candidates_do_not_count() {
        let engine = ConsensusEngine::new();
        let mut rejected = candidate("x", TypedValue::Number(1.0), SourceTier::Manufacturer, 1.0);
        rejected.audit_status = AuditStatus::Rejected;
        assert_eq!(engine.resolve(&number_rule(), &set(vec![rejected])), ConsensusOutcome::NoCandidates);
    }

    #[test]
    fn test_policy_bonus_moves_winner() {
        let engine = ConsensusEngine::new();
        let mut rule = number_rule();
        rule.consensus.selection_policy = Some(SelectionPolicy::PreferLlm);
        let mut llm = candidate("llm", TypedValue::Number(70.0), SourceTier::Retailer, 0.8);
        llm.raw.method = ExtractionMethod::Llm;
        let outcome = engine.resolve(
            &rule,
            &set(vec![
                candidate("det", TypedValue::Number(54.0), SourceTier::Retailer, 0.9),
                llm,
            ]),
        );
        // 0.4 + 0.3 beats 0.45
        let selected = outcome.selected().unwrap();
        assert_eq!(selected.value, Some(TypedValue::Number(70.0)));
        assert!((selected.support - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_confident_outsider_does_not_lower_winning_support() {
        let engine = ConsensusEngine::new();
        let mut rule = number_rule();
        rule.consensus.selection_policy = Some(SelectionPolicy::BestConfidence);

        let maker = candidate("maker", TypedValue::Number(54.0), SourceTier::Manufacturer, 0.9);
        let before = engine.winning_support(&rule, &set(vec![maker.clone()]));
        // 0.9 + 0.3 × 0.9
        assert!((before - 1.17).abs() < 1e-9);

        let outsider = candidate("agg", TypedValue::Number(70.0), SourceTier::Aggregator, 0.95);
        let after = engine.winning_support(&rule, &set(vec![maker, outsider]));
        assert!(after >= before, "winning support dropped {} -> {}", before, after);

        let outcome = engine.resolve(
            &rule,
            &set(vec![
                candidate("maker", TypedValue::Number(54.0), SourceTier::Manufacturer, 0.9),
                candidate("agg", TypedValue::Number(70.0), SourceTier::Aggregator, 0.95),
            ]),
        );
        assert_eq!(outcome.selected().unwrap().value, Some(TypedValue::Number(54.0)));
    }

    #[test]
    fn test_prefer_latest_grades_by_round() {
        let engine = ConsensusEngine::new();
        let mut rule = number_rule();
        rule.consensus.selection_policy = Some(SelectionPolicy::PreferLatest);
        let mut early = candidate("early", TypedValue::Number(54.0), SourceTier::Retailer, 0.8);
        early.raw.round = 1;
        let mut late = candidate("late", TypedValue::Number(70.0), SourceTier::Retailer, 0.8);
        late.raw.round = 3;

        // 0.4 + 0.3 × 3/4 beats 0.4 + 0.3 × 1/2
        let outcome = engine.resolve(&rule, &set(vec![early, late]));
        let selected = outcome.selected().unwrap();
        assert_eq!(selected.value, Some(TypedValue::Number(70.0)));
        assert!((selected.support - 0.625).abs() < 1e-9);
    }

    #[test]
    fn test_list_union() {
        let engine = ConsensusEngine::new();
        let mut rule = FieldRule::new("f", FieldType::Text);
        rule.shape = Shape::List(ListRules::default());
        let list = |items: &[&str]| TypedValue::List(items.iter().map(|s| TypedValue::Text(s.to_string())).collect());
        let outcome = engine.resolve(
            &rule,
            &set(vec![
                candidate("r", list(&["bluetooth"]), SourceTier::Retailer, 0.9),
                candidate("m", list(&["usb-c", "2.4ghz"]), SourceTier::Manufacturer, 0.9),
            ]),
        );
        let selected = outcome.selected().unwrap();
        assert_eq!(selected.value, Some(list(&["usb-c", "2.4ghz", "bluetooth"])));
        assert_eq!(selected.evidence.len(), 2);
        assert_eq!(selected.evidence[0].url, "https://m.example/p");
    }

    #[test]
    fn test_min_refs_requires_corroboration() {
        let engine = ConsensusEngine::new();
        let mut rule = number_rule();
        rule.evidence.min_refs = 2;
        let single = set(vec![candidate("a", TypedValue::Number(54.0), SourceTier::Manufacturer, 0.9)]);
        assert!(matches!(
            engine.resolve(&rule, &single),
            ConsensusOutcome::InsufficientEvidence { found: 1, required: 2, .. }
        ));
    }

    #[test]
    fn test_source_dependent_dedupes_per_source_value() {
        let engine = ConsensusEngine::new();
        let mut rule = number_rule();
        rule.consensus.source_dependent = true;
        let mut repeat = candidate("a2", TypedValue::Number(0.2), SourceTier::Lab, 0.7);
        repeat.raw.source_id = "src-a".into();
        let outcome = engine.resolve(
            &rule,
            &set(vec![
                candidate("a", TypedValue::Number(0.2), SourceTier::Lab, 0.9),
                repeat,
                candidate("b", TypedValue::Number(0.3), SourceTier::Lab, 0.8),
            ]),
        );
        let selected = outcome.selected().unwrap();
        assert_eq!(selected.value, None);
        assert_eq!(selected.alternates.len(), 2);
        assert_eq!(selected.alternates[0].candidate_id, "a");
    }
}
