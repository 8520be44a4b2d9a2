//! Validation pass over the cumulative candidate history
//!
//! Normalize → audit → consensus → cross-validate, always over every
//! candidate the run has accepted so far. The pass is pure: it reads the
//! history and evidence pack and returns fresh per-field results that replace
//! the previous round's wholesale.

use super::state::FieldStatus;
use crate::consensus::{ConsensusEngine, ConsensusOutcome};
use crate::cross_validation::{CrossValidator, Violation};
use crate::evidence::{AuditVerdict, EvidenceAuditor, EvidencePack};
use crate::normalize::{ComponentLookup, NormalizationEngine};
use crate::rules::{FieldRuleTable, Severity};
use crate::types::{ConflictSet, RawCandidate, SelectedValue, UnresolvedConflict};
use std::collections::BTreeMap;

/// Fresh per-field results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationPass {
    pub selected: BTreeMap<String, SelectedValue>,
    pub unresolved: BTreeMap<String, UnresolvedConflict>,
    pub field_status: BTreeMap<String, FieldStatus>,
    pub warnings: Vec<Violation>,
    pub errors: Vec<Violation>,
    /// Candidates for fields the table does not declare
    pub unmapped: usize,
}

impl ValidationPass {
    pub fn coverage(&self, table: &FieldRuleTable) -> f64 {
        if table.is_empty() {
            return 0.0;
        }
        self.selected.len() as f64 / table.len() as f64
    }
}

pub fn validate_history(
    table: &FieldRuleTable,
    components: &dyn ComponentLookup,
    auditor: &EvidenceAuditor,
    history: &[RawCandidate],
    pack: &EvidencePack,
) -> ValidationPass {
    let engine = NormalizationEngine::new(table, components);
    let mut pass = ValidationPass::default();
    let mut sets: BTreeMap<String, ConflictSet> = table
        .keys()
        .map(|k| (k.to_string(), ConflictSet::new(k)))
        .collect();
    for key in table.keys() {
        pass.field_status.insert(key.to_string(), FieldStatus::default());
    }

    for raw in history {
        let (Some(rule), Some(status)) = (table.get(&raw.field_key), pass.field_status.get_mut(&raw.field_key)) else {
            pass.unmapped += 1;
            continue;
        };
        status.candidates_seen += 1;

        let normalized = match engine.normalize(rule, raw) {
            Ok(candidate) => candidate,
            Err(rejection) => {
                if rejection.null_token {
                    status.null_tokens += 1;
                } else {
                    status.normalization_failures += 1;
                }
                status.notes.push(format!("{}: {}", raw.source_id, rejection.reason));
                continue;
            }
        };

        let (audited, verdict) = auditor.audit(&normalized, pack, Some(rule.evidence.quote_threshold));
        match verdict {
            AuditVerdict::Passed { .. } => {
                status.passed += 1;
                if let Some(set) = sets.get_mut(&raw.field_key) {
                    set.push(audited);
                }
            }
            AuditVerdict::Rejected(reason) => {
                status.audit_failures += 1;
                status.notes.push(format!("{}: evidence_missing ({})", raw.source_id, reason));
            }
        }
    }

    let consensus = ConsensusEngine::new();
    for (key, set) in &sets {
        let Some(rule) = table.get(key) else { continue };
        let outcome = consensus.resolve(rule, set);
        let status = pass.field_status.entry(key.clone()).or_default();
        match outcome {
            ConsensusOutcome::Selected(value) => {
                pass.selected.insert(key.clone(), value);
            }
            ConsensusOutcome::Unresolved(conflict) => {
                status.unresolved = true;
                pass.unresolved.insert(key.clone(), conflict);
            }
            ConsensusOutcome::InsufficientEvidence { found, required, .. } => {
                status.insufficient_evidence = true;
                status
                    .notes
                    .push(format!("winner cites {} evidence location(s), {} required", found, required));
            }
            ConsensusOutcome::NoCandidates => {}
        }
    }

    let report = CrossValidator::new(table).validate(&pass.selected, components);
    for field in &report.forced_unknown {
        pass.selected.remove(field);
        if let Some(status) = pass.field_status.get_mut(field) {
            status.forced_by_cross_validation = true;
        }
    }
    for violation in report.violations {
        match violation.severity {
            Severity::Error => {
                for field in &violation.fields {
                    if let Some(status) = pass.field_status.get_mut(field) {
                        status.notes.push(format!("{}: {}", violation.rule_id, violation.message));
                    }
                }
                pass.errors.push(violation);
            }
            Severity::Warning => pass.warnings.push(violation),
        }
    }

    pass
}
