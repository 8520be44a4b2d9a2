// Cross Validator
//
// Concept: Check inter-field consistency of the consensus results.
//
// Rules run in the order fixed at rule-table compile time (topological over
// field dependencies). An error-severity violation removes its target fields
// from the working set before any later rule reads them; warnings leave the
// values standing and are attached for review.

use crate::normalize::ComponentLookup;
use crate::rules::{BoundKind, CrossRule, CrossRuleKind, FieldRuleTable, Severity};
use crate::types::{SelectedValue, TypedValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One broken cross-field rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    pub kind: String,
    /// Fields implicated (forced to unknown when severity is error)
    pub fields: Vec<String>,
    pub severity: Severity,
    pub message: String,
}

/// Outcome of one validation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrossValidationReport {
    pub violations: Vec<Violation>,
    /// Fields an error-severity violation forced back to unknown
    pub forced_unknown: BTreeSet<String>,
}

impl CrossValidationReport {
    pub fn errors(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(|v| v.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(|v| v.severity == Severity::Warning)
    }
}

/// Cross-field validator bound to a compiled rule table
pub struct CrossValidator<'a> {
    table: &'a FieldRuleTable,
}

impl<'a> CrossValidator<'a> {
    pub fn new(table: &'a FieldRuleTable) -> Self {
        Self { table }
    }

    /// Validate the current field values
    pub fn validate(
        &self,
        values: &BTreeMap<String, SelectedValue>,
        components: &dyn ComponentLookup,
    ) -> CrossValidationReport {
        let mut working: BTreeMap<&str, &SelectedValue> =
            values.iter().map(|(k, v)| (k.as_str(), v)).collect();
        let mut report = CrossValidationReport::default();

        for rule in self.table.cross_rules() {
            let Some((fields, message)) = self.evaluate(rule, &working, components) else {
                continue;
            };
            if rule.severity == Severity::Error {
                for field in &fields {
                    working.remove(field.as_str());
                    report.forced_unknown.insert(field.clone());
                }
            }
            tracing::debug!(
                rule = %rule.id,
                severity = ?rule.severity,
                fields = ?fields,
                "Cross-validation violation: {}",
                message
            );
            report.violations.push(Violation {
                rule_id: rule.id.clone(),
                kind: rule.kind_name().to_string(),
                fields,
                severity: rule.severity,
                message,
            });
        }

        report
    }

    /// Returns the implicated fields and a message when the rule is violated
    fn evaluate(
        &self,
        rule: &CrossRule,
        working: &BTreeMap<&str, &SelectedValue>,
        components: &dyn ComponentLookup,
    ) -> Option<(Vec<String>, String)> {
        match &rule.kind {
            CrossRuleKind::Range { field, min, max } => {
                let value = working.get(field.as_str())?;
                let offending: Vec<f64> = numeric_values(value)
                    .into_iter()
                    .filter(|v| min.is_some_and(|m| *v < m) || max.is_some_and(|m| *v > m))
                    .collect();
                if offending.is_empty() {
                    return None;
                }
                Some((
                    vec![field.clone()],
                    format!("{} = {:?} outside [{:?}, {:?}]", field, offending, min, max),
                ))
            }

            CrossRuleKind::ConditionalRequire {
                if_field,
                equals,
                then_field,
            } => {
                let condition = working.get(if_field.as_str())?;
                let holds = all_values(condition).iter().any(|v| v.matches_json(equals));
                if !holds || working.contains_key(then_field.as_str()) {
                    return None;
                }
                Some((
                    vec![then_field.clone()],
                    format!("{} = {} requires {} to be known", if_field, equals, then_field),
                ))
            }

            CrossRuleKind::ComponentDbLookup {
                component_field,
                target_field,
                property,
                bound,
                tolerance_pct,
            } => {
                let component_type = &self.table.get(component_field)?.component.as_ref()?.component_type;
                let component = working.get(component_field.as_str())?;
                let name = component.value.as_ref()?.as_text()?;
                let record = components.find(component_type, name)?;
                let limit = *record.properties.get(property)?;
                let target = working.get(target_field.as_str())?;

                let violated: Vec<f64> = numeric_values(target)
                    .into_iter()
                    .filter(|v| match bound {
                        BoundKind::Max => *v > limit * (1.0 + tolerance_pct),
                        BoundKind::Min => *v < limit * (1.0 - tolerance_pct),
                    })
                    .collect();
                if violated.is_empty() {
                    return None;
                }
                Some((
                    vec![target_field.clone()],
                    format!(
                        "{} {:?} violates {} {:?} {} of {} ({}%)",
                        target_field,
                        violated,
                        property,
                        bound,
                        limit,
                        record.name,
                        tolerance_pct * 100.0
                    ),
                ))
            }

            CrossRuleKind::GroupCompleteness { fields, min_present } => {
                let present: Vec<String> = fields
                    .iter()
                    .filter(|f| working.contains_key(f.as_str()))
                    .cloned()
                    .collect();
                if present.is_empty() || present.len() >= *min_present {
                    return None;
                }
                let message = format!(
                    "only {} of {} fields present ({} required together)",
                    present.len(),
                    fields.len(),
                    min_present
                );
                Some((present, message))
            }

            CrossRuleKind::MutualExclusion { fields } => {
                let mut present: Vec<(&String, f64)> = fields
                    .iter()
                    .filter_map(|f| working.get(f.as_str()).map(|v| (f, v.confidence)))
                    .collect();
                if present.len() < 2 {
                    return None;
                }
                // Most confident value stands
                present.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
                let keep = present[0].0.clone();
                let losers: Vec<String> = present[1..].iter().map(|(f, _)| (*f).clone()).collect();
                let message = format!("{} are mutually exclusive with {}", losers.join(", "), keep);
                Some((losers, message))
            }
        }
    }
}

fn all_values(selected: &SelectedValue) -> Vec<&TypedValue> {
    match &selected.value {
        Some(value) => vec![value],
        None => selected.alternates.iter().map(|a| &a.value).collect(),
    }
}

fn numeric_values(selected: &SelectedValue) -> Vec<f64> {
    all_values(selected)
        .into_iter()
        .flat_map(|v| match v {
            TypedValue::List(items) => items.iter().filter_map(|i| i.as_f64()).collect(),
            other => other.as_f64().into_iter().collect::<Vec<_>>(),
        })
        .collect()
}
