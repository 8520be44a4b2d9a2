//! Rule table loading and compilation
//!
//! Compilation validates every field contract, resolves the unit table and
//! orders cross-validation rules topologically over their declared field
//! dependencies. Tables with dependency cycles are rejected here so runs never
//! have to detect them.

use super::{
    CrossRule, CrossRuleKind, EnumPolicy, FieldRule, FieldRuleTable, RuleTableError, Shape,
    UnitTable, UnitTableDocument,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

/// On-disk JSON form of a rule table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleTableDocument {
    pub category: String,
    #[serde(default)]
    pub version: Option<String>,
    pub fields: BTreeMap<String, FieldRule>,
    #[serde(default)]
    pub cross_validation: Vec<CrossRule>,
    #[serde(default)]
    pub units: Option<UnitTableDocument>,
}

/// Read, parse and compile a rule table file
pub fn load_rule_table(path: &Path) -> Result<FieldRuleTable, RuleTableError> {
    let content = std::fs::read_to_string(path)?;
    let table = parse_rule_table(&content)?;
    info!(
        path = %path.display(),
        category = %table.category,
        fields = table.len(),
        cross_rules = table.cross_rules().len(),
        "Loaded rule table"
    );
    Ok(table)
}

/// Parse and compile a rule table from JSON text
pub fn parse_rule_table(json: &str) -> Result<FieldRuleTable, RuleTableError> {
    let document: RuleTableDocument = serde_json::from_str(json)?;
    compile(document)
}

/// Validate a parsed document and produce the immutable table
pub fn compile(document: RuleTableDocument) -> Result<FieldRuleTable, RuleTableError> {
    let units = match &document.units {
        Some(extra) => UnitTable::builtin().merged(extra),
        None => UnitTable::builtin(),
    };

    let mut errors = Vec::new();
    let mut fields = BTreeMap::new();

    if document.category.trim().is_empty() {
        errors.push("category must not be empty".to_string());
    }

    for (raw_key, mut rule) in document.fields {
        let key = normalize_field_key(&raw_key);
        if key.is_empty() {
            errors.push(format!("field key '{}' normalizes to nothing", raw_key));
            continue;
        }
        if fields.contains_key(&key) {
            errors.push(format!("duplicate field key '{}'", key));
            continue;
        }
        rule.key = key.clone();
        validate_field_rule(&rule, &units, &mut errors);
        fields.insert(key, rule);
    }

    let cross_rules: Vec<CrossRule> = document
        .cross_validation
        .into_iter()
        .map(|mut rule| {
            normalize_rule_fields(&mut rule);
            rule
        })
        .collect();
    validate_cross_rules(&cross_rules, &fields, &mut errors);

    if !errors.is_empty() {
        return Err(RuleTableError::Invalid {
            category: document.category,
            errors,
        });
    }

    let field_order = topological_order(&fields, &cross_rules)?;
    let cross_rules = order_cross_rules(cross_rules, &field_order);

    debug!(
        category = %document.category,
        order = ?field_order,
        "Compiled cross-validation order"
    );

    Ok(FieldRuleTable::from_parts(
        document.category,
        document.version,
        fields,
        cross_rules,
        field_order,
        units,
    ))
}

/// Lowercase, non-alphanumerics → `_`, collapsed and trimmed
pub fn normalize_field_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_underscore = true;
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

fn normalize_rule_fields(rule: &mut CrossRule) {
    match &mut rule.kind {
        CrossRuleKind::Range { field, .. } => *field = normalize_field_key(field),
        CrossRuleKind::ConditionalRequire {
            if_field,
            then_field,
            ..
        } => {
            *if_field = normalize_field_key(if_field);
            *then_field = normalize_field_key(then_field);
        }
        CrossRuleKind::ComponentDbLookup {
            component_field,
            target_field,
            ..
        } => {
            *component_field = normalize_field_key(component_field);
            *target_field = normalize_field_key(target_field);
        }
        CrossRuleKind::GroupCompleteness { fields, .. } | CrossRuleKind::MutualExclusion { fields } => {
            for field in fields.iter_mut() {
                *field = normalize_field_key(field);
            }
        }
    }
}

fn in_unit_interval(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

fn validate_field_rule(rule: &FieldRule, units: &UnitTable, errors: &mut Vec<String>) {
    let key = &rule.key;
    let numeric = rule.value_type.is_numeric();

    if let Some(unit) = &rule.unit {
        if !numeric {
            errors.push(format!("{}: unit declared on non-numeric field", key));
        }
        match units.canonical(&unit.canonical) {
            None => errors.push(format!("{}: unknown canonical unit '{}'", key, unit.canonical)),
            Some(canonical) => {
                for accepted in &unit.accepts {
                    match units.canonical(accepted) {
                        None => errors.push(format!("{}: unknown accepted unit '{}'", key, accepted)),
                        Some(from) if units.factor(from, canonical).is_none() => errors.push(
                            format!("{}: no conversion from '{}' to '{}'", key, accepted, unit.canonical),
                        ),
                        Some(_) => {}
                    }
                }
            }
        }
    }

    if let Some(rounding) = &rule.rounding {
        if !numeric {
            errors.push(format!("{}: rounding declared on non-numeric field", key));
        }
        if rounding.decimals > 10 {
            errors.push(format!("{}: rounding decimals {} exceeds 10", key, rounding.decimals));
        }
    }

    if let Some(range) = &rule.range {
        if !numeric {
            errors.push(format!("{}: range declared on non-numeric field", key));
        }
        if let (Some(min), Some(max)) = (range.min, range.max) {
            if min > max {
                errors.push(format!("{}: range min {} > max {}", key, min, max));
            }
        }
        if range.tolerance_pct < 0.0 {
            errors.push(format!("{}: negative range tolerance", key));
        }
    }

    if let Shape::List(list) = &rule.shape {
        if list.separators.iter().all(|s| s.is_empty()) {
            errors.push(format!("{}: list shape needs at least one separator", key));
        }
        if let Some(max) = list.max_items {
            if max < list.min_items {
                errors.push(format!("{}: max_items {} < min_items {}", key, max, list.min_items));
            }
        }
    }

    match &rule.enum_policy {
        EnumPolicy::Free => {}
        EnumPolicy::Closed(values) | EnumPolicy::Open(values) => {
            // Enum matching resolves to canonical text
            if rule.value_type != super::FieldType::Text {
                errors.push(format!("{}: enum policy on non-text field", key));
            }
            if values.values.is_empty() {
                errors.push(format!("{}: enum declares no values", key));
            }
            if !in_unit_interval(values.fuzzy_threshold) {
                errors.push(format!("{}: enum fuzzy_threshold out of [0,1]", key));
            }
            for (alias, target) in &values.aliases {
                if !values.values.iter().any(|v| v == target) {
                    errors.push(format!(
                        "{}: enum alias '{}' targets undeclared value '{}'",
                        key, alias, target
                    ));
                }
            }
        }
    }

    if let Some(component) = &rule.component {
        if rule.value_type != super::FieldType::Text {
            errors.push(format!("{}: component reference on non-text field", key));
        }
        if component.component_type.trim().is_empty() {
            errors.push(format!("{}: empty component_type", key));
        }
        if !in_unit_interval(component.fuzzy_threshold) {
            errors.push(format!("{}: component fuzzy_threshold out of [0,1]", key));
        }
    }

    if !in_unit_interval(rule.evidence.quote_threshold) {
        errors.push(format!("{}: quote_threshold out of [0,1]", key));
    }
    if rule.evidence.min_refs == 0 {
        errors.push(format!("{}: min_refs must be at least 1", key));
    }
    if !in_unit_interval(rule.consensus.epsilon) {
        errors.push(format!("{}: consensus epsilon out of [0,1]", key));
    }
}

fn validate_cross_rules(
    rules: &[CrossRule],
    fields: &BTreeMap<String, FieldRule>,
    errors: &mut Vec<String>,
) {
    let mut ids = HashSet::new();
    for rule in rules {
        if !ids.insert(rule.id.as_str()) {
            errors.push(format!("duplicate cross rule id '{}'", rule.id));
        }
        for field in rule.fields() {
            if !fields.contains_key(field) {
                errors.push(format!("{}: references unknown field '{}'", rule.id, field));
            }
        }
        match &rule.kind {
            CrossRuleKind::Range { field, min, max } => {
                if min.is_none() && max.is_none() {
                    errors.push(format!("{}: range rule without bounds", rule.id));
                }
                if let Some(r) = fields.get(field) {
                    if !r.value_type.is_numeric() {
                        errors.push(format!("{}: range on non-numeric field '{}'", rule.id, field));
                    }
                }
            }
            CrossRuleKind::ComponentDbLookup {
                component_field,
                target_field,
                tolerance_pct,
                ..
            } => {
                if let Some(r) = fields.get(component_field) {
                    if r.component.is_none() {
                        errors.push(format!(
                            "{}: '{}' has no component reference",
                            rule.id, component_field
                        ));
                    }
                }
                if let Some(r) = fields.get(target_field) {
                    if !r.value_type.is_numeric() {
                        errors.push(format!("{}: target '{}' is not numeric", rule.id, target_field));
                    }
                }
                if *tolerance_pct < 0.0 {
                    errors.push(format!("{}: negative tolerance", rule.id));
                }
            }
            CrossRuleKind::GroupCompleteness {
                fields: group,
                min_present,
            } => {
                if *min_present == 0 || *min_present > group.len() {
                    errors.push(format!(
                        "{}: min_present {} outside 1..={}",
                        rule.id,
                        min_present,
                        group.len()
                    ));
                }
            }
            CrossRuleKind::MutualExclusion { fields: group } => {
                if group.len() < 2 {
                    errors.push(format!("{}: mutual exclusion needs two fields", rule.id));
                }
            }
            CrossRuleKind::ConditionalRequire {
                if_field,
                then_field,
                ..
            } => {
                if if_field == then_field {
                    errors.push(format!("{}: field depends on itself", rule.id));
                }
            }
        }
    }
}

/// Kahn's algorithm over declared dependency edges (deterministic order)
fn topological_order(
    fields: &BTreeMap<String, FieldRule>,
    rules: &[CrossRule],
) -> Result<Vec<String>, RuleTableError> {
    let mut indegree: BTreeMap<&str, usize> = fields.keys().map(|k| (k.as_str(), 0)).collect();
    let mut edges: HashMap<&str, BTreeSet<&str>> = HashMap::new();

    for rule in rules {
        for (from, to) in rule.dependencies() {
            if edges.entry(from).or_default().insert(to) {
                if let Some(d) = indegree.get_mut(to) {
                    *d += 1;
                }
            }
        }
    }

    let mut ready: BTreeSet<&str> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(k, _)| *k)
        .collect();
    let mut order = Vec::with_capacity(fields.len());

    while let Some(next) = ready.pop_first() {
        order.push(next.to_string());
        if let Some(targets) = edges.get(next) {
            for target in targets {
                if let Some(d) = indegree.get_mut(target) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(*target);
                    }
                }
            }
        }
    }

    if order.len() < fields.len() {
        let placed: HashSet<&str> = order.iter().map(|s| s.as_str()).collect();
        let remaining: Vec<String> = fields
            .keys()
            .filter(|k| !placed.contains(k.as_str()))
            .cloned()
            .collect();
        return Err(RuleTableError::DependencyCycle { fields: remaining });
    }
    Ok(order)
}

/// Stable sort: a rule runs at the position of its earliest target field
fn order_cross_rules(rules: Vec<CrossRule>, field_order: &[String]) -> Vec<CrossRule> {
    let position: HashMap<&str, usize> = field_order
        .iter()
        .enumerate()
        .map(|(i, k)| (k.as_str(), i))
        .collect();
    let mut ranked: Vec<(usize, CrossRule)> = rules
        .into_iter()
        .map(|rule| {
            let rank = rule
                .targets()
                .iter()
                .filter_map(|t| position.get(t).copied())
                .min()
                .unwrap_or(usize::MAX);
            (rank, rule)
        })
        .collect();
    ranked.sort_by_key(|(rank, _)| *rank);
    ranked.into_iter().map(|(_, rule)| rule).collect()
}
