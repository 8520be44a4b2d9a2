// Normalization Engine
//
// Concept: Turn one raw candidate into a typed, rule-compliant candidate or a
// structured rejection.
//
// Pipeline (ordered, short-circuiting, each applied step recorded):
// 1. Coerce    - type coercion, null-token detection
// 2. Unit      - unit extraction and linear conversion to the canonical unit
// 3. Shape     - scalar vs list, dedupe, sort, item counts
// 4. Rounding  - declared precision (integers always whole)
// 5. Enum      - exact → case-insensitive → alias → fuzzy
// 6. Component - component reference resolution
// 7. Range     - plausibility bounds with tolerance
// 8. Custom    - declared custom normalizer
//
// The engine holds only shared references to immutable inputs, so
// normalization is pure: same table + same candidate → same result.

pub mod coerce;
pub mod components;
pub mod custom;
pub mod enums;

pub use coerce::{is_null_token, parse_quantity, Atom, NULL_TOKENS};
pub use components::{resolve_component, ComponentDb, ComponentLookup, ComponentRecord};
pub use enums::{resolve_enum, EnumResolution};

use crate::rules::{
    EnumPolicy, FieldRule, FieldRuleTable, FieldType, ListSort, RoundingMode, Shape,
};
use crate::types::{
    AppliedStep, AuditStatus, ComponentMatch, NormalizationStep, RawCandidate, Rejection,
    TypedValue, ValidatedCandidate,
};
use std::collections::HashSet;

/// Confidence multiplier for fuzzy enum/component matches
pub const FUZZY_MATCH_FACTOR: f64 = 0.9;
/// Confidence multiplier for values flagged for curation
pub const CURATION_FACTOR: f64 = 0.85;
/// Confidence multiplier for in-tolerance range overshoot
pub const RANGE_OVERSHOOT_FACTOR: f64 = 0.95;

/// Normalization engine bound to one rule table and component lookup
#[derive(Clone, Copy)]
pub struct NormalizationEngine<'a> {
    table: &'a FieldRuleTable,
    components: &'a dyn ComponentLookup,
}

impl<'a> NormalizationEngine<'a> {
    pub fn new(table: &'a FieldRuleTable, components: &'a dyn ComponentLookup) -> Self {
        Self { table, components }
    }

    pub fn table(&self) -> &'a FieldRuleTable {
        self.table
    }

    /// Normalize a candidate using the rule for its own field key
    pub fn normalize_candidate(&self, raw: &RawCandidate) -> Result<ValidatedCandidate, Rejection> {
        match self.table.get(&raw.field_key) {
            Some(rule) => self.normalize(rule, raw),
            None => Err(Rejection {
                field_key: raw.field_key.clone(),
                candidate_id: raw.candidate_id.clone(),
                source_id: raw.source_id.clone(),
                failed_step: NormalizationStep::Coerce,
                reason: format!("no rule for field '{}'", raw.field_key),
                raw_input: raw.value.clone(),
                attempted: vec![NormalizationStep::Coerce],
                null_token: false,
            }),
        }
    }

    /// Run the pipeline for one candidate against an explicit rule
    ///
    /// The result has `audit_status = Pending`; only the evidence auditor may
    /// move it to `Passed`.
    pub fn normalize(&self, rule: &FieldRule, raw: &RawCandidate) -> Result<ValidatedCandidate, Rejection> {
        let mut run = PipelineRun::new(rule, raw);

        let mut items = run.step(NormalizationStep::Coerce, |_| {
            coerce::coerce(rule, &raw.value)
                .map(|atoms| {
                    let detail = format!("{} item(s) as {:?}", atoms.len(), rule.value_type);
                    (atoms, detail)
                })
                .map_err(|f| StepFailure {
                    reason: f.reason,
                    null_token: f.null_token,
                })
        })?;

        if rule.value_type.is_numeric() {
            items = run.step(NormalizationStep::Unit, |_| self.convert_units(rule, items))?;
        }

        items = run.step(NormalizationStep::Shape, |_| enforce_shape(rule, items))?;

        if rule.value_type.is_numeric() && (rule.rounding.is_some() || rule.value_type == FieldType::Integer) {
            items = run.step(NormalizationStep::Rounding, |_| round_items(rule, items))?;
        }

        if let Some(values) = rule.enum_policy.values() {
            let closed = matches!(rule.enum_policy, EnumPolicy::Closed(_));
            items = run.step(NormalizationStep::Enum, |run| {
                let mut details = Vec::new();
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let text = item.render();
                    let resolution = resolve_enum(values, &text);
                    details.push(resolution.describe(&text));
                    match resolution {
                        EnumResolution::Unmatched if closed => {
                            return Err(StepFailure::invalid(format!(
                                "'{}' is not an allowed value",
                                text
                            )))
                        }
                        EnumResolution::Unmatched => {
                            run.needs_curation = true;
                            out.push(item);
                        }
                        EnumResolution::Fuzzy { value, .. } => {
                            run.fuzzy = true;
                            out.push(Atom::Text(value));
                        }
                        resolved => {
                            if let Some(v) = resolved.value() {
                                out.push(Atom::Text(v.to_string()));
                            }
                        }
                    }
                }
                Ok((dedupe_atoms(out), details.join("; ")))
            })?;
        }

        if let Some(component_rule) = &rule.component {
            items = run.step(NormalizationStep::Component, |run| {
                let mut out = Vec::with_capacity(items.len());
                let mut details = Vec::new();
                for item in items {
                    let text = item.render();
                    match resolve_component(component_rule, &text, self.components) {
                        Some(matched) => {
                            if matched.score < 1.0 {
                                run.fuzzy = true;
                            }
                            details.push(format!("'{}' → {} ({:.2})", text, matched.name, matched.score));
                            out.push(Atom::Text(matched.name.clone()));
                            if run.component.is_none() {
                                run.component = Some(matched);
                            }
                        }
                        None if component_rule.allow_new => {
                            run.needs_curation = true;
                            details.push(format!("'{}' new {}", text, component_rule.component_type));
                            out.push(item);
                        }
                        None => {
                            return Err(StepFailure::invalid(format!(
                                "unknown {} '{}'",
                                component_rule.component_type, text
                            )))
                        }
                    }
                }
                Ok((dedupe_atoms(out), details.join("; ")))
            })?;
        }

        if let Some(range) = &rule.range {
            items = run.step(NormalizationStep::Range, |run| {
                for item in &items {
                    let Atom::Number(value) = item else { continue };
                    if let Some(min) = range.min {
                        let floor = min - range.tolerance_pct * min.abs();
                        if *value < floor {
                            return Err(StepFailure::invalid(format!("{} below minimum {}", value, min)));
                        }
                        if *value < min {
                            run.overshoot = true;
                        }
                    }
                    if let Some(max) = range.max {
                        let ceiling = max + range.tolerance_pct * max.abs();
                        if *value > ceiling {
                            return Err(StepFailure::invalid(format!("{} above maximum {}", value, max)));
                        }
                        if *value > max {
                            run.overshoot = true;
                        }
                    }
                }
                let detail = if run.overshoot {
                    "within tolerance".to_string()
                } else {
                    "in range".to_string()
                };
                Ok((items, detail))
            })?;
        }

        if let Some(normalizer) = rule.custom {
            items = run.step(NormalizationStep::Custom, |_| {
                let out = items
                    .into_iter()
                    .map(|item| match item {
                        Atom::Text(s) => Atom::Text(custom::apply(normalizer, &s)),
                        other => other,
                    })
                    .collect();
                Ok((out, format!("{:?}", normalizer)))
            })?;
        }

        Ok(run.finish(items))
    }

    fn convert_units(&self, rule: &FieldRule, items: Vec<Atom>) -> Result<(Vec<Atom>, String), StepFailure> {
        let units = self.table.units();
        let mut out = Vec::with_capacity(items.len());
        let mut details = Vec::new();

        for item in items {
            let (value, unit) = match item {
                Atom::Number(n) => (n, None),
                Atom::Text(text) => parse_quantity(&text)
                    .ok_or_else(|| StepFailure::invalid(format!("'{}' is not a number", text)))?,
                Atom::Boolean(_) => return Err(StepFailure::invalid("boolean in numeric field")),
            };

            let converted = match (&rule.unit, unit) {
                (None, None) => value,
                (None, Some(unit)) => {
                    return Err(StepFailure::invalid(format!("unexpected unit '{}'", unit)))
                }
                (Some(unit_rule), None) => {
                    if unit_rule.strict {
                        return Err(StepFailure::invalid(format!(
                            "bare number {} without unit (expected {})",
                            value, unit_rule.canonical
                        )));
                    }
                    value
                }
                (Some(unit_rule), Some(unit)) => {
                    let canonical = units.canonical(&unit_rule.canonical).ok_or_else(|| {
                        StepFailure::invalid(format!("unknown canonical unit '{}'", unit_rule.canonical))
                    })?;
                    let from = units
                        .canonical(&unit)
                        .ok_or_else(|| StepFailure::invalid(format!("unknown unit '{}'", unit)))?;
                    let accepted = from == canonical
                        || unit_rule
                            .accepts
                            .iter()
                            .any(|a| units.canonical(a) == Some(from));
                    if !accepted {
                        return Err(StepFailure::invalid(format!("unit '{}' not accepted", unit)));
                    }
                    let factor = units.factor(from, canonical).ok_or_else(|| {
                        StepFailure::invalid(format!("no conversion {} → {}", from, canonical))
                    })?;
                    if from != canonical {
                        details.push(format!("{} {} → {} ×{}", value, from, canonical, factor));
                    }
                    value * factor
                }
            };
            out.push(Atom::Number(converted));
        }

        let detail = if details.is_empty() {
            "canonical".to_string()
        } else {
            details.join("; ")
        };
        Ok((out, detail))
    }
}

/// Failure inside one step
struct StepFailure {
    reason: String,
    null_token: bool,
}

impl StepFailure {
    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            null_token: false,
        }
    }
}

/// Per-candidate pipeline bookkeeping
struct PipelineRun<'r> {
    rule: &'r FieldRule,
    raw: &'r RawCandidate,
    attempted: Vec<NormalizationStep>,
    applied: Vec<AppliedStep>,
    needs_curation: bool,
    fuzzy: bool,
    overshoot: bool,
    component: Option<ComponentMatch>,
}

impl<'r> PipelineRun<'r> {
    fn new(rule: &'r FieldRule, raw: &'r RawCandidate) -> Self {
        Self {
            rule,
            raw,
            attempted: Vec::new(),
            applied: Vec::new(),
            needs_curation: false,
            fuzzy: false,
            overshoot: false,
            component: None,
        }
    }

    fn step<T>(
        &mut self,
        step: NormalizationStep,
        body: impl FnOnce(&mut Self) -> Result<(T, String), StepFailure>,
    ) -> Result<T, Rejection> {
        self.attempted.push(step);
        match body(self) {
            Ok((value, detail)) => {
                self.applied.push(AppliedStep { step, detail });
                Ok(value)
            }
            Err(failure) => Err(Rejection {
                field_key: self.rule.key.clone(),
                candidate_id: self.raw.candidate_id.clone(),
                source_id: self.raw.source_id.clone(),
                failed_step: step,
                reason: failure.reason,
                raw_input: self.raw.value.clone(),
                attempted: self.attempted.clone(),
                null_token: failure.null_token,
            }),
        }
    }

    fn finish(self, items: Vec<Atom>) -> ValidatedCandidate {
        let integer = self.rule.value_type == FieldType::Integer;
        let to_typed = |atom: Atom| match atom {
            Atom::Boolean(b) => TypedValue::Boolean(b),
            Atom::Number(n) if integer => TypedValue::Integer(n as i64),
            Atom::Number(n) => TypedValue::Number(n),
            Atom::Text(s) => TypedValue::Text(s),
        };

        let normalized_value = if self.rule.is_list() {
            TypedValue::List(items.into_iter().map(to_typed).collect())
        } else {
            // Shape step guarantees exactly one item for scalars
            items
                .into_iter()
                .next()
                .map(to_typed)
                .unwrap_or(TypedValue::List(Vec::new()))
        };

        let mut confidence = self.raw.raw_confidence.clamp(0.0, 1.0);
        if self.fuzzy {
            confidence *= FUZZY_MATCH_FACTOR;
        }
        if self.needs_curation {
            confidence *= CURATION_FACTOR;
        }
        if self.overshoot {
            confidence *= RANGE_OVERSHOOT_FACTOR;
        }

        ValidatedCandidate {
            raw: self.raw.clone(),
            normalized_value,
            steps: self.applied,
            audit_status: AuditStatus::Pending,
            confidence,
            needs_curation: self.needs_curation,
            component: self.component,
            audit_similarity: None,
        }
    }
}

fn dedupe_atoms(items: Vec<Atom>) -> Vec<Atom> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.dedupe_key()))
        .collect()
}

fn enforce_shape(rule: &FieldRule, items: Vec<Atom>) -> Result<(Vec<Atom>, String), StepFailure> {
    match &rule.shape {
        Shape::Scalar => {
            if items.len() != 1 {
                return Err(StepFailure::invalid(format!(
                    "expected a single value, got {}",
                    items.len()
                )));
            }
            Ok((items, "scalar".to_string()))
        }
        Shape::List(list) => {
            let before = items.len();
            let mut items = if list.dedupe { dedupe_atoms(items) } else { items };
            match list.sort {
                ListSort::None => {}
                ListSort::Asc => items.sort_by(compare_atoms),
                ListSort::Desc => items.sort_by(|a, b| compare_atoms(b, a)),
            }
            if items.len() < list.min_items {
                return Err(StepFailure::invalid(format!(
                    "{} item(s), at least {} required",
                    items.len(),
                    list.min_items
                )));
            }
            if let Some(max) = list.max_items {
                if items.len() > max {
                    return Err(StepFailure::invalid(format!(
                        "{} item(s), at most {} allowed",
                        items.len(),
                        max
                    )));
                }
            }
            Ok((items.clone(), format!("list of {} (from {})", items.len(), before)))
        }
    }
}

fn compare_atoms(a: &Atom, b: &Atom) -> std::cmp::Ordering {
    match (a, b) {
        (Atom::Number(x), Atom::Number(y)) => x.total_cmp(y),
        _ => a.render().to_lowercase().cmp(&b.render().to_lowercase()),
    }
}

fn round_items(rule: &FieldRule, items: Vec<Atom>) -> Result<(Vec<Atom>, String), StepFailure> {
    let (decimals, mode) = match (&rule.rounding, rule.value_type) {
        (_, FieldType::Integer) => (0, rule.rounding.map(|r| r.mode).unwrap_or_default()),
        (Some(r), _) => (r.decimals, r.mode),
        (None, _) => return Ok((items, "none".to_string())),
    };
    let scale = 10f64.powi(decimals as i32);
    let out = items
        .into_iter()
        .map(|item| match item {
            Atom::Number(n) => {
                let scaled = n * scale;
                let rounded = match mode {
                    RoundingMode::Nearest => scaled.round(),
                    RoundingMode::Floor => scaled.floor(),
                    RoundingMode::Ceil => scaled.ceil(),
                } / scale;
                Atom::Number(rounded)
            }
            other => other,
        })
        .collect();
    Ok((out, format!("{} decimal(s) {:?}", decimals, mode)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{parse_rule_table, FieldRuleTable};
    use crate::types::{EvidenceRef, ExtractionMethod, SourceTier};
    use serde_json::json;

    fn table() -> FieldRuleTable {
        parse_rule_table(
            &json!({
                "category": "mouse",
                "fields": {
                    "weight": {
                        "type": "number",
                        "unit": { "canonical": "g", "accepts": ["oz"], "strict": true },
                        "rounding": { "decimals": 1 },
                        "range": { "min": 20.0, "max": 200.0 }
                    },
                    "dpi": { "type": "integer", "range": { "min": 100.0, "max": 30000.0 } },
                    "connection": {
                        "type": "text",
                        "enum": { "policy": "closed", "values": ["wired", "wireless"],
                                  "aliases": { "2.4ghz": "wireless" } }
                    },
                    "coating": {
                        "type": "text",
                        "enum": { "policy": "open", "values": ["matte", "glossy"] }
                    },
                    "sensor": {
                        "type": "text",
                        "component": { "component_type": "sensor" }
                    },
                    "connections": {
                        "type": "text",
                        "shape": { "kind": "list", "sort": "asc", "max_items": 3 },
                        "custom": "uppercase"
                    }
                }
            })
            .to_string(),
        )
        .unwrap()
    }

    fn components() -> ComponentDb {
        let mut db = ComponentDb::new();
        db.insert(
            "sensor",
            ComponentRecord {
                name: "PAW3395".into(),
                aliases: vec!["PixArt PAW3395".into()],
                properties: [("max_dpi".to_string(), 26000.0)].into_iter().collect(),
            },
        );
        db
    }

    fn candidate(field: &str, value: serde_json::Value) -> RawCandidate {
        RawCandidate::new(
            field,
            value,
            "maker",
            SourceTier::Manufacturer,
            EvidenceRef::new("https://maker.example/p", "s1", "quote"),
            ExtractionMethod::Deterministic,
            0.9,
        )
        .with_id("c1")
    }

    #[test]
    fn test_unit_conversion_and_rounding() {
        let table = table();
        let db = components();
        let engine = NormalizationEngine::new(&table, &db);

        let result = engine.normalize_candidate(&candidate("weight", json!("2 oz"))).unwrap();
        assert_eq!(result.normalized_value, TypedValue::Number(56.7));
        let steps: Vec<_> = result.steps.iter().map(|s| s.step).collect();
        assert_eq!(
            steps,
            vec![
                NormalizationStep::Coerce,
                NormalizationStep::Unit,
                NormalizationStep::Shape,
                NormalizationStep::Rounding,
                NormalizationStep::Range
            ]
        );
        assert_eq!(result.audit_status, AuditStatus::Pending);
    }

    #[test]
    fn test_strict_unit_rejects_bare_number() {
        let table = table();
        let db = components();
        let engine = NormalizationEngine::new(&table, &db);

        let rejection = engine.normalize_candidate(&candidate("weight", json!(54))).unwrap_err();
        assert_eq!(rejection.failed_step, NormalizationStep::Unit);
        assert_eq!(rejection.attempted, vec![NormalizationStep::Coerce, NormalizationStep::Unit]);
        assert_eq!(rejection.raw_input, json!(54));
    }

    #[test]
    fn test_null_token_rejection_is_flagged() {
        let table = table();
        let db = components();
        let engine = NormalizationEngine::new(&table, &db);

        let rejection = engine.normalize_candidate(&candidate("dpi", json!("N/A"))).unwrap_err();
        assert_eq!(rejection.failed_step, NormalizationStep::Coerce);
        assert!(rejection.null_token);
    }

    #[test]
    fn test_range_tolerance() {
        let table = table();
        let db = components();
        let engine = NormalizationEngine::new(&table, &db);

        // 4% over max: accepted with reduced confidence
        let ok = engine.normalize_candidate(&candidate("dpi", json!(31200))).unwrap();
        assert_eq!(ok.normalized_value, TypedValue::Integer(31200));
        assert!((ok.confidence - 0.9 * RANGE_OVERSHOOT_FACTOR).abs() < 1e-9);

        // 10% over max: rejected
        let err = engine.normalize_candidate(&candidate("dpi", json!(33000))).unwrap_err();
        assert_eq!(err.failed_step, NormalizationStep::Range);
    }

    #[test]
    fn test_closed_and_open_enums() {
        let table = table();
        let db = components();
        let engine = NormalizationEngine::new(&table, &db);

        let alias = engine.normalize_candidate(&candidate("connection", json!("2.4GHz"))).unwrap();
        assert_eq!(alias.normalized_value, TypedValue::Text("wireless".into()));

        let closed = engine.normalize_candidate(&candidate("connection", json!("Bluetooth"))).unwrap_err();
        assert_eq!(closed.failed_step, NormalizationStep::Enum);

        let open = engine.normalize_candidate(&candidate("coating", json!("rubberized"))).unwrap();
        assert!(open.needs_curation);
        assert!((open.confidence - 0.9 * CURATION_FACTOR).abs() < 1e-9);
    }

    #[test]
    fn test_component_resolution_attaches_metadata() {
        let table = table();
        let db = components();
        let engine = NormalizationEngine::new(&table, &db);

        let result = engine.normalize_candidate(&candidate("sensor", json!("PixArt PAW3395"))).unwrap();
        assert_eq!(result.normalized_value, TypedValue::Text("PAW3395".into()));
        assert_eq!(result.component.unwrap().properties["max_dpi"], 26000.0);

        let unknown = engine.normalize_candidate(&candidate("sensor", json!("HERO 25K"))).unwrap_err();
        assert_eq!(unknown.failed_step, NormalizationStep::Component);
    }

    #[test]
    fn test_list_shape_and_custom() {
        let table = table();
        let db = components();
        let engine = NormalizationEngine::new(&table, &db);

        let result = engine
            .normalize_candidate(&candidate("connections", json!("usb-c, Bluetooth; USB-C")))
            .unwrap();
        assert_eq!(
            result.normalized_value,
            TypedValue::List(vec![
                TypedValue::Text("BLUETOOTH".into()),
                TypedValue::Text("USB-C".into())
            ])
        );

        let too_many = engine
            .normalize_candidate(&candidate("connections", json!("a, b, c, d")))
            .unwrap_err();
        assert_eq!(too_many.failed_step, NormalizationStep::Shape);
    }

    #[test]
    fn test_scalar_rejects_multiple_values() {
        let table = table();
        let db = components();
        let engine = NormalizationEngine::new(&table, &db);

        let err = engine.normalize_candidate(&candidate("dpi", json!([800, 1600]))).unwrap_err();
        assert_eq!(err.failed_step, NormalizationStep::Shape);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let table = table();
        let db = components();
        let engine = NormalizationEngine::new(&table, &db);
        let err = engine.normalize_candidate(&candidate("rgb", json!("yes"))).unwrap_err();
        assert!(err.reason.contains("no rule"));
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let table = table();
        let db = components();
        let engine = NormalizationEngine::new(&table, &db);
        let raw = candidate("weight", json!("1.9 oz"));
        assert_eq!(engine.normalize_candidate(&raw), engine.normalize_candidate(&raw));
    }
}
