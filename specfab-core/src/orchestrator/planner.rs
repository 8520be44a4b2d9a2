//! Round planning
//!
//! The worklist pairs every field that still needs work (unfilled, below the
//! confidence threshold, or in conflict) with the sources not yet tried for
//! it, then groups the pairs by source. Sources are taken best tier first and
//! capped by the per-round limit and the remaining source budget.

use super::collaborators::SourcePlan;
use super::state::RunState;
use crate::rules::FieldRuleTable;
use std::collections::BTreeMap;

/// Fields that still need evidence
pub fn open_fields(state: &RunState, table: &FieldRuleTable, confidence_threshold: f64) -> Vec<String> {
    table
        .keys()
        .filter(|key| {
            if state.unresolved.contains_key(*key) {
                return true;
            }
            match state.selected.get(*key) {
                None => true,
                Some(selected) => selected.confidence < confidence_threshold,
            }
        })
        .map(str::to_string)
        .collect()
}

/// Build the source plans for `round`
pub fn build_worklist(
    state: &RunState,
    table: &FieldRuleTable,
    round: u32,
    confidence_threshold: f64,
    sources_per_round: usize,
) -> Vec<SourcePlan> {
    let open = open_fields(state, table, confidence_threshold);
    if open.is_empty() {
        return Vec::new();
    }

    let mut by_source: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for (index, source) in state.sources.iter().enumerate() {
        if state.is_excluded(&source.source_id) {
            continue;
        }
        let fields: Vec<String> = open
            .iter()
            .filter(|f| source.covers(f) && !state.was_tried(f, &source.source_id))
            .cloned()
            .collect();
        if !fields.is_empty() {
            by_source.insert(index, fields);
        }
    }

    let mut ranked: Vec<(usize, Vec<String>)> = by_source.into_iter().collect();
    // Best tier first, then most open fields covered, then declaration order
    ranked.sort_by(|(ia, fa), (ib, fb)| {
        state.sources[*ia]
            .tier
            .cmp(&state.sources[*ib].tier)
            .then_with(|| fb.len().cmp(&fa.len()))
            .then_with(|| ia.cmp(ib))
    });

    let limit = sources_per_round.min(state.budget.remaining_sources(&state.usage) as usize);
    ranked
        .into_iter()
        .take(limit)
        .map(|(index, fields)| SourcePlan {
            round,
            source: state.sources[index].clone(),
            fields,
        })
        .collect()
}

/// Whether any usable source remains for `field_key`
pub fn has_untried_source(state: &RunState, field_key: &str) -> bool {
    state.sources.iter().any(|s| {
        !state.is_excluded(&s.source_id) && s.covers(field_key) && !state.was_tried(field_key, &s.source_id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::budget::RunBudget;
    use crate::orchestrator::collaborators::{ProductTarget, SourceDescriptor};
    use crate::rules::parse_rule_table;
    use crate::types::SourceTier;
    use serde_json::json;

    fn table() -> FieldRuleTable {
        parse_rule_table(
            &json!({
                "category": "mouse",
                "fields": {
                    "weight": { "type": "number" },
                    "dpi": { "type": "integer" },
                    "click_latency": { "type": "number" }
                }
            })
            .to_string(),
        )
        .unwrap()
    }

    fn source(id: &str, tier: SourceTier, fields: Option<Vec<&str>>) -> SourceDescriptor {
        SourceDescriptor {
            source_id: id.into(),
            tier,
            url: format!("https://{}.example/p", id),
            fields: fields.map(|f| f.into_iter().map(String::from).collect()),
        }
    }

    fn state(sources: Vec<SourceDescriptor>) -> RunState {
        RunState::new(
            ProductTarget {
                product_id: "p".into(),
                category: "mouse".into(),
                brand: None,
                model: None,
                variant: None,
                hard_ids: vec![],
            },
            sources,
            RunBudget::default(),
        )
    }

    #[test]
    fn test_tier_order_and_limit() {
        let s = state(vec![
            source("forum", SourceTier::Community, None),
            source("maker", SourceTier::Manufacturer, None),
            source("lab", SourceTier::Lab, Some(vec!["click_latency"])),
        ]);
        let plans = build_worklist(&s, &table(), 1, 0.7, 2);
        let ids: Vec<&str> = plans.iter().map(|p| p.source.source_id.as_str()).collect();
        assert_eq!(ids, vec!["maker", "lab"]);
        assert_eq!(plans[1].fields, vec!["click_latency".to_string()]);
    }

    #[test]
    fn test_tried_and_excluded_sources_skipped() {
        let mut s = state(vec![
            source("maker", SourceTier::Manufacturer, None),
            source("shop", SourceTier::Retailer, None),
        ]);
        for field in ["weight", "dpi", "click_latency"] {
            s.mark_tried(field, "maker", 1);
        }
        s.excluded_sources.insert("shop".into(), "retries exhausted".into());
        assert!(build_worklist(&s, &table(), 2, 0.7, 3).is_empty());
        assert!(!has_untried_source(&s, "weight"));
    }

    #[test]
    fn test_source_budget_caps_plan() {
        let mut s = state(vec![
            source("a", SourceTier::Retailer, None),
            source("b", SourceTier::Retailer, None),
        ]);
        s.usage.sources = s.budget.max_sources - 1;
        assert_eq!(build_worklist(&s, &table(), 1, 0.7, 3).len(), 1);
    }
}
