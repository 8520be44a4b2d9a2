//! Component reference lookup
//!
//! The component database is an external collaborator; the pipeline only sees
//! the [`ComponentLookup`] trait. [`ComponentDb`] is the in-memory
//! implementation loaded from JSON.

use crate::rules::ComponentRule;
use crate::similarity::similarity;
use crate::types::ComponentMatch;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One component record (e.g. a sensor model and its bound properties)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, f64>,
}

/// Read-only component lookup
pub trait ComponentLookup: Send + Sync {
    /// All records of one component type
    fn records(&self, component_type: &str) -> &[ComponentRecord];

    /// Record by canonical name (case-insensitive)
    fn find(&self, component_type: &str, name: &str) -> Option<&ComponentRecord> {
        self.records(component_type)
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name.trim()))
    }
}

/// In-memory component database keyed by component type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentDb {
    by_type: BTreeMap<String, Vec<ComponentRecord>>,
}

impl ComponentDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, component_type: impl Into<String>, record: ComponentRecord) {
        self.by_type.entry(component_type.into()).or_default().push(record);
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn load(path: &Path) -> specfab_common::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&content)?)
    }

    pub fn len(&self) -> usize {
        self.by_type.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ComponentLookup for ComponentDb {
    fn records(&self, component_type: &str) -> &[ComponentRecord] {
        self.by_type
            .get(component_type)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

/// Resolve a component name by exact name/alias, then fuzzy over names and aliases
pub fn resolve_component(
    rule: &ComponentRule,
    input: &str,
    lookup: &dyn ComponentLookup,
) -> Option<ComponentMatch> {
    let input = input.trim();
    let records = lookup.records(&rule.component_type);

    let to_match = |record: &ComponentRecord, score: f64| ComponentMatch {
        component_type: rule.component_type.clone(),
        name: record.name.clone(),
        score,
        properties: record.properties.clone(),
    };

    for record in records {
        let exact = record.name.eq_ignore_ascii_case(input)
            || record.aliases.iter().any(|a| a.eq_ignore_ascii_case(input));
        if exact {
            return Some(to_match(record, 1.0));
        }
    }

    let mut best: Option<(&ComponentRecord, f64)> = None;
    for record in records {
        let score = std::iter::once(&record.name)
            .chain(record.aliases.iter())
            .map(|name| similarity(name, input))
            .fold(0.0_f64, f64::max);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((record, score));
        }
    }

    match best {
        Some((record, score)) if score >= rule.fuzzy_threshold => Some(to_match(record, score)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn db() -> ComponentDb {
        ComponentDb::from_json(
            &json!({
                "sensor": [
                    { "name": "PAW3395", "aliases": ["PixArt PAW3395"], "properties": { "max_dpi": 26000.0 } },
                    { "name": "Focus Pro 30K", "aliases": ["Razer Focus Pro"], "properties": { "max_dpi": 30000.0 } }
                ]
            })
            .to_string(),
        )
        .unwrap()
    }

    fn rule() -> ComponentRule {
        ComponentRule {
            component_type: "sensor".into(),
            fuzzy_threshold: 0.8,
            allow_new: false,
        }
    }

    #[test]
    fn test_alias_match_is_exact() {
        let m = resolve_component(&rule(), "pixart paw3395", &db()).unwrap();
        assert_eq!(m.name, "PAW3395");
        assert_eq!(m.score, 1.0);
        assert_eq!(m.properties["max_dpi"], 26000.0);
    }

    #[test]
    fn test_fuzzy_match() {
        let m = resolve_component(&rule(), "Focus Pro 30 K", &db()).unwrap();
        assert_eq!(m.name, "Focus Pro 30K");
        assert!(m.score < 1.0);
    }

    #[test]
    fn test_unknown_component() {
        assert!(resolve_component(&rule(), "HERO 2", &db()).is_none());
        assert_eq!(db().records("switch").len(), 0);
        assert_eq!(db().len(), 2);
    }
}
