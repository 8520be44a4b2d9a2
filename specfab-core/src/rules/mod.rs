//! Field rule table
//!
//! The table is immutable per category. It is compiled once (validated, cross
//! rules topologically ordered) and then shared read-only between runs, usually
//! behind an `Arc`.

pub mod cross_rules;
pub mod field_rule;
pub mod loader;
pub mod units;

pub use cross_rules::{BoundKind, CrossRule, CrossRuleKind, Severity};
pub use field_rule::{
    ClusterTolerance, ComponentRule, ConsensusPolicy, CustomNormalizer, EnumPolicy, EnumValues,
    EvidencePolicy, FieldRule, FieldType, ListRules, ListSort, ListUnion, RangeRule,
    RequiredLevel, RoundingMode, RoundingRule, SelectionPolicy, Shape, UnitRule,
};
pub use loader::{compile, load_rule_table, parse_rule_table, RuleTableDocument};
pub use units::{Conversion, UnitTable, UnitTableDocument};

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Rule table load/compile failure (fatal for any run using the table)
#[derive(Debug, Error)]
pub enum RuleTableError {
    #[error("Failed to read rule table: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse rule table: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid rule table '{category}': {}", errors.join("; "))]
    Invalid {
        category: String,
        errors: Vec<String>,
    },

    #[error("Cross-validation dependency cycle among fields: {}", fields.join(", "))]
    DependencyCycle { fields: Vec<String> },

    #[error("Unknown field: {0}")]
    UnknownField(String),
}

/// Compiled, read-only rule table for one category
#[derive(Debug, Clone, Serialize)]
pub struct FieldRuleTable {
    pub category: String,
    pub version: Option<String>,
    fields: BTreeMap<String, FieldRule>,
    /// Cross rules in evaluation order
    cross_rules: Vec<CrossRule>,
    /// Fields in dependency order
    field_order: Vec<String>,
    units: UnitTable,
}

impl FieldRuleTable {
    pub(crate) fn from_parts(
        category: String,
        version: Option<String>,
        fields: BTreeMap<String, FieldRule>,
        cross_rules: Vec<CrossRule>,
        field_order: Vec<String>,
        units: UnitTable,
    ) -> Self {
        Self {
            category,
            version,
            fields,
            cross_rules,
            field_order,
            units,
        }
    }

    pub fn get(&self, key: &str) -> Option<&FieldRule> {
        self.fields.get(key)
    }

    pub fn rule(&self, key: &str) -> Result<&FieldRule, RuleTableError> {
        self.fields
            .get(key)
            .ok_or_else(|| RuleTableError::UnknownField(key.to_string()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.as_str())
    }

    pub fn rules(&self) -> impl Iterator<Item = &FieldRule> {
        self.fields.values()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn cross_rules(&self) -> &[CrossRule] {
        &self.cross_rules
    }

    pub fn field_order(&self) -> &[String] {
        &self.field_order
    }

    pub fn units(&self) -> &UnitTable {
        &self.units
    }

    /// Fields whose resolution gates early completion
    pub fn gated_fields(&self) -> Vec<&str> {
        self.fields
            .values()
            .filter(|r| r.required_level.gates_completion())
            .map(|r| r.key.as_str())
            .collect()
    }
}
