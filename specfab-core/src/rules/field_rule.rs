//! Per-field contract
//!
//! A [`FieldRule`] declares everything the pipeline needs to know about one
//! field: value type, shape, unit, enum policy, component reference, range,
//! custom normalizer, evidence and consensus policy, and priority.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declared value type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Number,
    Integer,
    Boolean,
    Text,
    /// ISO-8601 date (`YYYY-MM-DD`), or a bare year
    Date,
}

impl FieldType {
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Number | Self::Integer)
    }
}

/// Scalar vs list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Shape {
    #[default]
    Scalar,
    List(ListRules),
}

impl Shape {
    pub fn list_rules(&self) -> Option<&ListRules> {
        match self {
            Self::Scalar => None,
            Self::List(rules) => Some(rules),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ListSort {
    #[default]
    None,
    Asc,
    Desc,
}

/// How list-shaped fields merge across candidates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ListUnion {
    /// Winner's items first, then unique items from the other candidates
    #[default]
    SetUnion,
    /// Items in original candidate order (tier, then round)
    OrderedUnion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListRules {
    #[serde(default = "default_separators")]
    pub separators: Vec<String>,
    #[serde(default = "default_true")]
    pub dedupe: bool,
    #[serde(default)]
    pub sort: ListSort,
    #[serde(default)]
    pub min_items: usize,
    #[serde(default)]
    pub max_items: Option<usize>,
    #[serde(default)]
    pub union: ListUnion,
}

impl Default for ListRules {
    fn default() -> Self {
        Self {
            separators: default_separators(),
            dedupe: true,
            sort: ListSort::None,
            min_items: 0,
            max_items: None,
            union: ListUnion::SetUnion,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRule {
    /// Canonical unit the value is stored in
    pub canonical: String,
    /// Other units accepted (converted to canonical)
    #[serde(default)]
    pub accepts: Vec<String>,
    /// Bare numbers without a unit are rejected
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    #[default]
    Nearest,
    Floor,
    Ceil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundingRule {
    pub decimals: u32,
    #[serde(default)]
    pub mode: RoundingMode,
}

/// Allowed values plus alias table and fuzzy threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumValues {
    pub values: Vec<String>,
    /// alias → canonical value
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    #[serde(default = "default_enum_fuzzy")]
    pub fuzzy_threshold: f64,
}

/// Enum policy
///
/// Closed enums reject unmatched values; open enums keep them and flag them
/// for curation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum EnumPolicy {
    #[default]
    Free,
    Closed(EnumValues),
    Open(EnumValues),
}

impl EnumPolicy {
    pub fn values(&self) -> Option<&EnumValues> {
        match self {
            Self::Free => None,
            Self::Closed(v) | Self::Open(v) => Some(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRule {
    pub component_type: String,
    #[serde(default = "default_component_fuzzy")]
    pub fuzzy_threshold: f64,
    /// Unknown components are kept (flagged for curation) instead of rejected
    #[serde(default)]
    pub allow_new: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeRule {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    /// Fractional overshoot tolerated before rejection
    #[serde(default = "default_range_tolerance")]
    pub tolerance_pct: f64,
}

/// Named pure normalization functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomNormalizer {
    Lowercase,
    Uppercase,
    TitleCase,
    StripTrademarks,
    CollapseWhitespace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidencePolicy {
    /// Distinct (url, snippet) pairs the winning value must cite
    #[serde(default = "default_min_refs")]
    pub min_refs: usize,
    /// Fuzzy quote-match threshold
    #[serde(default = "default_quote_threshold")]
    pub quote_threshold: f64,
}

impl Default for EvidencePolicy {
    fn default() -> Self {
        Self {
            min_refs: default_min_refs(),
            quote_threshold: default_quote_threshold(),
        }
    }
}

/// Numeric clustering tolerance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ClusterTolerance {
    #[default]
    Exact,
    /// Fraction of the larger magnitude
    Relative { pct: f64 },
    Absolute { delta: f64 },
}

impl ClusterTolerance {
    pub fn within(self, a: f64, b: f64) -> bool {
        let diff = (a - b).abs();
        match self {
            Self::Exact => diff <= f64::EPSILON * a.abs().max(b.abs()).max(1.0),
            Self::Relative { pct } => diff <= pct * a.abs().max(b.abs()) + 1e-12,
            Self::Absolute { delta } => diff <= delta + 1e-12,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    BestConfidence,
    BestEvidence,
    PreferDeterministic,
    PreferLlm,
    PreferLatest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusPolicy {
    #[serde(default)]
    pub tolerance: ClusterTolerance,
    /// Fraction of the top score under which the runner-up counts as a tie
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default)]
    pub selection_policy: Option<SelectionPolicy>,
    #[serde(default)]
    pub source_dependent: bool,
}

impl Default for ConsensusPolicy {
    fn default() -> Self {
        Self {
            tolerance: ClusterTolerance::Exact,
            epsilon: default_epsilon(),
            selection_policy: None,
            source_dependent: false,
        }
    }
}

/// Field priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequiredLevel {
    Identity,
    Critical,
    Required,
    Expected,
    #[default]
    Optional,
    Rare,
}

impl RequiredLevel {
    /// Levels that must resolve before a run may stop early
    pub fn gates_completion(self) -> bool {
        matches!(self, Self::Identity | Self::Critical | Self::Required)
    }
}

/// Contract for one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    /// Filled from the table key at load
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub value_type: FieldType,
    #[serde(default)]
    pub shape: Shape,
    #[serde(default)]
    pub unit: Option<UnitRule>,
    #[serde(default)]
    pub rounding: Option<RoundingRule>,
    #[serde(default, rename = "enum")]
    pub enum_policy: EnumPolicy,
    #[serde(default)]
    pub component: Option<ComponentRule>,
    #[serde(default)]
    pub range: Option<RangeRule>,
    #[serde(default)]
    pub custom: Option<CustomNormalizer>,
    #[serde(default)]
    pub evidence: EvidencePolicy,
    #[serde(default)]
    pub consensus: ConsensusPolicy,
    #[serde(default)]
    pub required_level: RequiredLevel,
}

impl FieldRule {
    /// Minimal rule of the given type (used by tests and builders)
    pub fn new(key: impl Into<String>, value_type: FieldType) -> Self {
        Self {
            key: key.into(),
            label: None,
            value_type,
            shape: Shape::Scalar,
            unit: None,
            rounding: None,
            enum_policy: EnumPolicy::Free,
            component: None,
            range: None,
            custom: None,
            evidence: EvidencePolicy::default(),
            consensus: ConsensusPolicy::default(),
            required_level: RequiredLevel::Optional,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self.shape, Shape::List(_))
    }

    pub fn is_source_dependent(&self) -> bool {
        self.consensus.source_dependent
    }
}

fn default_separators() -> Vec<String> {
    vec![",".to_string(), ";".to_string(), "|".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_enum_fuzzy() -> f64 {
    0.75
}

fn default_component_fuzzy() -> f64 {
    0.8
}

fn default_range_tolerance() -> f64 {
    0.05
}

fn default_min_refs() -> usize {
    1
}

fn default_quote_threshold() -> f64 {
    0.8
}

fn default_epsilon() -> f64 {
    0.10
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rule_deserializes_with_defaults() {
        let rule: FieldRule = serde_json::from_value(json!({
            "type": "number",
            "unit": { "canonical": "g", "accepts": ["oz"] },
            "rounding": { "decimals": 1 },
            "consensus": { "tolerance": { "mode": "relative", "pct": 0.05 } },
            "required_level": "required"
        }))
        .unwrap();

        assert_eq!(rule.value_type, FieldType::Number);
        assert_eq!(rule.shape, Shape::Scalar);
        assert_eq!(rule.enum_policy, EnumPolicy::Free);
        assert_eq!(rule.evidence.quote_threshold, 0.8);
        assert_eq!(rule.consensus.epsilon, 0.10);
        assert!(rule.required_level.gates_completion());
    }

    #[test]
    fn test_tagged_enum_policy() {
        let rule: FieldRule = serde_json::from_value(json!({
            "type": "text",
            "enum": {
                "policy": "closed",
                "values": ["wired", "wireless"],
                "aliases": { "2.4ghz": "wireless" }
            },
            "shape": { "kind": "list", "min_items": 1 }
        }))
        .unwrap();

        match &rule.enum_policy {
            EnumPolicy::Closed(values) => {
                assert_eq!(values.values.len(), 2);
                assert_eq!(values.fuzzy_threshold, 0.75);
            }
            other => panic!("unexpected policy {:?}", other),
        }
        let list = rule.shape.list_rules().unwrap();
        assert!(list.dedupe);
        assert_eq!(list.min_items, 1);
        assert_eq!(list.separators.len(), 3);
    }

    #[test]
    fn test_cluster_tolerance() {
        let relative = ClusterTolerance::Relative { pct: 0.05 };
        assert!(relative.within(54.0, 54.3));
        assert!(!relative.within(54.0, 60.0));
        assert!(ClusterTolerance::Exact.within(0.2, 0.2));
        assert!(!ClusterTolerance::Exact.within(0.2, 0.3));
        assert!(ClusterTolerance::Absolute { delta: 0.5 }.within(1.0, 1.5));
    }
}
