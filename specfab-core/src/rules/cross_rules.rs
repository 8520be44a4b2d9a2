//! Cross-field consistency rules

use serde::{Deserialize, Serialize};

/// Violation severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Forces the target field back to unknown
    #[default]
    Error,
    /// Attached for review, value stands
    Warning,
}

/// Which side of a component property the value must respect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundKind {
    /// value ≤ property × (1 + tolerance)
    Max,
    /// value ≥ property × (1 − tolerance)
    Min,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrossRuleKind {
    Range {
        field: String,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    /// If `if_field` holds `equals`, `then_field` must be known
    ConditionalRequire {
        if_field: String,
        equals: serde_json::Value,
        then_field: String,
    },
    /// Numeric `target_field` bounded by a property of the component resolved in `component_field`
    ComponentDbLookup {
        component_field: String,
        target_field: String,
        property: String,
        bound: BoundKind,
        #[serde(default)]
        tolerance_pct: f64,
    },
    /// At least `min_present` of `fields` present, or none at all
    GroupCompleteness { fields: Vec<String>, min_present: usize },
    /// At most one of `fields` may be known
    MutualExclusion { fields: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossRule {
    pub id: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(flatten)]
    pub kind: CrossRuleKind,
}

impl CrossRule {
    /// Every field the rule reads or may force
    pub fn fields(&self) -> Vec<&str> {
        match &self.kind {
            CrossRuleKind::Range { field, .. } => vec![field.as_str()],
            CrossRuleKind::ConditionalRequire {
                if_field,
                then_field,
                ..
            } => vec![if_field.as_str(), then_field.as_str()],
            CrossRuleKind::ComponentDbLookup {
                component_field,
                target_field,
                ..
            } => vec![component_field.as_str(), target_field.as_str()],
            CrossRuleKind::GroupCompleteness { fields, .. }
            | CrossRuleKind::MutualExclusion { fields } => {
                fields.iter().map(|f| f.as_str()).collect()
            }
        }
    }

    /// Fields a violation of this rule forces back to unknown
    pub fn targets(&self) -> Vec<&str> {
        match &self.kind {
            CrossRuleKind::Range { field, .. } => vec![field.as_str()],
            CrossRuleKind::ConditionalRequire { then_field, .. } => vec![then_field.as_str()],
            CrossRuleKind::ComponentDbLookup { target_field, .. } => vec![target_field.as_str()],
            CrossRuleKind::GroupCompleteness { fields, .. }
            | CrossRuleKind::MutualExclusion { fields } => {
                fields.iter().map(|f| f.as_str()).collect()
            }
        }
    }

    /// Directed (prerequisite → dependent) edges declared by the rule
    pub fn dependencies(&self) -> Vec<(&str, &str)> {
        match &self.kind {
            CrossRuleKind::ConditionalRequire {
                if_field,
                then_field,
                ..
            } => vec![(if_field.as_str(), then_field.as_str())],
            CrossRuleKind::ComponentDbLookup {
                component_field,
                target_field,
                ..
            } => vec![(component_field.as_str(), target_field.as_str())],
            _ => Vec::new(),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            CrossRuleKind::Range { .. } => "range",
            CrossRuleKind::ConditionalRequire { .. } => "conditional_require",
            CrossRuleKind::ComponentDbLookup { .. } => "component_db_lookup",
            CrossRuleKind::GroupCompleteness { .. } => "group_completeness",
            CrossRuleKind::MutualExclusion { .. } => "mutual_exclusion",
        }
    }
}
