//! Union reducer for list-shaped fields

use crate::rules::ListUnion;
use crate::types::{TypedValue, ValidatedCandidate};
use std::collections::HashSet;

/// Result of a list union
#[derive(Debug, Clone, PartialEq)]
pub struct ListUnionResult {
    pub items: Vec<TypedValue>,
    /// Candidate indexes that contributed at least one item, in contribution order
    pub contributors: Vec<usize>,
}

/// Merge list values
///
/// `ranked` is the candidate order for `set_union` (winner first);
/// `ordered_union` walks candidates in their original order instead.
pub fn union_lists(
    candidates: &[ValidatedCandidate],
    ranked: &[usize],
    mode: ListUnion,
    max_items: Option<usize>,
) -> ListUnionResult {
    let order: Vec<usize> = match mode {
        ListUnion::SetUnion => ranked.to_vec(),
        ListUnion::OrderedUnion => {
            let mut original = ranked.to_vec();
            original.sort_unstable();
            original
        }
    };

    let mut seen = HashSet::new();
    let mut items = Vec::new();
    let mut contributors = Vec::new();

    'candidates: for index in order {
        let values: Vec<&TypedValue> = match &candidates[index].normalized_value {
            TypedValue::List(list) => list.iter().collect(),
            single => vec![single],
        };
        let mut contributed = false;
        for value in values {
            if max_items.is_some_and(|max| items.len() >= max) {
                if contributed {
                    contributors.push(index);
                }
                break 'candidates;
            }
            if seen.insert(value.cluster_key()) {
                items.push(value.clone());
                contributed = true;
            }
        }
        if contributed {
            contributors.push(index);
        }
    }

    ListUnionResult {
        items,
        contributors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AuditStatus, EvidenceRef, ExtractionMethod, RawCandidate, SourceTier};
    use serde_json::json;

    fn list(items: &[&str]) -> ValidatedCandidate {
        ValidatedCandidate {
            raw: RawCandidate::new(
                "connections",
                json!(items),
                "src",
                SourceTier::Retailer,
                EvidenceRef::new("https://x.example", "s", "q"),
                ExtractionMethod::Llm,
                0.8,
            ),
            normalized_value: TypedValue::List(items.iter().map(|s| TypedValue::Text(s.to_string())).collect()),
            steps: Vec::new(),
            audit_status: AuditStatus::Passed,
            confidence: 0.8,
            needs_curation: false,
            component: None,
            audit_similarity: Some(1.0),
        }
    }

    fn texts(result: &ListUnionResult) -> Vec<String> {
        result.items.iter().map(|v| v.render()).collect()
    }

    #[test]
    fn test_set_union_winner_first() {
        let candidates = vec![list(&["usb-c", "bluetooth"]), list(&["2.4ghz", "USB-C"])];
        let result = union_lists(&candidates, &[1, 0], ListUnion::SetUnion, None);
        assert_eq!(texts(&result), vec!["2.4ghz", "USB-C", "bluetooth"]);
        assert_eq!(result.contributors, vec![1, 0]);
    }

    #[test]
    fn test_ordered_union_keeps_original_order() {
        let candidates = vec![list(&["usb-c", "bluetooth"]), list(&["2.4ghz"])];
        let result = union_lists(&candidates, &[1, 0], ListUnion::OrderedUnion, None);
        assert_eq!(texts(&result), vec!["usb-c", "bluetooth", "2.4ghz"]);
    }

    #[test]
    fn test_max_items_truncates() {
        let candidates = vec![list(&["a", "b"]), list(&["c", "d"])];
        let result = union_lists(&candidates, &[0, 1], ListUnion::SetUnion, Some(3));
        assert_eq!(texts(&result), vec!["a", "b", "c"]);
        assert_eq!(result.contributors, vec![0, 1]);
    }
}
