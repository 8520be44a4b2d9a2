//! Enum value resolution: exact → case-insensitive → alias → fuzzy

use crate::rules::EnumValues;
use crate::similarity::similarity;

#[derive(Debug, Clone, PartialEq)]
pub enum EnumResolution {
    Exact(String),
    CaseInsensitive(String),
    Alias(String),
    Fuzzy { value: String, score: f64 },
    Unmatched,
}

impl EnumResolution {
    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Exact(v) | Self::CaseInsensitive(v) | Self::Alias(v) => Some(v),
            Self::Fuzzy { value, .. } => Some(value),
            Self::Unmatched => None,
        }
    }

    pub fn describe(&self, input: &str) -> String {
        match self {
            Self::Exact(v) => format!("'{}' exact", v),
            Self::CaseInsensitive(v) => format!("'{}' → '{}' (case)", input, v),
            Self::Alias(v) => format!("'{}' → '{}' (alias)", input, v),
            Self::Fuzzy { value, score } => format!("'{}' → '{}' (fuzzy {:.2})", input, value, score),
            Self::Unmatched => format!("'{}' unmatched", input),
        }
    }
}

pub fn resolve_enum(values: &EnumValues, input: &str) -> EnumResolution {
    let input = input.trim();

    if let Some(v) = values.values.iter().find(|v| v.as_str() == input) {
        return EnumResolution::Exact(v.clone());
    }
    if let Some(v) = values.values.iter().find(|v| v.eq_ignore_ascii_case(input)) {
        return EnumResolution::CaseInsensitive(v.clone());
    }
    if let Some((_, target)) = values
        .aliases
        .iter()
        .find(|(alias, _)| alias.trim().eq_ignore_ascii_case(input))
    {
        return EnumResolution::Alias(target.clone());
    }

    // Ties keep the first declared value
    let mut best: Option<(&String, f64)> = None;
    for candidate in &values.values {
        let score = similarity(candidate, input);
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }
    match best {
        Some((value, score)) if score >= values.fuzzy_threshold => EnumResolution::Fuzzy {
            value: value.clone(),
            score,
        },
        _ => EnumResolution::Unmatched,
    }
}
