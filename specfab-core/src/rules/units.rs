//! Unit alias table and linear conversions
//!
//! Every conversion is a pure multiplication. The inverse of each declared
//! factor is derived, and one intermediate hop is allowed so that `oz → kg`
//! works through `g` without declaring every pair.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A declared linear conversion `to = from × factor`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
    pub from: String,
    pub to: String,
    pub factor: f64,
}

/// Extra aliases/conversions declared by a rule table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitTableDocument {
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub conversions: Vec<Conversion>,
}

/// Resolved unit table (built-ins merged with table-declared extras)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitTable {
    /// lowercase alias → canonical unit symbol
    aliases: BTreeMap<String, String>,
    conversions: Vec<Conversion>,
}

const BUILTIN_ALIASES: &[(&str, &[&str])] = &[
    ("g", &["g", "gram", "grams", "gr"]),
    ("kg", &["kg", "kilogram", "kilograms", "kgs"]),
    ("oz", &["oz", "ounce", "ounces"]),
    ("lb", &["lb", "lbs", "pound", "pounds"]),
    ("mm", &["mm", "millimeter", "millimeters", "millimetre", "millimetres"]),
    ("cm", &["cm", "centimeter", "centimeters", "centimetre", "centimetres"]),
    ("m", &["m", "meter", "meters", "metre", "metres"]),
    ("in", &["in", "inch", "inches", "\"", "''"]),
    ("hz", &["hz", "hertz"]),
    ("khz", &["khz", "kilohertz"]),
    ("ms", &["ms", "millisecond", "milliseconds", "msec"]),
    ("s", &["s", "sec", "secs", "second", "seconds"]),
    ("us", &["us", "µs", "μs", "microsecond", "microseconds"]),
    ("dpi", &["dpi", "cpi"]),
    ("ips", &["ips"]),
    ("mah", &["mah"]),
    ("h", &["h", "hr", "hrs", "hour", "hours"]),
];

const BUILTIN_CONVERSIONS: &[(&str, &str, f64)] = &[
    ("oz", "g", 28.3495),
    ("lb", "g", 453.592),
    ("kg", "g", 1000.0),
    ("in", "mm", 25.4),
    ("cm", "mm", 10.0),
    ("m", "mm", 1000.0),
    ("khz", "hz", 1000.0),
    ("s", "ms", 1000.0),
    ("us", "ms", 0.001),
];

impl Default for UnitTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl UnitTable {
    /// Built-in table with the common physical units
    pub fn builtin() -> Self {
        let mut aliases = BTreeMap::new();
        for (canonical, names) in BUILTIN_ALIASES {
            for name in names.iter() {
                aliases.insert(name.to_string(), canonical.to_string());
            }
        }
        let conversions = BUILTIN_CONVERSIONS
            .iter()
            .map(|(from, to, factor)| Conversion {
                from: from.to_string(),
                to: to.to_string(),
                factor: *factor,
            })
            .collect();
        Self {
            aliases,
            conversions,
        }
    }

    /// Merge table-declared aliases and conversions over the built-ins
    pub fn merged(mut self, extra: &UnitTableDocument) -> Self {
        for (alias, canonical) in &extra.aliases {
            let canonical = canonical.trim().to_lowercase();
            self.aliases.insert(canonical.clone(), canonical.clone());
            self.aliases.insert(alias.trim().to_lowercase(), canonical);
        }
        for conversion in &extra.conversions {
            self.conversions.push(Conversion {
                from: conversion.from.trim().to_lowercase(),
                to: conversion.to.trim().to_lowercase(),
                factor: conversion.factor,
            });
        }
        self
    }

    /// Canonical symbol for an alias (case-insensitive)
    pub fn canonical(&self, alias: &str) -> Option<&str> {
        self.aliases
            .get(alias.trim().to_lowercase().as_str())
            .map(|s| s.as_str())
    }

    /// Multiplicative factor from one canonical unit to another
    pub fn factor(&self, from: &str, to: &str) -> Option<f64> {
        if from == to {
            return Some(1.0);
        }
        if let Some(direct) = self.direct_factor(from, to) {
            return Some(direct);
        }
        // One intermediate hop
        for hop in self.units() {
            if hop == from || hop == to {
                continue;
            }
            if let (Some(a), Some(b)) = (self.direct_factor(from, hop), self.direct_factor(hop, to)) {
                return Some(a * b);
            }
        }
        None
    }

    /// Convert `value` from one unit alias to another
    pub fn convert(&self, value: f64, from: &str, to: &str) -> Option<f64> {
        let from = self.canonical(from)?;
        let to = self.canonical(to)?;
        self.factor(from, to).map(|f| value * f)
    }

    /// Every declared (from, to) pair, for round-trip checks
    pub fn declared_pairs(&self) -> Vec<(String, String)> {
        self.conversions
            .iter()
            .map(|c| (c.from.clone(), c.to.clone()))
            .collect()
    }

    fn direct_factor(&self, from: &str, to: &str) -> Option<f64> {
        self.conversions.iter().find_map(|c| {
            if c.from == from && c.to == to {
                Some(c.factor)
            } else if c.from == to && c.to == from && c.factor != 0.0 {
                Some(1.0 / c.factor)
            } else {
                None
            }
        })
    }

    fn units(&self) -> Vec<&str> {
        let mut units: Vec<&str> = self.aliases.values().map(|s| s.as_str()).collect();
        units.sort_unstable();
        units.dedup();
        units
    }
}
