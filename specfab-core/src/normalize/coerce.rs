//! Type coercion, null-token detection and quantity parsing

use crate::rules::{FieldRule, FieldType};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

/// Tokens meaning "the source states there is no value"
pub const NULL_TOKENS: &[&str] = &[
    "", "-", "--", "\u{2014}", "\u{2013}", "n/a", "na", "unk", "unknown", "none", "null", "tbd",
];

static QUANTITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"^[~≈]?\s*([-+]?(?:\d+(?:\.\d*)?|\.\d+))\s*([A-Za-zµμ"']+)?\s*(?:\(.*\))?$"#,
    )
    .expect("quantity pattern is valid")
});

/// Working item flowing through the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Boolean(bool),
    Number(f64),
    Text(String),
}

impl Atom {
    pub fn render(&self) -> String {
        match self {
            Self::Boolean(b) => b.to_string(),
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }

    pub fn dedupe_key(&self) -> String {
        match self {
            Self::Boolean(b) => format!("b:{}", b),
            Self::Number(n) => format!("n:{}", n),
            Self::Text(s) => format!("t:{}", s.to_lowercase()),
        }
    }
}

/// Coercion failure
#[derive(Debug, Clone, PartialEq)]
pub struct CoerceFailure {
    pub reason: String,
    pub null_token: bool,
}

impl CoerceFailure {
    fn null(what: &str) -> Self {
        Self {
            reason: format!("null token '{}'", what),
            null_token: true,
        }
    }

    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            null_token: false,
        }
    }
}

pub fn is_null_token(text: &str) -> bool {
    let folded = text.trim().to_lowercase();
    NULL_TOKENS.contains(&folded.as_str())
}

/// Split text on any of the declared separators, trimming and dropping empties
pub fn split_items(text: &str, separators: &[String]) -> Vec<String> {
    let mut parts = vec![text.to_string()];
    for sep in separators.iter().filter(|s| !s.is_empty()) {
        parts = parts
            .iter()
            .flat_map(|p| p.split(sep.as_str()).map(str::to_string).collect::<Vec<_>>())
            .collect();
    }
    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Parse "54 g", "2.1oz", "~0.2 ms (measured)" into value and optional unit
pub fn parse_quantity(text: &str) -> Option<(f64, Option<String>)> {
    let caps = QUANTITY.captures(text.trim())?;
    let number: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2).map(|m| m.as_str().to_string());
    Some((number, unit))
}

/// Coerce a raw JSON value into pipeline atoms for the declared type
///
/// List-shaped fields split string input on their separators here so that
/// every item is coerced on its own; count/dedupe/sort happen in the shape
/// step.
pub fn coerce(rule: &FieldRule, value: &serde_json::Value) -> Result<Vec<Atom>, CoerceFailure> {
    let separators = rule.shape.list_rules().map(|l| l.separators.as_slice());

    let raw_items: Vec<&serde_json::Value> = match value {
        serde_json::Value::Null => return Err(CoerceFailure::null("null")),
        serde_json::Value::Array(items) => items.iter().collect(),
        serde_json::Value::Object(_) => {
            return Err(CoerceFailure::invalid("object values are not supported"))
        }
        scalar => vec![scalar],
    };

    let mut atoms = Vec::new();
    let mut saw_null = false;
    for item in raw_items {
        let pieces: Vec<serde_json::Value> = match (item, separators) {
            (serde_json::Value::String(s), Some(seps)) => split_items(s, seps)
                .into_iter()
                .map(serde_json::Value::String)
                .collect(),
            (other, _) => vec![other.clone()],
        };
        for piece in pieces {
            match coerce_scalar(rule.value_type, &piece) {
                Ok(atom) => atoms.push(atom),
                Err(failure) if failure.null_token => saw_null = true,
                Err(failure) => return Err(failure),
            }
        }
    }

    if atoms.is_empty() {
        if saw_null || matches!(value, serde_json::Value::String(_) | serde_json::Value::Array(_)) {
            return Err(CoerceFailure::null(&value.to_string()));
        }
        return Err(CoerceFailure::invalid("no usable value"));
    }
    Ok(atoms)
}

fn coerce_scalar(value_type: FieldType, value: &serde_json::Value) -> Result<Atom, CoerceFailure> {
    use serde_json::Value;

    if let Value::String(s) = value {
        if is_null_token(s) {
            return Err(CoerceFailure::null(s.trim()));
        }
    }

    match (value_type, value) {
        (_, Value::Null) => Err(CoerceFailure::null("null")),
        (_, Value::Array(_) | Value::Object(_)) => {
            Err(CoerceFailure::invalid("nested values are not supported"))
        }

        (FieldType::Boolean, Value::Bool(b)) => Ok(Atom::Boolean(*b)),
        (FieldType::Boolean, Value::Number(n)) => match n.as_f64() {
            Some(v) if v == 1.0 => Ok(Atom::Boolean(true)),
            Some(v) if v == 0.0 => Ok(Atom::Boolean(false)),
            _ => Err(CoerceFailure::invalid(format!("'{}' is not a boolean", n))),
        },
        (FieldType::Boolean, Value::String(s)) => parse_bool(s)
            .map(Atom::Boolean)
            .ok_or_else(|| CoerceFailure::invalid(format!("'{}' is not a boolean", s))),

        (FieldType::Number | FieldType::Integer, Value::Number(n)) => n
            .as_f64()
            .filter(|v| v.is_finite())
            .map(Atom::Number)
            .ok_or_else(|| CoerceFailure::invalid(format!("'{}' is not a finite number", n))),
        // Numeric text keeps its unit suffix for the unit step
        (FieldType::Number | FieldType::Integer, Value::String(s)) => Ok(Atom::Text(s.trim().to_string())),
        (FieldType::Number | FieldType::Integer, Value::Bool(_)) => {
            Err(CoerceFailure::invalid("boolean given for numeric field"))
        }

        (FieldType::Text, Value::String(s)) => Ok(Atom::Text(
            s.split_whitespace().collect::<Vec<_>>().join(" "),
        )),
        (FieldType::Text, Value::Number(n)) => Ok(Atom::Text(n.to_string())),
        (FieldType::Text, Value::Bool(b)) => Ok(Atom::Text(b.to_string())),

        (FieldType::Date, Value::String(s)) => parse_date(s)
            .map(Atom::Text)
            .ok_or_else(|| CoerceFailure::invalid(format!("'{}' is not a recognizable date", s))),
        (FieldType::Date, Value::Number(n)) => match n.as_u64() {
            Some(year) if (1900..=2100).contains(&year) => Ok(Atom::Text(year.to_string())),
            _ => Err(CoerceFailure::invalid(format!("'{}' is not a year", n))),
        },
        (FieldType::Date, Value::Bool(_)) => Err(CoerceFailure::invalid("boolean given for date field")),
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" | "on" | "supported" | "✓" => Some(true),
        "false" | "no" | "n" | "0" | "off" | "not supported" | "unsupported" | "✗" => Some(false),
        _ => None,
    }
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d.%m.%Y", "%B %d, %Y", "%b %d, %Y", "%d %B %Y"];

fn parse_date(text: &str) -> Option<String> {
    let text = text.trim();
    if text.len() == 4 && text.chars().all(|c| c.is_ascii_digit()) {
        return Some(text.to_string());
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .map(|d| d.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{ListRules, Shape};
    use serde_json::json;

    #[test]
    fn test_null_tokens() {
        let rule = FieldRule::new("weight", FieldType::Number);
        for token in ["n/a", "-", "\u{2014}", "Unknown", "  ", "NULL"] {
            let failure = coerce(&rule, &json!(token)).unwrap_err();
            assert!(failure.null_token, "token {:?}", token);
        }
        assert!(coerce(&rule, &serde_json::Value::Null).unwrap_err().null_token);
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("54 g"), Some((54.0, Some("g".to_string()))));
        assert_eq!(parse_quantity("2.1oz"), Some((2.1, Some("oz".to_string()))));
        assert_eq!(parse_quantity("~0.2 ms (measured)"), Some((0.2, Some("ms".to_string()))));
        assert_eq!(parse_quantity("26000"), Some((26000.0, None)));
        assert_eq!(parse_quantity("about fifty"), None);
    }

    #[test]
    fn test_boolean_words() {
        let rule = FieldRule::new("wireless", FieldType::Boolean);
        assert_eq!(coerce(&rule, &json!("Yes")).unwrap(), vec![Atom::Boolean(true)]);
        assert_eq!(coerce(&rule, &json!(0)).unwrap(), vec![Atom::Boolean(false)]);
        assert!(!coerce(&rule, &json!("maybe")).unwrap_err().null_token);
    }

    #[test]
    fn test_dates_normalize_to_iso() {
        let rule = FieldRule::new("release_date", FieldType::Date);
        assert_eq!(coerce(&rule, &json!("March 5, 2023")).unwrap(), vec![Atom::Text("2023-03-05".into())]);
        assert_eq!(coerce(&rule, &json!("2023")).unwrap(), vec![Atom::Text("2023".into())]);
        assert!(coerce(&rule, &json!("soon")).is_err());
    }

    #[test]
    fn test_list_input_is_split_per_item() {
        let mut rule = FieldRule::new("connections", FieldType::Text);
        rule.shape = Shape::List(ListRules::default());
        let atoms = coerce(&rule, &json!("USB-C; 2.4GHz, Bluetooth")).unwrap();
        assert_eq!(atoms.len(), 3);
        let atoms = coerce(&rule, &json!(["USB-C", "n/a", "Bluetooth"])).unwrap();
        assert_eq!(atoms.len(), 2);
    }
}
