//! Named custom normalizers

use crate::rules::CustomNormalizer;

const TRADEMARKS: &[&str] = &["™", "®", "©", "(tm)", "(TM)", "(r)", "(R)"];

pub fn apply(normalizer: CustomNormalizer, input: &str) -> String {
    match normalizer {
        CustomNormalizer::Lowercase => input.to_lowercase(),
        CustomNormalizer::Uppercase => input.to_uppercase(),
        CustomNormalizer::TitleCase => title_case(input),
        CustomNormalizer::StripTrademarks => {
            let mut out = input.to_string();
            for mark in TRADEMARKS {
                out = out.replace(mark, "");
            }
            collapse_whitespace(&out)
        }
        CustomNormalizer::CollapseWhitespace => collapse_whitespace(input),
    }
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn title_case(input: &str) -> String {
    input
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
