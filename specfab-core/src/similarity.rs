//! Text similarity helpers shared by enum, component and quote matching

use strsim::normalized_levenshtein;

/// Lowercase, unify quote characters and collapse whitespace
pub fn normalize_text(input: &str) -> String {
    let unified: String = input
        .chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{201B}' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2013}' | '\u{2014}' => '-',
            '\u{00A0}' => ' ',
            other => other,
        })
        .collect();
    unified
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalized Levenshtein similarity in [0.0, 1.0] after text normalization
pub fn similarity(a: &str, b: &str) -> f64 {
    normalized_levenshtein(&normalize_text(a), &normalize_text(b))
}

/// How well `quote` is supported by `snippet`
///
/// 1.0 when the normalized quote is a substring of the normalized snippet,
/// otherwise the best similarity of the quote against any word window of the
/// snippet whose length is within one word of the quote's.
pub fn quote_support(snippet: &str, quote: &str) -> f64 {
    let snippet = normalize_text(snippet);
    let quote = normalize_text(quote);
    if quote.is_empty() || snippet.is_empty() {
        return 0.0;
    }
    if snippet.contains(&quote) {
        return 1.0;
    }

    let words: Vec<&str> = snippet.split(' ').collect();
    let quote_words = quote.split(' ').count();
    if words.len() <= quote_words {
        return normalized_levenshtein(&snippet, &quote);
    }

    let mut best: f64 = 0.0;
    let min_window = quote_words.saturating_sub(1).max(1);
    let max_window = (quote_words + 1).min(words.len());
    for window in min_window..=max_window {
        for start in 0..=(words.len() - window) {
            let candidate = words[start..start + window].join(" ");
            let score = normalized_levenshtein(&candidate, &quote);
            if score > best {
                best = score;
                if best >= 1.0 {
                    return best;
                }
            }
        }
    }
    best
}
