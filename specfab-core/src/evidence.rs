// Evidence Auditor
//
// Concept: No value without provable evidence. A candidate passes only when
// its evidence ref resolves to a snippet of the run's evidence pack, under the
// same URL, whose text contains the quote (or matches it closely).
//
// There is no path to accept a value now and backfill evidence later.

use crate::similarity::quote_support;
use crate::types::{AuditStatus, EvidenceRef, ValidatedCandidate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Default fuzzy quote threshold (rules may override per field)
pub const DEFAULT_QUOTE_THRESHOLD: f64 = 0.8;

/// Text captured from one fetched page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    pub snippet_id: String,
    pub url: String,
    pub text: String,
}

/// Snippets fetched during a run
///
/// Snippet ids are only unique within a page, so entries are keyed by the
/// page URL and the id together. Serialized as a flat snippet list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Snippet>", into = "Vec<Snippet>")]
pub struct EvidencePack {
    snippets: HashMap<String, Snippet>,
}

fn locator_key(url: &str, snippet_id: &str) -> String {
    format!("{}#{}", url.trim(), snippet_id.trim())
}

impl From<Vec<Snippet>> for EvidencePack {
    fn from(snippets: Vec<Snippet>) -> Self {
        let mut pack = Self::default();
        for snippet in snippets {
            pack.insert(snippet);
        }
        pack
    }
}

impl From<EvidencePack> for Vec<Snippet> {
    fn from(pack: EvidencePack) -> Self {
        let mut snippets: Vec<Snippet> = pack.snippets.into_values().collect();
        snippets.sort_by(|a, b| (&a.url, &a.snippet_id).cmp(&(&b.url, &b.snippet_id)));
        snippets
    }
}

impl EvidencePack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, snippet: Snippet) {
        self.snippets
            .insert(locator_key(&snippet.url, &snippet.snippet_id), snippet);
    }

    pub fn with_snippet(
        mut self,
        snippet_id: impl Into<String>,
        url: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.insert(Snippet {
            snippet_id: snippet_id.into(),
            url: url.into(),
            text: text.into(),
        });
        self
    }

    /// Merge another pack into this one (later snippets win on locator collision)
    pub fn extend(&mut self, other: EvidencePack) {
        self.snippets.extend(other.snippets);
    }

    /// Resolve a (url, snippet_id) pair
    pub fn resolve(&self, url: &str, snippet_id: &str) -> Option<&Snippet> {
        self.snippets.get(&locator_key(url, snippet_id))
    }

    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }
}

/// Why a candidate's evidence failed (all map to `evidence_missing`)
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditRejection {
    #[error("malformed url '{url}'")]
    MalformedUrl { url: String },

    #[error("empty snippet id")]
    EmptySnippetId,

    #[error("snippet '{snippet_id}' not found for {url}")]
    SnippetNotFound { url: String, snippet_id: String },

    #[error("empty quote")]
    EmptyQuote,

    #[error("quote not supported by snippet (similarity {similarity:.2} < {threshold:.2})")]
    QuoteNotSupported { similarity: f64, threshold: f64 },
}

impl AuditRejection {
    pub fn reason_code(&self) -> &'static str {
        "evidence_missing"
    }
}

/// Per-candidate audit verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum AuditVerdict {
    Passed { similarity: f64 },
    Rejected(AuditRejection),
}

impl AuditVerdict {
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }
}

/// Evidence auditor
#[derive(Debug, Clone, Copy)]
pub struct EvidenceAuditor {
    default_threshold: f64,
}

impl Default for EvidenceAuditor {
    fn default() -> Self {
        Self {
            default_threshold: DEFAULT_QUOTE_THRESHOLD,
        }
    }
}

impl EvidenceAuditor {
    pub fn new(default_threshold: f64) -> Self {
        Self { default_threshold }
    }

    pub fn default_threshold(&self) -> f64 {
        self.default_threshold
    }

    /// Check one evidence ref against the pack
    pub fn check(&self, evidence: &EvidenceRef, pack: &EvidencePack, threshold: f64) -> AuditVerdict {
        match self.support(evidence, pack, threshold) {
            Ok(similarity) => AuditVerdict::Passed { similarity },
            Err(rejection) => AuditVerdict::Rejected(rejection),
        }
    }

    fn support(&self, evidence: &EvidenceRef, pack: &EvidencePack, threshold: f64) -> Result<f64, AuditRejection> {
        if !is_well_formed_url(&evidence.url) {
            return Err(AuditRejection::MalformedUrl {
                url: evidence.url.clone(),
            });
        }
        if evidence.snippet_id.trim().is_empty() {
            return Err(AuditRejection::EmptySnippetId);
        }
        if evidence.quote.trim().is_empty() {
            return Err(AuditRejection::EmptyQuote);
        }
        let snippet = pack
            .resolve(&evidence.url, &evidence.snippet_id)
            .ok_or_else(|| AuditRejection::SnippetNotFound {
                url: evidence.url.clone(),
                snippet_id: evidence.snippet_id.clone(),
            })?;

        // Fast path: the declared span holds the quote verbatim
        if let Some(span) = evidence.quote_span {
            if let Some(slice) = snippet.text.get(span.start..span.end) {
                if slice.trim() == evidence.quote.trim() {
                    return Ok(1.0);
                }
            }
        }

        let similarity = quote_support(&snippet.text, &evidence.quote);
        if similarity >= threshold {
            Ok(similarity)
        } else {
            Err(AuditRejection::QuoteNotSupported {
                similarity,
                threshold,
            })
        }
    }

    /// Audit a normalized candidate
    ///
    /// Returns a new candidate with the audit outcome recorded; the input is
    /// left untouched.
    pub fn audit(
        &self,
        candidate: &ValidatedCandidate,
        pack: &EvidencePack,
        threshold: Option<f64>,
    ) -> (ValidatedCandidate, AuditVerdict) {
        let threshold = threshold.unwrap_or(self.default_threshold);
        let verdict = self.check(&candidate.raw.evidence, pack, threshold);
        let mut audited = candidate.clone();
        match &verdict {
            AuditVerdict::Passed { similarity } => {
                audited.audit_status = AuditStatus::Passed;
                audited.audit_similarity = Some(*similarity);
            }
            AuditVerdict::Rejected(rejection) => {
                audited.audit_status = AuditStatus::Rejected;
                audited.audit_similarity = match rejection {
                    AuditRejection::QuoteNotSupported { similarity, .. } => Some(*similarity),
                    _ => None,
                };
            }
        }
        (audited, verdict)
    }

    /// Audit many (field, threshold, candidates) groups in one call
    ///
    /// Verdicts keep the input order, flattened across groups.
    pub fn audit_batch(
        &self,
        groups: &[AuditGroup<'_>],
        pack: &EvidencePack,
    ) -> Vec<(ValidatedCandidate, AuditVerdict)> {
        let total: usize = groups.iter().map(|g| g.candidates.len()).sum();
        let mut verdicts = Vec::with_capacity(total);
        for group in groups {
            for candidate in group.candidates {
                verdicts.push(self.audit(candidate, pack, group.threshold));
            }
        }
        let passed = verdicts.iter().filter(|(_, v)| v.is_passed()).count();
        tracing::debug!(
            "Audited {} candidate(s) across {} field(s): {} passed, {} rejected",
            total,
            groups.len(),
            passed,
            total - passed
        );
        verdicts
    }
}

/// Candidates of one field submitted for batch audit
pub struct AuditGroup<'c> {
    pub field_key: &'c str,
    pub threshold: Option<f64>,
    pub candidates: &'c [ValidatedCandidate],
}

/// http(s) scheme, non-empty host, no whitespace
pub fn is_well_formed_url(url: &str) -> bool {
    let url = url.trim();
    if url.is_empty() || url.chars().any(char::is_whitespace) {
        return false;
    }
    let rest = match url.split_once("://") {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") => rest,
        _ => return false,
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let host = authority.rsplit('@').next().unwrap_or("");
    let host = host.split(':').next().unwrap_or("");
    !host.is_empty() && host.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}
