//! External collaborator contracts
//!
//! The crawl/extract layer, the identity check and the frontier store live
//! outside the core. The orchestrator only sees these traits.

use crate::error::SourceFailure;
use crate::evidence::EvidencePack;
use crate::types::{RawCandidate, SourceTier};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;

/// Product a run is collecting data for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductTarget {
    pub product_id: String,
    pub category: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub variant: Option<String>,
    /// Hard identifiers (SKU, EAN, MPN) that confirm identity on a page
    #[serde(default)]
    pub hard_ids: Vec<String>,
}

/// A source the run may consult
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub source_id: String,
    pub tier: SourceTier,
    /// Canonical URL (frontier key)
    pub url: String,
    /// Fields this source is expected to cover (`None` = any)
    #[serde(default)]
    pub fields: Option<Vec<String>>,
}

impl SourceDescriptor {
    pub fn covers(&self, field_key: &str) -> bool {
        self.fields
            .as_ref()
            .map_or(true, |fields| fields.iter().any(|f| f == field_key))
    }
}

/// What to ask one source for in one round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePlan {
    pub round: u32,
    pub source: SourceDescriptor,
    pub fields: Vec<String>,
}

/// A fetched page, as seen by the identity gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Identifiers found on the page
    #[serde(default)]
    pub identifiers: Vec<String>,
}

/// Resources one fetch consumed
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchUsage {
    #[serde(default)]
    pub pages: u32,
    #[serde(default)]
    pub model_calls: u32,
    #[serde(default)]
    pub cost: f64,
}

/// Result of fetching and extracting one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceBatch {
    pub source_id: String,
    #[serde(default)]
    pub pages: Vec<FetchedPage>,
    #[serde(default)]
    pub candidates: Vec<RawCandidate>,
    #[serde(default)]
    pub pack: EvidencePack,
    #[serde(default)]
    pub usage: FetchUsage,
}

/// Identity collaborator response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityVerdict {
    pub confidence: f64,
    #[serde(default)]
    pub matched_hard_ids: Vec<String>,
    #[serde(default)]
    pub reason_codes: Vec<String>,
}

/// Identity collaborator could not produce a verdict (never retried)
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("identity check failed for {url}: {reason}")]
pub struct IdentityFailure {
    pub url: String,
    pub reason: String,
}

/// Frontier store response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierDecision {
    pub allowed: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
}

/// Crawl + extract layer
#[async_trait]
pub trait EvidenceFetcher: Send + Sync {
    async fn fetch_evidence(
        &self,
        product: &ProductTarget,
        round: u32,
        plan: &SourcePlan,
    ) -> Result<SourceBatch, SourceFailure>;
}

/// Product identity / disambiguation check
#[async_trait]
pub trait IdentityGate: Send + Sync {
    async fn confirm_identity(
        &self,
        page: &FetchedPage,
        target: &ProductTarget,
    ) -> Result<IdentityVerdict, IdentityFailure>;
}

/// Cross-run dedup/cooldown store
#[async_trait]
pub trait FrontierStore: Send + Sync {
    /// Atomically check the cooldown and mark the URL as attempted
    async fn check_and_mark(&self, canonical_url: &str) -> FrontierDecision;
}

/// In-process frontier store
///
/// Holds one lock across check and mark, so two concurrent runs can never
/// both be allowed to fetch the same URL inside the cooldown window.
pub struct InMemoryFrontier {
    cooldown: Duration,
    attempts: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryFrontier {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            attempts: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryFrontier {
    fn default() -> Self {
        Self::new(Duration::hours(1))
    }
}

#[async_trait]
impl FrontierStore for InMemoryFrontier {
    async fn check_and_mark(&self, canonical_url: &str) -> FrontierDecision {
        let now = Utc::now();
        let mut attempts = self.attempts.lock().await;
        if let Some(last) = attempts.get(canonical_url) {
            let until = *last + self.cooldown;
            if until > now {
                return FrontierDecision {
                    allowed: false,
                    cooldown_until: Some(until),
                };
            }
        }
        attempts.insert(canonical_url.to_string(), now);
        FrontierDecision {
            allowed: true,
            cooldown_until: None,
        }
    }
}

/// Identity gate that accepts every page (for drivers without a disambiguation service)
pub struct AcceptAllIdentity;

#[async_trait]
impl IdentityGate for AcceptAllIdentity {
    async fn confirm_identity(
        &self,
        _page: &FetchedPage,
        _target: &ProductTarget,
    ) -> Result<IdentityVerdict, IdentityFailure> {
        Ok(IdentityVerdict {
            confidence: 1.0,
            matched_hard_ids: Vec::new(),
            reason_codes: vec!["unchecked".to_string()],
        })
    }
}
