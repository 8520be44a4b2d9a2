//! Replay collaborators
//!
//! Scripted stand-ins for the crawl/extract layer and the identity service,
//! driven by a JSON fixture. The CLI uses them to replay captured runs
//! offline; integration tests use them to script source behavior round by
//! round.

use crate::error::SourceFailure;
use crate::orchestrator::{
    EvidenceFetcher, FetchedPage, IdentityFailure, IdentityGate, IdentityVerdict, ProductTarget, RunBudget,
    RunRequest, SourceBatch, SourceDescriptor, SourcePlan,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tokio::sync::Mutex;

/// One scripted fetch result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayResponse {
    Batch(SourceBatch),
    Failure(SourceFailure),
}

/// Fetcher that answers from per-source scripts
///
/// The n-th fetch of a source gets its n-th response; once the script runs
/// out the last response repeats.
#[derive(Default)]
pub struct ReplayFetcher {
    responses: HashMap<String, Vec<ReplayResponse>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ReplayFetcher {
    pub fn new(responses: HashMap<String, Vec<ReplayResponse>>) -> Self {
        Self {
            responses,
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_response(mut self, source_id: impl Into<String>, response: ReplayResponse) -> Self {
        self.responses.entry(source_id.into()).or_default().push(response);
        self
    }

    /// Fetch calls made against `source_id` so far
    pub async fn calls(&self, source_id: &str) -> usize {
        self.calls.lock().await.get(source_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl EvidenceFetcher for ReplayFetcher {
    async fn fetch_evidence(
        &self,
        _product: &ProductTarget,
        _round: u32,
        plan: &SourcePlan,
    ) -> Result<SourceBatch, SourceFailure> {
        let source_id = plan.source.source_id.as_str();
        let index = {
            let mut calls = self.calls.lock().await;
            let count = calls.entry(source_id.to_string()).or_insert(0);
            *count += 1;
            *count - 1
        };

        let script = self
            .responses
            .get(source_id)
            .ok_or_else(|| SourceFailure::Permanent(format!("no scripted response for {}", source_id)))?;
        match script.get(index).or_else(|| script.last()) {
            Some(ReplayResponse::Batch(batch)) => Ok(batch.clone()),
            Some(ReplayResponse::Failure(failure)) => Err(failure.clone()),
            None => Err(SourceFailure::Permanent(format!("empty script for {}", source_id))),
        }
    }
}

/// Identity gate with fixed per-URL answers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticIdentity {
    #[serde(default = "default_identity_confidence")]
    pub default_confidence: f64,
    #[serde(default)]
    pub per_url: BTreeMap<String, f64>,
    /// URLs whose check errors out
    #[serde(default)]
    pub fail_urls: Vec<String>,
}

fn default_identity_confidence() -> f64 {
    1.0
}

impl Default for StaticIdentity {
    fn default() -> Self {
        Self {
            default_confidence: default_identity_confidence(),
            per_url: BTreeMap::new(),
            fail_urls: Vec::new(),
        }
    }
}

#[async_trait]
impl IdentityGate for StaticIdentity {
    async fn confirm_identity(
        &self,
        page: &FetchedPage,
        target: &ProductTarget,
    ) -> Result<IdentityVerdict, IdentityFailure> {
        if self.fail_urls.iter().any(|u| u == &page.url) {
            return Err(IdentityFailure {
                url: page.url.clone(),
                reason: "identity service unavailable".to_string(),
            });
        }
        let confidence = self
            .per_url
            .get(&page.url)
            .copied()
            .unwrap_or(self.default_confidence);
        let matched_hard_ids = target
            .hard_ids
            .iter()
            .filter(|id| page.identifiers.contains(id))
            .cloned()
            .collect();
        Ok(IdentityVerdict {
            confidence,
            matched_hard_ids,
            reason_codes: vec!["static".to_string()],
        })
    }
}

/// Captured run: product, sources and scripted responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub product: ProductTarget,
    pub sources: Vec<SourceDescriptor>,
    #[serde(default)]
    pub responses: HashMap<String, Vec<ReplayResponse>>,
    #[serde(default)]
    pub budget: Option<RunBudget>,
    #[serde(default)]
    pub identity: Option<StaticIdentity>,
}

impl Fixture {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn load(path: &Path) -> specfab_common::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_json(&content)?)
    }

    /// Split into the run request and the collaborators that replay it
    pub fn into_parts(self) -> (RunRequest, ReplayFetcher, StaticIdentity) {
        let request = RunRequest {
            target: self.product,
            sources: self.sources,
            budget: self.budget,
        };
        (
            request,
            ReplayFetcher::new(self.responses),
            self.identity.unwrap_or_default(),
        )
    }
}
