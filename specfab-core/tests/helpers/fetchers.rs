//! Scripted fetchers beyond the replay fetcher

use async_trait::async_trait;
use specfab_core::error::SourceFailure;
use specfab_core::evidence::EvidencePack;
use specfab_core::orchestrator::{
    EvidenceFetcher, FetchUsage, FetchedPage, ProductTarget, SourceBatch, SourcePlan,
};
use specfab_core::types::{EvidenceRef, ExtractionMethod, RawCandidate};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Always answers, never fills anything: every planned field comes back as "n/a"
pub struct EndlessFetcher {
    pub pages_per_fetch: u32,
    pub model_calls_per_fetch: u32,
    pub cost_per_fetch: f64,
    calls: AtomicUsize,
}

impl EndlessFetcher {
    pub fn new(pages_per_fetch: u32, model_calls_per_fetch: u32, cost_per_fetch: f64) -> Self {
        Self {
            pages_per_fetch,
            model_calls_per_fetch,
            cost_per_fetch,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EvidenceFetcher for EndlessFetcher {
    async fn fetch_evidence(
        &self,
        _product: &ProductTarget,
        _round: u32,
        plan: &SourcePlan,
    ) -> Result<SourceBatch, SourceFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let url = plan.source.url.clone();
        let pack = EvidencePack::new().with_snippet("spec", &url, "Specification: n/a");
        let candidates = plan
            .fields
            .iter()
            .map(|field| {
                RawCandidate::new(
                    field.as_str(),
                    serde_json::json!("n/a"),
                    &plan.source.source_id,
                    plan.source.tier,
                    EvidenceRef::new(&url, "spec", "Specification: n/a"),
                    ExtractionMethod::Llm,
                    0.5,
                )
            })
            .collect();
        Ok(SourceBatch {
            source_id: plan.source.source_id.clone(),
            pages: vec![FetchedPage {
                url,
                title: None,
                identifiers: vec![],
            }],
            candidates,
            pack,
            usage: FetchUsage {
                pages: self.pages_per_fetch,
                model_calls: self.model_calls_per_fetch,
                cost: self.cost_per_fetch,
            },
        })
    }
}

/// Delegates to `inner`, but sources in `slow` sleep past any sane round deadline first
pub struct SlowFetcher<F> {
    pub inner: F,
    pub slow: HashSet<String>,
    pub delay: Duration,
}

#[async_trait]
impl<F: EvidenceFetcher> EvidenceFetcher for SlowFetcher<F> {
    async fn fetch_evidence(
        &self,
        product: &ProductTarget,
        round: u32,
        plan: &SourcePlan,
    ) -> Result<SourceBatch, SourceFailure> {
        if self.slow.contains(&plan.source.source_id) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.fetch_evidence(product, round, plan).await
    }
}
