//! Builders for rule tables, sources, batches and orchestrators

use specfab_common::events::EventBus;
use specfab_core::evidence::EvidencePack;
use specfab_core::normalize::ComponentDb;
use specfab_core::orchestrator::{
    EvidenceFetcher, FetchUsage, FetchedPage, InMemoryFrontier, ProductTarget, SourceBatch,
    SourceDescriptor,
};
use specfab_core::rules::parse_rule_table;
use specfab_core::types::{EvidenceRef, ExtractionMethod, RawCandidate, SourceTier};
use specfab_core::{FieldRuleTable, OrchestratorSettings, RetryPolicy, RoundOrchestrator};
use std::sync::Arc;
use std::time::Duration;

/// Computer-mouse rule table used across the integration tests
pub const MOUSE_RULES: &str = r#"{
    "category": "mouse",
    "version": "test",
    "fields": {
        "weight": {
            "type": "number",
            "unit": { "canonical": "g", "accepts": ["oz"] },
            "rounding": { "decimals": 1 },
            "consensus": { "tolerance": { "mode": "relative", "pct": 0.05 } },
            "required_level": "required"
        },
        "dpi": {
            "type": "integer",
            "range": { "min": 100, "max": 50000 },
            "required_level": "required"
        },
        "sensor": {
            "type": "text",
            "required_level": "required"
        },
        "click_latency": {
            "type": "number",
            "unit": { "canonical": "ms" },
            "consensus": { "source_dependent": true }
        },
        "polling_rate": {
            "type": "integer",
            "unit": { "canonical": "hz", "accepts": ["khz"] }
        },
        "connection": {
            "type": "text",
            "enum": { "policy": "closed", "values": ["wired", "wireless", "bluetooth"] }
        }
    }
}"#;

pub fn mouse_table() -> Arc<FieldRuleTable> {
    Arc::new(parse_rule_table(MOUSE_RULES).expect("mouse rule table compiles"))
}

pub fn target() -> ProductTarget {
    ProductTarget {
        product_id: "razer-viper-v3-pro".into(),
        category: "mouse".into(),
        brand: Some("Razer".into()),
        model: Some("Viper V3 Pro".into()),
        variant: None,
        hard_ids: vec!["RZ01-05120100".into()],
    }
}

pub fn source(id: &str, tier: SourceTier) -> SourceDescriptor {
    SourceDescriptor {
        source_id: id.into(),
        tier,
        url: format!("https://{}.example/viper-v3-pro", id),
        fields: None,
    }
}

/// Settings with near-zero backoff so retry tests stay fast
pub fn test_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        retry: RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        },
        round_timeout: Duration::from_secs(5),
        ..OrchestratorSettings::default()
    }
}

/// Orchestrator with an empty component db and a zero-cooldown frontier
pub fn orchestrator(
    table: Arc<FieldRuleTable>,
    fetcher: Arc<dyn EvidenceFetcher>,
    settings: OrchestratorSettings,
) -> RoundOrchestrator {
    RoundOrchestrator::new(
        table,
        Arc::new(ComponentDb::new()),
        fetcher,
        EventBus::new(1024),
        settings,
    )
    .with_frontier(Arc::new(InMemoryFrontier::new(chrono::Duration::zero())))
}

/// One source's fetch result: a page, its snippets and the candidates citing them
pub struct BatchBuilder {
    source: SourceDescriptor,
    pack: EvidencePack,
    candidates: Vec<RawCandidate>,
    usage: FetchUsage,
    method: ExtractionMethod,
}

impl BatchBuilder {
    pub fn new(source: &SourceDescriptor) -> Self {
        Self {
            source: source.clone(),
            pack: EvidencePack::new(),
            candidates: Vec::new(),
            usage: FetchUsage {
                pages: 1,
                model_calls: 0,
                cost: 0.0,
            },
            method: ExtractionMethod::Deterministic,
        }
    }

    pub fn snippet(mut self, snippet_id: &str, text: &str) -> Self {
        self.pack = self.pack.with_snippet(snippet_id, &self.source.url, text);
        self
    }

    /// Candidate citing `quote` in `snippet_id` on this source's page
    pub fn candidate(mut self, field: &str, value: serde_json::Value, snippet_id: &str, quote: &str) -> Self {
        self.candidates.push(RawCandidate::new(
            field,
            value,
            &self.source.source_id,
            self.source.tier,
            EvidenceRef::new(&self.source.url, snippet_id, quote),
            self.method,
            0.9,
        ));
        self
    }

    pub fn llm(mut self) -> Self {
        self.method = ExtractionMethod::Llm;
        self
    }

    pub fn usage(mut self, pages: u32, model_calls: u32, cost: f64) -> Self {
        self.usage = FetchUsage {
            pages,
            model_calls,
            cost,
        };
        self
    }

    pub fn build(self) -> SourceBatch {
        SourceBatch {
            source_id: self.source.source_id.clone(),
            pages: vec![FetchedPage {
                url: self.source.url.clone(),
                title: Some("Viper V3 Pro".into()),
                identifiers: vec!["RZ01-05120100".into()],
            }],
            candidates: self.candidates,
            pack: self.pack,
            usage: self.usage,
        }
    }
}
