//! End-to-end scenarios through the round orchestrator
//!
//! Each test scripts a handful of sources with the replay fetcher, drives one
//! product run to a settled state and inspects the product record.

mod helpers;

use helpers::{mouse_table, orchestrator, source, target, test_settings, BatchBuilder};
use serde_json::json;
use specfab_core::orchestrator::{BudgetCeiling, RunBudget, RunPhase, RunRequest, StopReason};
use specfab_core::record::{FieldOutcome, RecordStatus};
use specfab_core::replay::{ReplayFetcher, ReplayResponse};
use specfab_core::types::{Agreement, EvidenceRef, SourceTier, TypedValue, UnknownReason};
use std::sync::Arc;

fn request(sources: Vec<specfab_core::orchestrator::SourceDescriptor>) -> RunRequest {
    RunRequest {
        target: target(),
        sources,
        budget: None,
    }
}

#[tokio::test]
async fn test_single_source_single_candidate_is_unanimous() {
    let maker = source("maker", SourceTier::Manufacturer);
    let fetcher = ReplayFetcher::default().with_response(
        "maker",
        ReplayResponse::Batch(
            BatchBuilder::new(&maker)
                .snippet("s1", "Weight: 54 g (without cable)")
                .candidate("weight", json!("54 g"), "s1", "Weight: 54 g")
                .build(),
        ),
    );

    let orch = orchestrator(mouse_table(), Arc::new(fetcher), test_settings());
    let (state, record) = orch.run(request(vec![maker.clone()])).await.unwrap();

    assert_eq!(state.phase, RunPhase::Complete);
    assert_eq!(record.status, RecordStatus::Complete);
    match record.field("weight").unwrap() {
        FieldOutcome::Known {
            value,
            confidence,
            agreement,
            provenance,
            alternates,
            ..
        } => {
            assert_eq!(value, &Some(TypedValue::Number(54.0)));
            assert_eq!(*agreement, Agreement::Unanimous);
            assert!((confidence - 0.9).abs() < 1e-9);
            assert!(alternates.is_empty());
            assert_eq!(provenance, &vec![EvidenceRef::new(&maker.url, "s1", "Weight: 54 g")]);
        }
        other => panic!("weight should be known, got {:?}", other),
    }

    // Nothing else was offered and no other source exists
    assert_eq!(
        record.field("dpi").unwrap().unknown_reason(),
        Some(UnknownReason::NotFoundAfterSearch)
    );
    assert_eq!(record.stop_reason, Some(StopReason::SourcesExhausted));
    assert_eq!(record.fields.len(), 6);
}

#[tokio::test]
async fn test_values_within_tolerance_merge_under_better_tier() {
    let maker = source("maker", SourceTier::Manufacturer);
    let shop = source("shop", SourceTier::Retailer);
    let fetcher = ReplayFetcher::default()
        .with_response(
            "maker",
            ReplayResponse::Batch(
                BatchBuilder::new(&maker)
                    .snippet("s1", "Weight: 54 g")
                    .candidate("weight", json!("54 g"), "s1", "Weight: 54 g")
                    .build(),
            ),
        )
        .with_response(
            "shop",
            ReplayResponse::Batch(
                BatchBuilder::new(&shop)
                    .snippet("p1", "Item weight 54.3 g")
                    .candidate("weight", json!("54.3 g"), "p1", "Item weight 54.3 g")
                    .build(),
            ),
        );

    let orch = orchestrator(mouse_table(), Arc::new(fetcher), test_settings());
    let (_, record) = orch.run(request(vec![maker, shop])).await.unwrap();

    match record.field("weight").unwrap() {
        FieldOutcome::Known {
            value,
            agreement,
            provenance,
            ..
        } => {
            assert_eq!(value, &Some(TypedValue::Number(54.0)));
            assert_eq!(*agreement, Agreement::Unanimous);
            // Both supporting snippets are cited, best tier first
            assert_eq!(provenance.len(), 2);
            assert_eq!(provenance[0].snippet_id, "s1");
        }
        other => panic!("weight should be known, got {:?}", other),
    }
}

#[tokio::test]
async fn test_source_dependent_field_keeps_every_lab_value() {
    let lab_a = source("lab-a", SourceTier::Lab);
    let lab_b = source("lab-b", SourceTier::Lab);
    let fetcher = ReplayFetcher::default()
        .with_response(
            "lab-a",
            ReplayResponse::Batch(
                BatchBuilder::new(&lab_a)
                    .snippet("t1", "Click latency: 0.2 ms")
                    .candidate("click_latency", json!("0.2 ms"), "t1", "Click latency: 0.2 ms")
                    .build(),
            ),
        )
        .with_response(
            "lab-b",
            ReplayResponse::Batch(
                BatchBuilder::new(&lab_b)
                    .snippet("t9", "Measured click latency 0.3 ms")
                    .candidate("click_latency", json!("0.3 ms"), "t9", "Measured click latency 0.3 ms")
                    .build(),
            ),
        );

    let orch = orchestrator(mouse_table(), Arc::new(fetcher), test_settings());
    let (_, record) = orch.run(request(vec![lab_a, lab_b])).await.unwrap();

    match record.field("click_latency").unwrap() {
        FieldOutcome::Known {
            value,
            agreement,
            alternates,
            ..
        } => {
            assert_eq!(value, &None);
            assert_eq!(*agreement, Agreement::SourceDependent);
            let mut values: Vec<f64> = alternates.iter().filter_map(|a| a.value.as_f64()).collect();
            values.sort_by(f64::total_cmp);
            assert_eq!(values, vec![0.2, 0.3]);
        }
        other => panic!("click_latency should be known, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unsupported_quote_finalizes_as_evidence_missing() {
    let maker = source("maker", SourceTier::Manufacturer);
    let fetcher = ReplayFetcher::default().with_response(
        "maker",
        ReplayResponse::Batch(
            BatchBuilder::new(&maker)
                .snippet("s1", "Weight: 54 g")
                .candidate("weight", json!("54 g"), "s1", "Battery life up to 95 hours")
                .build(),
        ),
    );

    let orch = orchestrator(mouse_table(), Arc::new(fetcher), test_settings());
    let (state, record) = orch.run(request(vec![maker])).await.unwrap();

    assert_eq!(state.field_status["weight"].audit_failures, 1);
    assert_eq!(
        record.field("weight").unwrap().unknown_reason(),
        Some(UnknownReason::EvidenceMissing)
    );
    match record.field("weight").unwrap() {
        FieldOutcome::Unknown(unknown) => {
            assert_eq!(unknown.attempt_trace.sources, vec!["maker".to_string()]);
            assert_eq!(unknown.attempt_trace.rounds, vec![1]);
            assert_eq!(unknown.attempt_trace.candidates_seen, 1);
        }
        other => panic!("weight should be unknown, got {:?}", other),
    }
}

#[tokio::test]
async fn test_round_ceiling_leaves_required_fields_budget_exhausted() {
    let sources: Vec<_> = (1..=4)
        .map(|i| source(&format!("shop-{}", i), SourceTier::Retailer))
        .collect();
    let fetcher = ReplayFetcher::default()
        .with_response(
            "shop-1",
            ReplayResponse::Batch(
                BatchBuilder::new(&sources[0])
                    .snippet("a", "Click latency 0.2 ms")
                    .candidate("click_latency", json!("0.2 ms"), "a", "Click latency 0.2 ms")
                    .build(),
            ),
        )
        .with_response(
            "shop-2",
            ReplayResponse::Batch(
                BatchBuilder::new(&sources[1])
                    .snippet("b", "Connection: wireless")
                    .candidate("connection", json!("wireless"), "b", "Connection: wireless")
                    .build(),
            ),
        );

    let settings = specfab_core::OrchestratorSettings {
        sources_per_round: 1,
        ..test_settings()
    };
    let orch = orchestrator(mouse_table(), Arc::new(fetcher), settings);
    let (state, record) = orch
        .run(RunRequest {
            target: target(),
            sources: sources.clone(),
            budget: Some(RunBudget {
                max_rounds: 2,
                ..RunBudget::default()
            }),
        })
        .await
        .unwrap();

    assert_eq!(state.rounds.len(), 2);
    assert_eq!(record.metrics.rounds_used, 2);
    assert_eq!(
        record.stop_reason,
        Some(StopReason::BudgetExhausted {
            ceiling: BudgetCeiling::Rounds
        })
    );
    for field in ["weight", "dpi", "sensor"] {
        assert_eq!(
            record.field(field).unwrap().unknown_reason(),
            Some(UnknownReason::BudgetExhausted),
            "{} should be budget_exhausted",
            field
        );
    }
    assert!(record.field("connection").unwrap().is_known());
}

#[tokio::test]
async fn test_null_token_reports_not_publicly_disclosed() {
    let maker = source("maker", SourceTier::Manufacturer);
    let fetcher = ReplayFetcher::default().with_response(
        "maker",
        ReplayResponse::Batch(
            BatchBuilder::new(&maker)
                .snippet("s1", "Polling rate: N/A")
                .candidate("polling_rate", json!("N/A"), "s1", "Polling rate: N/A")
                .build(),
        ),
    );

    let orch = orchestrator(mouse_table(), Arc::new(fetcher), test_settings());
    let (_, record) = orch.run(request(vec![maker])).await.unwrap();
    assert_eq!(
        record.field("polling_rate").unwrap().unknown_reason(),
        Some(UnknownReason::NotPubliclyDisclosed)
    );
}
