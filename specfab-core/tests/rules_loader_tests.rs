//! Rule table loading from disk and replay of the bundled fixture

mod helpers;

use helpers::MOUSE_RULES;
use specfab_common::events::EventBus;
use specfab_core::normalize::ComponentDb;
use specfab_core::orchestrator::{InMemoryFrontier, RunPhase};
use specfab_core::record::RecordStatus;
use specfab_core::replay::Fixture;
use specfab_core::rules::{load_rule_table, parse_rule_table, RequiredLevel, RuleTableError};
use specfab_core::types::TypedValue;
use specfab_core::{OrchestratorSettings, RetryPolicy, RoundOrchestrator};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures").join(name)
}

#[test]
fn test_load_rule_table_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(MOUSE_RULES.as_bytes()).unwrap();

    let table = load_rule_table(file.path()).unwrap();
    assert_eq!(table.category, "mouse");
    assert_eq!(table.len(), 6);
    assert_eq!(table.field_order().len(), 6);

    let mut gated = table.gated_fields();
    gated.sort_unstable();
    assert_eq!(gated, vec!["dpi", "sensor", "weight"]);
    assert_eq!(table.get("weight").unwrap().required_level, RequiredLevel::Required);
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = load_rule_table(&dir.path().join("absent.json"));
    assert!(matches!(result, Err(RuleTableError::Io(_))));
}

#[test]
fn test_malformed_json_is_parse_error() {
    let result = parse_rule_table(r#"{ "category": "mouse", "fields": { "weight": { "type": "#);
    assert!(matches!(result, Err(RuleTableError::Parse(_))));

    let result = parse_rule_table(r#"{ "category": "mouse", "fields": { "weight": { "type": "volume" } } }"#);
    assert!(matches!(result, Err(RuleTableError::Parse(_))));
}

#[test]
fn test_every_problem_is_reported_at_once() {
    let result = parse_rule_table(
        r#"{
            "category": "mouse",
            "fields": {
                "weight": { "type": "number", "range": { "min": 200, "max": 20 } },
                "dpi": { "type": "integer", "evidence": { "min_refs": 0 } }
            },
            "cross_validation": [
                { "id": "pair", "type": "mutual_exclusion", "fields": ["weight"] },
                { "id": "pair", "type": "range", "field": "dpi" }
            ]
        }"#,
    );

    match result {
        Err(RuleTableError::Invalid { category, errors }) => {
            assert_eq!(category, "mouse");
            assert!(errors.iter().any(|e| e.contains("range min")));
            assert!(errors.iter().any(|e| e.contains("min_refs")));
            assert!(errors.iter().any(|e| e.contains("needs two fields")));
            assert!(errors.iter().any(|e| e.contains("duplicate cross rule id")));
            assert!(errors.iter().any(|e| e.contains("without bounds")));
        }
        other => panic!("expected invalid table, got {:?}", other.map(|t| t.category)),
    }
}

#[test]
fn test_longer_dependency_cycle_is_rejected() {
    let result = parse_rule_table(
        r#"{
            "category": "mouse",
            "fields": {
                "a": { "type": "text" },
                "b": { "type": "text" },
                "c": { "type": "text" },
                "free": { "type": "text" }
            },
            "cross_validation": [
                { "id": "ab", "type": "conditional_require", "if_field": "a", "equals": "x", "then_field": "b" },
                { "id": "bc", "type": "conditional_require", "if_field": "b", "equals": "x", "then_field": "c" },
                { "id": "ca", "type": "conditional_require", "if_field": "c", "equals": "x", "then_field": "a" }
            ]
        }"#,
    );

    match result {
        Err(RuleTableError::DependencyCycle { fields }) => {
            assert_eq!(fields, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        }
        other => panic!("expected cycle, got {:?}", other.map(|t| t.category)),
    }
}

#[test]
fn test_cross_rules_run_in_dependency_order() {
    let table = load_rule_table(&fixture_path("mouse.rules.json")).unwrap();

    let order = table.field_order();
    let pos = |k: &str| order.iter().position(|f| f == k).unwrap();
    assert!(pos("connection") < pos("battery_hours"));

    let ids: Vec<&str> = table.cross_rules().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&"battery_if_wireless"));
    assert!(ids.contains(&"plausible_polling"));
}

#[tokio::test]
async fn test_bundled_fixture_replays_to_complete_record() {
    let table = Arc::new(load_rule_table(&fixture_path("mouse.rules.json")).unwrap());
    let fixture = Fixture::load(&fixture_path("viper-v3-pro.json")).unwrap();
    let (request, fetcher, identity) = fixture.into_parts();

    let settings = OrchestratorSettings {
        retry: RetryPolicy {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        },
        ..OrchestratorSettings::default()
    };
    let orch = RoundOrchestrator::new(
        table,
        Arc::new(ComponentDb::new()),
        Arc::new(fetcher),
        EventBus::new(256),
        settings,
    )
    .with_identity(Arc::new(identity))
    .with_frontier(Arc::new(InMemoryFrontier::new(chrono::Duration::zero())));

    let (state, record) = orch.run(request).await.unwrap();

    assert_eq!(state.phase, RunPhase::Complete);
    assert_eq!(record.status, RecordStatus::Complete);
    assert!(state.is_excluded("forum"));
    assert!(!state.is_excluded("shop"));
    assert_eq!(record.field("weight").unwrap().value(), Some(&TypedValue::Number(54.0)));
    assert_eq!(
        record.field("connection").unwrap().value(),
        Some(&TypedValue::Text("wireless".into()))
    );
    assert!(record.field("sensor").unwrap().is_known());
    assert_eq!(record.fields.len(), 7);
}
