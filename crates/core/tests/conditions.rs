//! Condition strings as they arrive from request parameters, and the sample
//! engine config shipped in `data/config/`.

use canon_core::condition::{in_condition, range_condition, slice_condition};
use canon_core::{parse_conditions, Condition, EngineConfig, EngineError, Operator, Scalar};

fn config_dir() -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../data/config")
}

// ── Round trips ─────────────────────────────────────────────

#[test]
fn open_ended_timestamp_range_round_trips() {
    let input = "time:range:(2025-01-01T00:00:00):";
    let condition: Condition = input.parse().unwrap();
    assert_eq!(
        condition,
        range_condition("time", Some(Scalar::from("2025-01-01T00:00:00")), None).unwrap()
    );
    assert_eq!(condition.to_string(), input);
}

#[test]
fn every_operator_round_trips_through_its_string_form() {
    let conditions = vec![
        slice_condition("agent_name").unwrap(),
        in_condition(
            "model",
            vec![Scalar::from("m:small"), Scalar::from("a,b"), Scalar::from(3.5)],
        )
        .unwrap(),
        in_condition("suite", vec![Scalar::from("smoke")]).unwrap(),
        canon_core::condition::not_in_condition("agent_version", vec![Scalar::from("1.0")])
            .unwrap(),
        range_condition("accuracy", Some(Scalar::from(0.5)), Some(Scalar::from(0.9))).unwrap(),
        range_condition("time_end_utc", None, Some(Scalar::from("2025-01-03T10:00:00Z"))).unwrap(),
    ];

    for condition in conditions {
        let text = condition.to_string();
        let parsed: Condition = text
            .parse()
            .unwrap_or_else(|e| panic!("failed to re-parse {text}: {e}"));
        assert_eq!(parsed, condition, "round trip of {text}");
    }
}

// ── Request parameters ──────────────────────────────────────

#[test]
fn condition_lists_deserialize_from_json() {
    let json = r#"["agent_name", "model:in:m-small,m-large", "time_end_utc:range:(2025-01-02T00:00:00Z):"]"#;
    let conditions: Vec<Condition> = serde_json::from_str(json).unwrap();

    let operators: Vec<Operator> = conditions.iter().map(Condition::operator).collect();
    assert_eq!(operators, vec![Operator::Slice, Operator::In, Operator::Range]);

    let back = serde_json::to_string(&conditions).unwrap();
    assert_eq!(back, json.replace(", ", ","));
}

#[test]
fn invalid_condition_fails_deserialization() {
    let err = serde_json::from_str::<Vec<Condition>>(r#"["model:in:"]"#).unwrap_err();
    assert!(err.to_string().contains("model"));
}

#[test]
fn best_effort_parsing_keeps_valid_siblings() {
    let conditions = parse_conditions("agent_name; model:between:1:2; accuracy:range:0.5:");
    let fields: Vec<&str> = conditions.iter().map(Condition::field_name).collect();
    assert_eq!(fields, vec!["agent_name", "accuracy"]);
}

#[test]
fn slice_cannot_be_checked() {
    let condition = slice_condition("agent_name").unwrap();
    let err = condition.check(Some(&Scalar::from("alpha"))).unwrap_err();
    assert!(matches!(err, EngineError::SliceNotCheckable(_)));
}

// ── Config ──────────────────────────────────────────────────

#[test]
fn sample_config_loads() {
    let config = EngineConfig::from_file(config_dir().join("engine.toml")).unwrap();
    assert_eq!(config.round_precision, 3);
    assert_eq!(config.pruning.min_threshold, 0.02);
    assert_eq!(config.pruning.min_variation_ratio, 0.25);
    assert_eq!(config.cache.staleness_secs, 600);
    assert_eq!(config.time.aggregated_field, "time_end_utc/max_value");
}

#[test]
fn missing_config_file_is_an_io_error() {
    let err = EngineConfig::from_file(config_dir().join("absent.toml")).unwrap_err();
    assert!(matches!(err, EngineError::Io(_)));
}
