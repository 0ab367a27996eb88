use std::fs;

use evidenceseq_core::calibration::{CalibrationHistory, InMemoryCalibrationStore};
use evidenceseq_core::config::EngineConfig;
use evidenceseq_core::error::EvidenceSeqError;
use evidenceseq_core::profile::DataDomain;
use evidenceseq_core::types::TestType;

#[test]
fn partial_config_file_keeps_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.json");
    fs::write(
        &path,
        r#"{"fdr": {"max_pairs": 1000}, "ledger": {"session_idle_ms": 60000}}"#,
    )
    .unwrap();

    let config = EngineConfig::load(&path).unwrap();
    assert_eq!(config.fdr.max_pairs, 1_000);
    assert_eq!(config.fdr.max_variables, 2_000);
    assert_eq!(config.fdr.check_every_pairs, 100);
    assert_eq!(config.ledger.session_idle_ms, 60_000);
    assert_eq!(config.ledger.sweep_interval_ms, 5 * 60 * 1_000);
    assert_eq!(config.aggregator.bootstrap_resamples, 1_000);
    assert_eq!(config.aggregator.min_history, 5);
}

#[test]
fn missing_or_malformed_config_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        EngineConfig::load(dir.path().join("absent.json")),
        Err(EvidenceSeqError::Io(_))
    ));

    let bad = dir.path().join("bad.json");
    fs::write(&bad, "{ not json").unwrap();
    assert!(matches!(
        EngineConfig::load(&bad),
        Err(EvidenceSeqError::Json(_))
    ));

    let invalid = dir.path().join("invalid.json");
    fs::write(&invalid, r#"{"fdr": {"check_every_pairs": 0}}"#).unwrap();
    assert!(matches!(
        EngineConfig::load(&invalid),
        Err(EvidenceSeqError::InvalidArgument(_))
    ));
}

#[test]
fn calibration_history_loads_legacy_test_tags() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.json");
    fs::write(
        &path,
        r#"[
            {"test_type": "permutation_shredder", "domain": "Business", "p_value": 0.001,
             "e_value": 100.0, "q_value": 0.001, "true_positive": true,
             "test_reliability": 0.85, "sample_size": 500},
            {"test_type": "correlation_pearson", "domain": "Healthcare", "p_value": 0.05,
             "e_value": 20.0, "q_value": 0.08, "true_positive": true,
             "test_reliability": 0.78, "sample_size": 200}
        ]"#,
    )
    .unwrap();
    let store = InMemoryCalibrationStore::load_json(&path).unwrap();
    assert_eq!(store.len(), 2);
    assert_eq!(store.samples(TestType::Permutation, DataDomain::Business).len(), 1);
    assert_eq!(store.samples(TestType::Pearson, DataDomain::Healthcare).len(), 1);
}
