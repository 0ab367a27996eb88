// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

use clap::{Parser, Subcommand};
use evidenceseq_core::calibration::InMemoryCalibrationStore;
use evidenceseq_core::config::EngineConfig;
use evidenceseq_core::evalue::{EValue, EvidenceAggregator};
use evidenceseq_core::events::{
    CollectingBroadcaster, EvidencePayload, HypothesisPayload, ProgressPayload,
};
use evidenceseq_core::fdr::FdrCorrectionStage;
use evidenceseq_core::ledger::ScientificLedger;
use evidenceseq_core::profile::{DataDomain, HypothesisProfile};
use evidenceseq_core::telemetry::Telemetry;
use evidenceseq_core::types::{FamilyKey, TestResult, TestType};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "evidenceseqctl", about = "Operator tooling for the EvidenceSeq core")]
struct Cli {
    /// Log filter directive, written to stderr.
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Apply FDR correction to one family of pairwise results.
    Correct {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Convert q-values to e-values and combine them into a verdict.
    Combine {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        history: Option<PathBuf>,
    },
    /// Correct, combine and sequence a whole session through the ledger.
    Replay {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        history: Option<PathBuf>,
    },
}

#[derive(Debug, Deserialize)]
struct FamilyInput {
    family: FamilyKey,
    results: Vec<TestResult>,
}

#[derive(Debug, Deserialize)]
struct TestInput {
    p_value: f64,
    q_value: f64,
    test_type: TestType,
    sample_size: u64,
}

#[derive(Debug, Deserialize)]
struct CombineInput {
    #[serde(default)]
    domain: DataDomain,
    #[serde(default)]
    profile: HypothesisProfile,
    tests: Vec<TestInput>,
}

#[derive(Debug, Deserialize)]
struct ReplayInput {
    session_id: String,
    hypothesis_id: String,
    statement: String,
    #[serde(default)]
    domain: DataDomain,
    #[serde(default)]
    profile: HypothesisProfile,
    family: FamilyKey,
    results: Vec<TestResult>,
}

fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log))
        .with_writer(std::io::stderr)
        .init();

    let out = match cli.cmd {
        Command::Correct { input, config } => run_correct(&input, config.as_deref()),
        Command::Combine {
            input,
            config,
            history,
        } => run_combine(&input, config.as_deref(), history.as_deref()),
        Command::Replay {
            input,
            config,
            history,
        } => run_replay(&input, config.as_deref(), history.as_deref()),
    };
    match out {
        Ok(v) => println!("{}", v),
        Err(msg) => {
            println!("{}", json!({"error": msg}));
            std::process::exit(1);
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, String> {
    let bytes = fs::read(path).map_err(|e| format!("{}: {e}", path.display()))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("{}: {e}", path.display()))
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, String> {
    let mut config = match path {
        Some(p) => EngineConfig::load(p).map_err(|e| e.to_string())?,
        None => EngineConfig::default(),
    };
    config.apply_env().map_err(|e| e.to_string())?;
    Ok(config)
}

fn aggregator(config: &EngineConfig, history: Option<&Path>) -> Result<EvidenceAggregator, String> {
    let agg = EvidenceAggregator::new(config.aggregator);
    match history {
        Some(p) => {
            let store = InMemoryCalibrationStore::load_json(p).map_err(|e| e.to_string())?;
            tracing::info!(records = store.len(), path = %p.display(), "loaded calibration history");
            Ok(agg.with_history(Arc::new(store)))
        }
        None => Ok(agg),
    }
}

fn run_correct(input: &Path, config: Option<&Path>) -> Result<serde_json::Value, String> {
    let config = load_config(config)?;
    let doc: FamilyInput = read_json(input)?;
    let correction = FdrCorrectionStage::new(config.fdr)
        .correct_family(&doc.family, doc.results)
        .map_err(|e| e.to_string())?;
    serde_json::to_value(correction).map_err(|e| e.to_string())
}

fn run_combine(
    input: &Path,
    config: Option<&Path>,
    history: Option<&Path>,
) -> Result<serde_json::Value, String> {
    let config = load_config(config)?;
    let agg = aggregator(&config, history)?;
    let doc: CombineInput = read_json(input)?;
    let e_values: Vec<EValue> = doc
        .tests
        .iter()
        .map(|t| agg.convert(t.q_value, t.p_value, t.test_type, doc.domain, t.sample_size))
        .collect();
    let combination = agg.combine(&e_values, &doc.profile);
    serde_json::to_value(combination).map_err(|e| e.to_string())
}

fn run_replay(
    input: &Path,
    config: Option<&Path>,
    history: Option<&Path>,
) -> Result<serde_json::Value, String> {
    let config = load_config(config)?;
    let agg = aggregator(&config, history)?;
    let doc: ReplayInput = read_json(input)?;

    let telemetry = Telemetry::new();
    let sink = Arc::new(CollectingBroadcaster::new());
    let ledger =
        ScientificLedger::new(sink.clone(), config.ledger).with_telemetry(telemetry.clone());
    let stage = FdrCorrectionStage::new(config.fdr).with_telemetry(telemetry.clone());

    let correction = stage
        .correct_family(&doc.family, doc.results)
        .map_err(|e| e.to_string())?;
    ledger
        .record_progress(
            &doc.session_id,
            "family_corrected",
            ProgressPayload {
                stage: doc.family.stage_name.clone(),
                progress: 0.5,
                message: format!("{} comparisons", correction.total_comparisons),
            },
        )
        .map_err(|e| e.to_string())?;

    let mut evidence_sids = Vec::with_capacity(correction.corrected.len());
    let mut e_values = Vec::with_capacity(correction.corrected.len());
    for corrected in &correction.corrected {
        let key = &corrected.result.key;
        let e_value = agg.convert(
            corrected.q_value,
            corrected.result.p_value,
            key.test_type,
            doc.domain,
            corrected.result.sample_size,
        );
        let sid = ledger
            .record_evidence(
                &doc.session_id,
                "relationship_discovered",
                EvidencePayload {
                    summary: format!("{} ~ {}", key.variable_x, key.variable_y),
                    corrected: Some(corrected.clone()),
                    e_value: Some(e_value.clone()),
                },
            )
            .map_err(|e| e.to_string())?;
        evidence_sids.push(sid);
        e_values.push(e_value);
    }

    let combination = agg.combine(&e_values, &doc.profile);
    let strongest = e_values
        .iter()
        .zip(&evidence_sids)
        .max_by(|a, b| a.0.raw_value.total_cmp(&b.0.raw_value))
        .map(|(_, sid)| *sid)
        .unwrap_or(0);
    let hypothesis_sid = ledger
        .record_hypothesis(
            &doc.session_id,
            &doc.hypothesis_id,
            "hypothesis_generated",
            strongest,
            HypothesisPayload {
                statement: doc.statement.clone(),
                combination: Some(combination.clone()),
            },
        )
        .map_err(|e| e.to_string())?;

    for sid in &evidence_sids {
        ledger
            .mark_evidence_rendered(&doc.session_id, *sid)
            .map_err(|e| e.to_string())?;
    }
    ledger
        .record_progress(
            &doc.session_id,
            "session_complete",
            ProgressPayload {
                stage: "replay".into(),
                progress: 1.0,
                message: String::new(),
            },
        )
        .map_err(|e| e.to_string())?;
    ledger.complete_session(&doc.session_id);

    Ok(json!({
        "family_id": correction.family_id,
        "hypothesis_sid": hypothesis_sid,
        "verdict": combination.verdict,
        "events": sink.events(),
        "telemetry": telemetry.render(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use evidenceseq_core::types::RelationshipKey;

    fn family() -> FamilyKey {
        FamilyKey {
            snapshot_id: "snap".into(),
            cohort_hash: "cohort".into(),
            stage_name: "pairwise".into(),
            test_type: TestType::Pearson,
            registry_hash: "registry".into(),
            stage_plan_hash: "plan".into(),
        }
    }

    fn results(fam: &FamilyKey) -> serde_json::Value {
        let rows: Vec<TestResult> = [("ads", 0.001), ("price", 0.02), ("weather", 0.4)]
            .iter()
            .map(|(x, p)| {
                TestResult::new(
                    RelationshipKey {
                        variable_x: (*x).into(),
                        variable_y: "sales".into(),
                        test_type: fam.test_type,
                        family_id: fam.family_id(),
                    },
                    *p,
                    0.4,
                    1_500,
                )
            })
            .collect();
        serde_json::to_value(rows).unwrap()
    }

    #[test]
    fn correct_prints_ranked_family() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("family.json");
        let fam = family();
        let doc = json!({"family": fam, "results": results(&fam)});
        fs::write(&path, doc.to_string()).unwrap();

        let out = run_correct(&path, None).unwrap();
        assert_eq!(out["total_comparisons"], 3);
        assert_eq!(out["method"], "BH");
        assert_eq!(out["corrected"][0]["rank"], 1);
    }

    #[test]
    fn combine_reports_verdict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evidence.json");
        let doc = json!({
            "domain": "Business",
            "profile": {"sample_size": "Large", "effect_magnitude": "Large"},
            "tests": [
                {"p_value": 0.0005, "q_value": 0.001, "test_type": "permutation_shredder", "sample_size": 2500},
                {"p_value": 0.03, "q_value": 0.08, "test_type": "pearson", "sample_size": 2500}
            ]
        });
        fs::write(&path, doc.to_string()).unwrap();
        let out = run_combine(&path, None, None).unwrap();
        assert_eq!(out["verdict"], "ACCEPTED");
        assert_eq!(out["test_count"], 2);
    }

    #[test]
    fn replay_delivers_hypothesis_after_its_evidence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let fam = family();
        let doc = json!({
            "session_id": "s-1",
            "hypothesis_id": "h-1",
            "statement": "ads drive sales",
            "family": fam,
            "results": results(&fam),
        });
        fs::write(&path, doc.to_string()).unwrap();

        let out = run_replay(&path, None, None).unwrap();
        let events = out["events"].as_array().unwrap();
        let hypothesis_sid = out["hypothesis_sid"].as_u64().unwrap();
        let h_pos = events
            .iter()
            .position(|e| e["sid"].as_u64() == Some(hypothesis_sid))
            .unwrap();
        let dep = events[h_pos]["dependency_sid"].as_u64().unwrap();
        let e_pos = events
            .iter()
            .position(|e| e["sid"].as_u64() == Some(dep))
            .unwrap();
        assert!(e_pos < h_pos);
        assert_eq!(events.len(), 6);
    }

    #[test]
    fn missing_input_is_reported() {
        let err = run_correct(Path::new("/nonexistent/family.json"), None).unwrap_err();
        assert!(err.contains("family.json"));
    }
}
