use std::sync::Arc;

use evidenceseq_core::calibration::{CalibrationDatum, InMemoryCalibrationStore};
use evidenceseq_core::error::EvidenceSeqError;
use evidenceseq_core::evalue::{AggregatorConfig, EvidenceAggregator, Verdict};
use evidenceseq_core::fdr::{FdrCorrectionStage, FdrLimits};
use evidenceseq_core::profile::DataDomain;
use evidenceseq_core::types::{FamilyKey, FdrMethod, RelationshipKey, TestResult, TestType};
use evidenceseq_core::validation::{
    DiscoveryEvidence, HypothesisValidator, ValidationKind, ValidationRequest, WorkspaceContext,
};

fn discovery(test_type: TestType, q: f64, p: f64, sample_size: u64) -> DiscoveryEvidence {
    DiscoveryEvidence {
        cause_key: "ads".into(),
        effect_key: "sales".into(),
        test_type,
        p_value: p,
        q_value: q,
        sample_size,
        total_comparisons: 12,
        method: FdrMethod::BenjaminiHochberg,
    }
}

fn request(evidence: Vec<DiscoveryEvidence>, workspace: WorkspaceContext) -> ValidationRequest {
    ValidationRequest {
        session_id: "s-1".into(),
        hypothesis_id: "h-1".into(),
        cause_key: "ads".into(),
        effect_key: "sales".into(),
        discovery_evidence: evidence,
        domain: DataDomain::Business,
        workspace,
    }
}

fn strong() -> DiscoveryEvidence {
    discovery(TestType::Permutation, 0.001, 0.0005, 2_000)
}

#[test]
fn empty_discovery_evidence_breaks_continuity() {
    let out = HypothesisValidator::default()
        .validate(&request(Vec::new(), WorkspaceContext::default()))
        .unwrap();
    assert!(!out.passed);
    assert_eq!(out.kind, ValidationKind::QValueContinuityBreach);
    assert!(out.combination.is_none());
    assert!(out.verdict.is_none());
}

#[test]
fn evidence_missing_for_effect_variable() {
    let mut other = strong();
    other.effect_key = "weather".into();
    let out = HypothesisValidator::default()
        .validate(&request(vec![other], WorkspaceContext::default()))
        .unwrap();
    assert_eq!(out.kind, ValidationKind::MissingDiscoveryEvidence);
    assert!(out.failure_reason.contains("sales"));
}

#[test]
fn noisy_discovery_q_value_rejects_before_combination() {
    let noisy = discovery(TestType::Pearson, 0.25, 0.02, 800);
    let out = HypothesisValidator::default()
        .validate(&request(vec![strong(), noisy], WorkspaceContext::default()))
        .unwrap();
    assert!(!out.passed);
    assert_eq!(out.kind, ValidationKind::EarlyQValueRejection);
    assert!(out.failure_reason.contains("0.2500"));
    assert!(out.combination.is_none());
}

#[test]
fn unusable_evidence_leaves_nothing_to_combine() {
    let empty_sample = discovery(TestType::ChiSquare, 0.02, 0.01, 0);
    let out = HypothesisValidator::default()
        .validate(&request(vec![empty_sample], WorkspaceContext::default()))
        .unwrap();
    assert_eq!(out.kind, ValidationKind::NoEvidence);
    assert!(!out.passed);
}

#[test]
fn strong_evidence_passes_in_fresh_workspace() {
    // 800 * 1.2 (large sample) * 1.3 (large effect) / 20 = 62.4 against 2 * 8
    let out = HypothesisValidator::default()
        .validate(&request(vec![strong()], WorkspaceContext::default()))
        .unwrap();
    assert_eq!(out.kind, ValidationKind::EValueAggregation);
    assert_eq!(out.verdict, Some(Verdict::Accepted));
    assert!(out.passed);
    assert_eq!(out.dynamic_threshold, 8.0);
    let combination = out.combination.unwrap();
    assert!((combination.combined_e_value - 62.4).abs() < 1e-9);
}

#[test]
fn crowded_workspace_with_spent_alpha_withholds_acceptance() {
    // threshold 8 * 6 * 1.5 = 72, times 1.3 -> 93.6; 62.4 sits below 0.7 * 93.6
    let workspace = WorkspaceContext {
        hypotheses_generated: 100,
        global_alpha_spent: 0.9,
    };
    let out = HypothesisValidator::default()
        .validate(&request(vec![strong()], workspace))
        .unwrap();
    assert_eq!(out.verdict, Some(Verdict::Inconclusive));
    assert!(!out.passed);
    assert!((out.dynamic_threshold - 72.0).abs() < 1e-9);
    assert_eq!(out.workspace, workspace);
}

#[test]
fn corroborated_evidence_stops_early_in_busy_workspace() {
    // two chi-square tests: 20 * 20^sqrt(0.9) / 8 ~ 42.9, inside [0.7, 2) * 57.6
    let workspace = WorkspaceContext {
        hypotheses_generated: 100,
        global_alpha_spent: 0.0,
    };
    let pair = vec![
        discovery(TestType::ChiSquare, 0.05, 0.04, 500),
        discovery(TestType::ChiSquare, 0.05, 0.04, 500),
    ];
    let out = HypothesisValidator::default()
        .validate(&request(pair, workspace))
        .unwrap();
    let combination = out.combination.clone().unwrap();
    assert!(combination.early_stop_eligible);
    assert!(combination.combined_e_value > 40.32 && combination.combined_e_value < 115.2);
    assert_eq!(out.verdict, Some(Verdict::EarlyStop));
    assert!(!out.passed);
}

#[test]
fn single_moderate_test_is_inconclusive() {
    let out = HypothesisValidator::default()
        .validate(&request(
            vec![discovery(TestType::ChiSquare, 0.05, 0.04, 500)],
            WorkspaceContext::default(),
        ))
        .unwrap();
    let combination = out.combination.clone().unwrap();
    assert!((combination.combined_e_value - 1.0).abs() < 1e-9);
    assert!(!combination.early_stop_eligible);
    assert_eq!(out.verdict, Some(Verdict::Inconclusive));
}

#[test]
fn poor_calibration_history_drives_rejection() {
    let history: Vec<CalibrationDatum> = (0..5)
        .map(|_| CalibrationDatum {
            test_type: TestType::ChiSquare,
            domain: DataDomain::Business,
            p_value: 0.4,
            e_value: 0.01,
            q_value: 0.5,
            true_positive: false,
            test_reliability: 0.8,
            sample_size: 50,
        })
        .collect();
    let agg = EvidenceAggregator::new(AggregatorConfig::default())
        .with_history(Arc::new(InMemoryCalibrationStore::new(history)));
    // (1 / 0.09) * 0.005 / 20 is far below 1 / 8
    let out = HypothesisValidator::new(agg)
        .validate(&request(
            vec![discovery(TestType::ChiSquare, 0.09, 0.09, 50)],
            WorkspaceContext::default(),
        ))
        .unwrap();
    assert_eq!(out.verdict, Some(Verdict::Rejected));
    assert!(!out.passed);
}

#[test]
fn corrected_family_feeds_validation() {
    let family = FamilyKey {
        snapshot_id: "snap".into(),
        cohort_hash: "cohort".into(),
        stage_name: "pairwise".into(),
        test_type: TestType::Permutation,
        registry_hash: "registry".into(),
        stage_plan_hash: "plan".into(),
    };
    let key = RelationshipKey {
        variable_x: "ads".into(),
        variable_y: "sales".into(),
        test_type: TestType::Permutation,
        family_id: family.family_id(),
    };
    let correction = FdrCorrectionStage::new(FdrLimits::default())
        .correct_family(&family, vec![TestResult::new(key, 0.0005, 0.4, 2_000)])
        .unwrap();
    let evidence: Vec<_> = correction
        .corrected
        .iter()
        .map(DiscoveryEvidence::from_corrected)
        .collect();
    assert_eq!(evidence[0].cause_key, "ads");
    assert_eq!(evidence[0].total_comparisons, 1);

    let out = HypothesisValidator::default()
        .validate(&request(evidence, WorkspaceContext::default()))
        .unwrap();
    assert_eq!(out.verdict, Some(Verdict::Accepted));
}

#[test]
fn malformed_requests_are_errors() {
    let validator = HypothesisValidator::default();
    let mut req = request(vec![strong()], WorkspaceContext::default());
    req.hypothesis_id.clear();
    assert!(matches!(
        validator.validate(&req),
        Err(EvidenceSeqError::InvalidArgument(_))
    ));

    let mut req = request(vec![strong()], WorkspaceContext::default());
    req.workspace.global_alpha_spent = 1.5;
    assert!(matches!(
        validator.validate(&req),
        Err(EvidenceSeqError::InvalidArgument(_))
    ));
}
