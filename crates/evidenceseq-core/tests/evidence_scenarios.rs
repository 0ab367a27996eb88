use std::sync::Arc;

use evidenceseq_core::calibration::InMemoryCalibrationStore;
use evidenceseq_core::evalue::{BoundsSource, EvidenceAggregator, QualityRating, Verdict};
use evidenceseq_core::profile::{
    DataDomain, DomainRisk, EffectMagnitude, HypothesisProfile, SampleSizeClass,
};
use evidenceseq_core::types::TestType;

#[test]
fn strong_permutation_plus_correlation_is_accepted() {
    let agg = EvidenceAggregator::default();
    let e_perm = agg.convert(0.001, 0.0005, TestType::Permutation, DataDomain::Business, 2_500);
    let e_corr = agg.convert(0.08, 0.03, TestType::Pearson, DataDomain::Business, 2_500);
    assert!((e_perm.raw_value - 800.0).abs() < 1e-9);
    assert!((e_corr.raw_value - 12.5).abs() < 1e-9);

    let profile = HypothesisProfile::default()
        .with_sample_size(SampleSizeClass::Large)
        .with_effect_magnitude(EffectMagnitude::Large);
    let combined = agg.combine(&[e_perm, e_corr], &profile);

    assert_eq!(combined.test_count, 2);
    assert_eq!(combined.individual_results.len(), 2);
    assert!((combined.correlation_factor - 0.8).abs() < 1e-12);
    let threshold = agg.dynamic_threshold(2, combined.confidence, &profile);
    assert!(combined.combined_e_value >= 2.0 * threshold);
    assert_eq!(combined.verdict, Verdict::Accepted);
    assert!(combined.early_stop_eligible);
    assert_eq!(combined.quality_rating, QualityRating::VeryStrong);
}

#[test]
fn weak_single_test_in_critical_domain_is_inconclusive() {
    let agg = EvidenceAggregator::default();
    let e = agg.convert(0.9, 0.6, TestType::Generic, DataDomain::Business, 500);
    assert!((e.raw_value - 1.0 / 0.9).abs() < 1e-9);
    assert_eq!(e.bounds_source, BoundsSource::Heuristic);

    let critical = HypothesisProfile::default().with_domain_risk(DomainRisk::Critical);
    let one = agg.combine(std::slice::from_ref(&e), &critical);
    assert_eq!(one.verdict, Verdict::Inconclusive);
    assert!(one.combined_e_value > 1.0 / agg.dynamic_threshold(1, one.confidence, &critical));

    // below the early-stop strength band, eligibility waits for the third test
    let mild = agg.convert(0.5, 0.3, TestType::ChiSquare, DataDomain::Business, 500);
    let two = agg.combine(&[mild.clone(), mild.clone()], &critical);
    assert!(two.combined_e_value > 0.15 && two.combined_e_value < 15.0);
    assert!(!two.early_stop_eligible);
    let three = agg.combine(&[mild.clone(), mild.clone(), mild], &critical);
    assert!(three.early_stop_eligible);
}

#[test]
fn correlated_tests_are_attenuated() {
    let agg = EvidenceAggregator::default();
    let profile = HypothesisProfile::default();
    let pearson = agg.convert(0.01, 0.01, TestType::Pearson, DataDomain::Business, 500);
    let spearman = agg.convert(0.01, 0.01, TestType::Spearman, DataDomain::Business, 500);
    let chi = agg.convert(0.01, 0.01, TestType::ChiSquare, DataDomain::Business, 500);

    let correlated = agg.combine(&[pearson.clone(), spearman], &profile);
    let independent = agg.combine(&[pearson, chi], &profile);
    assert!(correlated.combined_e_value < independent.combined_e_value);
    assert!(correlated.correlation_factor < independent.correlation_factor);
}

#[test]
fn reference_history_is_below_the_bootstrap_minimum() {
    let agg = EvidenceAggregator::default()
        .with_history(Arc::new(InMemoryCalibrationStore::reference()));
    let e = agg.convert(0.001, 0.001, TestType::Permutation, DataDomain::Business, 500);
    assert_eq!(e.bounds_source, BoundsSource::Heuristic);
    assert!((e.raw_value - 800.0).abs() < 1e-9);
}
