// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Calibrated e-values and their correlation-aware combination.
//!
//! A corrected q-value is converted to an e-value (`~1/q`) through a
//! per-[`CalibrationKind`] rule, scaled by the data domain's risk multiplier
//! and, when enough history exists, by the historical expected/actual ratio.
//! Several e-values for one hypothesis are folded into a single
//! [`EvidenceCombination`] whose verdict uses a threshold that moves with the
//! test count, the combined confidence and the domain risk.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::calibration::{bootstrap_bounds, historical_rescale_factor, CalibrationHistory};
use crate::profile::{
    ConfoundingRisk, DataComplexity, DataDomain, DomainRisk, EffectMagnitude, HypothesisProfile,
    SampleSizeClass,
};
use crate::types::{unix_millis_now, CalibrationKind, TestType};

pub const MAX_E_VALUE: f64 = 1_000.0;
pub const MIN_E_VALUE: f64 = 0.001;
pub const DEFAULT_TEST_CORRELATION: f64 = 0.1;
pub const DEFAULT_BOOTSTRAP_RESAMPLES: usize = 1_000;
pub const DEFAULT_MIN_HISTORY: usize = 5;
pub const DEFAULT_BOOTSTRAP_SEED: u64 = 0x6576_6964_656e_6365;

const EARLY_STOP_STRONG: f64 = 15.0;
const EARLY_STOP_WEAK: f64 = 0.15;

const TEST_CORRELATIONS: &[(TestType, TestType, f64)] = &[
    (TestType::Permutation, TestType::Permutation, 0.9),
    (TestType::Permutation, TestType::BootstrapValidation, 0.7),
    (TestType::Permutation, TestType::Pearson, 0.2),
    (TestType::Pearson, TestType::Spearman, 0.8),
    (TestType::Pearson, TestType::TransferEntropy, 0.4),
    (TestType::TransferEntropy, TestType::DirectionalCausality, 0.9),
    (TestType::TransferEntropy, TestType::ConvergentCrossMapping, 0.6),
];

/// Which procedure produced an [`EValue`]'s interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundsSource {
    Bootstrap,
    Heuristic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EValue {
    pub raw_value: f64,
    /// `sigmoid(ln(raw_value))`.
    pub normalized_value: f64,
    pub confidence: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub test_type: TestType,
    pub bounds_source: BoundsSource,
    pub calculated_at_ms: u64,
}

impl EValue {
    /// Builds an e-value from an interval, deriving normalization and confidence.
    pub fn from_bounds(
        raw_value: f64,
        lower_bound: f64,
        upper_bound: f64,
        test_type: TestType,
        bounds_source: BoundsSource,
    ) -> Self {
        Self {
            raw_value,
            normalized_value: normalize_to_01(raw_value),
            confidence: interval_confidence(raw_value, lower_bound, upper_bound),
            lower_bound,
            upper_bound,
            test_type,
            bounds_source,
            calculated_at_ms: unix_millis_now(),
        }
    }

    /// Heuristic-band e-value for a test of `sample_size` rows.
    pub fn heuristic(raw_value: f64, test_type: TestType, sample_size: u64) -> Self {
        let w = heuristic_half_width(sample_size);
        Self::from_bounds(
            raw_value,
            raw_value * (1.0 - w),
            raw_value * (1.0 + w),
            test_type,
            BoundsSource::Heuristic,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Accepted,
    Rejected,
    EarlyStop,
    Inconclusive,
}

impl Verdict {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
            Self::EarlyStop => "EARLY_STOP",
            Self::Inconclusive => "INCONCLUSIVE",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityRating {
    VeryWeak,
    Weak,
    Moderate,
    Strong,
    VeryStrong,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceCombination {
    /// Combined e-value after profile adjustment, divided by the test-count baseline.
    pub combined_e_value: f64,
    pub normalized_e_value: f64,
    pub quality_rating: QualityRating,
    pub test_count: usize,
    /// `prod(1 - correlation_i)` over consecutive test pairs.
    pub correlation_factor: f64,
    pub confidence: f64,
    pub early_stop_eligible: bool,
    pub verdict: Verdict,
    pub individual_results: Vec<EValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub bootstrap_resamples: usize,
    /// Samples needed for a (test, domain) pair before history is trusted.
    pub min_history: usize,
    pub bootstrap_seed: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            bootstrap_resamples: DEFAULT_BOOTSTRAP_RESAMPLES,
            min_history: DEFAULT_MIN_HISTORY,
            bootstrap_seed: DEFAULT_BOOTSTRAP_SEED,
        }
    }
}

/// `sigmoid(ln(e))`, i.e. `e / (1 + e)`. Non-positive and NaN inputs map to 0.
pub fn normalize_to_01(raw_e: f64) -> f64 {
    if raw_e.is_nan() || raw_e <= 0.0 {
        return 0.0;
    }
    if raw_e.is_infinite() {
        return 1.0;
    }
    let normalized = 1.0 / (1.0 + (-raw_e.ln()).exp());
    normalized.clamp(0.0, 1.0)
}

pub fn rate_quality(normalized: f64) -> QualityRating {
    if normalized >= 0.8 {
        QualityRating::VeryStrong
    } else if normalized >= 0.6 {
        QualityRating::Strong
    } else if normalized >= 0.4 {
        QualityRating::Moderate
    } else if normalized >= 0.2 {
        QualityRating::Weak
    } else {
        QualityRating::VeryWeak
    }
}

/// Base q-to-e conversion for one calibration family, before domain scaling.
pub fn convert_q_value(kind: CalibrationKind, q_value: f64, p_value: f64) -> f64 {
    if q_value.is_nan() || q_value >= 1.0 {
        return MIN_E_VALUE;
    }
    if q_value <= 0.0 {
        return MAX_E_VALUE;
    }
    let raw = 1.0 / q_value;
    match kind {
        CalibrationKind::Permutation => {
            let scaled = if q_value < 0.01 { raw * 0.8 } else { raw };
            scaled.min(MAX_E_VALUE)
        }
        CalibrationKind::Correlation => {
            if p_value / q_value > 10.0 {
                raw * 0.7
            } else {
                raw
            }
        }
        CalibrationKind::ChiSquare => raw,
        CalibrationKind::TTest => {
            if p_value < q_value * 2.0 {
                raw * 0.9
            } else {
                raw
            }
        }
        CalibrationKind::Generic => {
            if q_value < 0.05 && p_value > 0.01 {
                raw * 0.8
            } else {
                raw
            }
        }
    }
}

/// Symmetric lookup in the fixed inter-test correlation table.
pub fn test_correlation(a: TestType, b: TestType) -> f64 {
    TEST_CORRELATIONS
        .iter()
        .find(|(x, y, _)| (*x == a && *y == b) || (*x == b && *y == a))
        .map(|(_, _, c)| *c)
        .unwrap_or(DEFAULT_TEST_CORRELATION)
}

pub fn heuristic_half_width(sample_size: u64) -> f64 {
    if sample_size > 1_000 {
        0.3
    } else if sample_size < 100 {
        0.8
    } else {
        0.5
    }
}

/// `1 - (upper - lower) / e`, clamped to `[0, 1]`.
pub fn interval_confidence(e_value: f64, lower: f64, upper: f64) -> f64 {
    if !(e_value.is_finite() && lower.is_finite() && upper.is_finite()) {
        return 0.0;
    }
    if upper <= lower || e_value <= 0.0 {
        return 0.0;
    }
    clamp_unit(1.0 - (upper - lower) / e_value)
}

/// Geometric weight of a test correlated at `correlation` with its predecessor.
pub fn attenuation_weight(correlation: f64, profile: &HypothesisProfile) -> f64 {
    let mut weight = (1.0 - correlation).max(0.0).sqrt();
    weight *= match profile.data_complexity {
        DataComplexity::Complex => 0.9,
        DataComplexity::Simple => 1.1,
        DataComplexity::Moderate => 1.0,
    };
    weight *= match profile.domain_risk {
        DomainRisk::Critical => 0.8,
        DomainRisk::High => 0.9,
        DomainRisk::Low => 1.1,
        DomainRisk::Medium => 1.0,
    };
    weight.clamp(0.1, 1.0)
}

/// Product of the sample-size, effect and confounding adjustments.
pub fn profile_adjustment(profile: &HypothesisProfile) -> f64 {
    let sample = match profile.sample_size {
        SampleSizeClass::Small => 0.7,
        SampleSizeClass::Large => 1.2,
        SampleSizeClass::Medium => 1.0,
    };
    let effect = match profile.effect_magnitude {
        EffectMagnitude::Large => 1.3,
        EffectMagnitude::Small => 0.8,
        EffectMagnitude::Medium => 1.0,
    };
    let confounding = match profile.confounding_risk {
        ConfoundingRisk::High => 0.6,
        ConfoundingRisk::Low => 1.1,
        ConfoundingRisk::Medium => 1.0,
    };
    sample * effect * confounding
}

/// Expected combined e-value for `test_count` corroborating tests.
pub fn expected_baseline(test_count: usize) -> f64 {
    match test_count {
        0 | 1 => 20.0,
        2 | 3 => 8.0,
        4..=6 => 4.0,
        _ => 2.5,
    }
}

fn clamp_unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

fn combined_confidence(e_values: &[EValue], profile: &HypothesisProfile) -> f64 {
    if e_values.is_empty() {
        return 0.0;
    }
    let mean = e_values.iter().map(|e| e.confidence).sum::<f64>() / e_values.len() as f64;
    let sample = match profile.sample_size {
        SampleSizeClass::Small => 0.8,
        SampleSizeClass::Large => 1.1,
        SampleSizeClass::Medium => 1.0,
    };
    let complexity = match profile.data_complexity {
        DataComplexity::Complex => 0.9,
        DataComplexity::Simple => 1.05,
        DataComplexity::Moderate => 1.0,
    };
    clamp_unit(mean * sample * complexity)
}

/// Converts q-values into calibrated e-values and combines them.
#[derive(Clone, Default)]
pub struct EvidenceAggregator {
    config: AggregatorConfig,
    history: Option<Arc<dyn CalibrationHistory>>,
}

impl fmt::Debug for EvidenceAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvidenceAggregator")
            .field("config", &self.config)
            .field("history", &self.history.is_some())
            .finish()
    }
}

impl EvidenceAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            history: None,
        }
    }

    pub fn with_history(mut self, history: Arc<dyn CalibrationHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Converts one corrected result to a calibrated [`EValue`].
    ///
    /// Falls back to a heuristic interval when fewer than `min_history`
    /// records exist for `(test_type, domain)`.
    pub fn convert(
        &self,
        q_value: f64,
        p_value: f64,
        test_type: TestType,
        domain: DataDomain,
        sample_size: u64,
    ) -> EValue {
        let base = convert_q_value(test_type.calibration_kind(), q_value, p_value);
        let scaled = base * domain.risk_multiplier();

        let history = self
            .history
            .as_ref()
            .map(|h| h.samples(test_type, domain))
            .unwrap_or_default();
        if history.len() < self.config.min_history.max(1) {
            tracing::debug!(
                test_type = %test_type,
                domain = %domain,
                samples = history.len(),
                "calibration history too small; using heuristic bounds"
            );
            return EValue::heuristic(scaled, test_type, sample_size);
        }

        let calibrated = match historical_rescale_factor(&history) {
            Some(factor) => scaled * factor,
            None => scaled,
        };
        match bootstrap_bounds(
            &history,
            self.config.bootstrap_resamples,
            self.config.bootstrap_seed,
        ) {
            Some((lower, upper)) => EValue::from_bounds(
                calibrated,
                lower,
                upper,
                test_type,
                BoundsSource::Bootstrap,
            ),
            None => EValue::heuristic(calibrated, test_type, sample_size),
        }
    }

    /// Folds `e_values` into one verdict under `profile`.
    pub fn combine(&self, e_values: &[EValue], profile: &HypothesisProfile) -> EvidenceCombination {
        let Some(first) = e_values.first() else {
            return EvidenceCombination {
                combined_e_value: 1.0,
                normalized_e_value: 0.5,
                quality_rating: rate_quality(0.5),
                test_count: 0,
                correlation_factor: 1.0,
                confidence: 0.0,
                early_stop_eligible: false,
                verdict: Verdict::Inconclusive,
                individual_results: Vec::new(),
            };
        };

        let mut combined = first.raw_value;
        let mut correlation_factor = 1.0;
        for pair in e_values.windows(2) {
            let correlation = test_correlation(pair[0].test_type, pair[1].test_type);
            let weight = attenuation_weight(correlation, profile);
            combined *= pair[1].raw_value.powf(weight);
            correlation_factor *= 1.0 - correlation;
        }
        combined *= profile_adjustment(profile);

        let test_count = e_values.len();
        let confidence = combined_confidence(e_values, profile);
        let normalized = combined / expected_baseline(test_count);
        let verdict = self.verdict(normalized, test_count, confidence, profile);
        let normalized_01 = normalize_to_01(normalized);

        EvidenceCombination {
            combined_e_value: normalized,
            normalized_e_value: normalized_01,
            quality_rating: rate_quality(normalized_01),
            test_count,
            correlation_factor: clamp_unit(correlation_factor),
            confidence,
            early_stop_eligible: self.early_stop_eligible(normalized, test_count, profile),
            verdict,
            individual_results: e_values.to_vec(),
        }
    }

    pub fn dynamic_threshold(
        &self,
        test_count: usize,
        confidence: f64,
        profile: &HypothesisProfile,
    ) -> f64 {
        let confidence_multiplier = if confidence >= 0.9 {
            0.7
        } else if confidence >= 0.7 {
            0.8
        } else if confidence < 0.5 {
            1.3
        } else {
            1.0
        };
        let domain_multiplier = match profile.domain_risk {
            DomainRisk::Critical => 1.5,
            DomainRisk::High => 1.3,
            DomainRisk::Low => 0.8,
            DomainRisk::Medium => 1.0,
        };
        expected_baseline(test_count) * confidence_multiplier * domain_multiplier
    }

    pub fn early_stop_eligible(
        &self,
        normalized_e: f64,
        test_count: usize,
        profile: &HypothesisProfile,
    ) -> bool {
        if normalized_e >= EARLY_STOP_STRONG || normalized_e <= EARLY_STOP_WEAK {
            return true;
        }
        let min_tests = if profile.domain_risk == DomainRisk::Critical {
            3
        } else {
            2
        };
        test_count >= min_tests
    }

    fn verdict(
        &self,
        normalized_e: f64,
        test_count: usize,
        confidence: f64,
        profile: &HypothesisProfile,
    ) -> Verdict {
        let threshold = self.dynamic_threshold(test_count, confidence, profile);
        if normalized_e >= threshold * 2.0 {
            Verdict::Accepted
        } else if normalized_e <= 1.0 / threshold {
            Verdict::Rejected
        } else if confidence >= 0.8 && normalized_e >= threshold * 0.5 {
            Verdict::EarlyStop
        } else {
            Verdict::Inconclusive
        }
    }
}
