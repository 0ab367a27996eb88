// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Historical calibration records and the bootstrap used for e-value bounds.

use std::fs;
use std::path::Path;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::EvidenceSeqResult;
use crate::profile::DataDomain;
use crate::types::TestType;

/// One past (test, outcome) observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationDatum {
    pub test_type: TestType,
    pub domain: DataDomain,
    pub p_value: f64,
    pub e_value: f64,
    pub q_value: f64,
    pub true_positive: bool,
    pub test_reliability: f64,
    pub sample_size: u64,
}

/// Read-only source of calibration records.
pub trait CalibrationHistory: Send + Sync {
    fn samples(&self, test_type: TestType, domain: DataDomain) -> Vec<CalibrationDatum>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InMemoryCalibrationStore {
    records: Vec<CalibrationDatum>,
}

impl InMemoryCalibrationStore {
    pub fn new(records: Vec<CalibrationDatum>) -> Self {
        Self { records }
    }

    /// Small curated record set covering a few (test, domain) pairs.
    pub fn reference() -> Self {
        #[allow(clippy::too_many_arguments)]
        fn datum(
            test_type: TestType,
            p_value: f64,
            e_value: f64,
            q_value: f64,
            true_positive: bool,
            test_reliability: f64,
            domain: DataDomain,
            sample_size: u64,
        ) -> CalibrationDatum {
            CalibrationDatum {
                test_type,
                domain,
                p_value,
                e_value,
                q_value,
                true_positive,
                test_reliability,
                sample_size,
            }
        }
        Self::new(vec![
            datum(TestType::Permutation, 0.001, 100.0, 0.001, true, 0.85, DataDomain::Business, 500),
            datum(TestType::Pearson, 0.05, 20.0, 0.08, true, 0.78, DataDomain::Healthcare, 200),
            datum(TestType::ChiSquare, 0.01, 100.0, 0.02, true, 0.82, DataDomain::Finance, 1_000),
            datum(TestType::TransferEntropy, 0.02, 50.0, 0.03, true, 0.75, DataDomain::Scientific, 300),
            datum(TestType::Permutation, 0.5, 2.0, 0.6, false, 0.85, DataDomain::Business, 100),
            datum(TestType::Pearson, 0.8, 1.25, 0.9, false, 0.78, DataDomain::Sports, 50),
        ])
    }

    /// Loads a JSON array of [`CalibrationDatum`].
    pub fn load_json(path: impl AsRef<Path>) -> EvidenceSeqResult<Self> {
        let payload = fs::read(path)?;
        Ok(serde_json::from_slice(&payload)?)
    }

    pub fn push(&mut self, datum: CalibrationDatum) {
        self.records.push(datum);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl CalibrationHistory for InMemoryCalibrationStore {
    fn samples(&self, test_type: TestType, domain: DataDomain) -> Vec<CalibrationDatum> {
        self.records
            .iter()
            .filter(|d| d.test_type == test_type && d.domain == domain)
            .cloned()
            .collect()
    }
}

/// Reliability-weighted mean of `e_i / (1 / q_i)` over `samples`.
///
/// Records with `q <= 0` still contribute their weight to the denominator.
/// Returns `None` when the total weight is not positive.
pub fn historical_rescale_factor(samples: &[CalibrationDatum]) -> Option<f64> {
    let mut total_weight = 0.0;
    let mut weighted = 0.0;
    for datum in samples {
        total_weight += datum.test_reliability;
        if datum.q_value > 0.0 {
            weighted += datum.e_value * datum.q_value * datum.test_reliability;
        }
    }
    if total_weight > 0.0 && weighted.is_finite() {
        Some(weighted / total_weight)
    } else {
        None
    }
}

/// Upper median of `values`; sorts in place.
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    Some(values[values.len() / 2])
}

/// Index-based percentile on an ascending slice: `sorted[floor(fraction * len)]`.
pub fn percentile(sorted: &[f64], fraction: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let idx = (fraction.clamp(0.0, 1.0) * sorted.len() as f64) as usize;
    Some(sorted[idx.min(sorted.len() - 1)])
}

/// Percentile bootstrap of the median historical e-value.
///
/// Draws `resamples` with-replacement resamples of `samples`, takes each
/// resample's median e-value and returns the 2.5th and 97.5th percentiles.
pub fn bootstrap_bounds(
    samples: &[CalibrationDatum],
    resamples: usize,
    seed: u64,
) -> Option<(f64, f64)> {
    if samples.is_empty() || resamples == 0 {
        return None;
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut scratch = Vec::with_capacity(samples.len());
    let mut medians = Vec::with_capacity(resamples);
    for _ in 0..resamples {
        scratch.clear();
        for _ in 0..samples.len() {
            let idx = rng.gen_range(0..samples.len());
            scratch.push(samples[idx].e_value);
        }
        if let Some(m) = median(&mut scratch) {
            medians.push(m);
        }
    }
    medians.sort_by(f64::total_cmp);
    let lower = percentile(&medians, 0.025)?;
    let upper = percentile(&medians, 0.975)?;
    Some((lower, upper))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datum(e: f64, q: f64, reliability: f64) -> CalibrationDatum {
        CalibrationDatum {
            test_type: TestType::Permutation,
            domain: DataDomain::Business,
            p_value: q,
            e_value: e,
            q_value: q,
            true_positive: true,
            test_reliability: reliability,
            sample_size: 400,
        }
    }

    #[test]
    fn rescale_factor_is_reliability_weighted() {
        // ratios 0.5 (w=1) and 2.0 (w=3) -> (0.5 + 6.0) / 4
        let samples = [datum(5.0, 0.1, 1.0), datum(40.0, 0.05, 3.0)];
        let f = historical_rescale_factor(&samples).unwrap();
        assert!((f - 1.625).abs() < 1e-12);
        assert!(historical_rescale_factor(&[datum(5.0, 0.1, 0.0)]).is_none());
    }

    #[test]
    fn zero_q_records_only_add_weight() {
        let samples = [datum(10.0, 0.1, 1.0), datum(99.0, 0.0, 1.0)];
        assert!((historical_rescale_factor(&samples).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn percentile_uses_floor_index() {
        let sorted: Vec<f64> = (0..1_000).map(f64::from).collect();
        assert_eq!(percentile(&sorted, 0.025), Some(25.0));
        assert_eq!(percentile(&sorted, 0.975), Some(975.0));
        assert_eq!(percentile(&sorted, 1.0), Some(999.0));
        assert_eq!(percentile(&[], 0.5), None);
    }

    #[test]
    fn bootstrap_is_seed_deterministic_and_ordered() {
        let samples: Vec<_> = [2.0, 4.0, 8.0, 16.0, 32.0, 64.0]
            .iter()
            .map(|e| datum(*e, 0.05, 0.8))
            .collect();
        let a = bootstrap_bounds(&samples, 1_000, 7).unwrap();
        let b = bootstrap_bounds(&samples, 1_000, 7).unwrap();
        assert_eq!(a, b);
        assert!(a.0 <= a.1);
        assert!(a.0 >= 2.0 && a.1 <= 64.0);
    }

    #[test]
    fn store_filters_by_test_and_domain() {
        let store = InMemoryCalibrationStore::reference();
        assert_eq!(store.len(), 6);
        assert_eq!(store.samples(TestType::Permutation, DataDomain::Business).len(), 2);
        assert!(store.samples(TestType::Permutation, DataDomain::Sports).is_empty());
    }

    #[test]
    fn load_json_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let store = InMemoryCalibrationStore::reference();
        std::fs::write(&path, serde_json::to_vec(&store).unwrap()).unwrap();
        let loaded = InMemoryCalibrationStore::load_json(&path).unwrap();
        assert_eq!(loaded, store);
    }
}
