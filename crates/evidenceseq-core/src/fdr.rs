// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Family-wise false discovery rate correction.
//!
//! q-values follow `q_r = p_r * M / r` (rank `r` over ascending p-values,
//! clamped to `[0, 1]`). The running-minimum step of textbook
//! Benjamini-Hochberg is not applied, so q may decrease with rank.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{EvidenceSeqError, EvidenceSeqResult};
use crate::telemetry::Telemetry;
use crate::types::{
    CorrectedResult, FamilyId, FamilyKey, FdrMethod, RelationshipKey, TestResult,
};

pub const DEFAULT_MAX_VARIABLES: usize = 2_000;
pub const DEFAULT_MAX_PAIRS: usize = 500_000;
pub const DEFAULT_MAX_RUNTIME_MS: u64 = 300_000;
pub const DEFAULT_CHECK_EVERY_PAIRS: usize = 100;

/// Capacity guardrails for one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FdrLimits {
    pub max_variables: usize,
    pub max_pairs: usize,
    pub max_runtime_ms: u64,
    /// The wall-clock budget is sampled once per this many pairs.
    pub check_every_pairs: usize,
}

impl Default for FdrLimits {
    fn default() -> Self {
        Self {
            max_variables: DEFAULT_MAX_VARIABLES,
            max_pairs: DEFAULT_MAX_PAIRS,
            max_runtime_ms: DEFAULT_MAX_RUNTIME_MS,
            check_every_pairs: DEFAULT_CHECK_EVERY_PAIRS,
        }
    }
}

impl FdrLimits {
    pub fn max_runtime(&self) -> Duration {
        Duration::from_millis(self.max_runtime_ms)
    }
}

/// Runs the statistical test for one variable pair.
///
/// Implementations must be safe to call from several threads; pairs of one
/// family are independent of each other.
pub trait PairwiseAnalyzer {
    fn analyze(&self, key: RelationshipKey) -> TestResult;
}

impl<F> PairwiseAnalyzer for F
where
    F: Fn(RelationshipKey) -> TestResult,
{
    fn analyze(&self, key: RelationshipKey) -> TestResult {
        self(key)
    }
}

/// A fully corrected family, published as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyCorrection {
    pub family_id: FamilyId,
    pub family_key: FamilyKey,
    /// Ranked results, rank 1 first.
    pub corrected: Vec<CorrectedResult>,
    pub skipped: Vec<TestResult>,
    pub total_comparisons: usize,
    pub method: FdrMethod,
}

impl FamilyCorrection {
    pub fn by_pair(&self, variable_x: &str, variable_y: &str) -> Option<&CorrectedResult> {
        self.corrected.iter().find(|c| {
            c.result.key.variable_x == variable_x && c.result.key.variable_y == variable_y
        })
    }
}

/// `q = p * m / rank`, clamped to `[0, 1]`.
pub fn bh_q_value(p_value: f64, rank: usize, total: usize) -> f64 {
    if rank == 0 {
        return 1.0;
    }
    (p_value * total as f64 / rank as f64).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Default)]
pub struct FdrCorrectionStage {
    limits: FdrLimits,
    telemetry: Option<Telemetry>,
}

impl FdrCorrectionStage {
    pub fn new(limits: FdrLimits) -> Self {
        Self {
            limits,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn limits(&self) -> &FdrLimits {
        &self.limits
    }

    /// Corrects a complete family. Any invalid member aborts the whole family.
    pub fn correct_family(
        &self,
        family: &FamilyKey,
        results: Vec<TestResult>,
    ) -> EvidenceSeqResult<FamilyCorrection> {
        let family_id = family.family_id();
        match Self::rank_and_correct(family, &family_id, results) {
            Ok(correction) => {
                if let Some(t) = &self.telemetry {
                    t.record_family_corrected(correction.total_comparisons);
                }
                tracing::info!(
                    family_id = %family_id,
                    stage = %family.stage_name,
                    comparisons = correction.total_comparisons,
                    skipped = correction.skipped.len(),
                    "family corrected"
                );
                Ok(correction)
            }
            Err(err) => Err(self.abort(&family_id, "invalid_member", err)),
        }
    }

    /// Runs `analyzer` over the upper triangle of `variables` and corrects the
    /// collected family.
    ///
    /// Variable and pair caps are checked before any pair is analysed; the
    /// runtime budget is sampled every `check_every_pairs` pairs.
    pub fn run_pairwise<A>(
        &self,
        family: &FamilyKey,
        variables: &[String],
        analyzer: &A,
    ) -> EvidenceSeqResult<FamilyCorrection>
    where
        A: PairwiseAnalyzer + ?Sized,
    {
        let family_id = family.family_id();
        let n = variables.len();
        if n > self.limits.max_variables {
            return Err(self.abort(
                &family_id,
                "variable_cap",
                EvidenceSeqError::CapacityExceeded(format!(
                    "too many variables: {n} > {}",
                    self.limits.max_variables
                )),
            ));
        }
        let total_pairs = n.saturating_mul(n.saturating_sub(1)) / 2;
        if total_pairs > self.limits.max_pairs {
            return Err(self.abort(
                &family_id,
                "pair_cap",
                EvidenceSeqError::CapacityExceeded(format!(
                    "too many variable pairs: {total_pairs} > {}",
                    self.limits.max_pairs
                )),
            ));
        }

        let started = Instant::now();
        let budget = self.limits.max_runtime();
        let every = self.limits.check_every_pairs.max(1);
        let mut results = Vec::with_capacity(total_pairs);
        let mut pair_index = 0_usize;
        for i in 0..n {
            for j in (i + 1)..n {
                if pair_index % every == 0 && started.elapsed() > budget {
                    return Err(self.abort(
                        &family_id,
                        "runtime",
                        EvidenceSeqError::CapacityExceeded(format!(
                            "pairwise stage exceeded maximum runtime of {} ms after {pair_index} pairs",
                            self.limits.max_runtime_ms
                        )),
                    ));
                }
                let key = RelationshipKey {
                    variable_x: variables[i].clone(),
                    variable_y: variables[j].clone(),
                    test_type: family.test_type,
                    family_id: family_id.clone(),
                };
                results.push(analyzer.analyze(key));
                pair_index += 1;
            }
        }

        self.correct_family(family, results)
    }

    fn rank_and_correct(
        family: &FamilyKey,
        family_id: &FamilyId,
        results: Vec<TestResult>,
    ) -> EvidenceSeqResult<FamilyCorrection> {
        let mut ranked = Vec::with_capacity(results.len());
        let mut skipped = Vec::new();
        for result in results {
            if result.key.family_id != *family_id {
                return Err(EvidenceSeqError::invalid(format!(
                    "result {}~{} belongs to family {}, not {}",
                    result.key.variable_x, result.key.variable_y, result.key.family_id, family_id
                )));
            }
            if result.is_skipped() {
                skipped.push(result);
                continue;
            }
            if !result.p_value.is_finite() || !(0.0..=1.0).contains(&result.p_value) {
                return Err(EvidenceSeqError::invalid(format!(
                    "p-value {} for {}~{} outside [0, 1]",
                    result.p_value, result.key.variable_x, result.key.variable_y
                )));
            }
            ranked.push(result);
        }

        ranked.sort_by(|a, b| a.p_value.total_cmp(&b.p_value));
        let m = ranked.len();
        let corrected = ranked
            .into_iter()
            .enumerate()
            .map(|(i, result)| {
                let rank = i + 1;
                CorrectedResult {
                    q_value: bh_q_value(result.p_value, rank, m),
                    result,
                    rank,
                    total_comparisons: m,
                    method: FdrMethod::BenjaminiHochberg,
                }
            })
            .collect();

        Ok(FamilyCorrection {
            family_id: family_id.clone(),
            family_key: family.clone(),
            corrected,
            skipped,
            total_comparisons: m,
            method: FdrMethod::BenjaminiHochberg,
        })
    }

    fn abort(&self, family_id: &FamilyId, reason: &str, err: EvidenceSeqError) -> EvidenceSeqError {
        if let Some(t) = &self.telemetry {
            t.record_family_aborted(reason);
        }
        tracing::warn!(family_id = %family_id, reason, error = %err, "family aborted");
        err
    }
}
