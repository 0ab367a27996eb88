// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

const FAMILY_DOMAIN: &[u8] = b"evidenceseq/familyid/v1";

/// Closed set of statistical tests whose outputs the engine consumes.
///
/// Aliases accept the tags older producers emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestType {
    #[serde(alias = "shredder", alias = "permutation_shredder")]
    Permutation,
    BootstrapValidation,
    #[serde(alias = "correlation_pearson")]
    Pearson,
    #[serde(alias = "correlation_spearman")]
    Spearman,
    #[serde(alias = "chisquare_test")]
    ChiSquare,
    #[serde(alias = "ttest_two_sample", alias = "welch_ttest")]
    TTest,
    TransferEntropy,
    DirectionalCausality,
    #[serde(alias = "ccm")]
    ConvergentCrossMapping,
    MutualInformation,
    Generic,
}

impl TestType {
    pub const ALL: [TestType; 11] = [
        TestType::Permutation,
        TestType::BootstrapValidation,
        TestType::Pearson,
        TestType::Spearman,
        TestType::ChiSquare,
        TestType::TTest,
        TestType::TransferEntropy,
        TestType::DirectionalCausality,
        TestType::ConvergentCrossMapping,
        TestType::MutualInformation,
        TestType::Generic,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Permutation => "permutation",
            Self::BootstrapValidation => "bootstrap_validation",
            Self::Pearson => "pearson",
            Self::Spearman => "spearman",
            Self::ChiSquare => "chi_square",
            Self::TTest => "t_test",
            Self::TransferEntropy => "transfer_entropy",
            Self::DirectionalCausality => "directional_causality",
            Self::ConvergentCrossMapping => "convergent_cross_mapping",
            Self::MutualInformation => "mutual_information",
            Self::Generic => "generic",
        }
    }

    /// Calibration family used when converting a q-value of this test to an e-value.
    pub const fn calibration_kind(self) -> CalibrationKind {
        match self {
            Self::Permutation => CalibrationKind::Permutation,
            Self::Pearson | Self::Spearman => CalibrationKind::Correlation,
            Self::ChiSquare => CalibrationKind::ChiSquare,
            Self::TTest => CalibrationKind::TTest,
            Self::BootstrapValidation
            | Self::TransferEntropy
            | Self::DirectionalCausality
            | Self::ConvergentCrossMapping
            | Self::MutualInformation
            | Self::Generic => CalibrationKind::Generic,
        }
    }
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationKind {
    Permutation,
    Correlation,
    ChiSquare,
    TTest,
    Generic,
}

/// Why a pair was not tested. Skipped pairs never take a rank slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    PerfectCorrelation,
    LowVariance,
    LikelyDerived,
    LowN,
    HighMissing,
    SparseData,
}

/// Hex SHA-256 identifier of a [`FamilyKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FamilyId(pub String);

impl FamilyId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FamilyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Grouping criteria for one joint multiple-testing correction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FamilyKey {
    pub snapshot_id: String,
    pub cohort_hash: String,
    pub stage_name: String,
    pub test_type: TestType,
    pub registry_hash: String,
    pub stage_plan_hash: String,
}

fn encode_len_prefixed_utf8(out: &mut Vec<u8>, value: &str) {
    out.extend_from_slice(&(value.len() as u32).to_be_bytes());
    out.extend_from_slice(value.as_bytes());
}

impl FamilyKey {
    pub fn family_id(&self) -> FamilyId {
        let mut encoded = Vec::with_capacity(256);
        encode_len_prefixed_utf8(&mut encoded, &self.snapshot_id);
        encode_len_prefixed_utf8(&mut encoded, &self.cohort_hash);
        encode_len_prefixed_utf8(&mut encoded, &self.stage_name);
        encode_len_prefixed_utf8(&mut encoded, self.test_type.as_str());
        encode_len_prefixed_utf8(&mut encoded, &self.registry_hash);
        encode_len_prefixed_utf8(&mut encoded, &self.stage_plan_hash);

        let mut hasher = Sha256::new();
        hasher.update(FAMILY_DOMAIN);
        hasher.update(encoded);
        FamilyId(hex::encode(hasher.finalize()))
    }
}

/// Identifies one tested variable pair inside a family.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationshipKey {
    pub variable_x: String,
    pub variable_y: String,
    pub test_type: TestType,
    pub family_id: FamilyId,
}

/// Raw output of one pairwise statistical test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub key: RelationshipKey,
    pub p_value: f64,
    pub effect_size: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect_unit: Option<String>,
    pub sample_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
}

impl TestResult {
    pub fn new(key: RelationshipKey, p_value: f64, effect_size: f64, sample_size: u64) -> Self {
        Self {
            key,
            p_value,
            effect_size,
            effect_unit: None,
            sample_size,
            skipped: None,
        }
    }

    pub fn skipped(key: RelationshipKey, reason: SkipReason, sample_size: u64) -> Self {
        Self {
            key,
            p_value: 1.0,
            effect_size: 0.0,
            effect_unit: None,
            sample_size,
            skipped: Some(reason),
        }
    }

    pub fn with_effect_unit(mut self, unit: impl Into<String>) -> Self {
        self.effect_unit = Some(unit.into());
        self
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FdrMethod {
    #[serde(rename = "BH")]
    BenjaminiHochberg,
}

impl FdrMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BenjaminiHochberg => "BH",
        }
    }
}

/// A [`TestResult`] stamped with its family-wide correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectedResult {
    pub result: TestResult,
    pub q_value: f64,
    pub rank: usize,
    pub total_comparisons: usize,
    pub method: FdrMethod,
}

/// Wall-clock milliseconds since the Unix epoch, 0 if the clock is before it.
pub fn unix_millis_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
