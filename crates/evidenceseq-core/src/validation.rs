// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hypothesis validation gate over discovery evidence.
//!
//! A hypothesis names a cause and an effect variable. Before any e-value is
//! computed the gate checks q-value continuity (discovery evidence exists for
//! both variables) and rejects early when a relevant discovery q-value looks
//! like noise. Surviving evidence is converted and combined by the
//! [`EvidenceAggregator`], then judged against a threshold that grows with
//! the workspace's hypothesis count and spent alpha.

use serde::{Deserialize, Serialize};

use crate::error::{EvidenceSeqError, EvidenceSeqResult};
use crate::evalue::{EValue, EvidenceAggregator, EvidenceCombination, Verdict};
use crate::profile::{DataDomain, EffectMagnitude, HypothesisProfile, SampleSizeClass};
use crate::types::{CorrectedResult, FdrMethod, TestType};

pub const BASE_VALIDATION_THRESHOLD: f64 = 8.0;
/// Relevant discovery q-values above this reject the hypothesis outright.
pub const NOISE_Q_VALUE: f64 = 0.10;

/// One FDR-corrected discovery result carried into validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryEvidence {
    pub cause_key: String,
    pub effect_key: String,
    pub test_type: TestType,
    pub p_value: f64,
    pub q_value: f64,
    pub sample_size: u64,
    pub total_comparisons: usize,
    pub method: FdrMethod,
}

impl DiscoveryEvidence {
    /// Reads `variable_x` as the cause and `variable_y` as the effect.
    pub fn from_corrected(corrected: &CorrectedResult) -> Self {
        let key = &corrected.result.key;
        Self {
            cause_key: key.variable_x.clone(),
            effect_key: key.variable_y.clone(),
            test_type: key.test_type,
            p_value: corrected.result.p_value,
            q_value: corrected.q_value,
            sample_size: corrected.result.sample_size,
            total_comparisons: corrected.total_comparisons,
            method: corrected.method,
        }
    }

    fn is_usable(&self) -> bool {
        let unit = 0.0..=1.0;
        unit.contains(&self.q_value) && unit.contains(&self.p_value) && self.sample_size > 0
    }
}

/// Multiple-testing state of the workspace a hypothesis belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceContext {
    pub hypotheses_generated: u32,
    /// Fraction of the global significance budget already used.
    pub global_alpha_spent: f64,
}

impl WorkspaceContext {
    /// `8 * (1 + hypotheses/20)`, times 1.5 once more than 80% of alpha is spent.
    pub fn dynamic_threshold(&self) -> f64 {
        let mut threshold =
            BASE_VALIDATION_THRESHOLD * (1.0 + f64::from(self.hypotheses_generated) / 20.0);
        if self.global_alpha_spent > 0.8 {
            threshold *= 1.5;
        }
        threshold
    }

    /// Extra conservatism applied on top of [`Self::dynamic_threshold`].
    /// The alpha rule takes precedence over the hypothesis-count rule.
    pub fn workspace_multiplier(&self) -> f64 {
        if self.global_alpha_spent > 0.5 {
            1.3
        } else if self.hypotheses_generated > 50 {
            1.2
        } else {
            1.0
        }
    }

    pub fn effective_threshold(&self) -> f64 {
        self.dynamic_threshold() * self.workspace_multiplier()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub session_id: String,
    pub hypothesis_id: String,
    pub cause_key: String,
    pub effect_key: String,
    pub discovery_evidence: Vec<DiscoveryEvidence>,
    #[serde(default)]
    pub domain: DataDomain,
    #[serde(default)]
    pub workspace: WorkspaceContext,
}

impl ValidationRequest {
    /// Evidence for exactly this cause/effect pair.
    pub fn relevant_evidence(&self) -> impl Iterator<Item = &DiscoveryEvidence> {
        self.discovery_evidence
            .iter()
            .filter(|e| e.cause_key == self.cause_key && e.effect_key == self.effect_key)
    }

    /// Fails unless some evidence mentions the cause and some mentions the effect.
    pub fn check_continuity(&self) -> Result<(), (ValidationKind, String)> {
        if self.discovery_evidence.is_empty() {
            return Err((
                ValidationKind::QValueContinuityBreach,
                "no discovery evidence provided".to_string(),
            ));
        }
        let has_cause = self
            .discovery_evidence
            .iter()
            .any(|e| e.cause_key == self.cause_key);
        let has_effect = self
            .discovery_evidence
            .iter()
            .any(|e| e.effect_key == self.effect_key);
        if !has_cause || !has_effect {
            return Err((
                ValidationKind::MissingDiscoveryEvidence,
                format!(
                    "no discovery evidence for {} (cause: {has_cause}, effect: {has_effect})",
                    if has_cause { &self.effect_key } else { &self.cause_key }
                ),
            ));
        }
        Ok(())
    }

    /// The first relevant q-value above [`NOISE_Q_VALUE`], if any.
    pub fn noisy_q_value(&self) -> Option<f64> {
        self.relevant_evidence()
            .map(|e| e.q_value)
            .find(|q| *q > NOISE_Q_VALUE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationKind {
    QValueContinuityBreach,
    MissingDiscoveryEvidence,
    EarlyQValueRejection,
    NoEvidence,
    EValueAggregation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub hypothesis_id: String,
    pub passed: bool,
    pub kind: ValidationKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub failure_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combination: Option<EvidenceCombination>,
    /// Threshold before the workspace multiplier; 0 when no e-values were combined.
    pub dynamic_threshold: f64,
    pub workspace: WorkspaceContext,
}

impl ValidationResult {
    fn failed(request: &ValidationRequest, kind: ValidationKind, reason: String) -> Self {
        Self {
            hypothesis_id: request.hypothesis_id.clone(),
            passed: false,
            kind,
            failure_reason: reason,
            verdict: None,
            combination: None,
            dynamic_threshold: 0.0,
            workspace: request.workspace,
        }
    }
}

/// Verdict for a combination under workspace-adjusted thresholds.
pub fn workspace_verdict(combination: &EvidenceCombination, workspace: &WorkspaceContext) -> Verdict {
    let threshold = workspace.effective_threshold();
    let e = combination.combined_e_value;
    if e >= threshold * 2.0 {
        Verdict::Accepted
    } else if e <= 1.0 / threshold {
        Verdict::Rejected
    } else if combination.early_stop_eligible && e >= threshold * 0.7 {
        Verdict::EarlyStop
    } else {
        Verdict::Inconclusive
    }
}

#[derive(Debug, Clone, Default)]
pub struct HypothesisValidator {
    aggregator: EvidenceAggregator,
}

impl HypothesisValidator {
    pub fn new(aggregator: EvidenceAggregator) -> Self {
        Self { aggregator }
    }

    pub fn aggregator(&self) -> &EvidenceAggregator {
        &self.aggregator
    }

    /// Runs continuity, early rejection and the workspace-aware verdict.
    ///
    /// Gate failures are reported in the result; only malformed requests
    /// return an error.
    pub fn validate(&self, request: &ValidationRequest) -> EvidenceSeqResult<ValidationResult> {
        if request.hypothesis_id.is_empty() {
            return Err(EvidenceSeqError::invalid("hypothesis_id cannot be empty"));
        }
        if request.cause_key.is_empty() || request.effect_key.is_empty() {
            return Err(EvidenceSeqError::invalid("cause_key and effect_key are required"));
        }
        let workspace = &request.workspace;
        if !(0.0..=1.0).contains(&workspace.global_alpha_spent) {
            return Err(EvidenceSeqError::invalid(format!(
                "global_alpha_spent {} outside [0, 1]",
                workspace.global_alpha_spent
            )));
        }

        if let Err((kind, reason)) = request.check_continuity() {
            tracing::info!(hypothesis_id = %request.hypothesis_id, ?kind, %reason, "validation gate failed");
            return Ok(ValidationResult::failed(request, kind, reason));
        }
        if let Some(q) = request.noisy_q_value() {
            let reason = format!("discovery q-value {q:.4} above {NOISE_Q_VALUE}; likely noise");
            tracing::info!(hypothesis_id = %request.hypothesis_id, q_value = q, "early rejection");
            return Ok(ValidationResult::failed(
                request,
                ValidationKind::EarlyQValueRejection,
                reason,
            ));
        }

        let (e_values, profile) = self.convert_evidence(request);
        if e_values.is_empty() {
            return Ok(ValidationResult::failed(
                request,
                ValidationKind::NoEvidence,
                "no usable discovery evidence to convert".to_string(),
            ));
        }

        let combination = self.aggregator.combine(&e_values, &profile);
        let verdict = workspace_verdict(&combination, workspace);
        let dynamic_threshold = workspace.dynamic_threshold();
        tracing::info!(
            hypothesis_id = %request.hypothesis_id,
            %verdict,
            combined_e = combination.combined_e_value,
            threshold = dynamic_threshold,
            "hypothesis validated"
        );
        Ok(ValidationResult {
            hypothesis_id: request.hypothesis_id.clone(),
            passed: verdict == Verdict::Accepted,
            kind: ValidationKind::EValueAggregation,
            failure_reason: String::new(),
            verdict: Some(verdict),
            combination: Some(combination),
            dynamic_threshold,
            workspace: *workspace,
        })
    }

    fn convert_evidence(&self, request: &ValidationRequest) -> (Vec<EValue>, HypothesisProfile) {
        let mut profile = HypothesisProfile::default();
        let mut e_values = Vec::new();
        for evidence in request.relevant_evidence() {
            if !evidence.is_usable() {
                tracing::debug!(
                    hypothesis_id = %request.hypothesis_id,
                    q_value = evidence.q_value,
                    p_value = evidence.p_value,
                    sample_size = evidence.sample_size,
                    "skipping unusable discovery evidence"
                );
                continue;
            }
            e_values.push(self.aggregator.convert(
                evidence.q_value,
                evidence.p_value,
                evidence.test_type,
                request.domain,
                evidence.sample_size,
            ));
            if evidence.q_value < 0.01 {
                profile.effect_magnitude = EffectMagnitude::Large;
            }
            if evidence.sample_size > 1_000 {
                profile.sample_size = SampleSizeClass::Large;
            }
        }
        (e_values, profile)
    }
}
