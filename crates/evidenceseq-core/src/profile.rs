// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hypothesis context that scales calibration and combination.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DomainRisk {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SampleSizeClass {
    Small,
    #[default]
    Medium,
    Large,
}

impl SampleSizeClass {
    /// `< 100` rows is small, `> 1000` is large.
    pub fn from_sample_size(n: u64) -> Self {
        if n < 100 {
            Self::Small
        } else if n <= 1_000 {
            Self::Medium
        } else {
            Self::Large
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EffectMagnitude {
    Small,
    #[default]
    Medium,
    Large,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConfoundingRisk {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataComplexity {
    Simple,
    #[default]
    Moderate,
    Complex,
}

/// Externally supplied classification of a hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HypothesisProfile {
    pub domain_risk: DomainRisk,
    pub sample_size: SampleSizeClass,
    pub effect_magnitude: EffectMagnitude,
    pub confounding_risk: ConfoundingRisk,
    pub data_complexity: DataComplexity,
}

impl HypothesisProfile {
    pub fn with_domain_risk(mut self, risk: DomainRisk) -> Self {
        self.domain_risk = risk;
        self
    }

    pub fn with_sample_size(mut self, class: SampleSizeClass) -> Self {
        self.sample_size = class;
        self
    }

    pub fn with_effect_magnitude(mut self, magnitude: EffectMagnitude) -> Self {
        self.effect_magnitude = magnitude;
        self
    }

    pub fn with_confounding_risk(mut self, risk: ConfoundingRisk) -> Self {
        self.confounding_risk = risk;
        self
    }

    pub fn with_data_complexity(mut self, complexity: DataComplexity) -> Self {
        self.data_complexity = complexity;
        self
    }
}

/// Subject domain of the analysed dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum DataDomain {
    Healthcare,
    Finance,
    Scientific,
    Engineering,
    #[default]
    Business,
    Sports,
    Other,
}

impl DataDomain {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthcare => "Healthcare",
            Self::Finance => "Finance",
            Self::Scientific => "Scientific",
            Self::Engineering => "Engineering",
            Self::Business => "Business",
            Self::Sports => "Sports",
            Self::Other => "Other",
        }
    }

    /// Fixed scale applied to every converted e-value of this domain.
    pub const fn risk_multiplier(self) -> f64 {
        match self {
            Self::Healthcare => 0.7,
            Self::Finance => 0.8,
            Self::Scientific => 0.9,
            Self::Engineering => 0.95,
            Self::Business | Self::Other => 1.0,
            Self::Sports => 1.1,
        }
    }
}

impl fmt::Display for DataDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
