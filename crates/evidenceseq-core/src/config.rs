// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EvidenceSeqError, EvidenceSeqResult};
use crate::evalue::AggregatorConfig;
use crate::fdr::FdrLimits;
use crate::ledger::LedgerConfig;

pub const ENV_MAX_VARIABLES: &str = "EVIDENCESEQ_MAX_VARIABLES";
pub const ENV_MAX_PAIRS: &str = "EVIDENCESEQ_MAX_PAIRS";
pub const ENV_MAX_RUNTIME_MS: &str = "EVIDENCESEQ_MAX_RUNTIME_MS";
pub const ENV_BOOTSTRAP_RESAMPLES: &str = "EVIDENCESEQ_BOOTSTRAP_RESAMPLES";
pub const ENV_BOOTSTRAP_SEED: &str = "EVIDENCESEQ_BOOTSTRAP_SEED";
pub const ENV_SESSION_IDLE_SECS: &str = "EVIDENCESEQ_SESSION_IDLE_SECS";
pub const ENV_SWEEP_INTERVAL_SECS: &str = "EVIDENCESEQ_SWEEP_INTERVAL_SECS";

/// Tunables for every engine component. Missing JSON fields keep their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub fdr: FdrLimits,
    pub aggregator: AggregatorConfig,
    pub ledger: LedgerConfig,
}

fn parse_var<T>(name: &str, raw: &str) -> EvidenceSeqResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|err| EvidenceSeqError::invalid(format!("{name}={raw:?}: {err}")))
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> EvidenceSeqResult<Self> {
        let payload = fs::read(path)?;
        let config: Self = serde_json::from_slice(&payload)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> EvidenceSeqResult<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Overrides fields from `EVIDENCESEQ_*` process environment variables.
    pub fn apply_env(&mut self) -> EvidenceSeqResult<()> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    /// Same as [`Self::apply_env`] with an explicit variable source.
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> EvidenceSeqResult<()> {
        if let Some(v) = lookup(ENV_MAX_VARIABLES) {
            self.fdr.max_variables = parse_var(ENV_MAX_VARIABLES, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_PAIRS) {
            self.fdr.max_pairs = parse_var(ENV_MAX_PAIRS, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_RUNTIME_MS) {
            self.fdr.max_runtime_ms = parse_var(ENV_MAX_RUNTIME_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_BOOTSTRAP_RESAMPLES) {
            self.aggregator.bootstrap_resamples = parse_var(ENV_BOOTSTRAP_RESAMPLES, &v)?;
        }
        if let Some(v) = lookup(ENV_BOOTSTRAP_SEED) {
            self.aggregator.bootstrap_seed = parse_var(ENV_BOOTSTRAP_SEED, &v)?;
        }
        if let Some(v) = lookup(ENV_SESSION_IDLE_SECS) {
            let secs: u64 = parse_var(ENV_SESSION_IDLE_SECS, &v)?;
            self.ledger.session_idle_ms = secs.saturating_mul(1_000);
        }
        if let Some(v) = lookup(ENV_SWEEP_INTERVAL_SECS) {
            let secs: u64 = parse_var(ENV_SWEEP_INTERVAL_SECS, &v)?;
            self.ledger.sweep_interval_ms = secs.saturating_mul(1_000);
        }
        self.validate()
    }

    pub fn validate(&self) -> EvidenceSeqResult<()> {
        if self.fdr.check_every_pairs == 0 {
            return Err(EvidenceSeqError::invalid("fdr.check_every_pairs must be > 0"));
        }
        if self.aggregator.bootstrap_resamples == 0 {
            return Err(EvidenceSeqError::invalid(
                "aggregator.bootstrap_resamples must be > 0",
            ));
        }
        if self.ledger.sweep_interval_ms == 0 {
            return Err(EvidenceSeqError::invalid("ledger.sweep_interval_ms must be > 0"));
        }
        Ok(())
    }
}
