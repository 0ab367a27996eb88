// Copyright [2026] [Joseph Verdicchio]
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

//! evidenceseq-core
//!
//! Evidence validation and sequencing engine.
//!
//! This crate implements:
//! - A lock-free global Sequence ID allocator (SIDs)
//! - Benjamini-Hochberg style FDR correction over a family of pairwise tests
//! - Calibrated e-values with bootstrap / heuristic confidence bounds and a
//!   correlation-aware, profile-adjusted combination into a verdict
//! - A hypothesis validation gate (q-value continuity, early noise
//!   rejection, workspace-aware thresholds) over the combination
//! - A session-scoped scientific ledger that never delivers a hypothesis
//!   before the evidence it depends on has been rendered

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod calibration;
pub mod config;
pub mod error;
pub mod evalue;
pub mod events;
pub mod fdr;
pub mod ledger;
pub mod profile;
pub mod sequence;
pub mod telemetry;
pub mod types;
pub mod validation;

pub use crate::calibration::{CalibrationDatum, CalibrationHistory, InMemoryCalibrationStore};
pub use crate::config::EngineConfig;
pub use crate::error::{BroadcastError, EvidenceSeqError, EvidenceSeqResult};
pub use crate::evalue::{
    AggregatorConfig, BoundsSource, EValue, EvidenceAggregator, EvidenceCombination,
    QualityRating, Verdict,
};
pub use crate::events::{
    Broadcaster, CollectingBroadcaster, EventCategory, EventPayload, EvidencePayload,
    HypothesisPayload, LedgerEvent, ProgressPayload, SequencedEvent,
};
pub use crate::fdr::{FamilyCorrection, FdrCorrectionStage, FdrLimits, PairwiseAnalyzer};
pub use crate::ledger::{LedgerConfig, ScientificLedger, SessionSnapshot, SweepReport};
pub use crate::profile::{DataDomain, HypothesisProfile};
pub use crate::sequence::SequenceManager;
pub use crate::telemetry::Telemetry;
pub use crate::types::{
    CorrectedResult, FamilyId, FamilyKey, FdrMethod, RelationshipKey, SkipReason, TestResult,
    TestType,
};
pub use crate::validation::{
    DiscoveryEvidence, HypothesisValidator, ValidationKind, ValidationRequest, ValidationResult,
    WorkspaceContext,
};
