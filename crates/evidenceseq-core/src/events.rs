// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::BroadcastError;
use crate::evalue::{EValue, EvidenceCombination};
use crate::types::CorrectedResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCategory {
    Evidence,
    Hypothesis,
    Progress,
}

impl EventCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Evidence => "EVIDENCE",
            Self::Hypothesis => "HYPOTHESIS",
            Self::Progress => "PROGRESS",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvidencePayload {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected: Option<CorrectedResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e_value: Option<EValue>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HypothesisPayload {
    pub statement: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combination: Option<EvidenceCombination>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub stage: String,
    /// Fraction complete in `[0, 1]`.
    pub progress: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

/// Typed event body; the variant fixes the event's category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Evidence(EvidencePayload),
    Hypothesis(HypothesisPayload),
    Progress(ProgressPayload),
}

impl EventPayload {
    pub fn category(&self) -> EventCategory {
        match self {
            Self::Evidence(_) => EventCategory::Evidence,
            Self::Hypothesis(_) => EventCategory::Hypothesis,
            Self::Progress(_) => EventCategory::Progress,
        }
    }

    pub fn progress(&self) -> Option<f64> {
        match self {
            Self::Progress(p) => Some(p.progress),
            _ => None,
        }
    }
}

/// An event as stored in a session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub sid: u64,
    /// 0 when the event has no dependency.
    pub dependency_sid: u64,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hypothesis_id: String,
    pub payload: EventPayload,
    pub timestamp_ms: u64,
    /// The broadcaster accepted this event.
    pub delivered: bool,
    /// Evidence only: the observer confirmed display.
    pub rendered: bool,
}

impl LedgerEvent {
    pub fn category(&self) -> EventCategory {
        self.payload.category()
    }
}

/// Outbound form of a [`LedgerEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedEvent {
    pub session_id: String,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hypothesis_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    pub payload: EventPayload,
    pub sid: u64,
    pub dependency_sid: u64,
    pub category: EventCategory,
    pub timestamp_ms: u64,
}

impl SequencedEvent {
    pub fn from_ledger(session_id: &str, event: &LedgerEvent) -> Self {
        Self {
            session_id: session_id.to_string(),
            event_type: event.event_type.clone(),
            hypothesis_id: event.hypothesis_id.clone(),
            progress: event.payload.progress(),
            payload: event.payload.clone(),
            sid: event.sid,
            dependency_sid: event.dependency_sid,
            category: event.category(),
            timestamp_ms: event.timestamp_ms,
        }
    }
}

/// Delivery collaborator. Called synchronously with the session lock held,
/// so implementations must not call back into the ledger.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, session_id: &str, event: &SequencedEvent) -> Result<(), BroadcastError>;
}

/// Records every delivered event in delivery order.
#[derive(Debug, Default)]
pub struct CollectingBroadcaster {
    delivered: Mutex<Vec<SequencedEvent>>,
}

impl CollectingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SequencedEvent> {
        self.delivered.lock().clone()
    }

    pub fn sids(&self) -> Vec<u64> {
        self.delivered.lock().iter().map(|e| e.sid).collect()
    }

    pub fn len(&self) -> usize {
        self.delivered.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.delivered.lock().is_empty()
    }
}

impl Broadcaster for CollectingBroadcaster {
    fn broadcast(&self, _session_id: &str, event: &SequencedEvent) -> Result<(), BroadcastError> {
        self.delivered.lock().push(event.clone());
        Ok(())
    }
}
