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

//! Session-scoped event ledger with a dependency gate.
//!
//! Every recorded event receives a SID from the shared [`SequenceManager`].
//! Evidence and progress are broadcast as soon as they are recorded. A
//! hypothesis that names an evidence SID is held back until that evidence is
//! marked rendered, then released together with every other hypothesis
//! waiting on it, in recording order.
//!
//! Lock order: the session map may be locked before a session, never after.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{EvidenceSeqError, EvidenceSeqResult};
use crate::events::{
    Broadcaster, EventCategory, EventPayload, EvidencePayload, HypothesisPayload, LedgerEvent,
    ProgressPayload, SequencedEvent,
};
use crate::sequence::SequenceManager;
use crate::telemetry::Telemetry;
use crate::types::unix_millis_now;

pub const DEFAULT_SESSION_IDLE_MS: u64 = 30 * 60 * 1_000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 5 * 60 * 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub session_idle_ms: u64,
    pub sweep_interval_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            session_idle_ms: DEFAULT_SESSION_IDLE_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

impl LedgerConfig {
    pub fn session_idle(&self) -> Duration {
        Duration::from_millis(self.session_idle_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }
}

/// Outcome of evicting one or more sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub sessions_evicted: usize,
    /// Parked hypotheses discarded with their session.
    pub dependents_dropped: usize,
}

impl SweepReport {
    fn absorb(&mut self, dropped: usize) {
        self.sessions_evicted += 1;
        self.dependents_dropped += dropped;
    }
}

/// Point-in-time copy of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub events: Vec<LedgerEvent>,
    pub pending: BTreeMap<u64, Vec<u64>>,
    pub created_at_ms: u64,
    pub last_activity_ms: u64,
}

#[derive(Debug)]
struct LedgerSession {
    events: Vec<LedgerEvent>,
    index: HashMap<u64, usize>,
    /// evidence SID -> hypothesis SIDs waiting on it, in recording order
    pending: BTreeMap<u64, Vec<u64>>,
    created_at_ms: u64,
    last_activity_ms: u64,
    last_activity: Instant,
    evicted: bool,
}

impl LedgerSession {
    fn new() -> Self {
        let now_ms = unix_millis_now();
        Self {
            events: Vec::new(),
            index: HashMap::new(),
            pending: BTreeMap::new(),
            created_at_ms: now_ms,
            last_activity_ms: now_ms,
            last_activity: Instant::now(),
            evicted: false,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.last_activity_ms = unix_millis_now();
    }

    fn push(&mut self, event: LedgerEvent) {
        self.index.insert(event.sid, self.events.len());
        self.events.push(event);
    }

    fn event(&self, sid: u64) -> Option<&LedgerEvent> {
        self.index.get(&sid).and_then(|&i| self.events.get(i))
    }

    fn event_mut(&mut self, sid: u64) -> Option<&mut LedgerEvent> {
        let i = *self.index.get(&sid)?;
        self.events.get_mut(i)
    }

    fn pending_count(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    fn is_idle(&self, now: Instant, idle: Duration) -> bool {
        now.saturating_duration_since(self.last_activity) > idle
    }
}

type SessionHandle = Arc<RwLock<LedgerSession>>;

pub struct ScientificLedger {
    sequence: Arc<SequenceManager>,
    sessions: RwLock<HashMap<String, SessionHandle>>,
    broadcaster: Arc<dyn Broadcaster>,
    config: LedgerConfig,
    telemetry: Option<Telemetry>,
}

impl std::fmt::Debug for ScientificLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScientificLedger")
            .field("current_sid", &self.sequence.current())
            .field("sessions", &self.session_count())
            .field("config", &self.config)
            .finish()
    }
}

fn require_non_empty(field: &str, value: &str) -> EvidenceSeqResult<()> {
    if value.is_empty() {
        return Err(EvidenceSeqError::invalid(format!("{field} cannot be empty")));
    }
    Ok(())
}

impl ScientificLedger {
    pub fn new(broadcaster: Arc<dyn Broadcaster>, config: LedgerConfig) -> Self {
        Self::with_sequence(Arc::new(SequenceManager::new()), broadcaster, config)
    }

    /// Builds a ledger drawing SIDs from an existing allocator.
    pub fn with_sequence(
        sequence: Arc<SequenceManager>,
        broadcaster: Arc<dyn Broadcaster>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            sequence,
            sessions: RwLock::new(HashMap::new()),
            broadcaster,
            config,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Telemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn current_sid(&self) -> u64 {
        self.sequence.current()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn record_evidence(
        &self,
        session_id: &str,
        event_type: &str,
        payload: EvidencePayload,
    ) -> EvidenceSeqResult<u64> {
        require_non_empty("session_id", session_id)?;
        require_non_empty("event_type", event_type)?;
        self.with_live_session(session_id, |session| {
            let sid = self.append(session, event_type, "", 0, EventPayload::Evidence(payload));
            self.deliver(session_id, session, sid)?;
            Ok(sid)
        })
    }

    /// Records a hypothesis gated on `dependency_sid` (0 for none).
    ///
    /// A dependency that is not yet in the session must be a SID that has not
    /// been issued; one already issued elsewhere is rejected. Returns the SID
    /// even when the hypothesis was parked.
    pub fn record_hypothesis(
        &self,
        session_id: &str,
        hypothesis_id: &str,
        event_type: &str,
        dependency_sid: u64,
        payload: HypothesisPayload,
    ) -> EvidenceSeqResult<u64> {
        require_non_empty("session_id", session_id)?;
        require_non_empty("hypothesis_id", hypothesis_id)?;
        require_non_empty("event_type", event_type)?;
        self.with_live_session(session_id, |session| {
            let gate_open = match session.event(dependency_sid) {
                _ if dependency_sid == 0 => true,
                Some(dep) if dep.category() != EventCategory::Evidence => {
                    return Err(EvidenceSeqError::invalid(format!(
                        "dependency SID {dependency_sid} is a {} event, not EVIDENCE",
                        dep.category()
                    )));
                }
                Some(dep) => dep.rendered,
                // issued elsewhere, or the SID this hypothesis is about to take
                None if dependency_sid <= self.sequence.current().saturating_add(1) => {
                    return Err(EvidenceSeqError::invalid(format!(
                        "dependency SID {dependency_sid} is not an event of session {session_id}"
                    )));
                }
                None => false,
            };

            let sid = self.append(
                session,
                event_type,
                hypothesis_id,
                dependency_sid,
                EventPayload::Hypothesis(payload),
            );
            if gate_open {
                self.deliver(session_id, session, sid)?;
            } else {
                session.pending.entry(dependency_sid).or_default().push(sid);
                if let Some(t) = &self.telemetry {
                    t.record_parked();
                }
                tracing::debug!(
                    target: "evidenceseq.ledger",
                    session_id,
                    sid,
                    dependency_sid,
                    "hypothesis parked until evidence is rendered"
                );
            }
            Ok(sid)
        })
    }

    pub fn record_progress(
        &self,
        session_id: &str,
        event_type: &str,
        payload: ProgressPayload,
    ) -> EvidenceSeqResult<u64> {
        require_non_empty("session_id", session_id)?;
        require_non_empty("event_type", event_type)?;
        if !payload.progress.is_finite() || !(0.0..=1.0).contains(&payload.progress) {
            return Err(EvidenceSeqError::invalid(format!(
                "progress {} outside [0, 1]",
                payload.progress
            )));
        }
        self.with_live_session(session_id, |session| {
            let sid = self.append(session, event_type, "", 0, EventPayload::Progress(payload));
            self.deliver(session_id, session, sid)?;
            Ok(sid)
        })
    }

    /// Opens the gate for `evidence_sid` and releases its waiting hypotheses.
    ///
    /// Every release is attempted; the first broadcast failure is returned.
    pub fn mark_evidence_rendered(&self, session_id: &str, evidence_sid: u64) -> EvidenceSeqResult<()> {
        require_non_empty("session_id", session_id)?;
        if evidence_sid == 0 {
            return Err(EvidenceSeqError::invalid("invalid SID: 0"));
        }
        let handle = self
            .existing_session(session_id)
            .ok_or_else(|| EvidenceSeqError::NotFound(format!("session {session_id}")))?;
        let mut session = handle.write();
        if session.evicted {
            return Err(EvidenceSeqError::NotFound(format!("session {session_id}")));
        }
        session.touch();
        let event = session.event_mut(evidence_sid).ok_or_else(|| {
            EvidenceSeqError::NotFound(format!("SID {evidence_sid} in session {session_id}"))
        })?;
        if event.category() != EventCategory::Evidence {
            return Err(EvidenceSeqError::invalid(format!(
                "SID {evidence_sid} is a {} event, not EVIDENCE",
                event.category()
            )));
        }
        if event.rendered {
            return Ok(());
        }
        event.rendered = true;

        let waiting = session.pending.remove(&evidence_sid).unwrap_or_default();
        if waiting.is_empty() {
            return Ok(());
        }
        let mut first_err = None;
        let mut released = 0_u64;
        for sid in &waiting {
            match self.deliver(session_id, &mut session, *sid) {
                Ok(()) => released += 1,
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }
        if let Some(t) = &self.telemetry {
            t.record_released(released);
        }
        tracing::info!(
            target: "evidenceseq.ledger",
            session_id,
            evidence_sid,
            released,
            failed = waiting.len() as u64 - released,
            "released hypotheses after evidence rendered"
        );
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn session_snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
        let handle = self.existing_session(session_id)?;
        let session = handle.read();
        Some(SessionSnapshot {
            session_id: session_id.to_string(),
            events: session.events.clone(),
            pending: session.pending.clone(),
            created_at_ms: session.created_at_ms,
            last_activity_ms: session.last_activity_ms,
        })
    }

    /// The hypothesis at `hypothesis_sid` followed by the evidence it depends on,
    /// when that evidence is in the same session.
    pub fn evidence_chain(
        &self,
        session_id: &str,
        hypothesis_sid: u64,
    ) -> EvidenceSeqResult<Vec<LedgerEvent>> {
        let handle = self
            .existing_session(session_id)
            .ok_or_else(|| EvidenceSeqError::NotFound(format!("session {session_id}")))?;
        let session = handle.read();
        let hypothesis = session.event(hypothesis_sid).ok_or_else(|| {
            EvidenceSeqError::NotFound(format!("SID {hypothesis_sid} in session {session_id}"))
        })?;
        if hypothesis.category() != EventCategory::Hypothesis {
            return Err(EvidenceSeqError::invalid(format!(
                "SID {hypothesis_sid} is a {} event, not HYPOTHESIS",
                hypothesis.category()
            )));
        }
        let mut chain = vec![hypothesis.clone()];
        if hypothesis.dependency_sid != 0 {
            if let Some(evidence) = session.event(hypothesis.dependency_sid) {
                chain.push(evidence.clone());
            }
        }
        Ok(chain)
    }

    /// Evicts a finished session. Returns `None` if it did not exist.
    pub fn complete_session(&self, session_id: &str) -> Option<SweepReport> {
        let handle = self.sessions.write().remove(session_id)?;
        let mut session = handle.write();
        session.evicted = true;
        let mut report = SweepReport::default();
        report.absorb(session.pending_count());
        drop(session);
        self.report_eviction("completed", &report);
        Some(report)
    }

    pub fn sweep_idle_sessions(&self) -> SweepReport {
        self.sweep_idle_sessions_at(Instant::now())
    }

    /// Evicts every session idle longer than the configured timeout at `now`.
    pub fn sweep_idle_sessions_at(&self, now: Instant) -> SweepReport {
        let idle = self.config.session_idle();
        let mut report = SweepReport::default();
        {
            let mut sessions = self.sessions.write();
            sessions.retain(|session_id, handle| {
                let mut session = handle.write();
                if !session.is_idle(now, idle) {
                    return true;
                }
                session.evicted = true;
                let dropped = session.pending_count();
                if dropped > 0 {
                    tracing::warn!(
                        target: "evidenceseq.ledger",
                        session_id = %session_id,
                        dropped,
                        "idle session evicted with undelivered hypotheses"
                    );
                }
                report.absorb(dropped);
                false
            });
        }
        self.report_eviction("idle", &report);
        report
    }

    /// Runs [`Self::sweep_idle_sessions`] every `sweep_interval` on the tokio
    /// runtime until the ledger is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(ledger) = weak.upgrade() else {
                    tracing::debug!(target: "evidenceseq.ledger", "ledger dropped; sweeper exiting");
                    break;
                };
                ledger.sweep_idle_sessions();
            }
        })
    }

    fn existing_session(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.read().get(session_id).cloned()
    }

    fn session_handle(&self, session_id: &str) -> SessionHandle {
        if let Some(handle) = self.existing_session(session_id) {
            return handle;
        }
        let mut sessions = self.sessions.write();
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(target: "evidenceseq.ledger", session_id, "session created");
                Arc::new(RwLock::new(LedgerSession::new()))
            })
            .clone()
    }

    /// Runs `f` under the write lock of a session that is still in the map,
    /// creating the session if needed.
    fn with_live_session<T>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut LedgerSession) -> EvidenceSeqResult<T>,
    ) -> EvidenceSeqResult<T> {
        loop {
            let handle = self.session_handle(session_id);
            let mut session = handle.write();
            if session.evicted {
                // lost a race with eviction; the map no longer holds this handle
                continue;
            }
            session.touch();
            return f(&mut session);
        }
    }

    fn append(
        &self,
        session: &mut LedgerSession,
        event_type: &str,
        hypothesis_id: &str,
        dependency_sid: u64,
        payload: EventPayload,
    ) -> u64 {
        let sid = self.sequence.next();
        let category = payload.category();
        session.push(LedgerEvent {
            sid,
            dependency_sid,
            event_type: event_type.to_string(),
            hypothesis_id: hypothesis_id.to_string(),
            payload,
            timestamp_ms: unix_millis_now(),
            delivered: false,
            rendered: false,
        });
        if let Some(t) = &self.telemetry {
            t.record_event(category.as_str());
        }
        tracing::debug!(
            target: "evidenceseq.ledger",
            sid,
            category = %category,
            event_type,
            "event recorded"
        );
        sid
    }

    fn deliver(
        &self,
        session_id: &str,
        session: &mut LedgerSession,
        sid: u64,
    ) -> EvidenceSeqResult<()> {
        let event = session
            .event_mut(sid)
            .ok_or_else(|| EvidenceSeqError::NotFound(format!("SID {sid} in session {session_id}")))?;
        let outbound = SequencedEvent::from_ledger(session_id, event);
        match self.broadcaster.broadcast(session_id, &outbound) {
            Ok(()) => {
                event.delivered = true;
                Ok(())
            }
            Err(source) => {
                if let Some(t) = &self.telemetry {
                    t.record_broadcast_failure(outbound.category.as_str());
                }
                tracing::warn!(
                    target: "evidenceseq.ledger",
                    session_id,
                    sid,
                    category = %outbound.category,
                    error = %source,
                    "broadcast failed; event kept in ledger"
                );
                Err(EvidenceSeqError::Broadcast { sid, source })
            }
        }
    }

    fn report_eviction(&self, reason: &str, report: &SweepReport) {
        if report.sessions_evicted == 0 {
            return;
        }
        if let Some(t) = &self.telemetry {
            t.record_sessions_evicted(
                reason,
                report.sessions_evicted as u64,
                report.dependents_dropped as u64,
            );
        }
        tracing::info!(
            target: "evidenceseq.ledger",
            reason,
            sessions = report.sessions_evicted,
            dependents_dropped = report.dependents_dropped,
            "sessions evicted"
        );
    }
}
