// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct TelemetryState {
    events_recorded_total: BTreeMap<String, u64>,
    broadcast_failures_total: BTreeMap<String, u64>,
    hypotheses_parked_total: u64,
    hypotheses_released_total: u64,
    sessions_evicted_total: BTreeMap<String, u64>,
    dependents_dropped_total: u64,
    families_corrected_total: u64,
    family_comparisons_total: u64,
    families_aborted_total: BTreeMap<String, u64>,
}

/// Shared counters for the ledger and the correction stage.
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    state: Arc<Mutex<TelemetryState>>,
}

fn bump(map: &mut BTreeMap<String, u64>, key: &str, by: u64) {
    let entry = map.entry(key.to_string()).or_insert(0);
    *entry = entry.saturating_add(by);
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&self, category: &str) {
        let mut guard = self.state.lock();
        bump(&mut guard.events_recorded_total, category, 1);
    }

    pub fn record_broadcast_failure(&self, category: &str) {
        let mut guard = self.state.lock();
        bump(&mut guard.broadcast_failures_total, category, 1);
    }

    pub fn record_parked(&self) {
        let mut guard = self.state.lock();
        guard.hypotheses_parked_total = guard.hypotheses_parked_total.saturating_add(1);
    }

    pub fn record_released(&self, count: u64) {
        let mut guard = self.state.lock();
        guard.hypotheses_released_total = guard.hypotheses_released_total.saturating_add(count);
    }

    pub fn record_sessions_evicted(&self, reason: &str, sessions: u64, dependents_dropped: u64) {
        let mut guard = self.state.lock();
        bump(&mut guard.sessions_evicted_total, reason, sessions);
        guard.dependents_dropped_total = guard
            .dependents_dropped_total
            .saturating_add(dependents_dropped);
    }

    pub fn record_family_corrected(&self, comparisons: usize) {
        let mut guard = self.state.lock();
        guard.families_corrected_total = guard.families_corrected_total.saturating_add(1);
        guard.family_comparisons_total = guard
            .family_comparisons_total
            .saturating_add(comparisons as u64);
    }

    pub fn record_family_aborted(&self, reason: &str) {
        let mut guard = self.state.lock();
        bump(&mut guard.families_aborted_total, reason, 1);
    }

    pub fn events_recorded(&self, category: &str) -> u64 {
        self.state
            .lock()
            .events_recorded_total
            .get(category)
            .copied()
            .unwrap_or(0)
    }

    pub fn dependents_dropped(&self) -> u64 {
        self.state.lock().dependents_dropped_total
    }

    pub fn hypotheses_released(&self) -> u64 {
        self.state.lock().hypotheses_released_total
    }

    /// Prometheus text exposition of every counter.
    pub fn render(&self) -> String {
        let guard = self.state.lock();
        let mut out = String::new();
        out.push_str("# TYPE evidenceseq_events_recorded_total counter\n");
        for (category, value) in &guard.events_recorded_total {
            let _ = writeln!(
                out,
                "evidenceseq_events_recorded_total{{category=\"{}\"}} {}",
                category, value
            );
        }
        out.push_str("# TYPE evidenceseq_broadcast_failures_total counter\n");
        for (category, value) in &guard.broadcast_failures_total {
            let _ = writeln!(
                out,
                "evidenceseq_broadcast_failures_total{{category=\"{}\"}} {}",
                category, value
            );
        }
        out.push_str("# TYPE evidenceseq_hypotheses_parked_total counter\n");
        let _ = writeln!(
            out,
            "evidenceseq_hypotheses_parked_total {}",
            guard.hypotheses_parked_total
        );
        out.push_str("# TYPE evidenceseq_hypotheses_released_total counter\n");
        let _ = writeln!(
            out,
            "evidenceseq_hypotheses_released_total {}",
            guard.hypotheses_released_total
        );
        out.push_str("# TYPE evidenceseq_sessions_evicted_total counter\n");
        for (reason, value) in &guard.sessions_evicted_total {
            let _ = writeln!(
                out,
                "evidenceseq_sessions_evicted_total{{reason=\"{}\"}} {}",
                reason, value
            );
        }
        out.push_str("# TYPE evidenceseq_dependents_dropped_total counter\n");
        let _ = writeln!(
            out,
            "evidenceseq_dependents_dropped_total {}",
            guard.dependents_dropped_total
        );
        out.push_str("# TYPE evidenceseq_families_corrected_total counter\n");
        let _ = writeln!(
            out,
            "evidenceseq_families_corrected_total {}",
            guard.families_corrected_total
        );
        out.push_str("# TYPE evidenceseq_family_comparisons_total counter\n");
        let _ = writeln!(
            out,
            "evidenceseq_family_comparisons_total {}",
            guard.family_comparisons_total
        );
        out.push_str("# TYPE evidenceseq_families_aborted_total counter\n");
        for (reason, value) in &guard.families_aborted_total {
            let _ = writeln!(
                out,
                "evidenceseq_families_aborted_total{{reason=\"{}\"}} {}",
                reason, value
            );
        }
        out
    }
}
