#![no_main]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arbitrary::{Arbitrary, Unstructured};
use evidenceseq_core::error::EvidenceSeqError;
use evidenceseq_core::events::{
    CollectingBroadcaster, EventCategory, EvidencePayload, HypothesisPayload, ProgressPayload,
};
use evidenceseq_core::ledger::{LedgerConfig, ScientificLedger};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Op {
    Evidence { session: u8 },
    Hypothesis { session: u8, dep_pick: u16, no_dep: bool },
    Progress { session: u8, progress: f64 },
    Render { session: u8, pick: u16 },
    Complete { session: u8 },
    Sweep { advance_secs: u16 },
}

#[derive(Debug, Arbitrary)]
struct Input {
    ops: Vec<Op>,
}

fn session_name(n: u8) -> String {
    format!("s{}", n % 4)
}

fuzz_target!(|data: &[u8]| {
    let mut u = Unstructured::new(data);
    let Ok(input) = Input::arbitrary(&mut u) else {
        return;
    };

    let sink = Arc::new(CollectingBroadcaster::new());
    let ledger = ScientificLedger::new(sink.clone(), LedgerConfig::default());
    let mut evidence: HashMap<String, Vec<u64>> = HashMap::new();
    let mut last_sid = 0_u64;

    for op in input.ops {
        let recorded = match op {
            Op::Evidence { session } => {
                let s = session_name(session);
                let r = ledger.record_evidence(&s, "evidence", EvidencePayload::default());
                if let Ok(sid) = r {
                    evidence.entry(s).or_default().push(sid);
                }
                r
            }
            Op::Hypothesis {
                session,
                dep_pick,
                no_dep,
            } => {
                let s = session_name(session);
                let dep = match evidence.get(&s) {
                    Some(sids) if !no_dep && !sids.is_empty() => {
                        sids[usize::from(dep_pick) % sids.len()]
                    }
                    _ if no_dep => 0,
                    _ => u64::from(dep_pick),
                };
                ledger.record_hypothesis(&s, "h", "hypothesis", dep, HypothesisPayload::default())
            }
            Op::Progress { session, progress } => {
                let r = ledger.record_progress(
                    &session_name(session),
                    "progress",
                    ProgressPayload {
                        stage: "fuzz".into(),
                        progress,
                        message: String::new(),
                    },
                );
                if !(0.0..=1.0).contains(&progress) {
                    assert!(matches!(r, Err(EvidenceSeqError::InvalidArgument(_))));
                }
                r
            }
            Op::Render { session, pick } => {
                let s = session_name(session);
                if let Some(sids) = evidence.get(&s).filter(|v| !v.is_empty()) {
                    let _ = ledger.mark_evidence_rendered(&s, sids[usize::from(pick) % sids.len()]);
                }
                continue;
            }
            Op::Complete { session } => {
                let s = session_name(session);
                ledger.complete_session(&s);
                evidence.remove(&s);
                continue;
            }
            Op::Sweep { advance_secs } => {
                let report = ledger.sweep_idle_sessions_at(
                    Instant::now() + Duration::from_secs(u64::from(advance_secs)),
                );
                if report.sessions_evicted > 0 {
                    evidence.retain(|s, _| ledger.session_snapshot(s).is_some());
                }
                continue;
            }
        };
        if let Ok(sid) = recorded {
            assert!(sid > last_sid, "SID {sid} not above {last_sid}");
            last_sid = sid;
        }
    }

    assert_eq!(ledger.current_sid(), last_sid);

    let delivered = sink.events();
    let mut seen: HashSet<u64> = HashSet::new();
    for event in &delivered {
        assert!(seen.insert(event.sid), "SID {} delivered twice", event.sid);
        if event.category == EventCategory::Hypothesis && event.dependency_sid != 0 {
            assert!(
                seen.contains(&event.dependency_sid),
                "hypothesis {} delivered before evidence {}",
                event.sid,
                event.dependency_sid
            );
        }
    }
});
