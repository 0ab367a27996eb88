use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use evidenceseq_core::sequence::SequenceManager;

const WORKERS: usize = 100;
const CALLS_PER_WORKER: usize = 1_000;

#[test]
fn hundred_workers_allocate_exactly_one_through_n() {
    let seq = Arc::new(SequenceManager::new());
    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let seq = Arc::clone(&seq);
            thread::spawn(move || {
                let mut local = Vec::with_capacity(CALLS_PER_WORKER);
                let mut last = 0;
                for _ in 0..CALLS_PER_WORKER {
                    let sid = seq.next();
                    assert!(sid > last, "per-caller SIDs must increase");
                    last = sid;
                    local.push(sid);
                }
                local
            })
        })
        .collect();

    let mut seen = HashSet::with_capacity(WORKERS * CALLS_PER_WORKER);
    for handle in handles {
        let sids = match handle.join() {
            Ok(sids) => sids,
            Err(_) => panic!("worker panicked"),
        };
        for sid in sids {
            assert!(seen.insert(sid), "duplicate SID {sid}");
        }
    }

    let n = (WORKERS * CALLS_PER_WORKER) as u64;
    assert_eq!(seen.len() as u64, n);
    assert!((1..=n).all(|sid| seen.contains(&sid)), "gap in SIDs");
    assert_eq!(seq.current(), n);
}
