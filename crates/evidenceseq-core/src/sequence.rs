// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide Sequence ID (SID) allocator.
///
/// SIDs start at 1 and are never reused. Allocation is a single atomic
/// fetch-and-add, so any number of concurrent callers observe exactly
/// `{1, ..., N}` after `N` calls to [`SequenceManager::next`].
#[derive(Debug, Default)]
pub struct SequenceManager {
    current: AtomicU64,
}

impl SequenceManager {
    pub fn new() -> Self {
        Self {
            current: AtomicU64::new(0),
        }
    }

    /// Allocates the next SID.
    pub fn next(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Last issued SID, or 0 before the first allocation.
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }
}
