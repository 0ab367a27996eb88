// Copyright (c) 2026 Joseph Verdicchio and EvidenceOS Contributors
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

pub type EvidenceSeqResult<T> = Result<T, EvidenceSeqError>;

#[derive(Debug, Error)]
pub enum EvidenceSeqError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("broadcast of SID {sid} failed: {source}")]
    Broadcast {
        sid: u64,
        #[source]
        source: BroadcastError,
    },
}

impl EvidenceSeqError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

/// Failure reported by a [`crate::events::Broadcaster`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct BroadcastError(pub String);

impl BroadcastError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}
