//! In-memory audit trail of recent relay attempts.
//!
//! Never consulted by the relay itself; it exists so operators can see what
//! was forwarded where and which targets failed.

use std::{
    collections::VecDeque,
    sync::RwLock,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayOperation {
    Create,
    Edit,
    Delete,
}

impl RelayOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Edit => "edit",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RelayOutcome {
    Delivered,
    Failed { reason: String },
}

impl RelayOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// One relay attempt against one target channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayReport {
    pub bridge_id: String,
    pub bridge_name: String,
    pub origin_channel_id: String,
    pub origin_message_id: String,
    pub target_channel_id: String,
    pub operation: RelayOperation,
    #[serde(flatten)]
    pub outcome: RelayOutcome,
    /// Unix timestamp (seconds).
    pub at: i64,
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Bounded ring of [`RelayReport`]s; the oldest entry is evicted first.
pub struct RelayLedger {
    buf: RwLock<VecDeque<RelayReport>>,
    capacity: RwLock<usize>,
}

impl RelayLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: RwLock::new(capacity),
        }
    }

    pub fn record(&self, report: RelayReport) {
        let capacity = *self.capacity.read().unwrap_or_else(|e| e.into_inner());
        if capacity == 0 {
            return;
        }
        let mut buf = self.buf.write().unwrap_or_else(|e| e.into_inner());
        while buf.len() >= capacity {
            buf.pop_front();
        }
        buf.push_back(report);
    }

    /// Up to `limit` most recent reports, oldest first.
    pub fn recent(&self, limit: Option<usize>) -> Vec<RelayReport> {
        let buf = self.buf.read().unwrap_or_else(|e| e.into_inner());
        let skip = limit.map_or(0, |limit| buf.len().saturating_sub(limit));
        buf.iter().skip(skip).cloned().collect()
    }

    /// Change the bound, evicting the oldest entries if it shrank.
    pub fn set_capacity(&self, capacity: usize) {
        *self.capacity.write().unwrap_or_else(|e| e.into_inner()) = capacity;
        let mut buf = self.buf.write().unwrap_or_else(|e| e.into_inner());
        while buf.len() > capacity {
            buf.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.buf.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
