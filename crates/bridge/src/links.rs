//! Origin → relayed-copy identity mappings.
//!
//! Records live in memory only; a restart forgets every relay, so edits and
//! deletes of messages relayed before the restart are not mirrored.
//!
//! There is no eviction. A record is dropped when its origin message is
//! deleted, so deployments where messages are rarely deleted grow this map for
//! the life of the process.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{
    delivery::DeliveryEndpoint,
    error::{Error, Result},
};

/// Identifies one origin message within one bridge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LinkKey {
    pub bridge_id: String,
    pub origin_message_id: String,
}

impl LinkKey {
    pub fn new(bridge_id: impl Into<String>, origin_message_id: impl Into<String>) -> Self {
        Self {
            bridge_id: bridge_id.into(),
            origin_message_id: origin_message_id.into(),
        }
    }
}

/// A relayed copy: where it was posted and under which id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetLink {
    pub endpoint: DeliveryEndpoint,
    pub message_id: String,
}

/// Everything known about one relayed origin message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    pub origin_channel_id: String,
    /// Accent chosen when the message was first relayed.
    pub accent_color: u32,
    /// Relayed copies keyed by target channel id.
    pub targets: HashMap<String, TargetLink>,
}

impl LinkRecord {
    pub fn target_message_id(&self, channel_id: &str) -> Option<&str> {
        self.targets.get(channel_id).map(|t| t.message_id.as_str())
    }
}

/// Shared link store.
///
/// The mutex only guards map access and is never held across `.await`;
/// ordering of operations on one key comes from the engine's sequencer.
#[derive(Default, Clone)]
pub struct LinkStore {
    records: Arc<Mutex<HashMap<LinkKey, LinkRecord>>>,
}

impl LinkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one successful relay, creating the record on first success.
    pub fn record_target(
        &self,
        key: &LinkKey,
        origin_channel_id: &str,
        accent_color: u32,
        target_channel_id: impl Into<String>,
        link: TargetLink,
    ) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records
            .entry(key.clone())
            .or_insert_with(|| LinkRecord {
                origin_channel_id: origin_channel_id.to_string(),
                accent_color,
                targets: HashMap::new(),
            })
            .targets
            .insert(target_channel_id.into(), link);
    }

    /// Snapshot of the record for `key`.
    pub fn get(&self, key: &LinkKey) -> Result<LinkRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.get(key).cloned().ok_or_else(|| missing(key))
    }

    pub fn contains(&self, key: &LinkKey) -> bool {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.contains_key(key)
    }

    /// Remove and return the record for `key`.
    pub fn take(&self, key: &LinkKey) -> Result<LinkRecord> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.remove(key).ok_or_else(|| missing(key))
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn missing(key: &LinkKey) -> Error {
    Error::Lookup {
        bridge_id: key.bridge_id.clone(),
        origin_message_id: key.origin_message_id.clone(),
    }
}
