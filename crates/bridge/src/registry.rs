//! Validated bridge tables and their atomic replacement.
//!
//! Configuration goes through [`normalize`], which never fails: entries that
//! cannot be used are dropped and reported as [`ConfigIssue`]s. The resulting
//! [`RegistrySnapshot`] is immutable; [`BridgeRegistry::reload`] swaps in a new
//! one while in-flight handlers keep the snapshot they started with.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    fmt,
    sync::{Arc, RwLock},
};

use {
    rainbow_config::{BridgeEntry, RelayConfig, schema::DEFAULT_PALETTE},
    secrecy::ExposeSecret,
    tracing::{info, warn},
};

#[cfg(feature = "metrics")]
use rainbow_metrics::{counter, gauge, registry as registry_metrics};

use crate::{
    bridge::{BridgeDefinition, ChannelEndpoint, Direction, ForwardBots},
    delivery::DeliveryEndpoint,
};

/// Why a configuration entry was dropped or adjusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueReason {
    MissingGuildId,
    MissingChannelId,
    MissingWebhook,
    MalformedWebhook(String),
    DuplicateChannel,
    /// The bridge was kept as two-way.
    UnknownDirection(String),
    /// One-way bridge that no guild may originate on.
    EmptySourceGuilds,
}

impl fmt::Display for IssueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingGuildId => f.write_str("missing guild_id"),
            Self::MissingChannelId => f.write_str("missing channel_id"),
            Self::MissingWebhook => f.write_str("missing webhook"),
            Self::MalformedWebhook(why) => write!(f, "malformed webhook: {why}"),
            Self::DuplicateChannel => f.write_str("channel listed more than once"),
            Self::UnknownDirection(raw) => {
                write!(f, "unknown direction {raw:?}, treating as two-way")
            },
            Self::EmptySourceGuilds => f.write_str("one-way bridge has no source guilds"),
        }
    }
}

/// A problem found while normalizing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub bridge_id: String,
    /// Position of the channel entry, when the issue concerns one.
    pub index: Option<usize>,
    pub channel_id: Option<String>,
    pub reason: IssueReason,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bridge {}", self.bridge_id)?;
        if let Some(index) = self.index {
            write!(f, " channel #{index}")?;
        }
        if let Some(channel_id) = &self.channel_id {
            write!(f, " ({channel_id})")?;
        }
        write!(f, ": {}", self.reason)
    }
}

/// Engine-wide settings carried alongside the bridge tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    pub forward_bots: bool,
    pub palette: Vec<u32>,
    pub max_content_len: usize,
    pub ledger_capacity: usize,
}

impl RelaySettings {
    fn from_config(config: &RelayConfig) -> Self {
        let palette = if config.palette.is_empty() {
            DEFAULT_PALETTE.to_vec()
        } else {
            config.palette.clone()
        };
        Self {
            forward_bots: config.forward_bots,
            palette,
            max_content_len: config.max_content_len,
            ledger_capacity: config.ledger_capacity,
        }
    }
}

/// Output of [`normalize`].
#[derive(Debug)]
pub struct Normalized {
    pub bridges: Vec<BridgeDefinition>,
    pub issues: Vec<ConfigIssue>,
}

/// Validate raw configuration. Each dropped or adjusted entry is logged and
/// returned as an issue; valid entries of the same bridge are kept.
pub fn normalize(config: &RelayConfig) -> Normalized {
    let mut issues = Vec::new();
    let bridges = config
        .bridges
        .iter()
        .map(|(id, entry)| normalize_bridge(id, entry, &mut issues))
        .collect();

    for issue in &issues {
        warn!(bridge_id = %issue.bridge_id, issue = %issue, "relay configuration issue");
    }
    #[cfg(feature = "metrics")]
    counter!(registry_metrics::CONFIG_ISSUES_TOTAL).increment(issues.len() as u64);

    Normalized { bridges, issues }
}

fn normalize_bridge(
    id: &str,
    entry: &BridgeEntry,
    issues: &mut Vec<ConfigIssue>,
) -> BridgeDefinition {
    let issue = |index, channel_id: Option<&str>, reason| ConfigIssue {
        bridge_id: id.to_string(),
        index,
        channel_id: channel_id.map(str::to_string),
        reason,
    };

    let direction = Direction::parse(entry.direction.as_deref()).unwrap_or_else(|| {
        issues.push(issue(
            None,
            None,
            IssueReason::UnknownDirection(entry.direction.clone().unwrap_or_default()),
        ));
        Direction::TwoWay
    });

    let source_guilds: BTreeSet<String> = entry
        .source_guilds
        .iter()
        .map(|g| g.trim().to_string())
        .filter(|g| !g.is_empty())
        .collect();
    if direction == Direction::OneWay && source_guilds.is_empty() {
        issues.push(issue(None, None, IssueReason::EmptySourceGuilds));
    }

    let mut seen = HashSet::new();
    let mut channels = Vec::with_capacity(entry.channels.len());
    for (index, raw) in entry.channels.iter().enumerate() {
        let channel_id = non_blank(raw.channel_id.as_deref());
        let Some(channel_id) = channel_id else {
            issues.push(issue(Some(index), None, IssueReason::MissingChannelId));
            continue;
        };
        let Some(guild_id) = non_blank(raw.guild_id.as_deref()) else {
            issues.push(issue(Some(index), Some(channel_id), IssueReason::MissingGuildId));
            continue;
        };
        let Some(webhook) = raw.webhook.as_ref() else {
            issues.push(issue(Some(index), Some(channel_id), IssueReason::MissingWebhook));
            continue;
        };
        let endpoint = match DeliveryEndpoint::parse(webhook.expose_secret()) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                issues.push(issue(
                    Some(index),
                    Some(channel_id),
                    IssueReason::MalformedWebhook(e.to_string()),
                ));
                continue;
            },
        };
        if !seen.insert(channel_id.to_string()) {
            issues.push(issue(Some(index), Some(channel_id), IssueReason::DuplicateChannel));
            continue;
        }

        channels.push(ChannelEndpoint {
            guild_id: guild_id.to_string(),
            channel_id: channel_id.to_string(),
            endpoint,
            label: raw.label.clone().filter(|l| !l.trim().is_empty()),
        });
    }

    BridgeDefinition {
        id: id.to_string(),
        name: entry
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| id.to_string()),
        direction,
        forward_bots: ForwardBots::from_override(entry.forward_bots),
        source_guilds,
        channels,
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// One bridge a channel participates in.
#[derive(Debug, Clone)]
pub struct BridgeMatch {
    pub bridge_id: String,
    pub bridge: Arc<BridgeDefinition>,
}

/// Immutable lookup tables built from one configuration.
#[derive(Debug)]
pub struct RegistrySnapshot {
    by_id: HashMap<String, Arc<BridgeDefinition>>,
    by_channel: HashMap<String, Vec<BridgeMatch>>,
    delivery_ids: HashSet<String>,
    settings: RelaySettings,
}

impl RegistrySnapshot {
    /// Normalize `config` and index the result.
    pub fn build(config: &RelayConfig) -> (Self, Vec<ConfigIssue>) {
        let Normalized { bridges, issues } = normalize(config);
        (Self::from_bridges(bridges, RelaySettings::from_config(config)), issues)
    }

    pub fn from_bridges(bridges: Vec<BridgeDefinition>, settings: RelaySettings) -> Self {
        let mut by_id = HashMap::with_capacity(bridges.len());
        let mut by_channel: HashMap<String, Vec<BridgeMatch>> = HashMap::new();
        let mut delivery_ids = HashSet::new();

        for bridge in bridges {
            let bridge = Arc::new(bridge);
            for channel in &bridge.channels {
                delivery_ids.insert(channel.endpoint.id().to_string());
                by_channel
                    .entry(channel.channel_id.clone())
                    .or_default()
                    .push(BridgeMatch {
                        bridge_id: bridge.id.clone(),
                        bridge: Arc::clone(&bridge),
                    });
            }
            by_id.insert(bridge.id.clone(), bridge);
        }

        Self {
            by_id,
            by_channel,
            delivery_ids,
            settings,
        }
    }

    pub fn bridge(&self, bridge_id: &str) -> Option<&Arc<BridgeDefinition>> {
        self.by_id.get(bridge_id)
    }

    /// Every bridge `channel_id` belongs to, active or not.
    pub fn bridges_for_channel(&self, channel_id: &str) -> &[BridgeMatch] {
        self.by_channel
            .get(channel_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn bridges(&self) -> impl Iterator<Item = &Arc<BridgeDefinition>> {
        self.by_id.values()
    }

    /// Whether `id` is the identity of any configured delivery endpoint.
    pub fn is_delivery_identity(&self, id: &str) -> bool {
        self.delivery_ids.contains(id)
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    pub fn active_count(&self) -> usize {
        self.by_id.values().filter(|b| b.is_active()).count()
    }

    pub fn inert_count(&self) -> usize {
        self.by_id.len() - self.active_count()
    }
}

/// Holder of the current snapshot.
pub struct BridgeRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl BridgeRegistry {
    pub fn new(config: &RelayConfig) -> (Self, Vec<ConfigIssue>) {
        let (snapshot, issues) = RegistrySnapshot::build(config);
        record_counts(&snapshot);
        let registry = Self {
            current: RwLock::new(Arc::new(snapshot)),
        };
        (registry, issues)
    }

    /// The snapshot in effect right now.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Build tables for `config` and make them current.
    pub fn reload(&self, config: &RelayConfig) -> Vec<ConfigIssue> {
        let (snapshot, issues) = RegistrySnapshot::build(config);
        info!(
            active = snapshot.active_count(),
            inert = snapshot.inert_count(),
            issues = issues.len(),
            "relay configuration reloaded"
        );
        record_counts(&snapshot);
        #[cfg(feature = "metrics")]
        counter!(registry_metrics::RELOADS_TOTAL).increment(1);

        let snapshot = Arc::new(snapshot);
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = snapshot;
        issues
    }
}

#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
fn record_counts(snapshot: &RegistrySnapshot) {
    #[cfg(feature = "metrics")]
    {
        gauge!(registry_metrics::BRIDGES_ACTIVE).set(snapshot.active_count() as f64);
        gauge!(registry_metrics::BRIDGES_INERT).set(snapshot.inert_count() as f64);
    }
}
