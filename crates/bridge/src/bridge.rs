//! Normalized bridge definitions.

use std::collections::{BTreeSet, HashSet};

use crate::delivery::DeliveryEndpoint;

/// Which origin guilds may trigger a relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Direction {
    /// Every channel in the bridge relays to every other.
    #[default]
    TwoWay,
    /// Only channels in the bridge's source guilds originate relays.
    OneWay,
}

impl Direction {
    /// Parse an operator-supplied direction. `None` means the default.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        let Some(raw) = raw else {
            return Some(Self::default());
        };
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "" | "two-way" | "twoway" | "bidirectional" => Some(Self::TwoWay),
            "one-way" | "oneway" | "unidirectional" => Some(Self::OneWay),
            _ => None,
        }
    }
}

/// Per-bridge override of the bot-forwarding default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ForwardBots {
    /// Use the bridge-set default.
    #[default]
    Inherit,
    Always,
    Never,
}

impl ForwardBots {
    pub fn from_override(value: Option<bool>) -> Self {
        match value {
            None => Self::Inherit,
            Some(true) => Self::Always,
            Some(false) => Self::Never,
        }
    }

    /// Effective policy given the bridge-set default.
    pub fn resolve(self, default: bool) -> bool {
        match self {
            Self::Inherit => default,
            Self::Always => true,
            Self::Never => false,
        }
    }
}

/// A channel taking part in a bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEndpoint {
    pub guild_id: String,
    pub channel_id: String,
    /// Where relayed copies for this channel are posted.
    pub endpoint: DeliveryEndpoint,
    pub label: Option<String>,
}

/// A validated bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeDefinition {
    pub id: String,
    pub name: String,
    pub direction: Direction,
    pub forward_bots: ForwardBots,
    /// Only consulted for [`Direction::OneWay`].
    pub source_guilds: BTreeSet<String>,
    /// Unique by `channel_id`, in configuration order.
    pub channels: Vec<ChannelEndpoint>,
}

impl BridgeDefinition {
    /// Endpoints needed before a bridge forwards anything.
    pub const MIN_ENDPOINTS: usize = 2;

    /// Whether the bridge forwards at all. Smaller bridges are kept so they
    /// can be completed later, but stay inert.
    pub fn is_active(&self) -> bool {
        self.channels.len() >= Self::MIN_ENDPOINTS
    }

    pub fn channel(&self, channel_id: &str) -> Option<&ChannelEndpoint> {
        self.channels.iter().find(|c| c.channel_id == channel_id)
    }

    /// Whether a message from `guild_id` may originate a relay.
    pub fn accepts_origin(&self, guild_id: &str) -> bool {
        match self.direction {
            Direction::TwoWay => true,
            Direction::OneWay => self.source_guilds.contains(guild_id),
        }
    }

    /// Every endpoint a message from `origin_channel_id` is copied to.
    ///
    /// The origin never appears, and each channel appears at most once even
    /// if the definition was assembled by hand with duplicates.
    pub fn fan_out<'a>(
        &'a self,
        origin_channel_id: &'a str,
    ) -> impl Iterator<Item = &'a ChannelEndpoint> + 'a {
        let mut seen = HashSet::new();
        self.channels
            .iter()
            .filter(move |c| c.channel_id != origin_channel_id && seen.insert(c.channel_id.as_str()))
    }
}
