//! Raw relay configuration as written by operators.
//!
//! Nothing here is validated beyond what serde enforces. The bridge registry
//! normalizes these values, dropping malformed channel entries with a warning
//! instead of rejecting the whole file.
use std::collections::BTreeMap;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Deserializer, Serialize},
};

/// Seven-step rainbow used for relayed summary accents.
pub const DEFAULT_PALETTE: [u32; 7] = [
    0xE7_4C_3C, 0xE6_7E_22, 0xF1_C4_0F, 0x2E_CC_71, 0x34_98_DB, 0x5D_3F_D3, 0x9B_59_B6,
];

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Whether bot-authored messages are relayed when a bridge does not say.
    pub forward_bots: bool,
    /// Content-length ceiling for relayed message bodies (characters).
    pub max_content_len: usize,
    /// Number of recent relay reports kept for operators.
    pub ledger_capacity: usize,
    /// Accent colors cycled through per bridge.
    pub palette: Vec<u32>,
    /// Base URL of the webhook API (`…/webhooks/{id}/{token}` is appended).
    pub api_base_url: String,
    /// Bridges keyed by their stable id.
    pub bridges: BTreeMap<String, BridgeEntry>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            forward_bots: false,
            max_content_len: 2000,
            ledger_capacity: 256,
            palette: DEFAULT_PALETTE.to_vec(),
            api_base_url: "https://discord.com/api/v10".into(),
            bridges: BTreeMap::new(),
        }
    }
}

/// One bridge as configured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeEntry {
    pub name: Option<String>,
    /// `"two-way"` (default) or `"one-way"`.
    pub direction: Option<String>,
    /// `None` inherits [`RelayConfig::forward_bots`].
    pub forward_bots: Option<bool>,
    /// Guilds allowed to originate relays on a one-way bridge.
    #[serde(deserialize_with = "deserialize_id_list")]
    pub source_guilds: Vec<String>,
    pub channels: Vec<ChannelEntry>,
}

/// One channel endpoint as configured.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelEntry {
    #[serde(deserialize_with = "deserialize_opt_id")]
    pub guild_id: Option<String>,
    #[serde(deserialize_with = "deserialize_opt_id")]
    pub channel_id: Option<String>,
    /// Webhook URL or `<id>/<token>` pair.
    #[serde(serialize_with = "serialize_opt_secret")]
    pub webhook: Option<Secret<String>>,
    pub label: Option<String>,
}

impl std::fmt::Debug for ChannelEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelEntry")
            .field("guild_id", &self.guild_id)
            .field("channel_id", &self.channel_id)
            .field("webhook", &self.webhook.as_ref().map(|_| "[REDACTED]"))
            .field("label", &self.label)
            .finish()
    }
}

/// Snowflakes show up both quoted and bare in hand-written files.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(u64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

fn deserialize_opt_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let raw = Option::<RawId>::deserialize(deserializer)?;
    Ok(raw.map(String::from))
}

fn deserialize_id_list<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<String>, D::Error> {
    let raw = Vec::<RawId>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(String::from).collect())
}

fn serialize_opt_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(secret) => serializer.serialize_some(secret.expose_secret()),
        None => serializer.serialize_none(),
    }
}
