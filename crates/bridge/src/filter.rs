//! Per-bridge admission checks for origin messages.

use rainbow_common::types::SourceMessage;

use crate::bridge::BridgeDefinition;

/// Why a message was not relayed on one bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Posted by one of our own delivery endpoints.
    OriginEcho,
    /// Non-human author on a bridge that does not forward bots.
    BotAuthor,
    /// One-way bridge and the origin guild is not a source.
    OutsideSourceGuilds,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OriginEcho => "origin_echo",
            Self::BotAuthor => "bot_author",
            Self::OutsideSourceGuilds => "outside_source_guilds",
        }
    }
}

/// Decide whether `message` may originate a relay on `bridge`.
///
/// Checks run in a fixed order and the first failure wins. `is_known_identity`
/// answers whether an id belongs to any delivery endpoint the engine knows.
/// Excluding the origin channel from its own fan-out is left to
/// [`BridgeDefinition::fan_out`].
pub fn evaluate(
    message: &SourceMessage,
    bridge: &BridgeDefinition,
    forward_bots_default: bool,
    is_known_identity: impl Fn(&str) -> bool,
) -> Result<(), DropReason> {
    if message.sender_identities().any(is_known_identity) {
        return Err(DropReason::OriginEcho);
    }
    if !message.is_human() && !bridge.forward_bots.resolve(forward_bots_default) {
        return Err(DropReason::BotAuthor);
    }
    if !bridge.accepts_origin(&message.guild_id) {
        return Err(DropReason::OutsideSourceGuilds);
    }
    Ok(())
}
