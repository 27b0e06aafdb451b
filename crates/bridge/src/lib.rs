//! Cross-channel message relay.
//!
//! Mirrors message creates, edits and deletes across the channels of each
//! configured bridge. Inbound events arrive through a [`MessageEventSource`];
//! copies are posted through [`DeliveryTarget`]s (webhooks in production).

pub mod bridge;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod event;
pub mod filter;
pub mod ledger;
pub mod links;
pub mod payload;
pub mod registry;
pub mod sequencer;
pub mod webhook;

pub use {
    bridge::{BridgeDefinition, ChannelEndpoint, Direction, ForwardBots},
    delivery::{DeliveryEndpoint, DeliveryTarget, DeliveryTargetCache, DeliveryTargetFactory},
    engine::RelayEngine,
    error::{Error, Result},
    event::{MessageEventSource, RelayEvent},
    ledger::{RelayLedger, RelayOperation, RelayOutcome, RelayReport},
    links::{LinkKey, LinkRecord, LinkStore, TargetLink},
    payload::{Payload, Summary},
    registry::{BridgeRegistry, ConfigIssue, IssueReason, RegistrySnapshot},
    webhook::{WebhookFactory, WebhookTarget},
};
