//! Platform-neutral view of a chat message as seen by the relay.
//!
//! Gateway adapters translate their native message objects into these types
//! before handing them to the relay engine.

use serde::{Deserialize, Serialize};

/// Who wrote a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Bots, integrations and webhooks all count as non-human.
    #[serde(default)]
    pub is_bot: bool,
}

/// A file uploaded alongside a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl Attachment {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content_type: None,
        }
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Link preview (unfurl) the platform rendered for a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddedPreview {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// A message observed in a bridged channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMessage {
    pub id: String,
    pub channel_id: String,
    pub guild_id: String,
    /// Community name used in the relayed context line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_name: Option<String>,
    pub author: Author,
    /// Set when the message was posted through a webhook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_id: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub previews: Vec<EmbeddedPreview>,
    /// Unix timestamp (seconds).
    #[serde(default)]
    pub created_at: i64,
}

impl SourceMessage {
    /// Identities that may have produced this message: the author id and,
    /// for webhook posts, the webhook id.
    pub fn sender_identities(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.author.id.as_str()).chain(self.webhook_id.as_deref())
    }

    /// Whether a person (not a bot, integration or webhook) wrote this.
    pub fn is_human(&self) -> bool {
        !self.author.is_bot && self.webhook_id.is_none()
    }
}
