//! Inbound message events and the subscription the engine binds to.

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tokio::sync::mpsc,
};

use rainbow_common::types::SourceMessage;

/// A message lifecycle event observed in some channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    Created(SourceMessage),
    Updated {
        /// Previous version, when the platform supplied one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old: Option<SourceMessage>,
        new: SourceMessage,
    },
    Deleted(SourceMessage),
}

impl RelayEvent {
    /// The message the event is about (the new version for updates).
    pub fn message(&self) -> &SourceMessage {
        match self {
            Self::Created(m) | Self::Deleted(m) => m,
            Self::Updated { new, .. } => new,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Updated { .. } => "updated",
            Self::Deleted(_) => "deleted",
        }
    }
}

/// Stream of inbound events. `None` means the source is closed.
#[async_trait]
pub trait MessageEventSource: Send {
    async fn next_event(&mut self) -> Option<RelayEvent>;
}

#[async_trait]
impl MessageEventSource for mpsc::Receiver<RelayEvent> {
    async fn next_event(&mut self) -> Option<RelayEvent> {
        self.recv().await
    }
}

#[async_trait]
impl MessageEventSource for mpsc::UnboundedReceiver<RelayEvent> {
    async fn next_event(&mut self) -> Option<RelayEvent> {
        self.recv().await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rainbow_common::types::Author};

    fn message(id: &str) -> SourceMessage {
        SourceMessage {
            id: id.into(),
            channel_id: "10".into(),
            guild_id: "1".into(),
            guild_name: None,
            author: Author::default(),
            webhook_id: None,
            content: String::new(),
            attachments: Vec::new(),
            previews: Vec::new(),
            created_at: 0,
        }
    }

    #[test]
    fn update_exposes_new_version() {
        let event = RelayEvent::Updated {
            old: Some(message("1")),
            new: SourceMessage {
                content: "edited".into(),
                ..message("1")
            },
        };
        assert_eq!(event.message().content, "edited");
        assert_eq!(event.kind(), "updated");
    }

    #[test]
    fn serde_tagging() {
        let json = serde_json::to_value(RelayEvent::Deleted(message("5"))).unwrap();
        assert_eq!(json["type"], "deleted");
        assert_eq!(json["id"], "5");
    }

    #[tokio::test]
    async fn channel_receivers_are_sources() {
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(RelayEvent::Created(message("1"))).await.unwrap();
        drop(tx);

        let source: &mut dyn MessageEventSource = &mut rx;
        assert_eq!(source.next_event().await.unwrap().kind(), "created");
        assert!(source.next_event().await.is_none());
    }
}
