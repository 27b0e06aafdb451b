//! Webhook delivery over HTTP.
//!
//! Relayed copies are posted with the origin author's name and avatar, so
//! they read as if written in the target channel. Mentions are never parsed.

use std::sync::Arc;

use {
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use crate::{
    delivery::{DeliveryEndpoint, DeliveryTarget, DeliveryTargetFactory},
    error::{Error, Result},
    payload::{self, Payload},
};

/// Platform ceiling for message content.
const MAX_CONTENT_CHARS: usize = 2000;
/// Platform ceiling for webhook usernames.
const MAX_USERNAME_CHARS: usize = 80;

/// Builds [`WebhookTarget`]s sharing one HTTP client.
#[derive(Clone)]
pub struct WebhookFactory {
    http: reqwest::Client,
    base_url: String,
}

impl WebhookFactory {
    /// `base_url` is the API root, e.g. `https://discord.com/api/v10`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl DeliveryTargetFactory for WebhookFactory {
    fn create(&self, endpoint: &DeliveryEndpoint) -> Arc<dyn DeliveryTarget> {
        Arc::new(WebhookTarget {
            http: self.http.clone(),
            endpoint_id: endpoint.id().to_string(),
            url: Secret::new(format!(
                "{}/webhooks/{}/{}",
                self.base_url,
                endpoint.id(),
                endpoint.secret().expose_secret()
            )),
        })
    }
}

/// One webhook. The URL embeds the token and is never logged.
pub struct WebhookTarget {
    http: reqwest::Client,
    endpoint_id: String,
    url: Secret<String>,
}

#[derive(Serialize)]
struct AllowedMentions {
    parse: Vec<&'static str>,
}

#[derive(Serialize)]
struct Footer<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Image<'a> {
    url: &'a str,
}

#[derive(Serialize)]
struct Embed<'a> {
    color: u32,
    footer: Footer<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<Image<'a>>,
}

#[derive(Serialize)]
struct ExecuteBody<'a> {
    username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar_url: Option<&'a str>,
    content: String,
    embeds: Vec<Embed<'a>>,
    allowed_mentions: AllowedMentions,
}

#[derive(Serialize)]
struct EditBody<'a> {
    content: String,
    embeds: Vec<Embed<'a>>,
    allowed_mentions: AllowedMentions,
}

#[derive(Deserialize)]
struct CreatedMessage {
    id: String,
}

fn no_mentions() -> AllowedMentions {
    AllowedMentions { parse: Vec::new() }
}

fn embeds(payload: &Payload) -> Vec<Embed<'_>> {
    if payload.suppress_summary {
        return Vec::new();
    }
    payload
        .summary
        .iter()
        .map(|s| Embed {
            color: s.accent_color,
            footer: Footer { text: &s.context },
            image: s.image_url.as_deref().map(|url| Image { url }),
        })
        .collect()
}

/// Body text plus any media the embed does not show, one URL per line, as
/// long as they fit.
fn content(payload: &Payload) -> String {
    let mut content = payload::truncate(&payload.text, MAX_CONTENT_CHARS);
    let shown = payload
        .summary
        .as_ref()
        .filter(|_| !payload.suppress_summary)
        .and_then(|s| s.image_url.as_deref());

    let mut len = content.chars().count();
    for url in payload.media.iter().filter(|url| Some(url.as_str()) != shown) {
        if content.contains(url.as_str()) {
            continue;
        }
        let sep = usize::from(!content.is_empty());
        let extra = sep + url.chars().count();
        if len + extra > MAX_CONTENT_CHARS {
            break;
        }
        if sep == 1 {
            content.push('\n');
        }
        content.push_str(url);
        len += extra;
    }
    content
}

fn username(payload: &Payload) -> String {
    let name = payload.display_name.trim();
    if name.is_empty() {
        "unknown".to_string()
    } else {
        name.chars().take(MAX_USERNAME_CHARS).collect()
    }
}

impl WebhookTarget {
    fn message_url(&self, message_id: &str) -> String {
        format!("{}/messages/{message_id}", self.url.expose_secret())
    }

    /// Turn transport errors and non-success statuses into dispatch errors.
    /// Request URLs are stripped so the token never reaches a log line.
    async fn checked(
        &self,
        operation: &'static str,
        response: reqwest::Result<reqwest::Response>,
    ) -> Result<reqwest::Response> {
        let response =
            response.map_err(|e| Error::dispatch(&self.endpoint_id, operation, e.without_url()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::dispatch(
            &self.endpoint_id,
            operation,
            format!("{status}: {body}"),
        ))
    }
}

#[async_trait]
impl DeliveryTarget for WebhookTarget {
    async fn send(&self, payload: &Payload) -> Result<String> {
        let body = ExecuteBody {
            username: username(payload),
            avatar_url: payload.avatar_url.as_deref(),
            content: content(payload),
            embeds: embeds(payload),
            allowed_mentions: no_mentions(),
        };
        let response = self
            .http
            .post(self.url.expose_secret())
            .query(&[("wait", "true")])
            .json(&body)
            .send()
            .await;
        let response = self.checked("send", response).await?;
        let text = response
            .text()
            .await
            .map_err(|e| Error::dispatch(&self.endpoint_id, "send", e.without_url()))?;
        let created: CreatedMessage = serde_json::from_str(&text)?;
        debug!(endpoint_id = %self.endpoint_id, message_id = %created.id, "webhook message posted");
        Ok(created.id)
    }

    async fn edit_message(&self, message_id: &str, payload: &Payload) -> Result<()> {
        let body = EditBody {
            content: content(payload),
            embeds: embeds(payload),
            allowed_mentions: no_mentions(),
        };
        let response = self
            .http
            .patch(self.message_url(message_id))
            .json(&body)
            .send()
            .await;
        self.checked("edit", response).await?;
        Ok(())
    }

    async fn delete_message(&self, message_id: &str) -> Result<()> {
        let response = self.http.delete(self.message_url(message_id)).send().await;
        self.checked("delete", response).await?;
        Ok(())
    }
}
