//! Delivery endpoints and the outbound client cache.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock},
};

use {
    async_trait::async_trait,
    secrecy::{ExposeSecret, Secret},
    sha2::{Digest, Sha256},
    tracing::debug,
};

#[cfg(feature = "metrics")]
use rainbow_metrics::{counter, delivery as delivery_metrics};

use crate::{
    error::{Context, Error, Result},
    payload::Payload,
};

/// An outbound posting endpoint: public id plus secret token.
#[derive(Clone)]
pub struct DeliveryEndpoint {
    id: String,
    secret: Secret<String>,
}

impl DeliveryEndpoint {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: Secret::new(secret.into()),
        }
    }

    /// Parse a webhook descriptor.
    ///
    /// Accepts a full webhook URL (`https://host/api/webhooks/<id>/<token>`,
    /// with or without an API version segment) or the short `<id>/<token>`
    /// form. Ids are numeric; tokens are non-empty and contain no whitespace.
    pub fn parse(descriptor: &str) -> Result<Self> {
        let descriptor = descriptor.trim();
        let (id, secret) = if descriptor.contains("://") {
            let url = url::Url::parse(descriptor)
                .map_err(|e| Error::config(format!("webhook URL does not parse: {e}")))?;
            let mut segments = url
                .path_segments()
                .context("webhook URL has no path")?
                .skip_while(|s| *s != "webhooks")
                .skip(1);
            let id = segments.next().context("webhook URL is missing the id")?;
            let secret = segments.next().context("webhook URL is missing the token")?;
            (id.to_string(), secret.to_string())
        } else {
            let (id, secret) = descriptor
                .split_once('/')
                .context("expected `<id>/<token>` or a webhook URL")?;
            (id.to_string(), secret.to_string())
        };

        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::config("webhook id must be numeric"));
        }
        if secret.is_empty() || secret.contains(char::is_whitespace) || secret.contains('/') {
            return Err(Error::config("webhook token is empty or malformed"));
        }
        Ok(Self::new(id, secret))
    }

    /// Public identity; also the author id of messages posted through it.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn secret(&self) -> &Secret<String> {
        &self.secret
    }

    fn cache_key(&self) -> EndpointKey {
        let mut secret_digest = [0u8; 32];
        secret_digest.copy_from_slice(&Sha256::digest(self.secret.expose_secret().as_bytes()));
        EndpointKey {
            id: self.id.clone(),
            secret_digest,
        }
    }
}

impl fmt::Debug for DeliveryEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryEndpoint")
            .field("id", &self.id)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl PartialEq for DeliveryEndpoint {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.secret.expose_secret() == other.secret.expose_secret()
    }
}

impl Eq for DeliveryEndpoint {}

/// Cache identity of a physical endpoint. The secret only participates as a
/// digest so the key can be logged or compared without exposing it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EndpointKey {
    id: String,
    secret_digest: [u8; 32],
}

/// Posts, edits and deletes relayed copies at one endpoint.
#[async_trait]
pub trait DeliveryTarget: Send + Sync {
    /// Post a new message and return its id.
    async fn send(&self, payload: &Payload) -> Result<String>;

    async fn edit_message(&self, message_id: &str, payload: &Payload) -> Result<()>;

    async fn delete_message(&self, message_id: &str) -> Result<()>;
}

/// Builds delivery targets; injected into the engine so tests and alternate
/// transports can replace the webhook client.
pub trait DeliveryTargetFactory: Send + Sync {
    fn create(&self, endpoint: &DeliveryEndpoint) -> Arc<dyn DeliveryTarget>;
}

/// One delivery target per physical endpoint, created lazily and kept for the
/// life of the process. Size is bounded by configuration, not traffic.
pub struct DeliveryTargetCache {
    factory: Arc<dyn DeliveryTargetFactory>,
    targets: RwLock<HashMap<EndpointKey, Arc<dyn DeliveryTarget>>>,
}

impl DeliveryTargetCache {
    pub fn new(factory: Arc<dyn DeliveryTargetFactory>) -> Self {
        Self {
            factory,
            targets: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, endpoint: &DeliveryEndpoint) -> Arc<dyn DeliveryTarget> {
        let key = endpoint.cache_key();
        {
            let targets = self.targets.read().unwrap_or_else(|e| e.into_inner());
            if let Some(target) = targets.get(&key) {
                return Arc::clone(target);
            }
        }

        let mut targets = self.targets.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(targets.entry(key).or_insert_with(|| {
            debug!(endpoint_id = endpoint.id(), "creating delivery target");
            #[cfg(feature = "metrics")]
            counter!(delivery_metrics::TARGETS_CREATED_TOTAL).increment(1);
            self.factory.create(endpoint)
        }))
    }

    /// Whether any cached target posts under `endpoint_id`.
    pub fn knows(&self, endpoint_id: &str) -> bool {
        let targets = self.targets.read().unwrap_or_else(|e| e.into_inner());
        targets.keys().any(|k| k.id == endpoint_id)
    }

    pub fn len(&self) -> usize {
        self.targets.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
