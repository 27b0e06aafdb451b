//! The relay engine.
//!
//! Each inbound event is matched against every bridge its channel belongs to.
//! Per (bridge, origin message) the state moves from no-link to linked on the
//! first successful forward and is discarded when the origin is deleted:
//!
//! - create: filter, choose an accent color, post to every other channel
//! - update: re-render with the stored color and edit every recorded copy
//! - delete: drop the record, then delete every recorded copy
//!
//! Every (event, bridge) pair runs as its own task. Failures are logged and
//! recorded in the ledger; nothing propagates back to the event pump.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use {
    futures::future::join_all,
    rainbow_common::types::SourceMessage,
    rainbow_config::{RelayConfig, schema::DEFAULT_PALETTE},
    tokio::{sync::watch, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use rainbow_metrics::{
    counter, delivery as delivery_metrics, gauge, histogram, labels, relay as relay_metrics,
};

use crate::{
    bridge::BridgeDefinition,
    delivery::{DeliveryTargetCache, DeliveryTargetFactory},
    error::{Error, Result},
    event::{MessageEventSource, RelayEvent},
    filter,
    ledger::{RelayLedger, RelayOperation, RelayOutcome, RelayReport, unix_now},
    links::{LinkKey, LinkRecord, LinkStore, TargetLink},
    payload::{self, BridgeContext},
    registry::{BridgeRegistry, ConfigIssue, RegistrySnapshot},
    sequencer::KeySequencer,
};

/// Mutable per-bridge state that outlives registry reloads.
#[derive(Default)]
struct BridgeRuntime {
    color_cursor: AtomicUsize,
}

impl BridgeRuntime {
    fn next_color(&self, palette: &[u32]) -> u32 {
        if palette.is_empty() {
            return DEFAULT_PALETTE[0];
        }
        let index = self.color_cursor.fetch_add(1, Ordering::Relaxed) % palette.len();
        palette[index]
    }
}

struct EngineInner {
    registry: BridgeRegistry,
    targets: DeliveryTargetCache,
    links: LinkStore,
    sequencer: KeySequencer<LinkKey>,
    ledger: RelayLedger,
    runtime: Mutex<HashMap<String, Arc<BridgeRuntime>>>,
}

/// Cheap-to-clone handle to a running relay.
#[derive(Clone)]
pub struct RelayEngine {
    inner: Arc<EngineInner>,
}

impl RelayEngine {
    /// Build an engine from `config`. Unusable configuration entries are
    /// logged and skipped; see [`RelayEngine::reload`] to get them back as
    /// values.
    pub fn new(config: &RelayConfig, factory: Arc<dyn DeliveryTargetFactory>) -> Self {
        let (registry, _issues) = BridgeRegistry::new(config);
        let ledger = RelayLedger::new(registry.snapshot().settings().ledger_capacity);
        Self {
            inner: Arc::new(EngineInner {
                registry,
                targets: DeliveryTargetCache::new(factory),
                links: LinkStore::new(),
                sequencer: KeySequencer::new(),
                ledger,
                runtime: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Apply a changed configuration. Handlers already running keep the
    /// tables they started with.
    pub fn reload(&self, config: &RelayConfig) -> Vec<ConfigIssue> {
        let issues = self.inner.registry.reload(config);
        let snapshot = self.inner.registry.snapshot();
        self.inner
            .ledger
            .set_capacity(snapshot.settings().ledger_capacity);
        self.inner
            .runtime
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|bridge_id, _| snapshot.bridge(bridge_id).is_some());
        issues
    }

    /// Schedule handling of one inbound event. Must be called from within a
    /// tokio runtime, in arrival order: per-message ordering is fixed here,
    /// before any task runs.
    pub fn dispatch(&self, event: RelayEvent) -> Vec<JoinHandle<()>> {
        let snapshot = self.inner.registry.snapshot();
        let event = Arc::new(event);
        let message = event.message();

        #[cfg(feature = "metrics")]
        counter!(relay_metrics::EVENTS_TOTAL, labels::KIND => event.kind()).increment(1);

        snapshot
            .bridges_for_channel(&message.channel_id)
            .iter()
            .filter(|m| {
                let active = m.bridge.is_active();
                if !active {
                    debug!(
                        bridge_id = %m.bridge_id,
                        channel_id = %message.channel_id,
                        "bridge inert, skipping"
                    );
                }
                active
            })
            .map(|m| {
                let key = LinkKey::new(m.bridge_id.clone(), message.id.clone());
                let mut turn = self.inner.sequencer.enqueue(key.clone());
                let inner = Arc::clone(&self.inner);
                let snapshot = Arc::clone(&snapshot);
                let bridge = Arc::clone(&m.bridge);
                let event = Arc::clone(&event);
                tokio::spawn(async move {
                    turn.ready().await;
                    inner.process(&snapshot, &bridge, &key, &event).await;
                    drop(turn);
                })
            })
            .collect()
    }

    /// Dispatch `event` and wait for every resulting handler.
    pub async fn handle(&self, event: RelayEvent) {
        for result in join_all(self.dispatch(event)).await {
            if let Err(e) = result {
                warn!(error = %e, "relay task failed");
            }
        }
    }

    /// Pump `source` until it closes or `cancel` fires, reloading whenever
    /// `config_updates` publishes a new configuration. Returns once every
    /// handler it started has finished.
    pub async fn run<S: MessageEventSource>(
        &self,
        mut source: S,
        mut config_updates: watch::Receiver<RelayConfig>,
        cancel: CancellationToken,
    ) {
        let mut config_open = true;
        let mut in_flight: Vec<JoinHandle<()>> = Vec::new();
        info!("relay engine started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("relay engine cancelled");
                    break;
                },
                changed = config_updates.changed(), if config_open => {
                    if changed.is_ok() {
                        let config = config_updates.borrow_and_update().clone();
                        self.reload(&config);
                    } else {
                        debug!("configuration channel closed, keeping current bridges");
                        config_open = false;
                    }
                },
                event = source.next_event() => match event {
                    Some(event) => {
                        in_flight.retain(|h| !h.is_finished());
                        in_flight.extend(self.dispatch(event));
                    },
                    None => {
                        info!("event source closed");
                        break;
                    },
                },
            }
        }

        debug!(tasks = in_flight.len(), "waiting for in-flight relays");
        for result in join_all(in_flight).await {
            if let Err(e) = result {
                warn!(error = %e, "relay task failed");
            }
        }
    }

    /// Copies recorded for `message_id` on `bridge_id`.
    pub fn link(&self, bridge_id: &str, message_id: &str) -> Option<LinkRecord> {
        self.inner
            .links
            .get(&LinkKey::new(bridge_id, message_id))
            .ok()
    }

    pub fn link_count(&self) -> usize {
        self.inner.links.len()
    }

    /// Up to `limit` most recent relay attempts, oldest first.
    pub fn recent_relays(&self, limit: Option<usize>) -> Vec<RelayReport> {
        self.inner.ledger.recent(limit)
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.inner.registry.snapshot()
    }
}

impl EngineInner {
    async fn process(
        &self,
        snapshot: &RegistrySnapshot,
        bridge: &BridgeDefinition,
        key: &LinkKey,
        event: &RelayEvent,
    ) {
        match event {
            RelayEvent::Created(message) => self.relay_create(snapshot, bridge, key, message).await,
            RelayEvent::Updated { new, .. } => self.relay_edit(snapshot, bridge, key, new).await,
            RelayEvent::Deleted(_) => self.relay_delete(bridge, key).await,
        }
    }

    async fn relay_create(
        &self,
        snapshot: &RegistrySnapshot,
        bridge: &BridgeDefinition,
        key: &LinkKey,
        message: &SourceMessage,
    ) {
        let settings = snapshot.settings();
        let verdict = filter::evaluate(message, bridge, settings.forward_bots, |id| {
            snapshot.is_delivery_identity(id) || self.targets.knows(id)
        });
        if let Err(reason) = verdict {
            debug!(
                bridge_id = %bridge.id,
                message_id = %message.id,
                reason = reason.as_str(),
                "message not relayed"
            );
            #[cfg(feature = "metrics")]
            counter!(relay_metrics::FILTERED_TOTAL, labels::REASON => reason.as_str()).increment(1);
            return;
        }
        if self.links.contains(key) {
            debug!(bridge_id = %bridge.id, message_id = %message.id, "message already relayed");
            return;
        }

        let accent_color = self.runtime_for(&bridge.id).next_color(&settings.palette);
        let payload = payload::build(message, &BridgeContext {
            channel_label: bridge
                .channel(&message.channel_id)
                .and_then(|c| c.label.as_deref()),
            accent_color,
            max_content_len: settings.max_content_len,
        });

        let sends = bridge.fan_out(&message.channel_id).map(|channel| {
            let target = self.targets.get_or_create(&channel.endpoint);
            let payload = &payload;
            async move {
                let result = observe(RelayOperation::Create, target.send(payload)).await;
                (channel, result)
            }
        });

        for (channel, result) in join_all(sends).await {
            let outcome = match result {
                Ok(target_message_id) => {
                    self.links.record_target(
                        key,
                        &message.channel_id,
                        accent_color,
                        channel.channel_id.clone(),
                        TargetLink {
                            endpoint: channel.endpoint.clone(),
                            message_id: target_message_id,
                        },
                    );
                    RelayOutcome::Delivered
                },
                Err(e) => {
                    warn!(
                        bridge_id = %bridge.id,
                        channel_id = %channel.channel_id,
                        endpoint_id = channel.endpoint.id(),
                        message_id = %message.id,
                        error = %e,
                        "failed to relay message"
                    );
                    RelayOutcome::Failed {
                        reason: e.to_string(),
                    }
                },
            };
            self.report(
                bridge,
                key,
                &message.channel_id,
                &channel.channel_id,
                RelayOperation::Create,
                outcome,
            );
        }
        self.record_link_gauge();
    }

    async fn relay_edit(
        &self,
        snapshot: &RegistrySnapshot,
        bridge: &BridgeDefinition,
        key: &LinkKey,
        message: &SourceMessage,
    ) {
        let record = match self.links.get(key) {
            Ok(record) => record,
            Err(e) => {
                debug!(error = %e, "edit ignored");
                return;
            },
        };

        let payload = payload::build(message, &BridgeContext {
            channel_label: bridge
                .channel(&record.origin_channel_id)
                .and_then(|c| c.label.as_deref()),
            accent_color: record.accent_color,
            max_content_len: snapshot.settings().max_content_len,
        });

        let edits = record.targets.iter().map(|(channel_id, link)| {
            let target = self.targets.get_or_create(&link.endpoint);
            let payload = &payload;
            async move {
                let result = observe(
                    RelayOperation::Edit,
                    target.edit_message(&link.message_id, payload),
                )
                .await;
                (channel_id, link, result)
            }
        });

        for (channel_id, link, result) in join_all(edits).await {
            let outcome = outcome_of(result, |e| {
                warn!(
                    bridge_id = %bridge.id,
                    channel_id = %channel_id,
                    endpoint_id = link.endpoint.id(),
                    message_id = %link.message_id,
                    error = %e,
                    "failed to edit relayed message"
                );
            });
            self.report(
                bridge,
                key,
                &record.origin_channel_id,
                channel_id,
                RelayOperation::Edit,
                outcome,
            );
        }
    }

    async fn relay_delete(&self, bridge: &BridgeDefinition, key: &LinkKey) {
        let record = match self.links.take(key) {
            Ok(record) => record,
            Err(e) => {
                debug!(error = %e, "delete ignored");
                return;
            },
        };
        self.record_link_gauge();

        let deletes = record.targets.iter().map(|(channel_id, link)| {
            let target = self.targets.get_or_create(&link.endpoint);
            async move {
                let result = observe(
                    RelayOperation::Delete,
                    target.delete_message(&link.message_id),
                )
                .await;
                (channel_id, link, result)
            }
        });

        for (channel_id, link, result) in join_all(deletes).await {
            let outcome = outcome_of(result, |e| {
                warn!(
                    bridge_id = %bridge.id,
                    channel_id = %channel_id,
                    endpoint_id = link.endpoint.id(),
                    message_id = %link.message_id,
                    error = %e,
                    "failed to delete relayed message"
                );
            });
            self.report(
                bridge,
                key,
                &record.origin_channel_id,
                channel_id,
                RelayOperation::Delete,
                outcome,
            );
        }
    }

    fn runtime_for(&self, bridge_id: &str) -> Arc<BridgeRuntime> {
        let mut runtime = self.runtime.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(runtime.entry(bridge_id.to_string()).or_default())
    }

    fn report(
        &self,
        bridge: &BridgeDefinition,
        key: &LinkKey,
        origin_channel_id: &str,
        target_channel_id: &str,
        operation: RelayOperation,
        outcome: RelayOutcome,
    ) {
        self.ledger.record(RelayReport {
            bridge_id: bridge.id.clone(),
            bridge_name: bridge.name.clone(),
            origin_channel_id: origin_channel_id.to_string(),
            origin_message_id: key.origin_message_id.clone(),
            target_channel_id: target_channel_id.to_string(),
            operation,
            outcome,
            at: unix_now(),
        });
    }

    fn record_link_gauge(&self) {
        #[cfg(feature = "metrics")]
        gauge!(relay_metrics::LINKS_ACTIVE).set(self.links.len() as f64);
    }
}

fn outcome_of(result: Result<()>, on_error: impl FnOnce(&Error)) -> RelayOutcome {
    match result {
        Ok(()) => RelayOutcome::Delivered,
        Err(e) => {
            on_error(&e);
            RelayOutcome::Failed {
                reason: e.to_string(),
            }
        },
    }
}

/// Await one delivery call, recording its outcome and duration.
#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
async fn observe<T>(operation: RelayOperation, call: impl Future<Output = Result<T>>) -> Result<T> {
    #[cfg(feature = "metrics")]
    let started = std::time::Instant::now();

    let result = call.await;

    #[cfg(feature = "metrics")]
    {
        let outcome = if result.is_ok() { "ok" } else { "error" };
        counter!(
            delivery_metrics::CALLS_TOTAL,
            labels::OPERATION => operation.as_str(),
            labels::OUTCOME => outcome
        )
        .increment(1);
        histogram!(
            delivery_metrics::CALL_DURATION_SECONDS,
            labels::OPERATION => operation.as_str()
        )
        .record(started.elapsed().as_secs_f64());
    }

    result
}
