#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end relay behaviour against an in-memory delivery transport.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    rainbow_bridge::{
        DeliveryEndpoint, DeliveryTarget, DeliveryTargetFactory, Error, Payload, RelayEngine,
        RelayEvent, RelayOperation, RelayOutcome, Result,
    },
    rainbow_common::types::{Attachment, Author, SourceMessage},
    rainbow_config::{RelayConfig, schema::DEFAULT_PALETTE},
    tokio::sync::{Semaphore, mpsc, watch},
    tokio_util::sync::CancellationToken,
};

#[derive(Debug, Clone)]
enum Call {
    Send {
        endpoint: String,
        payload: Payload,
    },
    Edit {
        endpoint: String,
        message_id: String,
        payload: Payload,
    },
    Delete {
        endpoint: String,
        message_id: String,
    },
}

impl Call {
    fn endpoint(&self) -> &str {
        match self {
            Self::Send { endpoint, .. } | Self::Edit { endpoint, .. } | Self::Delete { endpoint, .. } => {
                endpoint
            },
        }
    }
}

/// Shared state behind every target the factory hands out.
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<Call>>,
    next_id: AtomicU64,
    failing: Mutex<HashSet<(String, &'static str)>>,
    send_gate: Mutex<Option<Arc<Semaphore>>>,
    held: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Recorder {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn sends(&self) -> Vec<(String, Payload)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Send { endpoint, payload } => Some((endpoint, payload)),
                _ => None,
            })
            .collect()
    }

    fn edits(&self) -> Vec<(String, String, Payload)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Edit {
                    endpoint,
                    message_id,
                    payload,
                } => Some((endpoint, message_id, payload)),
                _ => None,
            })
            .collect()
    }

    fn deletes(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Delete {
                    endpoint,
                    message_id,
                } => Some((endpoint, message_id)),
                _ => None,
            })
            .collect()
    }

    fn fail(&self, endpoint: &str, operation: &'static str) {
        self.failing
            .lock()
            .unwrap()
            .insert((endpoint.to_string(), operation));
    }

    /// Hold every send until permits are added to the returned semaphore.
    fn gate_sends(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.send_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Hold sends of payloads with this text until permits are added.
    fn hold_text(&self, text: &str) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.held
            .lock()
            .unwrap()
            .insert(text.to_string(), Arc::clone(&gate));
        gate
    }

    fn check(&self, endpoint: &str, operation: &'static str) -> Result<()> {
        if self
            .failing
            .lock()
            .unwrap()
            .contains(&(endpoint.to_string(), operation))
        {
            return Err(Error::dispatch(endpoint, operation, "503 Service Unavailable"));
        }
        Ok(())
    }
}

struct RecordingTarget {
    endpoint: String,
    recorder: Arc<Recorder>,
}

#[async_trait]
impl DeliveryTarget for RecordingTarget {
    async fn send(&self, payload: &Payload) -> Result<String> {
        let gate = self.recorder.send_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await.unwrap();
        }
        let held = self.recorder.held.lock().unwrap().get(&payload.text).cloned();
        if let Some(held) = held {
            let _permit = held.acquire().await.unwrap();
        }
        self.recorder.calls.lock().unwrap().push(Call::Send {
            endpoint: self.endpoint.clone(),
            payload: payload.clone(),
        });
        self.recorder.check(&self.endpoint, "send")?;
        let n = self.recorder.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{}-{n}", self.endpoint))
    }

    async fn edit_message(&self, message_id: &str, payload: &Payload) -> Result<()> {
        self.recorder.calls.lock().unwrap().push(Call::Edit {
            endpoint: self.endpoint.clone(),
            message_id: message_id.to_string(),
            payload: payload.clone(),
        });
        self.recorder.check(&self.endpoint, "edit")
    }

    async fn delete_message(&self, message_id: &str) -> Result<()> {
        self.recorder.calls.lock().unwrap().push(Call::Delete {
            endpoint: self.endpoint.clone(),
            message_id: message_id.to_string(),
        });
        self.recorder.check(&self.endpoint, "delete")
    }
}

struct RecordingFactory(Arc<Recorder>);

impl DeliveryTargetFactory for RecordingFactory {
    fn create(&self, endpoint: &DeliveryEndpoint) -> Arc<dyn DeliveryTarget> {
        Arc::new(RecordingTarget {
            endpoint: endpoint.id().to_string(),
            recorder: Arc::clone(&self.0),
        })
    }
}

fn config(raw: &str) -> RelayConfig {
    toml::from_str(raw).unwrap()
}

fn engine(raw: &str) -> (RelayEngine, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let engine = RelayEngine::new(
        &config(raw),
        Arc::new(RecordingFactory(Arc::clone(&recorder))),
    );
    (engine, recorder)
}

const BOOK_CLUB: &str = r#"
    [bridges.book-club]
    name = "Book Club"
    channels = [
        { guild_id = "1", channel_id = "10", webhook = "91/a", label = "reading" },
        { guild_id = "2", channel_id = "20", webhook = "92/b" },
    ]
"#;

const TRIANGLE: &str = r#"
    [bridges.tri]
    channels = [
        { guild_id = "1", channel_id = "10", webhook = "91/a" },
        { guild_id = "2", channel_id = "20", webhook = "92/b" },
        { guild_id = "3", channel_id = "30", webhook = "93/c" },
    ]
"#;

fn message(id: &str, channel: &str, guild: &str, content: &str) -> SourceMessage {
    SourceMessage {
        id: id.into(),
        channel_id: channel.into(),
        guild_id: guild.into(),
        guild_name: Some("Readers".into()),
        author: Author {
            id: "7".into(),
            display_name: "ada".into(),
            avatar_url: None,
            is_bot: false,
        },
        webhook_id: None,
        content: content.into(),
        attachments: Vec::new(),
        previews: Vec::new(),
        created_at: 1_700_000_000,
    }
}

fn accent(payload: &Payload) -> u32 {
    payload.summary.as_ref().unwrap().accent_color
}

#[tokio::test]
async fn book_club_round_trip() {
    let (engine, recorder) = engine(BOOK_CLUB);

    let mut hello = message("100", "10", "1", "Hello");
    hello
        .attachments
        .push(Attachment::new("https://cdn.example/cover.png").with_content_type("image/png"));
    engine.handle(RelayEvent::Created(hello.clone())).await;

    let sends = recorder.sends();
    assert_eq!(sends.len(), 1);
    let (endpoint, payload) = &sends[0];
    assert_eq!(endpoint, "92");
    assert_eq!(payload.text, "Hello");
    assert_eq!(payload.media, vec!["https://cdn.example/cover.png"]);
    assert_eq!(accent(payload), DEFAULT_PALETTE[0]);
    assert_eq!(
        payload.summary.as_ref().unwrap().context,
        "Readers • #reading"
    );

    let record = engine.link("book-club", "100").unwrap();
    assert_eq!(record.target_message_id("20"), Some("92-0"));

    let edited = SourceMessage {
        content: "Hello, edited".into(),
        ..hello.clone()
    };
    engine
        .handle(RelayEvent::Updated {
            old: Some(hello),
            new: edited,
        })
        .await;

    let edits = recorder.edits();
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].0, "92");
    assert_eq!(edits[0].1, "92-0");
    assert_eq!(edits[0].2.text, "Hello, edited");
    assert_eq!(accent(&edits[0].2), DEFAULT_PALETTE[0]);

    let mut bot = message("101", "20", "2", "beep");
    bot.author.is_bot = true;
    engine.handle(RelayEvent::Created(bot)).await;
    assert_eq!(recorder.calls().len(), 2);
}

#[tokio::test]
async fn inert_bridges_never_dispatch() {
    let (engine, recorder) = engine(
        r#"
        [bridges.lonely]
        channels = [
            { guild_id = "1", channel_id = "10", webhook = "91/a" },
            { guild_id = "2", channel_id = "20", webhook = "garbage" },
        ]
        "#,
    );
    assert_eq!(engine.snapshot().inert_count(), 1);

    let msg = message("1", "10", "1", "anyone there?");
    assert!(engine.dispatch(RelayEvent::Created(msg.clone())).is_empty());
    assert!(
        engine
            .dispatch(RelayEvent::Updated {
                old: None,
                new: msg.clone()
            })
            .is_empty()
    );
    assert!(engine.dispatch(RelayEvent::Deleted(msg)).is_empty());
    assert!(recorder.calls().is_empty());
}

#[tokio::test]
async fn own_webhook_posts_are_not_relayed_back() {
    let (engine, recorder) = engine(
        r#"
        forward_bots = true
        [bridges.book-club]
        channels = [
            { guild_id = "1", channel_id = "10", webhook = "91/a" },
            { guild_id = "2", channel_id = "20", webhook = "92/b" },
        ]
        "#,
    );

    let mut echo = message("200", "20", "2", "Hello");
    echo.author.id = "92".into();
    echo.author.is_bot = true;
    echo.webhook_id = Some("92".into());
    engine.handle(RelayEvent::Created(echo)).await;

    // Bots are forwarded on this bridge, so a foreign bot still goes through.
    let mut other_bot = message("201", "20", "2", "beep");
    other_bot.author.is_bot = true;
    engine.handle(RelayEvent::Created(other_bot)).await;

    let sends = recorder.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].1.text, "beep");
}

#[tokio::test]
async fn one_way_bridge_only_relays_from_sources() {
    let (engine, recorder) = engine(
        r#"
        [bridges.announcements]
        direction = "one-way"
        source_guilds = ["1"]
        channels = [
            { guild_id = "1", channel_id = "10", webhook = "91/a" },
            { guild_id = "2", channel_id = "20", webhook = "92/b" },
            { guild_id = "3", channel_id = "30", webhook = "93/c" },
        ]
        "#,
    );

    engine
        .handle(RelayEvent::Created(message("1", "10", "1", "news")))
        .await;
    let mut endpoints: Vec<_> = recorder.sends().into_iter().map(|(e, _)| e).collect();
    endpoints.sort();
    assert_eq!(endpoints, vec!["92", "93"]);

    engine
        .handle(RelayEvent::Created(message("2", "20", "2", "reply")))
        .await;
    assert_eq!(recorder.sends().len(), 2);
    assert!(engine.link("announcements", "2").is_none());
}

#[tokio::test]
async fn colors_rotate_per_forward_and_hold_across_edits() {
    let (engine, recorder) = engine(BOOK_CLUB);

    let first = message("1", "10", "1", "one");
    engine.handle(RelayEvent::Created(first.clone())).await;
    engine
        .handle(RelayEvent::Created(message("2", "10", "1", "two")))
        .await;
    engine
        .handle(RelayEvent::Updated {
            old: None,
            new: SourceMessage {
                content: "one!".into(),
                ..first
            },
        })
        .await;

    let sends = recorder.sends();
    assert_eq!(accent(&sends[0].1), DEFAULT_PALETTE[0]);
    assert_eq!(accent(&sends[1].1), DEFAULT_PALETTE[1]);
    assert_eq!(accent(&recorder.edits()[0].2), DEFAULT_PALETTE[0]);
    assert_eq!(engine.link("book-club", "1").unwrap().accent_color, DEFAULT_PALETTE[0]);
}

#[tokio::test]
async fn bridges_sharing_a_channel_filter_independently() {
    let (engine, recorder) = engine(
        r#"
        forward_bots = true
        [bridges.a]
        channels = [
            { guild_id = "1", channel_id = "10", webhook = "91/a" },
            { guild_id = "2", channel_id = "20", webhook = "92/b" },
        ]
        [bridges.b]
        direction = "one-way"
        source_guilds = ["5"]
        channels = [
            { guild_id = "1", channel_id = "10", webhook = "96/f" },
            { guild_id = "5", channel_id = "50", webhook = "95/e" },
        ]
        "#,
    );
    assert_eq!(engine.snapshot().bridges_for_channel("10").len(), 2);

    let mut bot = message("1", "10", "1", "beep");
    bot.author.is_bot = true;
    engine.handle(RelayEvent::Created(bot)).await;

    let endpoints: Vec<_> = recorder.sends().into_iter().map(|(e, _)| e).collect();
    assert_eq!(endpoints, vec!["92"]);
    assert!(engine.link("a", "1").is_some());
    assert!(engine.link("b", "1").is_none());
}

#[tokio::test]
async fn stalled_delivery_does_not_hold_up_other_messages() {
    let (engine, recorder) = engine(BOOK_CLUB);
    let gate = recorder.hold_text("stuck");

    let stuck = engine.dispatch(RelayEvent::Created(message("1", "10", "1", "stuck")));
    assert_eq!(stuck.len(), 1);

    tokio::time::timeout(Duration::from_secs(2), async {
        engine
            .handle(RelayEvent::Created(message("2", "10", "1", "moving")))
            .await;
        engine
            .handle(RelayEvent::Created(message("3", "20", "2", "also moving")))
            .await;
    })
    .await
    .unwrap();

    let texts: Vec<_> = recorder.sends().into_iter().map(|(_, p)| p.text).collect();
    assert_eq!(texts, vec!["moving", "also moving"]);
    assert!(engine.link("book-club", "1").is_none());

    gate.add_permits(1);
    for handle in stuck {
        handle.await.unwrap();
    }
    assert!(engine.link("book-club", "1").is_some());
}

#[tokio::test]
async fn echo_from_endpoint_dropped_by_reload_is_not_relayed() {
    let (engine, recorder) = engine(&format!("forward_bots = true\n{BOOK_CLUB}"));
    engine
        .handle(RelayEvent::Created(message("1", "10", "1", "hi")))
        .await;
    assert_eq!(recorder.sends().len(), 1);

    let issues = engine.reload(&config(
        r#"
        forward_bots = true
        [bridges.book-club]
        channels = [
            { guild_id = "1", channel_id = "10", webhook = "91/a" },
            { guild_id = "2", channel_id = "20", webhook = "95/z" },
        ]
        "#,
    ));
    assert!(issues.is_empty());
    assert!(!engine.snapshot().is_delivery_identity("92"));

    // The copy posted earlier by the old endpoint shows up in channel 20.
    let mut echo = message("500", "20", "2", "hi");
    echo.author.id = "92".into();
    echo.author.is_bot = true;
    echo.webhook_id = Some("92".into());
    engine.handle(RelayEvent::Created(echo)).await;
    assert_eq!(recorder.sends().len(), 1);

    let mut other_bot = message("501", "20", "2", "beep");
    other_bot.author.is_bot = true;
    engine.handle(RelayEvent::Created(other_bot)).await;

    let sends = recorder.sends();
    assert_eq!(sends.len(), 2);
    assert_eq!(sends[1].1.text, "beep");
    assert!(engine.link("book-club", "500").is_none());
}

#[tokio::test]
async fn partial_send_failure_links_only_successes() {
    let (engine, recorder) = engine(TRIANGLE);
    recorder.fail("93", "send");

    let msg = message("1", "10", "1", "hi");
    engine.handle(RelayEvent::Created(msg.clone())).await;

    let record = engine.link("tri", "1").unwrap();
    assert_eq!(record.targets.len(), 1);
    assert!(record.targets.contains_key("20"));

    let failed: Vec<_> = engine
        .recent_relays(None)
        .into_iter()
        .filter(|r| !r.outcome.is_delivered())
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].target_channel_id, "30");
    assert_eq!(failed[0].operation, RelayOperation::Create);

    engine
        .handle(RelayEvent::Updated {
            old: None,
            new: msg,
        })
        .await;
    let edits = recorder.edits();
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].0, "92");
}

#[tokio::test]
async fn all_sends_failing_leaves_no_link() {
    let (engine, recorder) = engine(BOOK_CLUB);
    recorder.fail("92", "send");

    let msg = message("1", "10", "1", "hi");
    engine.handle(RelayEvent::Created(msg.clone())).await;
    assert!(engine.link("book-club", "1").is_none());

    engine.handle(RelayEvent::Deleted(msg)).await;
    assert!(recorder.deletes().is_empty());
}

#[tokio::test]
async fn delete_reaches_every_copy_and_drops_the_record() {
    let (engine, recorder) = engine(TRIANGLE);
    let msg = message("1", "10", "1", "bye soon");
    engine.handle(RelayEvent::Created(msg.clone())).await;
    assert_eq!(engine.link_count(), 1);

    recorder.fail("93", "delete");
    engine.handle(RelayEvent::Deleted(msg.clone())).await;

    let mut deletes = recorder.deletes();
    deletes.sort();
    assert_eq!(deletes.len(), 2);
    assert_eq!(deletes[0].0, "92");
    assert_eq!(deletes[1].0, "93");
    assert_eq!(engine.link_count(), 0);

    let reports = engine.recent_relays(Some(2));
    assert!(reports.iter().all(|r| r.operation == RelayOperation::Delete));
    assert!(
        reports
            .iter()
            .any(|r| matches!(&r.outcome, RelayOutcome::Failed { reason } if reason.contains("503")))
    );

    // A second delete has nothing left to remove.
    engine.handle(RelayEvent::Deleted(msg)).await;
    assert_eq!(recorder.deletes().len(), 2);
}

#[tokio::test]
async fn edit_of_unrelayed_message_is_ignored() {
    let (engine, recorder) = engine(BOOK_CLUB);
    engine
        .handle(RelayEvent::Updated {
            old: None,
            new: message("404", "10", "1", "late edit"),
        })
        .await;
    assert!(recorder.calls().is_empty());
    assert_eq!(engine.link_count(), 0);
}

#[tokio::test]
async fn edit_racing_create_is_applied_after_it() {
    let (engine, recorder) = engine(BOOK_CLUB);
    let gate = recorder.gate_sends();

    let msg = message("1", "10", "1", "first draft");
    let mut handles = engine.dispatch(RelayEvent::Created(msg.clone()));
    handles.extend(engine.dispatch(RelayEvent::Updated {
        old: None,
        new: SourceMessage {
            content: "final draft".into(),
            ..msg
        },
    }));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(recorder.calls().is_empty());
    gate.add_permits(8);

    for handle in handles {
        handle.await.unwrap();
    }

    let calls = recorder.calls();
    assert_eq!(calls.len(), 2);
    assert!(matches!(&calls[0], Call::Send { .. }));
    assert!(matches!(&calls[1], Call::Edit { message_id, payload, .. }
        if message_id == "92-0" && payload.text == "final draft"));
}

#[tokio::test]
async fn reload_changes_what_is_relayed() {
    let (engine, recorder) = engine("");
    let msg = message("1", "10", "1", "hi");
    assert!(engine.dispatch(RelayEvent::Created(msg.clone())).is_empty());

    let issues = engine.reload(&config(BOOK_CLUB));
    assert!(issues.is_empty());
    assert_eq!(engine.snapshot().active_count(), 1);

    engine.handle(RelayEvent::Created(msg)).await;
    assert_eq!(recorder.sends().len(), 1);

    let issues = engine.reload(&config(
        r#"
        [bridges.book-club]
        channels = [
            { guild_id = "1", channel_id = "10", webhook = "91/a" },
            { guild_id = "2", webhook = "92/b" },
        ]
        "#,
    ));
    assert_eq!(issues.len(), 1);
    assert_eq!(engine.snapshot().active_count(), 0);
}

#[tokio::test]
async fn ledger_capacity_follows_configuration() {
    let (engine, _recorder) = engine(&format!("ledger_capacity = 2\n{TRIANGLE}"));
    for id in ["1", "2"] {
        engine
            .handle(RelayEvent::Created(message(id, "10", "1", "x")))
            .await;
    }
    let reports = engine.recent_relays(None);
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.origin_message_id == "2"));
    assert!(reports.iter().all(|r| r.bridge_name == "tri"));
}

#[tokio::test]
async fn run_pumps_events_until_source_closes() {
    let (engine, recorder) = engine("");
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (config_tx, config_rx) = watch::channel(RelayConfig::default());
    let cancel = CancellationToken::new();

    let pump = tokio::spawn({
        let engine = engine.clone();
        let cancel = cancel.clone();
        async move { engine.run(events_rx, config_rx, cancel).await }
    });

    config_tx.send(config(BOOK_CLUB)).unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while engine.snapshot().active_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    events_tx
        .send(RelayEvent::Created(message("1", "10", "1", "via pump")))
        .unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while recorder.sends().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(recorder.calls()[0].endpoint(), "92");

    drop(events_tx);
    tokio::time::timeout(Duration::from_secs(2), pump)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn run_stops_on_cancel() {
    let (engine, _recorder) = engine(BOOK_CLUB);
    let (_events_tx, events_rx) = mpsc::channel::<RelayEvent>(1);
    let (_config_tx, config_rx) = watch::channel(RelayConfig::default());
    let cancel = CancellationToken::new();

    let pump = tokio::spawn({
        let engine = engine.clone();
        let cancel = cancel.clone();
        async move { engine.run(events_rx, config_rx, cancel).await }
    });
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), pump)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(engine.snapshot().active_count(), 1);
}
