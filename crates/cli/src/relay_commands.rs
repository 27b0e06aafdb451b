use std::{path::{Path, PathBuf}, sync::Arc};

use {
    anyhow::Result,
    rainbow_bridge::{RelayEngine, RelayEvent, WebhookFactory},
    rainbow_config::{RelayConfig, watcher::ConfigWatcher},
    tokio::{
        io::{AsyncBufRead, AsyncBufReadExt, BufReader},
        sync::{mpsc, watch},
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

/// Events buffered between the stdin reader and the engine.
const EVENT_BUFFER: usize = 256;

pub async fn relay(config_path: Option<&Path>, watch_file: bool) -> Result<()> {
    let (path, config) = crate::load(config_path)?;

    // The base URL is fixed for the life of the process; reloads only change
    // bridges and settings.
    let factory = Arc::new(WebhookFactory::new(config.api_base_url.clone()));
    let engine = RelayEngine::new(&config, factory);
    let snapshot = engine.snapshot();
    info!(
        active = snapshot.active_count(),
        inert = snapshot.inert_count(),
        "bridges loaded"
    );

    let cancel = CancellationToken::new();
    let (config_tx, config_rx) = watch::channel(config);
    let _watcher = match path.filter(|_| watch_file) {
        Some(path) => Some(spawn_reloader(path, config_tx, cancel.clone())?),
        None => None,
    };

    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(forward_events(BufReader::new(tokio::io::stdin()), events_tx));
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, finishing in-flight relays");
                cancel.cancel();
            }
        }
    });

    engine.run(events_rx, config_rx, cancel).await;
    info!(links = engine.link_count(), "relay stopped");
    Ok(())
}

/// Reload the file on every change and publish the result to the engine.
/// A file that fails to load leaves the current bridges in place.
fn spawn_reloader(
    path: PathBuf,
    config_tx: watch::Sender<RelayConfig>,
    cancel: CancellationToken,
) -> Result<ConfigWatcher> {
    let (watcher, mut changes) = ConfigWatcher::start(&path)?;
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                change = changes.recv() => {
                    let Some(change) = change else { break };
                    match rainbow_config::load_config(&change.path) {
                        Ok(config) => {
                            info!(path = %change.path.display(), "reloading relay config");
                            if config_tx.send(config).is_err() {
                                break;
                            }
                        },
                        Err(e) => warn!(
                            path = %change.path.display(),
                            error = %e,
                            "config reload failed, keeping current bridges"
                        ),
                    }
                },
            }
        }
    });
    Ok(watcher)
}

/// Parse one event per line. Blank lines are ignored and malformed ones are
/// logged and skipped.
async fn forward_events<R: AsyncBufRead + Unpin>(reader: R, tx: mpsc::Sender<RelayEvent>) {
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<RelayEvent>(line) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    },
                    Err(e) => warn!(error = %e, "skipping malformed event line"),
                }
            },
            Ok(None) => {
                debug!("input closed");
                break;
            },
            Err(e) => {
                warn!(error = %e, "failed to read events");
                break;
            },
        }
    }
}
