//! Debounced watcher for the relay config file.
//!
//! Emits [`ConfigChanged`] whenever the file is written, replaced or removed so
//! the host can reload it and hand the result to the relay engine.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use {
    notify_debouncer_full::{
        DebounceEventResult, Debouncer, RecommendedCache, new_debouncer,
        notify::{EventKind, RecommendedWatcher, RecursiveMode},
    },
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use crate::error::{Context, Result};

/// Signal that the watched config file changed on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigChanged {
    pub path: PathBuf,
}

/// Keeps the underlying debouncer alive; dropping it stops notifications.
pub struct ConfigWatcher {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
}

impl ConfigWatcher {
    /// Watch `path` for changes.
    ///
    /// The parent directory is watched (non-recursively) because editors often
    /// replace files via rename, which a file-level watch would miss.
    pub fn start(path: &Path) -> Result<(Self, mpsc::UnboundedReceiver<ConfigChanged>)> {
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .with_context(|| format!("config path has no file name: {}", path.display()))?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let target = path.to_path_buf();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut debouncer = new_debouncer(
            Duration::from_millis(300),
            None,
            move |result: DebounceEventResult| match result {
                Ok(events) => {
                    let touched = events.iter().any(|event| {
                        matches!(
                            event.kind,
                            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                        ) && event
                            .paths
                            .iter()
                            .any(|p| p.file_name() == Some(file_name.as_os_str()))
                    });
                    if touched {
                        debug!(path = %target.display(), "relay config changed");
                        let _ = tx.send(ConfigChanged {
                            path: target.clone(),
                        });
                    }
                },
                Err(errors) => {
                    for e in errors {
                        warn!(error = %e, "relay config watcher error");
                    }
                },
            },
        )?;

        debouncer.watch(&dir, RecursiveMode::NonRecursive)?;
        info!(path = %path.display(), "watching relay config");

        Ok((
            Self {
                _debouncer: debouncer,
            },
            rx,
        ))
    }
}
