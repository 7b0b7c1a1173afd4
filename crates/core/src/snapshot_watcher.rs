//! Hot reload of the correlation snapshot file.

use crate::correlation::CorrelationSnapshot;
use anyhow::Result;
use notify::{Event, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

pub type SnapshotReceiver = watch::Receiver<Option<Arc<CorrelationSnapshot>>>;

/// Publishes correlation snapshots read from a JSON file.
///
/// A file that fails to parse is logged and skipped: subscribers keep the
/// previous snapshot, whose age then governs how far it is trusted.
pub struct CorrelationWatcher {
    tx: watch::Sender<Option<Arc<CorrelationSnapshot>>>,
    path: PathBuf,
}

impl CorrelationWatcher {
    /// Creates a watcher for `path` and a receiver for snapshot updates.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> (Self, SnapshotReceiver) {
        let (tx, rx) = watch::channel(None);
        (
            Self {
                tx,
                path: path.into(),
            },
            rx,
        )
    }

    /// Reads the file once and publishes it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn reload(&self) -> Result<()> {
        publish(&self.tx, &self.path)
    }

    /// Watches the file for changes and publishes every successful reload.
    ///
    /// # Errors
    ///
    /// Returns an error if file watching cannot be initiated or if the watcher task fails.
    pub async fn watch(&self) -> Result<()> {
        let tx = self.tx.clone();
        let path = self.path.clone();

        tokio::task::spawn_blocking(move || {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            let mut watcher = notify::recommended_watcher(move |res: Result<Event, _>| {
                if let Ok(event) = res {
                    let _ = notify_tx.send(event);
                }
            })?;

            watcher.watch(Path::new(&path), RecursiveMode::NonRecursive)?;

            for event in notify_rx {
                if event.kind.is_modify() || event.kind.is_create() {
                    tracing::info!(path = %path.display(), "correlation snapshot changed, reloading");
                    if let Err(e) = publish(&tx, &path) {
                        tracing::error!(error = %e, "failed to reload correlation snapshot");
                    }
                }
            }

            Ok::<_, anyhow::Error>(())
        })
        .await??;

        Ok(())
    }
}

fn publish(tx: &watch::Sender<Option<Arc<CorrelationSnapshot>>>, path: &Path) -> Result<()> {
    let snapshot = CorrelationSnapshot::load(path)?;
    tracing::info!(as_of = %snapshot.as_of(), "correlation snapshot published");
    tx.send_replace(Some(Arc::new(snapshot)));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn reload_publishes_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("correlations.json");
        let snapshot = CorrelationSnapshot::new(Utc::now()).with_correlation("ES", "NQ", 0.9);
        std::fs::write(&path, serde_json::to_string(&snapshot).unwrap()).unwrap();

        let (watcher, rx) = CorrelationWatcher::new(&path);
        assert!(rx.borrow().is_none());

        watcher.reload().unwrap();
        let published = rx.borrow().clone().unwrap();
        assert_eq!(published.correlation("NQ", "ES"), Some(0.9));
    }

    #[test]
    fn bad_file_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("correlations.json");
        let snapshot = CorrelationSnapshot::new(Utc::now());
        std::fs::write(&path, serde_json::to_string(&snapshot).unwrap()).unwrap();

        let (watcher, rx) = CorrelationWatcher::new(&path);
        watcher.reload().unwrap();

        std::fs::write(&path, "{ not json").unwrap();
        assert!(watcher.reload().is_err());
        assert!(rx.borrow().is_some());
    }
}
