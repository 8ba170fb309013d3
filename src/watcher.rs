//! Episode directory watching
//!
//! Watches the episode directory and triggers a feed resync whenever its
//! contents change, so externally dropped or deleted files are picked up
//! without waiting for the next recording. Events are coalesced: a burst of
//! changes (a finished recording writes the audio file and its sidecar back
//! to back) produces a single rebuild.

use notify::event::{Event, EventKind, ModifyKind};
use notify::{RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::podcast::Podcaster;

/// Quiet period after the first event before rebuilding
const SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Keeps the episode directory watched for as long as it is held
///
/// Dropping the watcher stops both the filesystem subscription and the
/// resync task.
pub struct OutputWatcher {
    _watcher: notify::RecommendedWatcher,
    task: JoinHandle<()>,
}

impl OutputWatcher {
    /// Watch `dir` and resync `podcaster` on relevant changes
    pub fn spawn(podcaster: Arc<Podcaster>, dir: &Path) -> Result<Self> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Event>();

        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if is_relevant(&event) {
                        let _ = tx.send(event);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "filesystem watch error");
                }
            })
            .map_err(|e| Error::Watch(e.to_string()))?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| Error::Watch(e.to_string()))?;
        tracing::info!(dir = %dir.display(), "watching episode directory");

        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // Let the burst finish, then drain whatever queued up so the
                // whole burst costs one rebuild
                tokio::time::sleep(SETTLE_DELAY).await;
                while rx.try_recv().is_ok() {}

                let podcaster = podcaster.clone();
                let result = tokio::task::spawn_blocking(move || podcaster.sync()).await;
                match result {
                    Ok(Ok(stats)) => {
                        tracing::debug!(
                            episodes = stats.episodes,
                            feeds = stats.feeds,
                            "feeds resynced after directory change"
                        );
                    }
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, "feed resync failed");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "feed resync task panicked");
                    }
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for OutputWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Whether an event can change feed content
///
/// Pure metadata changes (permissions, timestamps) and access events cannot,
/// so they never cost a rebuild.
fn is_relevant(event: &Event) -> bool {
    match &event.kind {
        EventKind::Create(_) | EventKind::Remove(_) => true,
        EventKind::Modify(kind) => !matches!(kind, ModifyKind::Metadata(_)),
        _ => false,
    }
}
