//! Trigger sources: metadata directory changes and a periodic resync tick.
//!
//! Triggers go into a bounded(1) channel with `try_send`, so a burst while a
//! cycle is running collapses into one pending trigger.

use std::path::PathBuf;
use std::time::Duration;

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::AgentError;

/// Why a cycle was requested. Informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    MetadataChanged,
    Periodic,
}

/// Capacity of the trigger channel. One pending trigger is enough.
pub const TRIGGER_CAPACITY: usize = 1;

pub fn trigger_channel() -> (mpsc::Sender<Trigger>, mpsc::Receiver<Trigger>) {
    mpsc::channel(TRIGGER_CAPACITY)
}

#[derive(Debug, Clone)]
pub struct TriggerWatcher {
    metadata_dir: PathBuf,
    sync_period: Duration,
    debounce: Duration,
}

impl TriggerWatcher {
    pub fn new(metadata_dir: impl Into<PathBuf>, sync_period: Duration, debounce: Duration) -> Self {
        Self {
            metadata_dir: metadata_dir.into(),
            sync_period,
            debounce,
        }
    }

    /// Run until shutdown or until the receiving side goes away.
    ///
    /// If the metadata directory cannot be watched, only the periodic tick
    /// fires.
    pub async fn run(
        self,
        tx: mpsc::Sender<Trigger>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), AgentError> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
        // Keeps `event_rx` open even when the watcher could not be created.
        let _event_tx = event_tx.clone();
        let _watcher = match self.watch(event_tx) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                tracing::warn!(
                    path = %self.metadata_dir.display(),
                    error = %err,
                    "cannot watch metadata, relying on periodic resync",
                );
                None
            }
        };

        // The first tick of an interval is immediate; the agent has just
        // synced, so start one period out.
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.sync_period, self.sync_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut pending: Option<Instant> = None;

        loop {
            let deadline = pending;
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    if !send(&tx, Trigger::Periodic) {
                        break;
                    }
                }
                _ = sleep_until_some(deadline) => {
                    pending = None;
                    if !send(&tx, Trigger::MetadataChanged) {
                        break;
                    }
                }
                event = event_rx.recv() => {
                    match event {
                        Some(Ok(event)) if is_relevant_event_kind(&event.kind) => {
                            pending = Some(Instant::now() + self.debounce);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => tracing::warn!(error = %err, "watcher event error"),
                        None => break,
                    }
                }
            }
        }
        Ok(())
    }

    fn watch(
        &self,
        event_tx: mpsc::UnboundedSender<notify::Result<Event>>,
    ) -> Result<RecommendedWatcher, AgentError> {
        let mut watcher = recommended_watcher(move |event| {
            let _ = event_tx.send(event);
        })?;
        watcher.watch(&self.metadata_dir, RecursiveMode::Recursive)?;
        tracing::debug!(path = %self.metadata_dir.display(), "watching metadata directory");
        Ok(watcher)
    }
}

/// Returns false once the receiver is gone.
fn send(tx: &mpsc::Sender<Trigger>, trigger: Trigger) -> bool {
    match tx.try_send(trigger) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            tracing::debug!(?trigger, "trigger already pending, coalesced");
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn full_channel_coalesces() {
        let (tx, mut rx) = trigger_channel();
        assert!(send(&tx, Trigger::Periodic));
        assert!(send(&tx, Trigger::MetadataChanged));
        assert_eq!(rx.recv().await, Some(Trigger::Periodic));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_channel_stops_sender() {
        let (tx, rx) = trigger_channel();
        drop(rx);
        assert!(!send(&tx, Trigger::Periodic));
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_tick_after_one_period() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = trigger_channel();
        let (shutdown_tx, _) = broadcast::channel(1);
        let watcher = TriggerWatcher::new(
            dir.path().join("absent"),
            Duration::from_secs(30),
            Duration::from_millis(500),
        );
        let handle = tokio::spawn(watcher.run(tx, shutdown_tx.subscribe()));

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.recv().await, Some(Trigger::Periodic));

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn metadata_change_triggers_after_debounce() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = trigger_channel();
        let (shutdown_tx, _) = broadcast::channel(1);
        let watcher = TriggerWatcher::new(
            dir.path(),
            Duration::from_secs(3600),
            Duration::from_millis(50),
        );
        let handle = tokio::spawn(watcher.run(tx, shutdown_tx.subscribe()));

        // Give the watcher a moment to register before writing.
        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(dir.path().join("commit"), "abc").unwrap();

        let trigger = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("trigger within timeout");
        assert_eq!(trigger, Some(Trigger::MetadataChanged));

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
    }
}
