//! Best-effort `last_retrieved` stamping on a background task

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::store::GuidanceStore;

enum Message {
    Track { ids: Vec<String>, at: DateTime<Utc> },
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Update counters since start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub updated: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct Counters {
    updated: AtomicUsize,
    failed: AtomicUsize,
}

/// Handle to the tracking worker
///
/// `track` never waits on the store; the worker issues one update per
/// record, concurrently within a batch, and logs failures.
pub struct RetrievalTracker {
    sender: mpsc::UnboundedSender<Message>,
    counters: Arc<Counters>,
}

impl RetrievalTracker {
    /// Spawn the worker on the current tokio runtime
    pub fn spawn(store: Arc<dyn GuidanceStore>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        tokio::spawn(run_worker(store, receiver, counters.clone()));
        Self { sender, counters }
    }

    /// Queue `ids` for stamping with `at`
    pub fn track(&self, ids: Vec<String>, at: DateTime<Utc>) {
        if ids.is_empty() {
            return;
        }
        if self.sender.send(Message::Track { ids, at }).is_err() {
            debug!("Retrieval tracker stopped, dropping update");
        }
    }

    /// Wait until everything queued so far has been written
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(Message::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Drain the queue and stop the worker
    pub async fn shutdown(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(Message::Shutdown(done)).is_ok() {
            let _ = wait.await;
        }
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            updated: self.counters.updated.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }
}

async fn run_worker(
    store: Arc<dyn GuidanceStore>,
    mut receiver: mpsc::UnboundedReceiver<Message>,
    counters: Arc<Counters>,
) {
    while let Some(message) = receiver.recv().await {
        match message {
            Message::Track { ids, at } => apply(store.as_ref(), &ids, at, &counters).await,
            Message::Flush(done) => {
                let _ = done.send(());
            }
            Message::Shutdown(done) => {
                receiver.close();
                // Anything that raced in before the close still runs
                while let Ok(message) = receiver.try_recv() {
                    match message {
                        Message::Track { ids, at } => apply(store.as_ref(), &ids, at, &counters).await,
                        Message::Flush(waiter) | Message::Shutdown(waiter) => {
                            let _ = waiter.send(());
                        }
                    }
                }
                let _ = done.send(());
                break;
            }
        }
    }
    debug!("Retrieval tracker stopped");
}

async fn apply(store: &dyn GuidanceStore, ids: &[String], at: DateTime<Utc>, counters: &Counters) {
    let updates = ids
        .iter()
        .map(|id| async move { (id, store.mark_retrieved(id, at).await) });

    for (id, result) in join_all(updates).await {
        match result {
            Ok(()) => {
                counters.updated.fetch_add(1, Ordering::SeqCst);
                debug!("Updated retrieval time for {}", id);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                warn!("Failed to update retrieval time for {}: {}", id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::GuidanceRecord;

    fn store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::with_records(vec![
            GuidanceRecord::new("1", "A", "t", "g"),
            GuidanceRecord::new("2", "B", "t", "g"),
        ]))
    }

    #[tokio::test]
    async fn test_track_stamps_records() {
        let store = store();
        let tracker = RetrievalTracker::spawn(store.clone());
        let at = Utc::now();

        tracker.track(vec!["1".into(), "2".into()], at);
        tracker.flush().await;

        assert_eq!(store.get("1").await.unwrap().last_retrieved, Some(at));
        assert_eq!(store.get("2").await.unwrap().last_retrieved, Some(at));
        assert_eq!(tracker.stats(), TrackerStats { updated: 2, failed: 0 });
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let store = store();
        let tracker = RetrievalTracker::spawn(store.clone());

        tracker.track(vec!["missing".into(), "2".into()], Utc::now());
        tracker.flush().await;

        assert!(store.get("2").await.unwrap().last_retrieved.is_some());
        assert_eq!(tracker.stats(), TrackerStats { updated: 1, failed: 1 });
    }

    #[tokio::test]
    async fn test_shutdown_stops_worker() {
        let store = store();
        let tracker = RetrievalTracker::spawn(store.clone());

        tracker.track(vec!["1".into()], Utc::now());
        tracker.shutdown().await;
        assert!(store.get("1").await.unwrap().last_retrieved.is_some());

        // After shutdown tracking is a no-op
        tracker.track(vec!["2".into()], Utc::now());
        tracker.flush().await;
        assert!(store.get("2").await.unwrap().last_retrieved.is_none());
    }
}
