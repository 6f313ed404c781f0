//! Persistent newest-first transfer queue.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cleanup::CleanupScheduler;
use crate::error::TransferError;
use crate::storage::ShareStorage;
use crate::types::{QueueConfig, QueueStats, TransferItem, TransferStatus};

const MAX_ATTEMPTS: u32 = 3;
const DISPATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Heap entry ordered by timestamp, newest first, so the live tail is
/// mirrored before any backlog.
struct QueuedItem(TransferItem);

impl PartialEq for QueuedItem {
    fn eq(&self, other: &Self) -> bool {
        self.0.timestamp == other.0.timestamp && self.0.id == other.0.id
    }
}

impl Eq for QueuedItem {}

impl PartialOrd for QueuedItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .timestamp
            .cmp(&other.0.timestamp)
            .then_with(|| self.0.id.cmp(&other.0.id))
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedState {
    items: Vec<TransferItem>,
    #[serde(default)]
    stats: Option<QueueStats>,
    timestamp: DateTime<Utc>,
}

pub struct TransferQueue {
    config: QueueConfig,
    heap: Mutex<BinaryHeap<QueuedItem>>,
    stats: Mutex<QueueStats>,
    storage: Arc<ShareStorage>,
    cleanup: Arc<CleanupScheduler>,
}

impl TransferQueue {
    /// Creates the queue and restores any persisted state from a previous
    /// run. Restore failures are logged and start from empty.
    pub fn new(
        config: QueueConfig,
        storage: Arc<ShareStorage>,
        cleanup: Arc<CleanupScheduler>,
    ) -> Arc<Self> {
        let queue = Arc::new(Self {
            config,
            heap: Mutex::new(BinaryHeap::new()),
            stats: Mutex::new(QueueStats::default()),
            storage,
            cleanup,
        });
        if let Err(err) = queue.load_state() {
            warn!(%err, "failed to load queue state");
        }
        queue
    }

    /// Enqueues one item; fails when the queue is at capacity.
    pub fn add(&self, item: TransferItem) -> Result<(), TransferError> {
        let mut heap = self.heap.lock();
        if heap.len() >= self.config.max_queue_size {
            return Err(TransferError::QueueFull {
                max: self.config.max_queue_size,
            });
        }
        info!(path = %item.source_path.display(), "queued file for transfer");
        heap.push(QueuedItem(item));
        drop(heap);

        self.stats.lock().record_added();
        Ok(())
    }

    /// Runs workers and the dispatcher until cancellation, then saves state.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        let mut workers = JoinSet::new();
        let mut worker_txs = Vec::with_capacity(self.config.worker_count);

        for worker_id in 0..self.config.worker_count {
            let (tx, mut rx) = mpsc::channel::<TransferItem>(1);
            worker_txs.push(tx);
            let queue = self.clone();
            let worker_token = token.clone();
            workers.spawn(async move {
                info!(worker_id, "transfer worker started");
                loop {
                    tokio::select! {
                        _ = worker_token.cancelled() => {
                            info!(worker_id, "transfer worker shutting down");
                            return;
                        }
                        item = rx.recv() => match item {
                            Some(item) => queue.process_item(&worker_token, item).await,
                            None => return,
                        }
                    }
                }
            });
        }

        let mut ticker = tokio::time::interval(DISPATCH_INTERVAL);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("transfer queue shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.dispatch(&worker_txs);
                    // Wall-clock probe: saves land on second-of-minute
                    // multiples of 30.
                    if Utc::now().timestamp() % 30 == 0
                        && let Err(err) = self.save_state()
                    {
                        warn!(%err, "failed to save queue state");
                    }
                }
            }
        }

        drop(worker_txs);
        while workers.join_next().await.is_some() {}
    }

    /// Hands at most one item to each idle worker. A momentarily blocked
    /// worker channel pushes the item back as Pending.
    fn dispatch(&self, workers: &[mpsc::Sender<TransferItem>]) {
        let mut heap = self.heap.lock();
        for (worker_id, tx) in workers.iter().enumerate() {
            let Some(QueuedItem(mut item)) = heap.pop() else {
                return;
            };
            item.status = TransferStatus::InProgress;
            match tx.try_send(item) {
                Ok(()) => debug!(worker_id, "dispatched transfer item"),
                Err(TrySendError::Full(mut item)) | Err(TrySendError::Closed(mut item)) => {
                    item.status = TransferStatus::Pending;
                    heap.push(QueuedItem(item));
                }
            }
        }
    }

    async fn process_item(&self, token: &CancellationToken, mut item: TransferItem) {
        // A destination already present at the expected size counts as
        // transferred; skip the copy and go straight to cleanup.
        match self
            .storage
            .file_exists(&item.destination_path, item.file_size)
            .await
        {
            Ok(true) => {
                info!(path = %item.source_path.display(), "file already on remote storage, skipping transfer");
                self.complete(item);
                return;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(path = %item.source_path.display(), %err, "failed to check remote file, attempting transfer");
            }
        }

        for attempt in 1..=MAX_ATTEMPTS {
            // The quadratic backoff runs before every attempt, the first one
            // included.
            item.status = TransferStatus::Retrying;
            let backoff = Duration::from_secs(u64::from(attempt * attempt));
            debug!(
                path = %item.source_path.display(),
                attempt,
                ?backoff,
                "backing off before transfer attempt"
            );
            tokio::select! {
                _ = token.cancelled() => {
                    // Put the item back so nothing is lost across shutdown.
                    item.status = TransferStatus::Pending;
                    self.requeue(item);
                    return;
                }
                _ = tokio::time::sleep(backoff) => {}
            }

            let outcome = tokio::time::timeout(
                self.config.storage_timeout,
                self.storage.transfer(token, &item),
            )
            .await;

            let err = match outcome {
                Ok(Ok(())) => {
                    info!(path = %item.source_path.display(), "file transfer completed");
                    self.complete(item);
                    return;
                }
                Ok(Err(err)) => err,
                Err(_) => TransferError::Timeout {
                    after: self.config.storage_timeout,
                },
            };

            item.last_error = err.to_string();
            item.retry_count += 1;
            warn!(
                path = %item.source_path.display(),
                attempt,
                max_attempts = MAX_ATTEMPTS,
                %err,
                "file transfer failed"
            );
        }

        item.status = TransferStatus::Failed;
        self.stats.lock().record_failed();
        error!(path = %item.source_path.display(), "transfer permanently failed");
    }

    fn complete(&self, mut item: TransferItem) {
        item.status = TransferStatus::Completed;
        self.stats.lock().record_completed(item.file_size);
        self.cleanup.schedule(item.source_path);
    }

    /// Returns an item to the heap without touching the counters; it was
    /// already accounted for when first added.
    fn requeue(&self, item: TransferItem) {
        self.heap.lock().push(QueuedItem(item));
    }

    /// Serialises all non-terminal items plus statistics, atomically
    /// replacing the state file so it is valid JSON at every instant.
    pub fn save_state(&self) -> Result<(), TransferError> {
        let items: Vec<TransferItem> = {
            let heap = self.heap.lock();
            let mut items: Vec<TransferItem> = heap
                .iter()
                .filter(|entry| !entry.0.status.is_terminal())
                .map(|entry| entry.0.clone())
                .collect();
            items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            items
        };
        let stats = self.stats.lock().clone();

        let state = PersistedState {
            items,
            stats: Some(stats),
            timestamp: Utc::now(),
        };
        let doc = serde_json::to_vec_pretty(&state)?;

        let path = &self.config.persistence_path;
        let tmp = tmp_path(path);
        std::fs::write(&tmp, doc)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn load_state(&self) -> Result<(), TransferError> {
        let data = match std::fs::read(&self.config.persistence_path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let state: PersistedState = serde_json::from_slice(&data)?;

        let mut restored = 0usize;
        {
            let mut heap = self.heap.lock();
            for mut item in state.items {
                // Failed runs are resumable; anything mid-flight when the
                // snapshot was taken starts over.
                if item.status == TransferStatus::Completed {
                    continue;
                }
                item.status = TransferStatus::Pending;
                heap.push(QueuedItem(item));
                restored += 1;
            }
        }
        if let Some(stats) = state.stats {
            *self.stats.lock() = stats;
        }

        info!(
            restored,
            snapshot = %state.timestamp.to_rfc3339(),
            "loaded queue state"
        );
        Ok(())
    }

    pub fn stats_snapshot(&self) -> QueueStats {
        self.stats.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }
}

fn tmp_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CleanupConfig, StorageConfig};
    use std::path::PathBuf;

    fn item(id: &str, secs: i64) -> TransferItem {
        TransferItem {
            id: id.to_string(),
            source_path: PathBuf::from(format!("/data/event/1080p/{id}.ts")),
            destination_path: PathBuf::from(format!("event/1080p/{id}.ts")),
            resolution: "1080p".to_string(),
            timestamp: DateTime::from_timestamp(secs, 0).unwrap(),
            retry_count: 0,
            status: TransferStatus::Pending,
            file_size: 188,
            last_error: String::new(),
        }
    }

    fn queue_fixture(dir: &Path, max_queue_size: usize) -> Arc<TransferQueue> {
        let storage = Arc::new(ShareStorage::new(StorageConfig {
            root: dir.join("remote"),
            username: String::new(),
            password: String::new(),
            verify_size: true,
        }));
        let cleanup = Arc::new(CleanupScheduler::new(CleanupConfig {
            enabled: true,
            retention_period: Duration::ZERO,
            batch_size: 1000,
            check_interval: Duration::from_secs(5),
        }));
        TransferQueue::new(
            QueueConfig {
                worker_count: 2,
                persistence_path: dir.join("transfer_queue.json"),
                max_queue_size,
                storage_timeout: Duration::from_secs(30),
            },
            storage,
            cleanup,
        )
    }

    #[test]
    fn newest_item_pops_first() {
        let mut heap = BinaryHeap::new();
        heap.push(QueuedItem(item("old", 100)));
        heap.push(QueuedItem(item("newest", 300)));
        heap.push(QueuedItem(item("mid", 200)));

        let order: Vec<String> = std::iter::from_fn(|| heap.pop().map(|q| q.0.id)).collect();
        assert_eq!(order, vec!["newest", "mid", "old"]);
    }

    #[tokio::test]
    async fn add_fails_when_full() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let queue = queue_fixture(dir.path(), 2);
        queue.add(item("a", 1)).unwrap();
        queue.add(item("b", 2)).unwrap();
        let err = queue.add(item("c", 3)).unwrap_err();
        assert!(matches!(err, TransferError::QueueFull { max: 2 }));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn state_round_trips_non_terminal_items() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let queue = queue_fixture(dir.path(), 100);
        queue.add(item("a", 10)).unwrap();
        queue.add(item("b", 20)).unwrap();
        queue.save_state().unwrap();

        // A fresh queue over the same state file restores both items.
        let restored = queue_fixture(dir.path(), 100);
        assert_eq!(restored.len(), 2);
        let stats = restored.stats_snapshot();
        assert_eq!(stats.total_added, 2);
        assert_eq!(stats.current_pending, 2);
    }

    #[tokio::test]
    async fn failed_and_in_flight_snapshot_entries_restore_as_pending() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("transfer_queue.json");

        let mut failed = item("failed", 10);
        failed.status = TransferStatus::Failed;
        let mut in_progress = item("inprogress", 20);
        in_progress.status = TransferStatus::InProgress;
        let mut retrying = item("retrying", 30);
        retrying.status = TransferStatus::Retrying;
        let mut completed = item("completed", 40);
        completed.status = TransferStatus::Completed;

        let state = PersistedState {
            items: vec![failed, in_progress, retrying, completed],
            stats: None,
            timestamp: Utc::now(),
        };
        std::fs::write(&path, serde_json::to_vec_pretty(&state).unwrap()).unwrap();

        let queue = queue_fixture(dir.path(), 100);
        assert_eq!(queue.len(), 3);
        let statuses: Vec<TransferStatus> = {
            let heap = queue.heap.lock();
            heap.iter().map(|q| q.0.status).collect()
        };
        assert!(statuses.iter().all(|s| *s == TransferStatus::Pending));
    }

    #[tokio::test]
    async fn remote_copy_is_skipped_and_cleanup_scheduled() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let queue = queue_fixture(dir.path(), 100);

        // Pre-place the destination at the expected size.
        let remote = dir.path().join("remote/event/1080p");
        tokio::fs::create_dir_all(&remote).await.unwrap();
        tokio::fs::write(remote.join("seg.ts"), vec![0u8; 188])
            .await
            .unwrap();

        let mut existing = item("seg", 50);
        existing.destination_path = "event/1080p/seg.ts".into();
        queue.add(existing.clone()).unwrap();

        let token = CancellationToken::new();
        queue.process_item(&token, existing).await;

        let stats = queue.stats_snapshot();
        assert_eq!(stats.total_completed, 1);
        assert_eq!(stats.bytes_transferred, 188);
        assert_eq!(queue.cleanup.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn three_failed_attempts_mark_the_item_failed() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let queue = queue_fixture(dir.path(), 100);

        // Source file never exists, so every copy attempt fails with I/O.
        let doomed = item("missing", 60);
        queue.add(doomed.clone()).unwrap();

        let token = CancellationToken::new();
        queue.process_item(&token, doomed).await;

        let stats = queue.stats_snapshot();
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.total_completed, 0);
        // Nothing reaches cleanup on failure.
        assert_eq!(queue.cleanup.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_requeues_as_pending() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let queue = queue_fixture(dir.path(), 100);

        let doomed = item("interrupted", 70);
        queue.add(doomed.clone()).unwrap();
        // Simulate a dispatcher pop.
        let QueuedItem(mut popped) = queue.heap.lock().pop().unwrap();
        popped.status = TransferStatus::InProgress;

        let token = CancellationToken::new();
        token.cancel();
        queue.process_item(&token, popped).await;

        assert_eq!(queue.len(), 1);
        let status = queue.heap.lock().peek().map(|q| q.0.status).unwrap();
        assert_eq!(status, TransferStatus::Pending);
    }
}
