//! Recursive filesystem watcher feeding the transfer queue.
//!
//! Segment files are written incrementally, so every create/write (re)arms a
//! settling timer; only a file that has stayed quiet for the full delay is
//! turned into a transfer item.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TransferError;
use crate::queue::TransferQueue;
use crate::types::{TransferItem, TransferStatus};

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

pub struct FileWatcher {
    root: PathBuf,
    queue: Arc<TransferQueue>,
    settling_delay: Duration,
    pending: Arc<Mutex<FxHashMap<PathBuf, PendingTimer>>>,
    generation: Arc<Mutex<u64>>,
}

impl FileWatcher {
    pub fn new(root: PathBuf, queue: Arc<TransferQueue>, settling_delay: Duration) -> Self {
        Self {
            root,
            queue,
            settling_delay,
            pending: Arc::new(Mutex::new(FxHashMap::default())),
            generation: Arc::new(Mutex::new(0)),
        }
    }

    /// Watches the output root until cancellation. New subdirectories are
    /// covered by the recursive watch.
    pub async fn run(&self, token: CancellationToken) -> Result<(), TransferError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event| {
            let _ = tx.send(event);
        })?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;

        info!(root = %self.root.display(), "starting file watcher");

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("file watcher shutting down");
                    break;
                }
                event = rx.recv() => match event {
                    Some(Ok(event)) => self.handle_event(event),
                    Some(Err(err)) => warn!(%err, "watcher error"),
                    None => {
                        return Err(TransferError::storage("watch event channel closed"));
                    }
                }
            }
        }

        for (_, timer) in self.pending.lock().drain() {
            timer.handle.abort();
        }
        Ok(())
    }

    fn handle_event(&self, event: Event) {
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) => {
                for path in event.paths {
                    if is_ts_file(&path) {
                        self.arm_timer(path);
                    }
                }
            }
            EventKind::Remove(_) => {
                for path in event.paths {
                    if is_ts_file(&path) {
                        self.cancel_timer(&path);
                    }
                }
            }
            _ => {}
        }
    }

    fn arm_timer(&self, path: PathBuf) {
        let generation = {
            let mut counter = self.generation.lock();
            *counter += 1;
            *counter
        };

        let mut pending = self.pending.lock();
        if let Some(previous) = pending.remove(&path) {
            previous.handle.abort();
        }

        let watcher_root = self.root.clone();
        let queue = self.queue.clone();
        let pending_map = self.pending.clone();
        let delay = self.settling_delay;
        let timer_path = path.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // Only the latest timer for a path may fire; a concurrent re-arm
            // supersedes this one.
            let owns_entry = {
                let mut pending = pending_map.lock();
                match pending.get(&timer_path) {
                    Some(entry) if entry.generation == generation => {
                        pending.remove(&timer_path);
                        true
                    }
                    _ => false,
                }
            };
            if owns_entry {
                settle_file(&watcher_root, &timer_path, &queue).await;
            }
        });

        debug!(path = %path.display(), "scheduled file for transfer");
        pending.insert(path, PendingTimer { generation, handle });
    }

    fn cancel_timer(&self, path: &Path) {
        if let Some(timer) = self.pending.lock().remove(path) {
            timer.handle.abort();
            debug!(path = %path.display(), "cancelled pending transfer");
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// A settled file becomes a Pending transfer item keyed by its path relative
/// to the watch root.
async fn settle_file(root: &Path, path: &Path, queue: &TransferQueue) {
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) => meta,
        Err(err) => {
            warn!(path = %path.display(), %err, "failed to stat settled file");
            return;
        }
    };

    let Ok(rel) = path.strip_prefix(root) else {
        warn!(path = %path.display(), root = %root.display(), "settled file outside watch root");
        return;
    };

    let item = TransferItem {
        id: generate_id(),
        source_path: path.to_path_buf(),
        destination_path: rel.to_path_buf(),
        resolution: extract_resolution(rel),
        timestamp: Utc::now(),
        retry_count: 0,
        status: TransferStatus::Pending,
        file_size: meta.len(),
        last_error: String::new(),
    };

    if let Err(err) = queue.add(item) {
        warn!(path = %path.display(), %err, "failed to queue settled file");
    }
}

fn is_ts_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("ts"))
}

/// Resolution label: the first directory component (below the watch root)
/// ending in `p`, e.g. `1080p`. Empty when no such component exists.
fn extract_resolution(rel: &Path) -> String {
    rel.parent()
        .into_iter()
        .flat_map(|dir| dir.components())
        .filter_map(|c| c.as_os_str().to_str())
        .find(|part| part.ends_with('p'))
        .unwrap_or("")
        .to_string()
}

fn generate_id() -> String {
    use rand::Rng;
    let ns = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("transfer_{}_{}", ns, rand::rng().random_range(0..1000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup::CleanupScheduler;
    use crate::types::{CleanupConfig, QueueConfig, StorageConfig};

    fn watcher_fixture(root: &Path) -> (FileWatcher, Arc<TransferQueue>) {
        let storage = Arc::new(crate::storage::ShareStorage::new(StorageConfig {
            root: root.join("remote"),
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
        let queue = TransferQueue::new(
            QueueConfig {
                worker_count: 2,
                persistence_path: root.join("transfer_queue.json"),
                max_queue_size: 100,
                storage_timeout: Duration::from_secs(30),
            },
            storage,
            cleanup,
        );
        let watcher = FileWatcher::new(
            root.join("watch"),
            queue.clone(),
            Duration::from_millis(200),
        );
        (watcher, queue)
    }

    #[tokio::test]
    async fn settled_file_becomes_a_transfer_item() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let (watcher, queue) = watcher_fixture(dir.path());

        let seg_dir = dir.path().join("watch/1080p");
        tokio::fs::create_dir_all(&seg_dir).await.unwrap();
        let seg = seg_dir.join("seg0001.ts");
        tokio::fs::write(&seg, b"payload").await.unwrap();

        watcher.arm_timer(seg.clone());
        assert_eq!(watcher.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(queue.len(), 1);
        assert_eq!(watcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn removed_file_produces_no_item() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let (watcher, queue) = watcher_fixture(dir.path());

        let seg = dir.path().join("watch/1080p/seg0001.ts");
        watcher.arm_timer(seg.clone());
        watcher.cancel_timer(&seg);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(queue.len(), 0);
        assert_eq!(watcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn rewrite_resets_the_settling_timer() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let (watcher, queue) = watcher_fixture(dir.path());

        let seg_dir = dir.path().join("watch/1080p");
        tokio::fs::create_dir_all(&seg_dir).await.unwrap();
        let seg = seg_dir.join("seg0001.ts");
        tokio::fs::write(&seg, b"partial").await.unwrap();

        watcher.arm_timer(seg.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        // A write halfway through the settling window re-arms the timer.
        watcher.arm_timer(seg.clone());
        assert_eq!(watcher.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        // Exactly one item despite two events.
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn ts_files_only() {
        assert!(is_ts_file(Path::new("/data/event/1080p/seg0001.ts")));
        assert!(is_ts_file(Path::new("/data/event/1080p/SEG0001.TS")));
        assert!(!is_ts_file(Path::new("/data/event/1080p/seg0001.tmp")));
        assert!(!is_ts_file(Path::new("/data/event/1080p")));
    }

    #[test]
    fn resolution_from_relative_path() {
        assert_eq!(extract_resolution(Path::new("1080p/seg0001.ts")), "1080p");
        assert_eq!(
            extract_resolution(Path::new("nested/720p/seg0001.ts")),
            "720p"
        );
        assert_eq!(extract_resolution(Path::new("seg0001.ts")), "");
        assert_eq!(extract_resolution(Path::new("misc/seg0001.ts")), "");
    }

    #[test]
    fn ids_are_unique_enough() {
        let a = generate_id();
        let b = generate_id();
        assert!(a.starts_with("transfer_"));
        // Nanosecond timestamp plus random salt: collisions would need the
        // same nanosecond and the same draw.
        assert_ne!(a, b);
    }
}
