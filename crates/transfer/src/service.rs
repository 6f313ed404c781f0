//! Composition of the transfer pipeline and its lifecycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cleanup::CleanupScheduler;
use crate::error::TransferError;
use crate::queue::TransferQueue;
use crate::storage::ShareStorage;
use crate::types::{CleanupConfig, QueueConfig, StorageConfig, TransferItem, TransferStatus};
use crate::watcher::FileWatcher;

const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct TransferServiceConfig {
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub cleanup: CleanupConfig,
    /// Local tree the watcher observes (the event's output directory).
    pub watch_root: PathBuf,
    pub file_settling_delay: Duration,
}

pub struct TransferService {
    storage: Arc<ShareStorage>,
    cleanup: Arc<CleanupScheduler>,
    queue: Arc<TransferQueue>,
    watch_root: PathBuf,
    file_settling_delay: Duration,
}

impl TransferService {
    /// Connects to remote storage, restores queue state, and prepares the
    /// watch root. Mount or probe failures are fatal here: running the
    /// pipeline without a reachable remote would only accumulate failures.
    pub async fn new(config: TransferServiceConfig) -> Result<Self, TransferError> {
        let storage = Arc::new(ShareStorage::new(config.storage));
        storage.establish().await?;
        let root = storage.root().to_path_buf();
        storage.ensure_dir(&root).await?;
        storage.test_connection().await?;

        let cleanup = Arc::new(CleanupScheduler::new(config.cleanup));
        let queue = TransferQueue::new(config.queue, storage.clone(), cleanup.clone());

        tokio::fs::create_dir_all(&config.watch_root).await?;

        Ok(Self {
            storage,
            cleanup,
            queue,
            watch_root: config.watch_root,
            file_settling_delay: config.file_settling_delay,
        })
    }

    pub fn queue(&self) -> &Arc<TransferQueue> {
        &self.queue
    }

    /// Runs the watcher, queue, cleanup scheduler, and stats reporter until
    /// the token fires.
    pub async fn start(&self, token: CancellationToken) {
        info!("transfer service started");
        let mut tasks = JoinSet::new();

        {
            let watcher = FileWatcher::new(
                self.watch_root.clone(),
                self.queue.clone(),
                self.file_settling_delay,
            );
            let token = token.clone();
            tasks.spawn(async move {
                if let Err(err) = watcher.run(token).await {
                    warn!(%err, "file watcher error");
                }
            });
        }

        {
            let queue = self.queue.clone();
            let token = token.clone();
            tasks.spawn(queue.run(token));
        }

        {
            let cleanup = self.cleanup.clone();
            let token = token.clone();
            tasks.spawn(async move { cleanup.run(token).await });
        }

        {
            let queue = self.queue.clone();
            let cleanup = self.cleanup.clone();
            tasks.spawn(report_stats(queue, cleanup, token));
        }

        while tasks.join_next().await.is_some() {}
    }

    /// Graceful shutdown: persist queue state, drain the cleanup backlog,
    /// release the remote mount. `deadline` bounds the whole sequence.
    pub async fn shutdown(&self, deadline: Duration) {
        info!("shutting down transfer service");

        let deadline_token = CancellationToken::new();
        let timer = {
            let token = deadline_token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                token.cancel();
            })
        };

        if let Err(err) = self.queue.save_state() {
            warn!(%err, "failed to save queue state");
        }
        if let Err(err) = self.cleanup.force_cleanup_all(&deadline_token).await {
            warn!(%err, "failed to drain cleanup backlog");
        }
        self.storage.disconnect().await;

        timer.abort();
        info!("transfer service shut down");
    }

    /// Seeds the queue from an existing event tree (transfer-only mode).
    /// Files already present remotely at the right size skip the queue and
    /// go straight to cleanup.
    pub async fn seed_existing_files(&self, event_root: &Path) -> Result<(), TransferError> {
        info!(root = %event_root.display(), "scanning for existing files");

        let event_name: PathBuf = event_root
            .file_name()
            .map(PathBuf::from)
            .ok_or_else(|| TransferError::storage("event path has no final component"))?;

        let mut queued = 0usize;
        let mut already_transferred = 0usize;

        for path in collect_ts_files(event_root).await? {
            let meta = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta,
                Err(err) => {
                    warn!(path = %path.display(), %err, "failed to stat file");
                    continue;
                }
            };
            let Ok(rel) = path.strip_prefix(event_root) else {
                continue;
            };
            let destination = event_name.join(rel);

            match self.storage.file_exists(&destination, meta.len()).await {
                Ok(true) => {
                    already_transferred += 1;
                    self.cleanup.schedule(path.clone());
                    continue;
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(path = %path.display(), %err, "failed to check remote file, queueing anyway");
                }
            }

            let timestamp: DateTime<Utc> = meta
                .modified()
                .map(DateTime::from)
                .unwrap_or_else(|_| Utc::now());
            let item = TransferItem {
                id: seed_id(),
                source_path: path.clone(),
                destination_path: destination,
                resolution: resolution_of(rel),
                timestamp,
                retry_count: 0,
                status: TransferStatus::Pending,
                file_size: meta.len(),
                last_error: String::new(),
            };
            match self.queue.add(item) {
                Ok(()) => queued += 1,
                Err(err) => warn!(path = %path.display(), %err, "failed to queue file"),
            }
        }

        info!(queued, already_transferred, "file scan completed");
        Ok(())
    }
}

async fn report_stats(
    queue: Arc<TransferQueue>,
    cleanup: Arc<CleanupScheduler>,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {
                let stats = queue.stats_snapshot();
                info!(
                    added = stats.total_added,
                    completed = stats.total_completed,
                    failed = stats.total_failed,
                    pending = stats.current_pending,
                    bytes = stats.bytes_transferred,
                    queue_size = queue.len(),
                    cleanup_pending = cleanup.pending_count(),
                    "transfer stats"
                );
            }
        }
    }
}

/// Depth-first enumeration of `.ts` files under `root`.
async fn collect_ts_files(root: &Path) -> Result<Vec<PathBuf>, TransferError> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(path = %dir.display(), %err, "failed to read directory");
                continue;
            }
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let kind = entry.file_type().await?;
            if kind.is_dir() {
                stack.push(path);
            } else if path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("ts"))
            {
                files.push(path);
            }
        }
    }
    Ok(files)
}

fn resolution_of(rel: &Path) -> String {
    rel.parent()
        .into_iter()
        .flat_map(|dir| dir.components())
        .filter_map(|c| c.as_os_str().to_str())
        .find(|part| part.ends_with('p'))
        .unwrap_or("unknown")
        .to_string()
}

fn seed_id() -> String {
    let ns = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("transfer_existing_{ns}")
}
