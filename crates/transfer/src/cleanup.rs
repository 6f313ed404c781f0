//! Bounded-batch deletion of transferred local files.

use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TransferError;
use crate::types::CleanupConfig;

pub struct CleanupScheduler {
    config: CleanupConfig,
    pending: Mutex<Vec<PathBuf>>,
}

impl CleanupScheduler {
    pub fn new(config: CleanupConfig) -> Self {
        Self {
            config,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Queues a file for deletion. A no-op when cleanup is disabled.
    pub fn schedule(&self, path: PathBuf) {
        if !self.config.enabled {
            return;
        }
        debug!(path = %path.display(), "scheduled file for cleanup");
        self.pending.lock().push(path);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Periodic deletion loop; one bounded batch per tick.
    pub async fn run(&self, token: CancellationToken) {
        if !self.config.enabled {
            info!("cleanup disabled");
            return;
        }

        info!(
            retention = ?self.config.retention_period,
            batch_size = self.config.batch_size,
            "cleanup scheduler started"
        );

        let mut ticker = tokio::time::interval(self.config.check_interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("cleanup scheduler shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.execute_batch(&token).await {
                        warn!(%err, "cleanup batch error");
                    }
                }
            }
        }
    }

    /// Drains the full pending list, yielding between batches.
    pub async fn force_cleanup_all(&self, token: &CancellationToken) -> Result<(), TransferError> {
        info!("force cleanup requested");
        while self.pending_count() > 0 {
            self.execute_batch(token).await?;
            tokio::select! {
                _ = token.cancelled() => return Err(TransferError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }
        info!("force cleanup complete");
        Ok(())
    }

    async fn execute_batch(&self, token: &CancellationToken) -> Result<(), TransferError> {
        let batch: Vec<PathBuf> = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                return Ok(());
            }
            let take = self.config.batch_size.min(pending.len());
            pending.drain(..take).collect()
        };

        let mut cleaned = 0usize;
        let mut errors = 0usize;
        for path in batch {
            if token.is_cancelled() {
                return Err(TransferError::Cancelled);
            }
            match self.remove_file(&path).await {
                Ok(true) => cleaned += 1,
                Ok(false) => {}
                Err(err) => {
                    errors += 1;
                    warn!(path = %path.display(), %err, "failed to clean up file");
                }
            }
        }

        debug!(cleaned, errors, "cleanup batch completed");
        Ok(())
    }

    /// Deletes one file unless it is younger than the retention period.
    /// Missing files are not errors. Returns whether a deletion happened.
    async fn remove_file(&self, path: &PathBuf) -> Result<bool, TransferError> {
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        if !self.config.retention_period.is_zero()
            && let Ok(modified) = meta.modified()
            && modified
                .elapsed()
                .is_ok_and(|age| age < self.config.retention_period)
        {
            debug!(path = %path.display(), "file too new to clean up");
            return Ok(false);
        }

        tokio::fs::remove_file(path).await?;
        debug!(path = %path.display(), "file cleaned up");
        Ok(true)
    }
}
