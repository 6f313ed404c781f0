use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a transfer item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Retrying,
}

impl TransferStatus {
    /// Terminal items never re-enter the queue and are never persisted.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::InProgress => write!(f, "In Progress"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::Retrying => write!(f, "Retrying"),
        }
    }
}

/// One file destined for remote storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferItem {
    pub id: String,
    /// Absolute local path.
    pub source_path: PathBuf,
    /// Path relative to the remote storage root.
    pub destination_path: PathBuf,
    pub resolution: String,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
    pub status: TransferStatus,
    pub file_size: u64,
    #[serde(default)]
    pub last_error: String,
}

/// Aggregate queue counters; a mutex-guarded copy lives in the queue and a
/// snapshot is persisted alongside the items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub total_added: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub current_pending: u64,
    pub bytes_transferred: u64,
}

impl QueueStats {
    pub fn record_added(&mut self) {
        self.total_added += 1;
        self.current_pending += 1;
    }

    pub fn record_completed(&mut self, bytes: u64) {
        self.total_completed += 1;
        self.current_pending = self.current_pending.saturating_sub(1);
        self.bytes_transferred += bytes;
    }

    pub fn record_failed(&mut self) {
        self.total_failed += 1;
        self.current_pending = self.current_pending.saturating_sub(1);
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub worker_count: usize,
    pub persistence_path: PathBuf,
    pub max_queue_size: usize,
    /// Per-attempt storage timeout.
    pub storage_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub enabled: bool,
    /// Files younger than this are skipped each round. Zero deletes eagerly.
    pub retention_period: Duration,
    pub batch_size: usize,
    pub check_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Remote storage root: a mounted directory or a `\\server\share\…` path.
    pub root: PathBuf,
    pub username: String,
    pub password: String,
    /// Verify byte-size equality after each copy.
    pub verify_size: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(TransferStatus::Completed.is_terminal());
        assert!(TransferStatus::Failed.is_terminal());
        assert!(!TransferStatus::Pending.is_terminal());
        assert!(!TransferStatus::InProgress.is_terminal());
        assert!(!TransferStatus::Retrying.is_terminal());
    }

    #[test]
    fn stats_track_pending_count() {
        let mut stats = QueueStats::default();
        stats.record_added();
        stats.record_added();
        stats.record_completed(1024);
        stats.record_failed();
        assert_eq!(stats.total_added, 2);
        assert_eq!(stats.total_completed, 1);
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.current_pending, 0);
        assert_eq!(stats.bytes_transferred, 1024);
    }

    #[test]
    fn item_round_trips_through_json() {
        let item = TransferItem {
            id: "transfer_1_1".to_string(),
            source_path: "/data/event/1080p/seg0001.ts".into(),
            destination_path: "event/1080p/seg0001.ts".into(),
            resolution: "1080p".to_string(),
            timestamp: Utc::now(),
            retry_count: 1,
            status: TransferStatus::Retrying,
            file_size: 2048,
            last_error: "copy interrupted".to_string(),
        };
        let encoded = serde_json::to_string(&item).unwrap();
        let decoded: TransferItem = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.id, item.id);
        assert_eq!(decoded.status, item.status);
        assert_eq!(decoded.timestamp, item.timestamp);
        assert_eq!(decoded.file_size, item.file_size);
    }
}
