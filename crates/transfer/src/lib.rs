//! Observer-driven durable transfer pipeline.
//!
//! A recursive watcher turns settled `.ts` files into transfer items, a
//! persistent newest-first queue uploads them to remote storage with retries
//! and integrity checks, and a bounded-batch cleanup scheduler removes local
//! copies afterwards. Queue state survives process restarts via an on-disk
//! JSON snapshot.

pub mod cleanup;
pub mod error;
pub mod queue;
pub mod service;
pub mod storage;
pub mod types;
pub mod watcher;

pub use cleanup::CleanupScheduler;
pub use error::TransferError;
pub use queue::TransferQueue;
pub use service::{TransferService, TransferServiceConfig};
pub use storage::ShareStorage;
pub use types::{
    CleanupConfig, QueueConfig, QueueStats, StorageConfig, TransferItem, TransferStatus,
};
pub use watcher::FileWatcher;
