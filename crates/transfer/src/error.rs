use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("transfer cancelled")]
    Cancelled,

    #[error("queue is full (max size: {max})")]
    QueueFull { max: usize },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("storage error: {reason}")]
    Storage { reason: String },

    #[error("size mismatch after copy: source={src}, dest={dst}")]
    VerifyMismatch { src: u64, dst: u64 },

    #[error("storage operation timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("watch error: {source}")]
    Watch {
        #[from]
        source: notify::Error,
    },

    #[error("queue state encoding error: {source}")]
    State {
        #[from]
        source: serde_json::Error,
    },
}

impl TransferError {
    pub fn storage(reason: impl Into<String>) -> Self {
        Self::Storage {
            reason: reason.into(),
        }
    }
}
