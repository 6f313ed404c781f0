//! Remote storage adapter for a mounted directory or UNC share.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TransferError;
use crate::types::{StorageConfig, TransferItem};

pub struct ShareStorage {
    config: StorageConfig,
}

impl ShareStorage {
    pub fn new(config: StorageConfig) -> Self {
        Self { config }
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Mounts the backing share when the configured root is a UNC path.
    ///
    /// Local (non-UNC) roots need no mount. On non-Windows hosts the mount
    /// step is unavailable; a UNC-looking root is assumed reachable as-is.
    pub async fn establish(&self) -> Result<(), TransferError> {
        let Some(share) = network_share(&self.config.root) else {
            return Ok(());
        };

        #[cfg(windows)]
        {
            info!(share = %share, user = %self.config.username, "establishing network connection");
            let mut cmd = tokio::process::Command::new("net");
            cmd.arg("use").arg(&share);
            if !self.config.username.is_empty() && !self.config.password.is_empty() {
                cmd.arg(format!("/user:{}", self.config.username))
                    .arg(&self.config.password);
            }
            cmd.arg("/persistent:no");
            let output = cmd.output().await?;
            if !output.status.success() {
                return Err(TransferError::storage(format!(
                    "failed to mount {share}: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            info!(share = %share, "network connection established");
            Ok(())
        }

        #[cfg(not(windows))]
        {
            warn!(share = %share, "UNC mounts are unsupported on this host; assuming the share is already reachable");
            Ok(())
        }
    }

    /// Probes the root with a zero-byte sentinel file.
    pub async fn test_connection(&self) -> Result<(), TransferError> {
        let probe = self.config.root.join(".connection_test");
        fs::File::create(&probe).await.map_err(|e| {
            TransferError::storage(format!(
                "cannot create probe file under {}: {e}",
                self.config.root.display()
            ))
        })?;
        if let Err(err) = fs::remove_file(&probe).await {
            debug!(path = %probe.display(), %err, "failed to remove probe file");
        }
        info!(root = %self.config.root.display(), "connected to remote storage");
        Ok(())
    }

    pub async fn ensure_dir(&self, path: &Path) -> Result<(), TransferError> {
        fs::create_dir_all(path).await?;
        Ok(())
    }

    /// Streams `src` into `dst` and flushes it to stable storage. An
    /// in-progress copy aborts when the token fires, leaving a partial
    /// destination behind for `verify_transfer` to reject.
    pub async fn copy_file(
        &self,
        token: &CancellationToken,
        src: &Path,
        dst: &Path,
    ) -> Result<(), TransferError> {
        let mut src_file = fs::File::open(src).await?;
        let mut dst_file = fs::File::create(dst).await?;

        tokio::select! {
            _ = token.cancelled() => return Err(TransferError::Cancelled),
            copied = tokio::io::copy(&mut src_file, &mut dst_file) => { copied?; }
        }

        dst_file.sync_all().await?;
        Ok(())
    }

    /// Requires exact byte-size equality; a mismatched destination is
    /// removed.
    pub async fn verify_transfer(&self, src: &Path, dst: &Path) -> Result<(), TransferError> {
        let src_len = fs::metadata(src).await?.len();
        let dst_len = fs::metadata(dst).await?.len();
        if src_len != dst_len {
            if let Err(err) = fs::remove_file(dst).await {
                warn!(path = %dst.display(), %err, "failed to remove mismatched destination");
            }
            return Err(TransferError::VerifyMismatch {
                src: src_len,
                dst: dst_len,
            });
        }
        Ok(())
    }

    /// True when the destination exists and, for a nonzero `expected_size`,
    /// matches it exactly. A size mismatch reads as absent so the caller
    /// re-uploads.
    pub async fn file_exists(&self, rel: &Path, expected_size: u64) -> Result<bool, TransferError> {
        let dst = self.config.root.join(rel);
        let meta = match fs::metadata(&dst).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if expected_size > 0 && meta.len() != expected_size {
            warn!(
                path = %dst.display(),
                expected = expected_size,
                actual = meta.len(),
                "remote file size mismatch"
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Undoes `establish`. Best-effort: failures are logged, never fatal.
    pub async fn disconnect(&self) {
        let Some(share) = network_share(&self.config.root) else {
            return;
        };

        #[cfg(windows)]
        {
            let result = tokio::process::Command::new("net")
                .args(["use", &share, "/delete"])
                .output()
                .await;
            match result {
                Ok(output) if output.status.success() => {
                    info!(share = %share, "disconnected from network share");
                }
                Ok(output) => {
                    warn!(
                        share = %share,
                        output = %String::from_utf8_lossy(&output.stderr).trim(),
                        "failed to disconnect from network share"
                    );
                }
                Err(err) => warn!(share = %share, %err, "failed to disconnect from network share"),
            }
        }

        #[cfg(not(windows))]
        {
            debug!(share = %share, "no mount to release on this host");
        }
    }

    /// Full per-item transfer: create the destination's parent, copy, and —
    /// when size verification is on — verify, removing the destination on
    /// mismatch.
    pub async fn transfer(
        &self,
        token: &CancellationToken,
        item: &TransferItem,
    ) -> Result<(), TransferError> {
        let dst = self.config.root.join(&item.destination_path);
        if let Some(parent) = dst.parent() {
            self.ensure_dir(parent).await?;
        }

        self.copy_file(token, &item.source_path, &dst).await?;

        if self.config.verify_size {
            self.verify_transfer(&item.source_path, &dst).await?;
        }

        debug!(
            src = %item.source_path.display(),
            dst = %dst.display(),
            "file transfer completed"
        );
        Ok(())
    }
}

/// Extracts `\\server\share` from a UNC path like `\\server\share\folder`.
/// Returns `None` for anything else.
fn network_share(path: &Path) -> Option<String> {
    let raw = path.to_str()?;
    let rest = raw.strip_prefix(r"\\")?;
    let mut parts = rest.split('\\').filter(|p| !p.is_empty());
    let server = parts.next()?;
    let share = parts.next()?;
    Some(format!(r"\\{server}\{share}"))
}
