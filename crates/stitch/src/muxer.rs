//! Locating and invoking the external muxer.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tracing::info;

use crate::error::StitchError;

#[cfg(windows)]
const MUXER_BINARY: &str = "ffmpeg.exe";
#[cfg(not(windows))]
const MUXER_BINARY: &str = "ffmpeg";

/// Resolves the muxer binary.
///
/// Order: the configured value when absolute, a `$PATH` lookup of the
/// configured name, `<exe-dir>/bin/ffmpeg`, then `<cwd>/bin/ffmpeg`.
pub fn resolve_muxer(configured: &str) -> Result<PathBuf, StitchError> {
    if !configured.is_empty() {
        let configured_path = Path::new(configured);
        if configured_path.is_absolute() {
            return Ok(configured_path.to_path_buf());
        }
        if let Some(found) = search_path(configured) {
            return Ok(found);
        }
    }

    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        let candidate = exe_dir.join("bin").join(MUXER_BINARY);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        let candidate = cwd.join("bin").join(MUXER_BINARY);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(StitchError::MuxerNotFound)
}

/// Minimal `$PATH` scan for an executable name.
fn search_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
        #[cfg(windows)]
        {
            let with_exe = dir.join(format!("{name}.exe"));
            if with_exe.is_file() {
                return Some(with_exe);
            }
        }
    }
    None
}

/// Runs the muxer over a concat list, passing its output straight through.
/// A non-zero exit is fatal.
pub async fn run_muxer(
    muxer: &Path,
    concat_file: &Path,
    output: &Path,
) -> Result<(), StitchError> {
    info!(
        muxer = %muxer.display(),
        input = %concat_file.display(),
        output = %output.display(),
        "running muxer"
    );

    let mut cmd = tokio::process::Command::new(muxer);
    cmd.arg("-f")
        .arg("concat")
        .arg("-safe")
        .arg("0")
        .arg("-i")
        .arg(concat_file)
        .arg("-c")
        .arg("copy")
        .arg(output)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    let status = cmd.status().await?;
    if !status.success() {
        return Err(StitchError::MuxerExit {
            code: status.code(),
        });
    }

    info!("muxer completed successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_configured_path_is_used_verbatim() {
        let path = resolve_muxer("/opt/ffmpeg/bin/ffmpeg").unwrap();
        assert_eq!(path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
    }

    #[test]
    fn unresolvable_name_is_muxer_not_found() {
        let err = resolve_muxer("definitely-not-a-real-muxer-binary").unwrap_err();
        assert!(matches!(err, StitchError::MuxerNotFound));
    }
}
