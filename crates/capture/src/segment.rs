//! Single-segment download with bounded retry.

use std::path::Path;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::CaptureError;
use crate::variant::StreamVariant;

const ATTEMPTS: u32 = 2;
const RETRY_PAUSE: Duration = Duration::from_millis(300);

/// One segment observed in a media playlist.
#[derive(Debug, Clone)]
pub struct SegmentJob {
    /// Media URI as listed in the playlist, possibly relative.
    pub uri: String,
    /// Media sequence number within the variant.
    pub seq: u64,
    pub variant_id: usize,
}

impl SegmentJob {
    /// Dedup key: a segment is identified by its sequence number and URI.
    pub fn key(&self) -> String {
        format!("{}:{}", self.seq, self.uri)
    }

    /// Resolves the segment URI against the owning variant's base URL.
    pub fn absolute_url(&self, variant: &StreamVariant) -> Result<Url, CaptureError> {
        variant
            .base_url
            .join(&self.uri)
            .map_err(|e| CaptureError::invalid_url(&self.uri, e.to_string()))
    }
}

/// Downloads one segment into `output_dir`.
///
/// Two attempts with a 300 ms pause between them. A 403 on the first attempt
/// always retries; any other non-200 status fails immediately. The
/// destination directory is created on demand and a zero-byte body is an
/// error. Cancellation is observed before, during, and after the request.
pub async fn download_segment(
    client: &Client,
    token: &CancellationToken,
    url: &Url,
    output_dir: &Path,
) -> Result<(), CaptureError> {
    for attempt in 0..ATTEMPTS {
        if attempt > 0 {
            tokio::select! {
                _ = token.cancelled() => return Err(CaptureError::Cancelled),
                _ = tokio::time::sleep(RETRY_PAUSE) => {}
            }
        }

        let response = tokio::select! {
            _ = token.cancelled() => return Err(CaptureError::Cancelled),
            result = client.get(url.clone()).send() => match result {
                Ok(response) => response,
                Err(e) if attempt + 1 == ATTEMPTS => return Err(e.into()),
                Err(_) => continue,
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            if status == StatusCode::FORBIDDEN && attempt == 0 {
                continue;
            }
            return Err(CaptureError::http_status(status, url.as_str()));
        }

        let body = tokio::select! {
            _ = token.cancelled() => return Err(CaptureError::Cancelled),
            body = response.bytes() => body?,
        };
        if body.is_empty() {
            return Err(CaptureError::EmptyBody {
                url: url.to_string(),
            });
        }

        tokio::fs::create_dir_all(output_dir).await?;
        tokio::fs::write(output_dir.join(safe_file_name(url)), &body).await?;
        return Ok(());
    }

    Err(CaptureError::playlist(format!(
        "exhausted retries for {url}"
    )))
}

/// Destination filename: the URL path's last component with anything after a
/// `?`, `&`, or `#` stripped. Falls back to a timestamped name when empty.
fn safe_file_name(url: &Url) -> String {
    let base = url.path().rsplit('/').next().unwrap_or("");
    let base = base
        .find(['?', '&', '#'])
        .map_or(base, |at| &base[..at]);
    if base.is_empty() {
        let ns = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos());
        format!("seg-{ns}.ts")
    } else {
        base.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_combines_sequence_and_uri() {
        let job = SegmentJob {
            uri: "seg0001.ts".to_string(),
            seq: 12,
            variant_id: 0,
        };
        assert_eq!(job.key(), "12:seg0001.ts");
    }

    #[test]
    fn absolute_url_resolves_relative_uris() {
        let variant = StreamVariant {
            url: Url::parse("https://cdn.example.com/live/1080p/index.m3u8").unwrap(),
            bandwidth: 6_000_000,
            base_url: Url::parse("https://cdn.example.com/live/1080p/index.m3u8").unwrap(),
            id: 0,
            resolution: "1080p".to_string(),
            output_dir: "data/event/1080p".into(),
        };
        let job = SegmentJob {
            uri: "seg0001.ts".to_string(),
            seq: 1,
            variant_id: 0,
        };
        assert_eq!(
            job.absolute_url(&variant).unwrap().as_str(),
            "https://cdn.example.com/live/1080p/seg0001.ts"
        );
    }

    #[test]
    fn file_name_is_last_path_component() {
        let url = Url::parse("https://cdn.example.com/live/1080p/seg0001.ts").unwrap();
        assert_eq!(safe_file_name(&url), "seg0001.ts");
    }

    #[test]
    fn file_name_strips_suffix_markers() {
        // `&` is legal inside a URL path component.
        let url = Url::parse("https://cdn.example.com/live/seg0001.ts&rand=42").unwrap();
        assert_eq!(safe_file_name(&url), "seg0001.ts");
    }

    #[test]
    fn empty_file_name_falls_back_to_timestamped() {
        let url = Url::parse("https://cdn.example.com/live/").unwrap();
        let name = safe_file_name(&url);
        assert!(name.starts_with("seg-"));
        assert!(name.ends_with(".ts"));
    }
}
