//! Long-lived per-variant polling loop.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use rustc_hash::FxHashSet;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::manifest::ManifestWriter;
use crate::playlist::fetch_media;
use crate::segment::{SegmentJob, download_segment};
use crate::variant::StreamVariant;

/// Hard ceiling on a single segment download, layered on top of the parent
/// cancellation signal.
const SEGMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Polls one variant's media playlist until the stream ends or the run is
/// cancelled.
///
/// Each refresh walks the playlist in order, deduplicates on the
/// `"{seq}:{uri}"` key, records the sighting in the manifest, and spawns a
/// best-effort download once a slot in the shared concurrency budget frees
/// up. Downloads may complete out of order; observation stays ordered.
pub async fn poll_variant(
    client: Client,
    variant: Arc<StreamVariant>,
    semaphore: Arc<Semaphore>,
    manifest: Arc<ManifestWriter>,
    refresh_delay: Duration,
    token: CancellationToken,
) {
    info!(
        resolution = %variant.resolution,
        bandwidth = variant.bandwidth,
        "starting variant poller"
    );

    let mut seen: FxHashSet<String> = FxHashSet::default();

    loop {
        if token.is_cancelled() {
            return;
        }

        match fetch_media(&client, &variant.url).await {
            Ok(playlist) => {
                let mut seq = playlist.media_sequence;
                for segment in &playlist.segments {
                    let job = SegmentJob {
                        uri: segment.uri.clone(),
                        seq,
                        variant_id: variant.id,
                    };
                    if !seen.insert(job.key()) {
                        seq += 1;
                        continue;
                    }
                    manifest.record(&format!("{seq:04}"), &variant.resolution);

                    let permit = tokio::select! {
                        _ = token.cancelled() => return,
                        permit = semaphore.clone().acquire_owned() => match permit {
                            Ok(permit) => permit,
                            // The semaphore only closes when the run is over.
                            Err(_) => return,
                        }
                    };
                    spawn_download(client.clone(), variant.clone(), job, permit, token.clone());
                    seq += 1;
                }

                if playlist.end_list {
                    info!(resolution = %variant.resolution, "playlist closed (#EXT-X-ENDLIST)");
                    return;
                }
            }
            Err(err) => {
                warn!(resolution = %variant.resolution, %err, "failed to refresh media playlist");
            }
        }

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(refresh_delay) => {}
        }
    }
}

fn spawn_download(
    client: Client,
    variant: Arc<StreamVariant>,
    job: SegmentJob,
    permit: tokio::sync::OwnedSemaphorePermit,
    token: CancellationToken,
) {
    tokio::spawn(async move {
        let _permit = permit;

        let url = match job.absolute_url(&variant) {
            Ok(url) => url,
            Err(err) => {
                warn!(resolution = %variant.resolution, uri = %job.uri, %err, "bad segment URI");
                return;
            }
        };

        let result = tokio::time::timeout(
            SEGMENT_TIMEOUT,
            download_segment(&client, &token, &url, &variant.output_dir),
        )
        .await;

        match result {
            Ok(Ok(())) => {
                info!(resolution = %variant.resolution, seq = job.seq, uri = %job.uri, "downloaded segment");
            }
            // Shutdown or per-segment deadline: not worth reporting.
            Err(_) => {}
            Ok(Err(err)) if err.is_cancellation() => {}
            Ok(Err(err)) if err.is_http_status(403) => {
                warn!(resolution = %variant.resolution, seq = job.seq, uri = %job.uri, "failed to download segment (403)");
            }
            Ok(Err(err)) => {
                warn!(resolution = %variant.resolution, seq = job.seq, uri = %job.uri, %err, "failed to download segment");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Re-observing the same playlist window yields no new jobs; only the
    /// appended segment does.
    #[test]
    fn dedup_holds_across_refreshes() {
        let mut seen: FxHashSet<String> = FxHashSet::default();
        let playlist_window = [(5u64, "a.ts"), (6, "b.ts")];

        let mut first_pass = 0;
        for (seq, uri) in playlist_window {
            let job = SegmentJob {
                uri: uri.to_string(),
                seq,
                variant_id: 0,
            };
            if seen.insert(job.key()) {
                first_pass += 1;
            }
        }
        assert_eq!(first_pass, 2);

        // Second refresh with one new segment appended.
        let refreshed = [(5u64, "a.ts"), (6, "b.ts"), (7, "c.ts")];
        let mut second_pass = 0;
        for (seq, uri) in refreshed {
            let job = SegmentJob {
                uri: uri.to_string(),
                seq,
                variant_id: 0,
            };
            if seen.insert(job.key()) {
                second_pass += 1;
            }
        }
        assert_eq!(second_pass, 1);
    }
}
