//! Cross-variant segment selection and concat list generation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::StitchError;
use crate::muxer::{resolve_muxer, run_muxer};

static RESOLUTION_DIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+p$").expect("static pattern"));

/// One segment file observed in a resolution bucket.
#[derive(Debug, Clone)]
pub struct SegmentEntry {
    pub name: String,
    pub seq: u64,
    pub resolution: String,
}

/// Quality rank: lower is better. Labels outside the table rank 0 and
/// therefore always win; `unknown`-labelled buckets dominate by default.
fn quality_rank(label: &str) -> u8 {
    match label {
        "1080p" => 1,
        "720p" => 2,
        "540p" => 3,
        "480p" => 4,
        "450p" => 5,
        "360p" => 6,
        "270p" => 7,
        "240p" => 8,
        _ => 0,
    }
}

#[derive(Debug, Clone)]
pub struct StitcherConfig {
    /// Root the transferred event trees live under.
    pub remote_root: PathBuf,
    /// Root for concat lists and muxed outputs.
    pub process_output: PathBuf,
    /// Configured muxer binary name or absolute path.
    pub muxer_path: String,
}

pub struct Stitcher {
    config: StitcherConfig,
}

impl Stitcher {
    pub fn new(config: StitcherConfig) -> Self {
        Self { config }
    }

    /// Stitches one event: enumerate buckets, select the best rendition per
    /// sequence, write the concat list, and mux. Returns the output path.
    pub async fn run(&self, event: &str) -> Result<PathBuf, StitchError> {
        let event_path = self.config.remote_root.join(event);
        let buckets = resolution_buckets(&event_path).await?;
        if buckets.is_empty() {
            return Err(StitchError::NoResolutions {
                path: event_path.display().to_string(),
            });
        }
        info!(event, buckets = buckets.len(), "stitching event");

        let chosen = select_segments(&event_path, buckets).await;
        info!(event, segments = chosen.len(), "selected segments");

        let out_dir = self.config.process_output.join(event);
        tokio::fs::create_dir_all(&out_dir).await?;

        let concat_file = out_dir.join(format!("{event}.txt"));
        write_concat_file(&concat_file, &event_path, &chosen).await?;

        let muxer = resolve_muxer(&self.config.muxer_path)?;
        let output = out_dir.join(format!("{event}.mp4"));
        run_muxer(&muxer, &concat_file, &output).await?;
        Ok(output)
    }

    /// Event directories under the remote root, for interactive selection.
    pub async fn list_events(&self) -> Result<Vec<String>, StitchError> {
        let mut events = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.config.remote_root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                events.push(name.to_string());
            }
        }
        events.sort();
        Ok(events)
    }
}

/// Immediate subdirectories named like `1080p`.
async fn resolution_buckets(event_path: &Path) -> Result<Vec<String>, StitchError> {
    let mut buckets = Vec::new();
    let mut entries = tokio::fs::read_dir(event_path).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str()
            && RESOLUTION_DIR.is_match(name)
        {
            buckets.push(name.to_string());
        }
    }
    buckets.sort();
    Ok(buckets)
}

/// Fans one enumeration task out per bucket and aggregates the best rank per
/// sequence number. First sighting wins rank ties.
async fn select_segments(event_path: &Path, buckets: Vec<String>) -> BTreeMap<u64, SegmentEntry> {
    let (tx, mut rx) = mpsc::channel::<SegmentEntry>(100);
    let mut tasks = JoinSet::new();
    for bucket in buckets {
        let dir = event_path.join(&bucket);
        let tx = tx.clone();
        tasks.spawn(scan_bucket(dir, bucket, tx));
    }
    drop(tx);

    let mut chosen: BTreeMap<u64, SegmentEntry> = BTreeMap::new();
    while let Some(entry) = rx.recv().await {
        debug!(name = %entry.name, resolution = %entry.resolution, "received segment");
        let better = match chosen.get(&entry.seq) {
            Some(current) => quality_rank(&entry.resolution) < quality_rank(&current.resolution),
            None => true,
        };
        if better {
            chosen.insert(entry.seq, entry);
        }
    }
    while tasks.join_next().await.is_some() {}
    chosen
}

/// Emits every parseable `.ts` file in one bucket. The sequence number lives
/// in bytes 7..11 of the filename; anything else is skipped.
async fn scan_bucket(dir: PathBuf, resolution: String, tx: mpsc::Sender<SegmentEntry>) {
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(err) => {
            warn!(path = %dir.display(), %err, "failed to read resolution directory");
            return;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => return,
            Err(err) => {
                warn!(path = %dir.display(), %err, "failed to enumerate segment files");
                return;
            }
        };
        if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(true) {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if !name.to_ascii_lowercase().ends_with(".ts") {
            continue;
        }
        let Some(seq) = parse_sequence(&name) else {
            debug!(name, "failed to parse segment number");
            continue;
        };
        if tx
            .send(SegmentEntry {
                name,
                seq,
                resolution: resolution.clone(),
            })
            .await
            .is_err()
        {
            return;
        }
    }
}

fn parse_sequence(name: &str) -> Option<u64> {
    name.get(6..10)?.parse().ok()
}

/// One `file '<absolute path>'` line per sequence, ascending.
async fn write_concat_file(
    concat_file: &Path,
    event_path: &Path,
    chosen: &BTreeMap<u64, SegmentEntry>,
) -> Result<(), StitchError> {
    let mut body = String::new();
    for entry in chosen.values() {
        let segment_path = event_path.join(&entry.resolution).join(&entry.name);
        body.push_str(&format!("file '{}'\n", segment_path.display()));
    }
    tokio::fs::write(concat_file, body).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_parsed_from_fixed_offset() {
        assert_eq!(parse_sequence("media_0042.ts"), Some(42));
        assert_eq!(parse_sequence("media_0001.ts"), Some(1));
        // Too short, or non-digits at the offset.
        assert_eq!(parse_sequence("seg.ts"), None);
        assert_eq!(parse_sequence("media_abcd.ts"), None);
    }

    #[test]
    fn rank_table_prefers_higher_resolutions() {
        assert!(quality_rank("1080p") < quality_rank("720p"));
        assert!(quality_rank("720p") < quality_rank("240p"));
        // Unmapped labels rank 0 and beat everything.
        assert!(quality_rank("unknown") < quality_rank("1080p"));
        assert!(quality_rank("4320p") < quality_rank("1080p"));
    }

    async fn make_bucket(event: &Path, bucket: &str, names: &[&str]) {
        let dir = event.join(bucket);
        tokio::fs::create_dir_all(&dir).await.unwrap();
        for name in names {
            tokio::fs::write(dir.join(name), b"payload").await.unwrap();
        }
    }

    #[tokio::test]
    async fn buckets_match_digit_p_directories_only() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let event = dir.path().join("event");
        make_bucket(&event, "1080p", &[]).await;
        make_bucket(&event, "720p", &[]).await;
        make_bucket(&event, "unknown", &[]).await;
        make_bucket(&event, "1080px", &[]).await;

        let buckets = resolution_buckets(&event).await.unwrap();
        assert_eq!(buckets, vec!["1080p", "720p"]);
    }

    #[tokio::test]
    async fn selection_prefers_highest_quality_per_sequence() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let event = dir.path().join("event");
        make_bucket(
            &event,
            "1080p",
            &["media_0001.ts", "media_0002.ts", "media_0003.ts"],
        )
        .await;
        make_bucket(&event, "720p", &["media_0002.ts"]).await;
        make_bucket(&event, "240p", &["media_0003.ts", "media_0004.ts"]).await;

        let buckets = resolution_buckets(&event).await.unwrap();
        let chosen = select_segments(&event, buckets).await;

        assert_eq!(chosen.len(), 4);
        assert_eq!(chosen[&1].resolution, "1080p");
        assert_eq!(chosen[&2].resolution, "1080p");
        assert_eq!(chosen[&3].resolution, "1080p");
        // Sequence 4 only exists at 240p.
        assert_eq!(chosen[&4].resolution, "240p");
    }

    #[tokio::test]
    async fn concat_file_lists_sequences_ascending() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let event = dir.path().join("event");
        make_bucket(&event, "1080p", &["media_0002.ts", "media_0001.ts"]).await;

        let buckets = resolution_buckets(&event).await.unwrap();
        let chosen = select_segments(&event, buckets).await;
        let concat = dir.path().join("event.txt");
        write_concat_file(&concat, &event, &chosen).await.unwrap();

        let body = tokio::fs::read_to_string(&concat).await.unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("file '"));
        assert!(lines[0].contains("media_0001.ts"));
        assert!(lines[1].contains("media_0002.ts"));
        // Every chosen path points into the 1080p bucket.
        assert!(lines.iter().all(|l| l.contains("1080p")));
    }
}
