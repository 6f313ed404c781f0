//! Per-run quality manifest: which resolution each sequence number was
//! captured at.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::CaptureError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestItem {
    #[serde(rename = "seqNo")]
    pub seq_no: String,
    pub resolution: String,
}

#[derive(Debug, Default)]
struct ManifestIndex {
    items: Vec<ManifestItem>,
    by_seq: FxHashMap<String, usize>,
}

impl ManifestIndex {
    /// Records a sighting of `seq_no` at `resolution`, upgrading an existing
    /// record when the new label compares higher.
    ///
    /// Labels compare as plain strings, so `"720p"` outranks `"1080p"`.
    fn record(&mut self, seq_no: &str, resolution: &str) {
        if let Some(&at) = self.by_seq.get(seq_no) {
            let existing = &mut self.items[at];
            if resolution > existing.resolution.as_str() {
                existing.resolution = resolution.to_string();
            }
            return;
        }
        self.by_seq.insert(seq_no.to_string(), self.items.len());
        self.items.push(ManifestItem {
            seq_no: seq_no.to_string(),
            resolution: resolution.to_string(),
        });
    }

    fn sorted_items(&self) -> Vec<ManifestItem> {
        let mut items = self.items.clone();
        items.sort_by(|a, b| a.seq_no.cmp(&b.seq_no));
        items
    }
}

/// Shared manifest handle. Pollers record sightings from their own tasks; the
/// orchestrator writes the file once at termination.
#[derive(Debug)]
pub struct ManifestWriter {
    path: PathBuf,
    index: Mutex<ManifestIndex>,
}

impl ManifestWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            index: Mutex::new(ManifestIndex::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, seq_no: &str, resolution: &str) {
        self.index.lock().record(seq_no, resolution);
    }

    pub fn len(&self) -> usize {
        self.index.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.lock().items.is_empty()
    }

    /// Writes the manifest as a pretty-printed JSON array sorted ascending by
    /// sequence string. Failures are logged, not fatal: losing the manifest
    /// must not take the recording down with it.
    pub fn write(&self) {
        let items = self.index.lock().sorted_items();
        if let Err(err) = self.write_items(&items) {
            warn!(path = %self.path.display(), %err, "failed to write manifest");
        }
    }

    fn write_items(&self, items: &[ManifestItem]) -> Result<(), CaptureError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let doc = serde_json::to_vec_pretty(items)
            .map_err(|e| CaptureError::playlist(format!("failed to encode manifest: {e}")))?;
        std::fs::write(&self.path, doc)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_inserts() {
        let mut index = ManifestIndex::default();
        index.record("0001", "720p");
        assert_eq!(
            index.sorted_items(),
            vec![ManifestItem {
                seq_no: "0001".to_string(),
                resolution: "720p".to_string(),
            }]
        );
    }

    #[test]
    fn string_comparison_governs_upgrades() {
        // "720p" > "1080p" > "240p" under codepoint order, so the 720p record
        // survives both later sightings.
        let mut index = ManifestIndex::default();
        index.record("0001", "720p");
        index.record("0001", "1080p");
        index.record("0001", "240p");
        assert_eq!(index.sorted_items()[0].resolution, "720p");
    }

    #[test]
    fn lower_label_upgrades_to_higher_string() {
        let mut index = ManifestIndex::default();
        index.record("0002", "1080p");
        index.record("0002", "480p");
        assert_eq!(index.sorted_items()[0].resolution, "480p");
    }

    #[test]
    fn items_sort_ascending_by_sequence_string() {
        let mut index = ManifestIndex::default();
        index.record("0010", "720p");
        index.record("0002", "720p");
        index.record("0001", "720p");
        let seqs: Vec<_> = index
            .sorted_items()
            .into_iter()
            .map(|i| i.seq_no)
            .collect();
        assert_eq!(seqs, vec!["0001", "0002", "0010"]);
    }

    #[test]
    fn writes_sorted_json_array() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("event.json");
        let writer = ManifestWriter::new(&path);
        writer.record("0002", "480p");
        writer.record("0001", "1080p");
        writer.write();

        let body = std::fs::read_to_string(&path).expect("manifest written");
        let items: Vec<ManifestItem> = serde_json::from_str(&body).expect("valid JSON");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].seq_no, "0001");
        assert_eq!(items[0].resolution, "1080p");
        assert!(body.contains("seqNo"));
    }
}
