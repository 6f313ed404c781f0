//! Capture side of the recorder: master/media playlist handling, per-variant
//! polling loops, segment downloads, and the per-run quality manifest.

pub mod error;
pub mod http;
pub mod manifest;
pub mod playlist;
pub mod poller;
pub mod segment;
pub mod variant;

pub use error::CaptureError;
pub use manifest::{ManifestItem, ManifestWriter};
pub use playlist::{fetch_master, fetch_media};
pub use poller::poll_variant;
pub use segment::{SegmentJob, download_segment};
pub use variant::StreamVariant;
