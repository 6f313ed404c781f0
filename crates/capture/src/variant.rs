use std::path::PathBuf;

use m3u8_rs::VariantStream;
use url::Url;

/// One rendition of the stream, discovered from the master playlist.
/// Immutable after discovery; pollers and segment jobs borrow it via `Arc`.
#[derive(Debug, Clone)]
pub struct StreamVariant {
    /// Absolute URL of the variant's media playlist.
    pub url: Url,
    pub bandwidth: u64,
    /// Base used to resolve relative segment URIs (the variant URL itself).
    pub base_url: Url,
    /// Stable id within the run (position in the master playlist).
    pub id: usize,
    /// Canonical `<height>p` label, or `"unknown"` for single-rendition streams.
    pub resolution: String,
    /// Local directory this variant's segments land in.
    pub output_dir: PathBuf,
}

/// Derives the canonical resolution label for a rendition.
///
/// A declared `WxH` resolution wins; otherwise the label is bucketed from the
/// declared bandwidth.
pub fn resolution_label(variant: &VariantStream) -> String {
    if let Some(resolution) = &variant.resolution {
        return format!("{}p", resolution.height);
    }
    match variant.bandwidth {
        bw if bw >= 5_000_000 => "1080p".to_string(),
        bw if bw >= 3_000_000 => "720p".to_string(),
        bw if bw >= 1_500_000 => "480p".to_string(),
        bw if bw >= 800_000 => "360p".to_string(),
        _ => "240p".to_string(),
    }
}
