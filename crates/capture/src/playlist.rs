//! Master and media playlist fetching and parsing.

use std::path::Path;

use m3u8_rs::{MasterPlaylist, MediaPlaylist, parse_playlist_res};
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::CaptureError;
use crate::variant::{StreamVariant, resolution_label};

/// Fetches the master playlist and constructs one [`StreamVariant`] per
/// listed rendition. A body that turns out to be a media playlist yields a
/// single synthetic variant labelled `"unknown"`.
///
/// `event_dir` is the event's local output root; each variant gets a
/// resolution-named subdirectory of it.
pub async fn fetch_master(
    client: &Client,
    master_url: &str,
    event_dir: &Path,
) -> Result<Vec<StreamVariant>, CaptureError> {
    let master_url = Url::parse(master_url)
        .map_err(|e| CaptureError::invalid_url(master_url, e.to_string()))?;

    let body = fetch_playlist_body(client, &master_url).await?;
    variants_from_body(&body, &master_url, event_dir)
}

/// Fetches and parses a media playlist. Master playlists are rejected.
pub async fn fetch_media(client: &Client, url: &Url) -> Result<MediaPlaylist, CaptureError> {
    let body = fetch_playlist_body(client, url).await?;
    match parse_playlist_res(&body) {
        Ok(m3u8_rs::Playlist::MediaPlaylist(playlist)) => Ok(playlist),
        Ok(m3u8_rs::Playlist::MasterPlaylist(_)) => Err(CaptureError::WrongPlaylistKind),
        Err(e) => Err(CaptureError::playlist(format!(
            "failed to parse media playlist {url}: {e}"
        ))),
    }
}

async fn fetch_playlist_body(client: &Client, url: &Url) -> Result<Vec<u8>, CaptureError> {
    let response = client.get(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CaptureError::http_status(status, url.as_str()));
    }
    Ok(response.bytes().await?.to_vec())
}

/// Pure construction half of [`fetch_master`], split out so the label and
/// URL-resolution rules are testable without a socket.
pub(crate) fn variants_from_body(
    body: &[u8],
    master_url: &Url,
    event_dir: &Path,
) -> Result<Vec<StreamVariant>, CaptureError> {
    match parse_playlist_res(body) {
        Ok(m3u8_rs::Playlist::MasterPlaylist(master)) => {
            variants_from_master(&master, master_url, event_dir)
        }
        Ok(m3u8_rs::Playlist::MediaPlaylist(_)) => {
            // Single-rendition stream: the master URL is already the media
            // playlist.
            debug!(url = %master_url, "master URL points at a media playlist");
            Ok(vec![StreamVariant {
                url: master_url.clone(),
                bandwidth: 0,
                base_url: master_url.clone(),
                id: 0,
                resolution: "unknown".to_string(),
                output_dir: event_dir.join("unknown"),
            }])
        }
        Err(e) => Err(CaptureError::playlist(format!(
            "failed to parse master playlist {master_url}: {e}"
        ))),
    }
}

fn variants_from_master(
    master: &MasterPlaylist,
    master_url: &Url,
    event_dir: &Path,
) -> Result<Vec<StreamVariant>, CaptureError> {
    if master.variants.is_empty() {
        return Err(CaptureError::EmptyMaster);
    }

    let mut variants = Vec::with_capacity(master.variants.len());
    for (id, rendition) in master.variants.iter().enumerate() {
        let url = master_url.join(&rendition.uri).map_err(|e| {
            CaptureError::playlist(format!(
                "could not resolve variant URI `{}` against {master_url}: {e}",
                rendition.uri
            ))
        })?;
        let resolution = resolution_label(rendition);
        variants.push(StreamVariant {
            base_url: url.clone(),
            url,
            bandwidth: rendition.bandwidth,
            id,
            resolution: resolution.clone(),
            output_dir: event_dir.join(&resolution),
        });
    }
    Ok(variants)
}
