//! Shared HTTP client construction.

use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderValue, REFERER};

use crate::error::CaptureError;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/138.0.0.0 Safari/537.36";
pub const DEFAULT_REFERER: &str = "https://www.flomarching.com";

/// Builds the process-wide client used for every playlist and segment fetch.
///
/// The User-Agent and Referer ride on every request as default headers, so
/// call sites never have to remember to attach them.
pub fn build_client(user_agent: &str, referer: &str) -> Result<Client, CaptureError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        REFERER,
        HeaderValue::from_str(referer).map_err(|e| CaptureError::Configuration {
            reason: format!("invalid Referer header `{referer}`: {e}"),
        })?,
    );

    Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .build()
        .map_err(CaptureError::from)
}
