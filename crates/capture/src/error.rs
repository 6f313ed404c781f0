use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("capture cancelled")]
    Cancelled,

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("playlist error: {reason}")]
    Playlist { reason: String },

    #[error("no variants found in master playlist")]
    EmptyMaster,

    #[error("expected media playlist but got master")]
    WrongPlaylistKind,

    #[error("zero-byte download for {url}")]
    EmptyBody { url: String },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },
}

impl CaptureError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn playlist(reason: impl Into<String>) -> Self {
        Self::Playlist {
            reason: reason.into(),
        }
    }

    pub fn http_status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    /// True when the error is an HTTP status error with the given code.
    pub fn is_http_status(&self, code: u16) -> bool {
        matches!(self, Self::HttpStatus { status, .. } if status.as_u16() == code)
    }

    /// Cancellation is silenced at call sites; everything else is reported.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::CaptureError;
    use reqwest::StatusCode;

    #[test]
    fn http_status_predicate_matches_code() {
        let err = CaptureError::http_status(StatusCode::FORBIDDEN, "http://example.com/seg1.ts");
        assert!(err.is_http_status(403));
        assert!(!err.is_http_status(404));
    }

    #[test]
    fn non_status_errors_do_not_match() {
        let err = CaptureError::playlist("bad manifest");
        assert!(!err.is_http_status(403));
        assert!(!err.is_cancellation());
        assert!(CaptureError::Cancelled.is_cancellation());
    }
}
