#[derive(Debug, thiserror::Error)]
pub enum StitchError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("ffmpeg not found; install it or set FFMPEG_PATH")]
    MuxerNotFound,

    #[error("muxer exited with {}", .code.map_or_else(|| "signal".to_string(), |c| format!("status {c}")))]
    MuxerExit { code: Option<i32> },

    #[error("no resolution directories under {path}")]
    NoResolutions { path: String },
}
