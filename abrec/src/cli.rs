use clap::Parser;

/// Continuous recorder for adaptive-bitrate HLS streams.
#[derive(Parser, Debug)]
#[command(name = "abrec", version, about)]
pub struct Args {
    /// M3U8 master playlist URL (prompted when omitted)
    #[arg(long)]
    pub url: Option<String>,

    /// Event name (output subdirectory)
    #[arg(long)]
    pub event: Option<String>,

    /// Only poll the 1080p variant
    #[arg(long)]
    pub debug: bool,

    /// Transfer existing files without downloading
    #[arg(long, conflicts_with_all = ["url", "process"])]
    pub transfer: bool,

    /// Post-process already-transferred files without downloading
    #[arg(long, conflicts_with = "url")]
    pub process: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn transfer_and_process_are_exclusive() {
        let err = Args::try_parse_from(["abrec", "--transfer", "--process"]);
        assert!(err.is_err());
    }

    #[test]
    fn default_mode_takes_url_and_event() {
        let args = Args::try_parse_from([
            "abrec",
            "--url",
            "https://cdn.example.com/master.m3u8",
            "--event",
            "finals",
        ])
        .unwrap();
        assert_eq!(args.url.as_deref(), Some("https://cdn.example.com/master.m3u8"));
        assert_eq!(args.event.as_deref(), Some("finals"));
        assert!(!args.transfer && !args.process && !args.debug);
    }
}
