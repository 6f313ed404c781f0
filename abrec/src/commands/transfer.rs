//! Transfer-only mode: seed the queue from an existing local event tree.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, bail};
use tokio_util::sync::CancellationToken;
use tracing::info;
use transfer::TransferService;

use crate::config::AppConfig;
use crate::prompt;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

pub async fn run(config: &AppConfig, event: Option<String>) -> anyhow::Result<()> {
    if !config.remote.enable_transfer {
        bail!("NAS transfer is disabled in configuration; enable it to use transfer-only mode");
    }

    let event = match event.filter(|e| !e.is_empty()) {
        Some(event) => event,
        None => {
            let events = local_event_dirs(&config.paths.local_output)?;
            prompt::choose("events", &events)?.clone()
        }
    };
    info!(event, "starting transfer-only mode");

    let local_event_path = config.event_path(&event);
    if !local_event_path.is_dir() {
        bail!(
            "local event directory does not exist: {}",
            local_event_path.display()
        );
    }

    let token = CancellationToken::new();
    crate::commands::spawn_signal_handler(token.clone());

    let service = TransferService::new(config.transfer_service_config(&event))
        .await
        .context("failed to create transfer service")?;

    service
        .seed_existing_files(&local_event_path)
        .await
        .context("failed to queue existing files")?;

    info!("starting transfer service");
    service.start(token).await;

    service.shutdown(SHUTDOWN_DEADLINE).await;
    info!("transfer-only mode completed");
    Ok(())
}

fn local_event_dirs(root: &Path) -> anyhow::Result<Vec<String>> {
    let mut events = Vec::new();
    for entry in std::fs::read_dir(root).context("failed to read local output directory")? {
        let entry = entry?;
        if entry.file_type()?.is_dir()
            && let Some(name) = entry.file_name().to_str()
        {
            events.push(name.to_string());
        }
    }
    events.sort();
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_dirs_are_directories_only() {
        let dir = tempfile::tempdir().expect("create temp dir");
        std::fs::create_dir(dir.path().join("finals")).unwrap();
        std::fs::create_dir(dir.path().join("semis")).unwrap();
        std::fs::write(dir.path().join("finals.json"), b"[]").unwrap();

        let events = local_event_dirs(dir.path()).unwrap();
        assert_eq!(events, vec!["finals", "semis"]);
    }
}
