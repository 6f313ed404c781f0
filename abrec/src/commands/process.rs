//! Process-only mode: stitch an already-transferred event.

use anyhow::Context;
use stitch::{Stitcher, StitcherConfig};
use tracing::info;
use transfer::{ShareStorage, StorageConfig};

use crate::config::AppConfig;
use crate::prompt;

pub async fn run(config: &AppConfig, event: Option<String>) -> anyhow::Result<()> {
    if !config.processing.enabled {
        info!("processing disabled");
        return Ok(());
    }

    // The event trees live under the remote root; make sure it is reachable
    // before enumerating anything.
    let storage = ShareStorage::new(StorageConfig {
        root: config.remote.output_path.clone(),
        username: config.remote.username.clone(),
        password: config.remote.password.clone(),
        verify_size: true,
    });
    storage
        .establish()
        .await
        .context("failed to reach remote storage")?;
    storage
        .test_connection()
        .await
        .context("failed to connect to remote storage")?;

    let stitcher = Stitcher::new(StitcherConfig {
        remote_root: config.remote.output_path.clone(),
        process_output: config.paths.process_output.clone(),
        muxer_path: config.processing.ffmpeg_path.clone(),
    });

    let event = match event.filter(|e| !e.is_empty()) {
        Some(event) => event,
        None => {
            let events = stitcher.list_events().await?;
            prompt::choose("events", &events)?.clone()
        }
    };
    info!(event, "starting processing");

    let output = stitcher.run(&event).await?;
    info!(output = %output.display(), "processing complete");

    storage.disconnect().await;
    Ok(())
}
