//! Default mode: record every variant, mirror to remote storage, and
//! optionally post-process once the stream ends.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use capture::ManifestWriter;
use capture::poller::poll_variant;
use stitch::{Stitcher, StitcherConfig};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use transfer::TransferService;

use crate::config::AppConfig;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

pub async fn run(
    config: &AppConfig,
    master_url: &str,
    event: &str,
    debug_single_variant: bool,
) -> anyhow::Result<()> {
    let token = CancellationToken::new();
    super::spawn_signal_handler(token.clone());

    let client = capture::http::build_client(&config.http.user_agent, &config.http.referer)?;

    // The transfer pipeline rides alongside the pollers; its loops get a
    // child token so it can be stopped once the pollers are done.
    let service_token = token.child_token();
    let mut transfer_service: Option<Arc<TransferService>> = None;
    let mut transfer_task = None;
    if config.remote.enable_transfer {
        match TransferService::new(config.transfer_service_config(event)).await {
            Ok(service) => {
                let service = Arc::new(service);
                let task_service = service.clone();
                let task_token = service_token.clone();
                transfer_task =
                    Some(tokio::spawn(
                        async move { task_service.start(task_token).await },
                    ));
                transfer_service = Some(service);
            }
            Err(err) => {
                warn!(%err, "failed to create transfer service, continuing without transfer");
            }
        }
    }

    let event_path = config.event_path(event);
    tokio::fs::create_dir_all(&event_path)
        .await
        .context("failed to create event directory")?;

    let variants = capture::fetch_master(&client, master_url, &event_path)
        .await
        .context("failed to get variants")?;
    info!(count = variants.len(), "found variants");

    let manifest = Arc::new(ManifestWriter::new(config.manifest_path(event)));
    // One shared budget across all variants; pressure self-balances between
    // renditions of unequal bitrate.
    let semaphore = Arc::new(Semaphore::new(config.core.worker_count * variants.len()));

    let mut pollers = JoinSet::new();
    for variant in variants {
        if debug_single_variant && variant.resolution != "1080p" {
            debug!(resolution = %variant.resolution, "debug mode, skipping variant");
            continue;
        }
        pollers.spawn(poll_variant(
            client.clone(),
            Arc::new(variant),
            semaphore.clone(),
            manifest.clone(),
            config.core.refresh_delay,
            token.clone(),
        ));
    }

    while pollers.join_next().await.is_some() {}
    info!("all variant pollers finished");

    let ended_naturally = !token.is_cancelled();

    if let Some(service) = &transfer_service {
        service_token.cancel();
        if let Some(task) = transfer_task {
            let _ = task.await;
        }
        service.shutdown(SHUTDOWN_DEADLINE).await;
    }

    manifest.write();
    info!("manifest written");

    if ended_naturally
        && transfer_service.is_some()
        && config.processing.enabled
        && config.processing.auto_process
    {
        info!(event, "stream ended, post-processing transferred event");
        let stitcher = Stitcher::new(StitcherConfig {
            remote_root: config.remote.output_path.clone(),
            process_output: config.paths.process_output.clone(),
            muxer_path: config.processing.ffmpeg_path.clone(),
        });
        let output = stitcher.run(event).await?;
        info!(output = %output.display(), "post-processing complete");
    }

    Ok(())
}
