mod cli;
mod commands;
mod config;
mod prompt;

use clap::Parser;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Args;
use crate::config::AppConfig;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "abrec=info,capture=info,transfer=info,stitch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        error!("{err:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    if args.transfer {
        return commands::transfer::run(&config, args.event).await;
    }
    if args.process {
        return commands::process::run(&config, args.event).await;
    }

    let url = match args.url {
        Some(url) => url,
        None => prompt::read_url()?,
    };
    let event = args.event.unwrap_or_default();
    commands::download::run(&config, &url, &event, args.debug).await
}
