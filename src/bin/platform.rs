//! Platform binary: accepts terminal connections and logs their traffic.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use jt808::config::Config;
use jt808::server::PlatformServer;

#[derive(Parser, Debug)]
#[command(name = "platform", about = "JT/T 808 fleet-management platform")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address override, e.g. 0.0.0.0:8808.
    #[arg(short, long)]
    listen: Option<std::net::SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .init();

    let server = PlatformServer::new(config.server.clone());
    server.on_location_reported(Box::new(|phone, basic, items| {
        info!(
            %phone,
            lat = basic.latitude_degrees(),
            lon = basic.longitude_degrees(),
            extensions = items.len(),
            "application location callback"
        );
    }));
    server.on_multimedia_uploaded(Box::new(|phone, media| {
        info!(
            %phone,
            media_id = media.media_id,
            bytes = media.data.len(),
            "application media callback"
        );
    }));

    let addr = server.start().await?;
    info!(%addr, "platform running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    server.stop().await;
    Ok(())
}
