//! Terminal binary: registers with a platform and reports location.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use jt808::client::TerminalClient;
use jt808::config::Config;
use jt808::util::now_timestamp;

#[derive(Parser, Debug)]
#[command(name = "terminal", about = "JT/T 808 on-board terminal")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Platform address override, e.g. 127.0.0.1:8808.
    #[arg(short, long)]
    remote: Option<std::net::SocketAddr>,

    /// Terminal phone number override.
    #[arg(short, long)]
    phone: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(remote) = args.remote {
        config.client.remote_addr = remote;
    }
    if let Some(phone) = args.phone {
        config.client.phone = phone;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .init();

    let client = TerminalClient::new(config.client.clone());
    client.set_heartbeat_interval(10);
    client.update_location_units(31.824636, 117.2, 40.0, 60.0, 90.0, now_timestamp());
    client.on_upgrade(Box::new(|target, data| {
        info!(target, bytes = data.len(), "upgrade package received");
    }));
    client.on_parameters_updated(Box::new(|params| {
        info!(count = params.len(), "terminal parameters updated");
    }));

    client.connect().await?;
    client.authenticate().await?;
    client.run()?;
    info!("terminal active, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    client.waiting_stop(std::time::Duration::from_secs(2)).await;
    Ok(())
}
