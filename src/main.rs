use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use hrm_bridge::{ConnectionEvent, HeartRateProvider, ProviderConfig};
use log::{info, warn};
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser)]
#[command(name = "hrm-bridge", about = "Stream Bluetooth LE heart-rate monitors as metric bags")]
struct Cli {
    /// Directory holding hrm_config.json
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List nearby heart-rate monitors
    Scan {
        /// Scan window in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Only keep devices whose name starts with this prefix
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Connect to a monitor and print metric bags as JSON lines until Ctrl-C
    Stream {
        address: String,
        /// Session tag attached to every sample
        #[arg(long)]
        session: Option<String>,
        /// Read the battery level after subscribing
        #[arg(long)]
        battery: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Logging initialized");

    let cli = Cli::parse();
    let config = match &cli.config_dir {
        Some(dir) => ProviderConfig::load_config(dir).await?,
        None => ProviderConfig::default(),
    };
    let provider = HeartRateProvider::new(config).await;

    match cli.command {
        Command::Scan { timeout, prefix } => {
            let timeout = timeout
                .map(Duration::from_secs)
                .unwrap_or_else(|| provider.config().scan_timeout());
            let prefix = prefix.or_else(|| provider.config().name_prefix.clone());
            let devices = provider.scan_with(timeout, prefix.as_deref()).await?;
            for device in devices {
                println!("{}", serde_json::to_string(&device)?);
            }
        }
        Command::Stream {
            address,
            session,
            battery,
        } => {
            let battery = battery || provider.config().enable_battery;
            let mut events = provider.subscribe_events();
            provider.connect(&address, session, battery).await?;

            let mut bags = Box::pin(provider.metric_bags());
            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);
            loop {
                tokio::select! {
                    bag = bags.next() => match bag {
                        Some(bag) => println!("{}", serde_json::to_string(&bag)?),
                        None => break,
                    },
                    event = events.recv() => match event {
                        Ok(ConnectionEvent::ReconnectExhausted { address }) => {
                            warn!("Lost {} for good, exiting", address);
                            break;
                        }
                        Ok(event) => info!("{:?}", event),
                        Err(RecvError::Lagged(skipped)) => warn!("Missed {} connection events", skipped),
                        Err(RecvError::Closed) => break,
                    },
                    _ = &mut ctrl_c => {
                        info!("Interrupted, disconnecting");
                        break;
                    }
                }
            }
            provider.dispose().await;
        }
    }
    Ok(())
}
