//! Capture Client Application
//!
//! Finds a mixing server on the LAN and streams the microphone to it.

use anyhow::Result;
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_mixer::{
    audio::device::{print_devices, DeviceKind},
    client::MediaClient,
    config::AppConfig,
};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
/// LAN capture client
///
/// Broadcasts for a mixing server, identifies itself and streams the input
/// device as raw f32 PCM.
struct Args {
    /// Path to a TOML config file
    #[arg(long = "config", short = 'c')]
    config: Option<PathBuf>,

    /// Name announced to the server
    #[arg(long = "name", short = 'n', env = "MC_NAME")]
    name: Option<String>,

    /// Input device name snippet (case-insensitive)
    #[arg(long = "device", short = 'd')]
    device: Option<String>,

    /// Send discovery probes to this host instead of broadcasting
    #[arg(long = "server")]
    server: Option<IpAddr>,

    /// UDP port the server listens for discovery on
    #[arg(long = "discovery-port")]
    discovery_port: Option<u16>,

    /// List input devices and exit
    #[arg(long = "list-devices")]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.list_devices {
        print_devices(Some(DeviceKind::Input));
        return Ok(());
    }

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(name) = args.name {
        config.client.name = name;
    }
    if let Some(device) = args.device {
        config.audio.input_device = Some(device);
    }
    if let Some(server) = args.server {
        config.network.discovery_target = server;
    }
    if let Some(port) = args.discovery_port {
        config.network.discovery_port = port;
    }

    tracing::info!("Starting LAN Mixer client {:?}", config.client.name);

    let mut client = MediaClient::new(config);
    client.start()?;

    tracing::info!("Streaming - press Ctrl+C to stop");

    let sender_stats = client.sender_stats();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut stats_interval = tokio::time::interval(STATS_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = stats_interval.tick() => {
                client.check_errors();

                if let Some(stats) = &sender_stats {
                    tracing::info!(
                        "Stats: {} samples captured, {} packets / {:.1} KB sent, {} send errors",
                        client.samples_captured(),
                        stats.packets_sent(),
                        stats.bytes_sent() as f64 / 1024.0,
                        stats.send_errors()
                    );
                }
            }
        }
    }

    tracing::info!("Shutting down");
    client.stop();
    Ok(())
}
