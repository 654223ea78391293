//! Mixing Server Application
//!
//! Accepts clients over LAN discovery, mixes their audio and plays the result.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_mixer::{
    audio::device::{print_devices, DeviceKind},
    config::AppConfig,
    server::MediaServer,
};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
/// LAN mixing server
///
/// Answers discovery broadcasts, registers clients and plays the mix of
/// every connected client on the output device.
struct Args {
    /// Path to a TOML config file
    #[arg(long = "config", short = 'c')]
    config: Option<PathBuf>,

    /// Output device name snippet (case-insensitive)
    #[arg(long = "device", short = 'd')]
    device: Option<String>,

    /// UDP port for audio data
    #[arg(long = "audio-port")]
    audio_port: Option<u16>,

    /// UDP port for discovery
    #[arg(long = "discovery-port")]
    discovery_port: Option<u16>,

    /// List output devices and exit
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
        print_devices(Some(DeviceKind::Output));
        return Ok(());
    }

    tracing::info!("Starting LAN Mixer server");

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(device) = args.device {
        config.audio.output_device = Some(device);
    }
    if let Some(port) = args.audio_port {
        config.network.audio_port = port;
    }
    if let Some(port) = args.discovery_port {
        config.network.discovery_port = port;
    }

    print_devices(Some(DeviceKind::Output));

    let mut server = MediaServer::bind(config)?;
    server.start()?;

    tracing::info!("Waiting for clients - press Ctrl+C to stop");

    let receiver_stats = server.receiver_stats();
    let discovery_stats = server.discovery_stats();
    let mixer_stats = server.mixer_stats();
    let registry = server.registry();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut stats_interval = tokio::time::interval(STATS_INTERVAL);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = stats_interval.tick() => {
                server.check_errors();

                let mixing = mixer_stats.as_ref().map(|s| s.last_sources()).unwrap_or(0);
                tracing::info!(
                    "Stats: {} clients ({} mixing), {} packets / {:.1} KB received, {} dropped, {} handshakes ({} rejected)",
                    registry.len(),
                    mixing,
                    receiver_stats.packets_received(),
                    receiver_stats.bytes_received() as f64 / 1024.0,
                    receiver_stats.packets_dropped(),
                    discovery_stats.clients_accepted(),
                    discovery_stats.clients_rejected()
                );
            }
        }
    }

    tracing::info!("Shutting down");
    server.stop();
    Ok(())
}
