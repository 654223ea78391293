//! Application configuration
//!
//! Loaded from `config.toml` in the platform config directory unless a path
//! is given explicitly. Every section and field has a default, so a partial
//! file (or no file) is fine.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub audio: AudioConfig,
    pub registry: RegistryConfig,
    pub client: ClientConfig,
}

/// Sockets, ports and the discovery budget
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local address the server binds its sockets to
    pub bind_address: IpAddr,
    /// Server audio-data port (advertised through discovery)
    pub audio_port: u16,
    pub discovery_port: u16,
    /// Where clients send discovery probes; broadcast unless a host is known
    pub discovery_target: IpAddr,
    /// Largest audio payload per datagram, in bytes
    pub packet_size: usize,
    pub discovery_attempts: u32,
    pub discovery_timeout_ms: u64,
    /// How long listener threads block before re-checking for shutdown
    pub read_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            audio_port: DEFAULT_AUDIO_PORT,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            discovery_target: IpAddr::V4(Ipv4Addr::BROADCAST),
            packet_size: NETWORK_PACKET_SIZE,
            discovery_attempts: DISCOVERY_ATTEMPTS,
            discovery_timeout_ms: DISCOVERY_TIMEOUT_MS,
            read_timeout_ms: READ_TIMEOUT_MS,
        }
    }
}

impl NetworkConfig {
    pub fn audio_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.audio_port)
    }

    pub fn discovery_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.discovery_port)
    }

    pub fn discovery_target_addr(&self) -> SocketAddr {
        SocketAddr::new(self.discovery_target, self.discovery_port)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Device format and per-client buffering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Device callback period
    pub period_ms: u32,
    /// Inbound ring buffer size per client, in bytes
    pub client_buffer_bytes: usize,
    /// Packets a client must have buffered before it is mixed
    pub ready_packets: usize,
    /// Case-insensitive name snippet; default device when unset
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            period_ms: DEFAULT_PERIOD_MS,
            client_buffer_bytes: CLIENT_BUFFER_BYTES,
            ready_packets: READY_PACKETS,
            input_device: None,
            output_device: None,
        }
    }
}

impl AudioConfig {
    /// Bytes in one interleaved f32 frame
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * std::mem::size_of::<f32>()
    }

    /// Frames per device callback
    pub fn period_frames(&self) -> u32 {
        self.sample_rate * self.period_ms / 1000
    }
}

/// Client registry limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub max_connections: usize,
    pub connection_timeout_secs: u64,
    pub cleanup_interval_ms: u64,
    /// Cleaner ticks between status dumps; 0 disables
    pub status_log_interval: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: MAX_CONNECTIONS,
            connection_timeout_secs: CONNECTION_TIMEOUT_SECS,
            cleanup_interval_ms: CLEANUP_INTERVAL_MS,
            status_log_interval: STATUS_LOG_INTERVAL,
        }
    }
}

impl RegistryConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

/// How a client introduces itself
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub name: String,
    /// Capability codes sent during identification
    pub capabilities: Vec<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: format!("client-{}", std::process::id()),
            capabilities: vec![CAPABILITY_RECORD],
        }
    }
}

impl AppConfig {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };

        if !path.exists() {
            tracing::info!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)?;
        let config = Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the services cannot run with
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("network.packet_size", self.network.packet_size == 0),
            ("audio.channels", self.audio.channels == 0),
            ("audio.client_buffer_bytes", self.audio.client_buffer_bytes == 0),
            ("registry.max_connections", self.registry.max_connections == 0),
        ];
        match zero.iter().find(|(_, is_zero)| *is_zero) {
            Some((field, _)) => Err(Error::Config(format!("{} must be non-zero", field))),
            None => Ok(()),
        }
    }

    /// Default config file location
    pub fn config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("", "", "lan-mixer")
            .ok_or_else(|| Error::Config("No home directory for config lookup".to_string()))?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}
