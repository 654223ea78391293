//! # LAN Mixer
//!
//! Several clients capture their microphones and stream raw PCM over the LAN
//! to one server, which mixes every active stream and plays the result.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────── CLIENT ─────────────────────────────┐
//! │  ┌────────────┐   ┌─────────────────────┐   ┌─────────────────┐  │
//! │  │ Microphone │──▶│ Capture callback    │──▶│ AudioSender     │  │
//! │  └────────────┘   │ (audio::capture)    │   │ chunk + tag     │  │
//! │                   └─────────────────────┘   └────────┬────────┘  │
//! │  ┌──────────────────────────────┐                    │           │
//! │  │ network::handshake           │  discovery +       │           │
//! │  │ probe ▶ port ▶ ident ▶ token │  identification    │           │
//! │  └──────────────┬───────────────┘                    │           │
//! └─────────────────┼────────────────────────────────────┼───────────┘
//!                   │ UDP (discovery port)               │ UDP (audio port)
//!                   ▼                                    ▼
//! ┌───────────────────────────── SERVER ─────────────────────────────┐
//! │  ┌──────────────────────┐            ┌───────────────────────┐   │
//! │  │ DiscoveryService     │──register─▶│ ClientRegistry        │   │
//! │  │ (network::discovery) │            │ token ▶ Client        │   │
//! │  └──────────────────────┘            │   └ RingBuffer<u8>    │   │
//! │  ┌──────────────────────┐  append    │                       │   │
//! │  │ AudioReceiver        │───────────▶│ RegistryCleaner       │   │
//! │  │ (network::receiver)  │            └───────────┬───────────┘   │
//! │  └──────────────────────┘                        │ ready buffers │
//! │                                      ┌───────────▼───────────┐   │
//! │                                      │ Mixer (playback cb)   │   │
//! │                                      │ sum + clamp ▶ device  │   │
//! │                                      └───────────────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod registry;

#[cfg(feature = "client")]
pub mod client;
#[cfg(feature = "server")]
pub mod server;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for capture and playback
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Default device callback period in milliseconds
    pub const DEFAULT_PERIOD_MS: u32 = 10;

    /// Largest audio payload per UDP datagram; stays under a typical MTU
    /// once the 43-byte header and IP/UDP headers are added
    pub const NETWORK_PACKET_SIZE: usize = 1400;

    /// Default UDP port for audio data
    pub const DEFAULT_AUDIO_PORT: u16 = 5000;

    /// Default UDP port for discovery and identification
    pub const DEFAULT_DISCOVERY_PORT: u16 = 5001;

    /// Per-client inbound buffer, in bytes
    pub const CLIENT_BUFFER_BYTES: usize = 48000;

    /// Packets a client must have queued before it joins the mix:
    /// one to play, one standing, one in flight
    pub const READY_PACKETS: usize = 3;

    /// Maximum number of registered clients
    pub const MAX_CONNECTIONS: usize = 150;

    /// Seconds without traffic before a client is disconnected
    pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

    /// Registry cleaner tick
    pub const CLEANUP_INTERVAL_MS: u64 = 1000;

    /// Cleaner ticks between status dumps
    pub const STATUS_LOG_INTERVAL: u32 = 15;

    /// Discovery probes sent before giving up
    pub const DISCOVERY_ATTEMPTS: u32 = 3;

    /// How long each discovery attempt waits for replies
    pub const DISCOVERY_TIMEOUT_MS: u64 = 2000;

    /// Listener read timeout, bounds shutdown latency
    pub const READ_TIMEOUT_MS: u64 = 100;

    /// Capability code: can record
    pub const CAPABILITY_RECORD: u32 = 1;

    /// Capability code: can play back
    pub const CAPABILITY_PLAYBACK: u32 = 2;
}
