//! Server-side audio ingest loop
//!
//! Every datagram on the audio port is matched to a registered session by
//! its token and its payload appended to that client's ring buffer. Packets
//! for unknown or timed-out sessions are dropped quietly; that is ordinary
//! churn, not an error.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::NetworkConfig;
use crate::error::{NetworkError, Result};
use crate::network::udp::{create_socket, is_timeout, SocketOptions};
use crate::protocol::{decode_audio_packet, AUDIO_HEADER_LEN};
use crate::registry::ClientRegistry;

/// Ingest counters
#[derive(Debug, Default)]
pub struct ReceiverStats {
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    packets_dropped: AtomicU64,
}

impl ReceiverStats {
    /// Packets credited to a client
    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    /// Payload bytes credited to a client
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Malformed packets and packets for unknown or disconnected sessions
    pub fn packets_dropped(&self) -> u64 {
        self.packets_dropped.load(Ordering::Relaxed)
    }
}

/// Audio packet receiver
pub struct AudioReceiver {
    socket: Option<UdpSocket>,
    local_addr: SocketAddr,
    registry: Arc<ClientRegistry>,
    /// Largest expected payload
    packet_size: usize,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    stats: Arc<ReceiverStats>,
}

impl AudioReceiver {
    /// Bind the audio port. With port 0 the OS picks one; see [`Self::local_addr`].
    pub fn bind(
        config: &NetworkConfig,
        registry: Arc<ClientRegistry>,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        let socket = create_socket(
            config.audio_addr(),
            SocketOptions::listener(config.read_timeout()),
        )?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        Ok(Self {
            socket: Some(socket),
            local_addr,
            registry,
            packet_size: config.packet_size,
            running,
            thread_handle: None,
            stats: Arc::new(ReceiverStats::default()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> Arc<ReceiverStats> {
        self.stats.clone()
    }

    pub fn start(&mut self) -> std::io::Result<()> {
        let socket = match self.socket.take() {
            Some(socket) => socket,
            None => return Ok(()),
        };

        let registry = self.registry.clone();
        let running = self.running.clone();
        let stats = self.stats.clone();
        // Twice the largest expected datagram; a read that fills it may be truncated
        let buffer_size = (self.packet_size + AUDIO_HEADER_LEN) * 2;
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("audio-ingest".to_string())
            .spawn(move || {
                let mut buf = vec![0u8; buffer_size];

                while running.load(Ordering::Relaxed) {
                    match socket.recv_from(&mut buf) {
                        Ok((len, from)) if len == buf.len() => {
                            tracing::debug!("Dropped possibly truncated datagram from {}", from);
                            stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok((len, from)) => {
                            if !ingest(&registry, &buf[..len], &stats) {
                                tracing::trace!("Dropped {} byte datagram from {}", len, from);
                            }
                        }
                        Err(e) if is_timeout(&e) => continue,
                        Err(e) => {
                            tracing::warn!("Audio receive failed: {}", e);
                        }
                    }
                }
                tracing::debug!("Audio ingest stopped");
            })?;

        tracing::info!("Audio receiver listening on {}", self.local_addr);
        self.thread_handle = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle.is_some() && self.running.load(Ordering::SeqCst)
    }
}

impl Drop for AudioReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Credit one datagram to its session. Returns false if it was dropped.
pub fn ingest(registry: &ClientRegistry, datagram: &[u8], stats: &ReceiverStats) -> bool {
    let packet = match decode_audio_packet(datagram) {
        Some(packet) => packet,
        None => {
            stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
    };

    let buffer = match registry.connected_buffer(packet.session_token) {
        Some(buffer) => buffer,
        None => {
            tracing::debug!("Audio for unknown session {}", packet.session_token);
            stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
    };

    // A partial frame would shift every later sample onto the wrong channel
    if packet.payload.len() % buffer.frame_len() != 0 {
        tracing::debug!(
            "Audio for session {} is not frame-aligned ({} bytes)",
            packet.session_token,
            packet.payload.len()
        );
        stats.packets_dropped.fetch_add(1, Ordering::Relaxed);
        return false;
    }

    buffer.push(packet.payload);
    registry.touch(packet.session_token);

    stats.packets_received.fetch_add(1, Ordering::Relaxed);
    stats
        .bytes_received
        .fetch_add(packet.payload.len() as u64, Ordering::Relaxed);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_audio_packet, SessionToken};
    use crate::registry::{Capabilities, ClientStatus};
    use std::time::{Duration, Instant};

    fn registry() -> ClientRegistry {
        ClientRegistry::with_limits(4, Duration::from_secs(30), 4800, 8)
    }

    #[test]
    fn test_ingest_credits_matching_client() {
        let registry = registry();
        let stats = ReceiverStats::default();
        let token = SessionToken::generate();
        let client = registry
            .add_client(
                "studio-1",
                "127.0.0.1:4000".parse().unwrap(),
                Capabilities::RECORD,
                token.clone(),
            )
            .unwrap();

        let payload: Vec<u8> = (0..64).collect();
        assert!(ingest(&registry, &encode_audio_packet(&token, &payload), &stats));

        assert_eq!(client.buffer.read(64), payload);
        assert_eq!(stats.packets_received(), 1);
        assert_eq!(stats.bytes_received(), 64);
    }

    #[test]
    fn test_ingest_refreshes_last_seen() {
        let registry = registry();
        let stats = ReceiverStats::default();
        let token = SessionToken::generate();
        let client = registry
            .add_client("a", "127.0.0.1:4000".parse().unwrap(), Capabilities::NONE, token.clone())
            .unwrap();

        std::thread::sleep(Duration::from_millis(5));
        ingest(&registry, &encode_audio_packet(&token, &[0; 8]), &stats);

        let refreshed = registry.get_client_by_session_token(token.as_str()).unwrap();
        assert!(refreshed.last_seen > client.last_seen);
    }

    #[test]
    fn test_ingest_drops_unknown_session() {
        let registry = registry();
        let stats = ReceiverStats::default();

        let packet = encode_audio_packet(&SessionToken::generate(), &[0; 16]);
        assert!(!ingest(&registry, &packet, &stats));
        assert_eq!(stats.packets_dropped(), 1);
    }

    #[test]
    fn test_ingest_drops_disconnected_session() {
        let registry = registry();
        let stats = ReceiverStats::default();
        let token = SessionToken::generate();
        let mut client = registry
            .add_client("a", "127.0.0.1:4000".parse().unwrap(), Capabilities::NONE, token.clone())
            .unwrap();
        client.status = ClientStatus::Disconnected;
        client.disconnected_at = Some(Instant::now());
        registry.set_client(client.clone()).unwrap();

        assert!(!ingest(&registry, &encode_audio_packet(&token, &[0; 16]), &stats));
        assert!(client.buffer.is_empty());
    }

    #[test]
    fn test_ingest_drops_malformed() {
        let registry = registry();
        let stats = ReceiverStats::default();

        assert!(!ingest(&registry, b"AUDIO;short", &stats));
        assert!(!ingest(&registry, b"WHO_IS_MEDIA_SERVER", &stats));
        assert_eq!(stats.packets_dropped(), 2);
    }

    #[test]
    fn test_ingest_drops_partial_frame() {
        let registry = registry();
        let stats = ReceiverStats::default();
        let token = SessionToken::generate();
        let client = registry
            .add_client("a", "127.0.0.1:4000".parse().unwrap(), Capabilities::NONE, token.clone())
            .unwrap();

        assert!(!ingest(&registry, &encode_audio_packet(&token, &[0; 12]), &stats));
        assert!(client.buffer.is_empty());
        assert_eq!(stats.packets_dropped(), 1);
        assert_eq!(stats.packets_received(), 0);

        assert!(ingest(&registry, &encode_audio_packet(&token, &[0; 16]), &stats));
        assert_eq!(client.buffer.len(), 16);
    }
}
