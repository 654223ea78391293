//! Client-side audio sender
//!
//! Splits each captured buffer into datagrams of at most `packet_size`
//! payload bytes, each prefixed with the session's audio header. Sends are
//! fire-and-forget.

use bytes::BytesMut;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::pcm::encode_f32_le;
use crate::error::{NetworkError, Result};
use crate::network::handshake::ServerSession;
use crate::network::udp::{create_socket, SocketOptions};
use crate::protocol::{encode_audio_header, AUDIO_HEADER_LEN};

/// Sender counters
#[derive(Debug, Default)]
pub struct SenderStats {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_errors: AtomicU64,
}

impl SenderStats {
    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    /// Payload bytes, headers excluded
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn send_errors(&self) -> u64 {
        self.send_errors.load(Ordering::Relaxed)
    }
}

pub struct AudioSender {
    socket: UdpSocket,
    header: [u8; AUDIO_HEADER_LEN],
    /// Payload bytes per datagram, a whole number of frames
    chunk_size: usize,
    pcm: Vec<u8>,
    packet: BytesMut,
    stats: Arc<SenderStats>,
}

impl AudioSender {
    /// Open a socket connected to the server's audio port
    pub fn connect(session: &ServerSession, packet_size: usize, frame_bytes: usize) -> Result<Self> {
        let local = match session.audio_addr.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let socket = create_socket(SocketAddr::new(local, 0), SocketOptions::default())?;
        socket
            .connect(session.audio_addr)
            .map_err(|e| NetworkError::SendFailed(format!("{}: {}", session.audio_addr, e)))?;

        // A lost datagram must not shift the frame alignment of the stream
        let frame_bytes = frame_bytes.max(1);
        let chunk_size = (packet_size / frame_bytes).max(1) * frame_bytes;

        tracing::info!(
            "Sending audio to {} in chunks of {} bytes",
            session.audio_addr,
            chunk_size
        );

        Ok(Self {
            socket,
            header: encode_audio_header(&session.session_token),
            chunk_size,
            pcm: Vec::new(),
            packet: BytesMut::with_capacity(AUDIO_HEADER_LEN + chunk_size),
            stats: Arc::new(SenderStats::default()),
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn stats(&self) -> Arc<SenderStats> {
        self.stats.clone()
    }

    /// Encode and send one capture buffer. Returns the datagrams sent.
    pub fn send_samples(&mut self, samples: &[f32]) -> usize {
        let mut pcm = std::mem::take(&mut self.pcm);
        encode_f32_le(samples, &mut pcm);
        let sent = self.send_pcm(&pcm);
        self.pcm = pcm;
        sent
    }

    /// Send raw little-endian PCM bytes. Returns the datagrams sent.
    pub fn send_pcm(&mut self, pcm: &[u8]) -> usize {
        let mut sent = 0;

        for chunk in pcm.chunks(self.chunk_size) {
            self.packet.clear();
            self.packet.extend_from_slice(&self.header);
            self.packet.extend_from_slice(chunk);

            match self.socket.send(&self.packet) {
                Ok(_) => {
                    sent += 1;
                    self.stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .bytes_sent
                        .fetch_add(chunk.len() as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    // Nobody listening yet shows up as ECONNREFUSED here
                    self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!("Audio send failed: {}", e);
                }
            }
        }

        sent
    }
}
