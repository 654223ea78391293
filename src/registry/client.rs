//! Per-connection client state

use chrono::{DateTime, Utc};
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::audio::buffer::{create_shared_buffer, SharedRingBuffer};
use crate::constants::{CAPABILITY_PLAYBACK, CAPABILITY_RECORD};
use crate::protocol::SessionToken;

/// Connection status of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Connected,
    /// No traffic for longer than the connection timeout. Terminal: the
    /// entry is only ever removed from here.
    Disconnected,
}

impl fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientStatus::Connected => f.write_str("connected"),
            ClientStatus::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// What a client says it can do, as a bitset.
///
/// Stored for reporting only; nothing gates on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);
    /// Wire code 1
    pub const RECORD: Capabilities = Capabilities(1 << 0);
    /// Wire code 2
    pub const PLAYBACK: Capabilities = Capabilities(1 << 1);

    const CODES: [(u32, Capabilities); 2] = [
        (CAPABILITY_RECORD, Capabilities::RECORD),
        (CAPABILITY_PLAYBACK, Capabilities::PLAYBACK),
    ];

    /// Build from wire codes, ignoring codes we don't know
    pub fn from_codes(codes: &[u32]) -> Self {
        codes.iter().fold(Capabilities::NONE, |acc, code| {
            match Self::CODES.iter().find(|(c, _)| c == code) {
                Some((_, flag)) => acc.union(*flag),
                None => acc,
            }
        })
    }

    /// Wire codes for the set flags, ascending
    pub fn codes(&self) -> Vec<u32> {
        Self::CODES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(code, _)| *code)
            .collect()
    }

    pub const fn union(self, other: Capabilities) -> Capabilities {
        Capabilities(self.0 | other.0)
    }

    pub const fn contains(&self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn can_record(&self) -> bool {
        self.contains(Capabilities::RECORD)
    }

    pub fn can_playback(&self) -> bool {
        self.contains(Capabilities::PLAYBACK)
    }
}

/// Everything the server knows about one connection.
///
/// Cloning is cheap-ish and shares the inbound buffer; registry reads hand
/// out clones, never references into the map.
#[derive(Clone)]
pub struct Client {
    /// Display name; not unique across reconnects
    pub name: String,
    pub addr: SocketAddr,
    pub session_token: SessionToken,
    pub capabilities: Capabilities,
    pub status: ClientStatus,
    /// Wall-clock handshake time, for reporting
    pub connected_at: DateTime<Utc>,
    pub last_seen: Instant,
    /// Set only on the Connected -> Disconnected transition
    pub disconnected_at: Option<Instant>,
    /// Inbound PCM bytes waiting to be mixed
    pub buffer: SharedRingBuffer,
}

impl Client {
    pub fn new(
        name: &str,
        addr: SocketAddr,
        capabilities: Capabilities,
        session_token: SessionToken,
        buffer_capacity: usize,
        frame_len: usize,
    ) -> Self {
        Self {
            name: name.to_string(),
            addr,
            session_token,
            capabilities,
            status: ClientStatus::Connected,
            connected_at: Utc::now(),
            last_seen: Instant::now(),
            disconnected_at: None,
            buffer: create_shared_buffer(buffer_capacity, frame_len),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ClientStatus::Connected
    }

    /// Time since the last accepted packet
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }

    pub fn report(&self, now: Instant) -> ClientReport {
        ClientReport {
            name: self.name.clone(),
            addr: self.addr,
            session_token: self.session_token.clone(),
            status: self.status,
            capabilities: self.capabilities.codes(),
            connected_at: self.connected_at,
            idle: self.idle_for(now),
            buffered_bytes: self.buffer.len(),
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.name)
            .field("addr", &self.addr)
            .field("session_token", &self.session_token)
            .field("status", &self.status)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

/// Point-in-time view of a client for status output
#[derive(Debug, Clone)]
pub struct ClientReport {
    pub name: String,
    pub addr: SocketAddr,
    pub session_token: SessionToken,
    pub status: ClientStatus,
    pub capabilities: Vec<u32>,
    pub connected_at: DateTime<Utc>,
    pub idle: Duration,
    pub buffered_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capabilities_from_codes() {
        let caps = Capabilities::from_codes(&[1]);
        assert!(caps.can_record());
        assert!(!caps.can_playback());

        let caps = Capabilities::from_codes(&[2, 1, 9]);
        assert!(caps.can_record() && caps.can_playback());
        assert_eq!(caps.codes(), vec![1, 2]);

        assert_eq!(Capabilities::from_codes(&[]), Capabilities::NONE);
    }

    #[test]
    fn test_new_client_is_connected() {
        let client = Client::new(
            "studio-1",
            "127.0.0.1:4000".parse().unwrap(),
            Capabilities::RECORD,
            SessionToken::generate(),
            64,
            8,
        );
        assert!(client.is_connected());
        assert!(client.disconnected_at.is_none());
        assert_eq!(client.buffer.capacity(), 64);
        assert_eq!(client.report(Instant::now()).status, ClientStatus::Connected);
    }
}
