//! Server-side discovery and identification listener
//!
//! Answers `WHO_IS_MEDIA_SERVER` probes with the audio port and registers
//! clients that introduce themselves. Failures are NACKed to the sender and
//! logged; the listener keeps going.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::NetworkConfig;
use crate::error::{NetworkError, Result};
use crate::network::udp::{create_socket, is_timeout, SocketOptions};
use crate::protocol::{
    decode_identification_request, encode_discovery_response, encode_identification_response,
    Action, IdentificationResponse, SessionToken, DISCOVERY_PROBE,
};
use crate::registry::{Capabilities, ClientRegistry};

/// Largest control datagram we read
const DISCOVERY_BUFFER_SIZE: usize = 2048;

/// Listener counters
#[derive(Debug, Default)]
pub struct DiscoveryStats {
    probes_answered: AtomicU64,
    clients_accepted: AtomicU64,
    clients_rejected: AtomicU64,
}

impl DiscoveryStats {
    pub fn probes_answered(&self) -> u64 {
        self.probes_answered.load(Ordering::Relaxed)
    }

    pub fn clients_accepted(&self) -> u64 {
        self.clients_accepted.load(Ordering::Relaxed)
    }

    pub fn clients_rejected(&self) -> u64 {
        self.clients_rejected.load(Ordering::Relaxed)
    }
}

/// Discovery / identification service
pub struct DiscoveryService {
    /// Moved into the listener thread on start
    socket: Option<UdpSocket>,
    local_addr: SocketAddr,
    registry: Arc<ClientRegistry>,
    /// Audio port advertised to clients
    audio_port: u16,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    stats: Arc<DiscoveryStats>,
}

impl DiscoveryService {
    /// Bind the discovery port. Failure here is fatal for the server.
    pub fn bind(
        config: &NetworkConfig,
        registry: Arc<ClientRegistry>,
        audio_port: u16,
        running: Arc<AtomicBool>,
    ) -> Result<Self> {
        let socket = create_socket(
            config.discovery_addr(),
            SocketOptions::listener(config.read_timeout()),
        )?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        Ok(Self {
            socket: Some(socket),
            local_addr,
            registry,
            audio_port,
            running,
            thread_handle: None,
            stats: Arc::new(DiscoveryStats::default()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn audio_port(&self) -> u16 {
        self.audio_port
    }

    pub fn stats(&self) -> Arc<DiscoveryStats> {
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
        let audio_port = self.audio_port;
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("discovery-listener".to_string())
            .spawn(move || {
                let mut buf = [0u8; DISCOVERY_BUFFER_SIZE];

                while running.load(Ordering::Relaxed) {
                    let (len, from) = match socket.recv_from(&mut buf) {
                        Ok(received) => received,
                        Err(e) if is_timeout(&e) => continue,
                        Err(e) => {
                            tracing::warn!("Discovery receive failed: {}", e);
                            continue;
                        }
                    };

                    tracing::trace!("Discovery datagram of {} bytes from {}", len, from);
                    let reply =
                        match handle_message(&registry, audio_port, &buf[..len], from, &stats) {
                            Some(reply) => reply,
                            None => continue,
                        };

                    if let Err(e) = socket.send_to(reply.as_bytes(), from) {
                        tracing::warn!("Failed to reply to {}: {}", from, e);
                    }
                }
                tracing::debug!("Discovery listener stopped");
            })?;

        tracing::info!(
            "Discovery listener on {}, advertising audio port {}",
            self.local_addr,
            self.audio_port
        );
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

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Work out the reply to one control datagram, `None` when it gets no answer
fn handle_message(
    registry: &ClientRegistry,
    audio_port: u16,
    datagram: &[u8],
    from: SocketAddr,
    stats: &DiscoveryStats,
) -> Option<String> {
    match Action::classify(datagram) {
        // Our own kind of reply from another server is not a probe
        Action::Discover if datagram == DISCOVERY_PROBE.as_bytes() => {
            stats.probes_answered.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Discovery probe from {}", from);
            Some(encode_discovery_response(audio_port))
        }
        Action::Identification => {
            let response = match identify(registry, datagram, from) {
                Ok(Some(session_token)) => {
                    stats.clients_accepted.fetch_add(1, Ordering::Relaxed);
                    registry.print_statuses();
                    IdentificationResponse::accepted(session_token)
                }
                Ok(None) => return None,
                Err(rejection) => {
                    stats.clients_rejected.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Rejected identification from {}: {}", from, rejection);
                    IdentificationResponse::rejected()
                }
            };
            Some(encode_identification_response(&response))
        }
        action => {
            tracing::trace!("Ignoring {:?} datagram from {}", action, from);
            None
        }
    }
}

/// Register the sender of an identification request.
///
/// `Ok(None)` means the datagram was an identification response, not a request.
fn identify(
    registry: &ClientRegistry,
    datagram: &[u8],
    from: SocketAddr,
) -> Result<Option<SessionToken>> {
    let message = String::from_utf8_lossy(datagram);
    let request = match decode_identification_request(&message)? {
        Some(request) => request,
        None => return Ok(None),
    };

    let session_token = SessionToken::generate();
    registry.add_client(
        &request.name,
        from,
        Capabilities::from_codes(&request.capabilities),
        session_token.clone(),
    )?;

    Ok(Some(session_token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        decode_discovery_response, decode_identification_response, encode_identification_request,
    };
    use std::time::Duration;

    fn registry(max: usize) -> ClientRegistry {
        ClientRegistry::with_limits(max, Duration::from_secs(30), 4800, 8)
    }

    fn peer() -> SocketAddr {
        "192.168.1.40:53000".parse().unwrap()
    }

    #[test]
    fn test_probe_gets_audio_port() {
        let stats = DiscoveryStats::default();
        let reply = handle_message(&registry(4), 5000, DISCOVERY_PROBE.as_bytes(), peer(), &stats);

        assert_eq!(decode_discovery_response(&reply.unwrap()), Ok(Some(5000)));
        assert_eq!(stats.probes_answered(), 1);
    }

    #[test]
    fn test_discovery_response_is_ignored() {
        let stats = DiscoveryStats::default();
        let reply = handle_message(&registry(4), 5000, b"I_AM_MEDIA_SERVER;6000", peer(), &stats);
        assert!(reply.is_none());
    }

    #[test]
    fn test_identification_registers_client() {
        let registry = registry(4);
        let stats = DiscoveryStats::default();
        let request = encode_identification_request("studio-1", &[1]).unwrap();

        let reply = handle_message(&registry, 5000, request.as_bytes(), peer(), &stats).unwrap();
        let response = decode_identification_response(&reply).unwrap();

        assert!(response.ok);
        let token = response.session_token.unwrap();
        assert_eq!(token.as_str().len(), 36);

        let client = registry.get_client_by_session_token(token.as_str()).unwrap();
        assert_eq!(client.name, "studio-1");
        assert_eq!(client.addr, peer());
        assert!(client.capabilities.can_record());
        assert_eq!(stats.clients_accepted(), 1);
    }

    #[test]
    fn test_malformed_identification_is_nacked() {
        let registry = registry(4);
        let stats = DiscoveryStats::default();

        let reply = handle_message(&registry, 5000, b"I_AM_CLIENT;NAME:studio-1", peer(), &stats);
        assert_eq!(reply.as_deref(), Some("HI_CLIENT;false;"));
        assert!(registry.is_empty());
        assert_eq!(stats.clients_rejected(), 1);
    }

    #[test]
    fn test_full_registry_is_nacked() {
        let registry = registry(1);
        let stats = DiscoveryStats::default();
        let request = encode_identification_request("a", &[1]).unwrap();
        handle_message(&registry, 5000, request.as_bytes(), peer(), &stats).unwrap();

        let request = encode_identification_request("b", &[1]).unwrap();
        let reply = handle_message(&registry, 5000, request.as_bytes(), peer(), &stats);
        assert_eq!(reply.as_deref(), Some("HI_CLIENT;false;"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_datagram_is_ignored() {
        let stats = DiscoveryStats::default();
        assert!(handle_message(&registry(4), 5000, b"HELLO", peer(), &stats).is_none());
        assert!(handle_message(&registry(4), 5000, b"HI_CLIENT;true;", peer(), &stats).is_none());
    }

    #[test]
    fn test_service_answers_over_loopback() {
        let config = NetworkConfig {
            bind_address: "127.0.0.1".parse().unwrap(),
            discovery_port: 0,
            read_timeout_ms: 20,
            ..NetworkConfig::default()
        };
        let running = Arc::new(AtomicBool::new(true));
        let mut service =
            DiscoveryService::bind(&config, Arc::new(registry(4)), 5123, running).unwrap();
        service.start().unwrap();

        let probe = UdpSocket::bind("127.0.0.1:0").unwrap();
        probe.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        probe.send_to(DISCOVERY_PROBE.as_bytes(), service.local_addr()).unwrap();

        let mut buf = [0u8; 64];
        let (n, _) = probe.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"I_AM_MEDIA_SERVER;5123");

        service.stop();
        assert!(!service.is_running());
    }
}
