//! Client-side server discovery and identification
//!
//! ```text
//! client                                server
//!   | WHO_IS_MEDIA_SERVER (broadcast)     |
//!   |------------------------------------>|
//!   |              I_AM_MEDIA_SERVER;port |
//!   |<------------------------------------|
//!   | I_AM_CLIENT;NAME:n;CAPABILITIES:c   |
//!   |------------------------------------>|
//!   |              HI_CLIENT;true;token   |
//!   |<------------------------------------|
//! ```
//!
//! Each attempt waits up to the per-attempt timeout for the exchange to
//! finish. After the last attempt the server is reported as not found.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Instant;

use crate::config::NetworkConfig;
use crate::error::{NetworkError, Result};
use crate::network::udp::{create_socket, SocketOptions};
use crate::protocol::{
    decode_discovery_response, decode_identification_response, encode_identification_request,
    Action, SessionToken, DISCOVERY_PROBE, IDENTIFICATION_RESPONSE, SESSION_TOKEN_LEN,
};

/// Longest reply we expect: `HI_CLIENT;false;` or `HI_CLIENT;true;<token>`
const RESPONSE_BUFFER_LEN: usize =
    IDENTIFICATION_RESPONSE.len() + "false".len() + 2 + SESSION_TOKEN_LEN;

/// Outcome of a successful handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSession {
    /// Server address with the advertised audio port
    pub audio_addr: SocketAddr,
    pub session_token: SessionToken,
}

/// Find a server and identify to it.
///
/// Returns [`NetworkError::ServerNotFound`] once every attempt has timed out,
/// and [`NetworkError::ConnectionRejected`] if the server answers `false`.
pub fn discover_server(
    config: &NetworkConfig,
    name: &str,
    capabilities: &[u32],
) -> Result<ServerSession> {
    let identification = encode_identification_request(name, capabilities)?;
    let target = config.discovery_target_addr();

    let local = match target.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    let socket = create_socket(SocketAddr::new(local, 0), SocketOptions::broadcaster())?;

    for attempt in 1..=config.discovery_attempts {
        tracing::info!(
            "Looking for a media server at {} (attempt {}/{})",
            target,
            attempt,
            config.discovery_attempts
        );
        socket
            .send_to(DISCOVERY_PROBE.as_bytes(), target)
            .map_err(|e| NetworkError::SendFailed(e.to_string()))?;

        let deadline = Instant::now() + config.discovery_timeout();
        if let Some(session) = run_attempt(&socket, deadline, &identification)? {
            tracing::info!(
                "Connected to media server at {} with session {}",
                session.audio_addr,
                session.session_token
            );
            return Ok(session);
        }
    }

    Err(NetworkError::ServerNotFound {
        attempts: config.discovery_attempts,
    }
    .into())
}

/// Read replies until `deadline`. `Ok(None)` means the attempt timed out.
fn run_attempt(
    socket: &UdpSocket,
    deadline: Instant,
    identification: &str,
) -> Result<Option<ServerSession>> {
    let mut buf = [0u8; RESPONSE_BUFFER_LEN];
    // Server that answered the probe, with its audio port
    let mut pending: Option<SocketAddr> = None;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        socket
            .set_read_timeout(Some(remaining))
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;

        let (len, peer) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) => {
                tracing::debug!("Discovery attempt ended: {}", e);
                return Ok(None);
            }
        };
        let message = String::from_utf8_lossy(&buf[..len]);
        tracing::debug!("Reply from {}: {}", peer, message);

        match Action::classify(message.as_bytes()) {
            Action::Discover => {
                let port = match decode_discovery_response(&message) {
                    Ok(Some(port)) => port,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!("Bad discovery response from {}: {}", peer, e);
                        continue;
                    }
                };

                socket
                    .send_to(identification.as_bytes(), peer)
                    .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
                pending = Some(SocketAddr::new(peer.ip(), port));
            }
            Action::Identification => {
                let audio_addr = match pending {
                    Some(addr) if addr.ip() == peer.ip() => addr,
                    _ => continue,
                };

                let response = match decode_identification_response(&message) {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::warn!("Bad identification response from {}: {}", peer, e);
                        continue;
                    }
                };
                if !response.ok {
                    return Err(NetworkError::ConnectionRejected.into());
                }
                match response.session_token {
                    Some(session_token) => {
                        return Ok(Some(ServerSession {
                            audio_addr,
                            session_token,
                        }))
                    }
                    None => tracing::warn!("Server {} accepted without a session token", peer),
                }
            }
            action => tracing::debug!("Ignoring {:?} reply from {}", action, peer),
        }
    }
}
