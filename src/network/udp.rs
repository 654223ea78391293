//! UDP socket construction

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use crate::error::NetworkError;

/// Kernel receive buffer requested for listening sockets
const RECV_BUFFER_BYTES: usize = 1 << 20;

/// Socket options applied before binding
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketOptions {
    /// Allow sending to broadcast addresses
    pub broadcast: bool,
    /// SO_REUSEADDR, so a restarted listener can rebind at once
    pub reuse_address: bool,
    /// Blocking reads return `WouldBlock`/`TimedOut` after this long
    pub read_timeout: Option<Duration>,
}

impl SocketOptions {
    /// Long-running listener that must notice shutdown within `read_timeout`
    pub fn listener(read_timeout: Duration) -> Self {
        Self {
            broadcast: false,
            reuse_address: true,
            read_timeout: Some(read_timeout),
        }
    }

    /// Client socket that broadcasts discovery probes
    pub fn broadcaster() -> Self {
        Self {
            broadcast: true,
            reuse_address: false,
            read_timeout: None,
        }
    }
}

/// Create and bind a UDP socket
pub fn create_socket(addr: SocketAddr, options: SocketOptions) -> Result<UdpSocket, NetworkError> {
    build_socket(addr, options).map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))
}

fn build_socket(addr: SocketAddr, options: SocketOptions) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;

    if options.reuse_address {
        socket.set_reuse_address(true)?;
    }
    if options.broadcast {
        socket.set_broadcast(true)?;
    }
    if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_BYTES) {
        tracing::debug!("Could not enlarge receive buffer for {}: {}", addr, e);
    }

    socket.bind(&addr.into())?;

    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(options.read_timeout)?;
    Ok(socket)
}

/// True for the errors a read timeout produces
pub fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
