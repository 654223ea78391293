//! Network subsystem for UDP discovery and audio transport

pub mod discovery;
pub mod handshake;
pub mod receiver;
pub mod sender;
pub mod udp;

pub use discovery::{DiscoveryService, DiscoveryStats};
pub use handshake::{discover_server, ServerSession};
pub use receiver::{AudioReceiver, ReceiverStats};
pub use sender::{AudioSender, SenderStats};
pub use udp::{create_socket, SocketOptions};
