//! Error types for the mixing server and capture client

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Wire protocol errors.
///
/// Decoders only return these once the leading keyword matched, so an error
/// always means "this was the message kind, but it is malformed".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Field contains a reserved delimiter: {0:?}")]
    ReservedDelimiter(String),

    #[error("Invalid port: {0:?}")]
    InvalidPort(String),

    #[error("Client name not provided")]
    MissingName,

    #[error("Client capabilities not provided")]
    MissingCapabilities,

    #[error("Not a client identification response")]
    NotIdentificationResponse,

    #[error("Invalid boolean: {0:?}")]
    InvalidBool(String),

    #[error("Invalid session token: {0:?}")]
    InvalidSessionToken(String),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Server not found after {attempts} attempts")]
    ServerNotFound { attempts: u32 },

    #[error("Server rejected the connection")]
    ConnectionRejected,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
}

/// Client registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Maximum number of connections reached: {0}")]
    MaxConnections(usize),

    #[error("Session token already registered")]
    DuplicateToken,
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
