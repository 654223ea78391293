//! Wire protocol shared by the server and its clients
//!
//! Every control message is ASCII text. Top-level fields are joined with
//! [`PARTS_DELIMITER`] and key/value sub-fields with [`ITEM_DELIMITER`]:
//!
//! ```text
//! WHO_IS_MEDIA_SERVER
//! I_AM_MEDIA_SERVER;<port>
//! I_AM_CLIENT;NAME:<name>;CAPABILITIES:<c1,c2,...>
//! HI_CLIENT;<true|false>;<session token>
//! AUDIO;<session token>;<raw little-endian f32 PCM>
//! ```
//!
//! The audio header has a fixed length ([`AUDIO_HEADER_LEN`]); the payload
//! after it is never scanned for delimiters.

pub mod messages;

use std::borrow::Borrow;
use std::fmt;
use uuid::Uuid;

use crate::error::ProtocolError;

pub use messages::{
    decode_audio_packet, decode_discovery_response, decode_identification_request,
    decode_identification_response, encode_audio_header, encode_audio_packet,
    encode_discovery_response, encode_identification_request, encode_identification_response,
    AudioPacket, IdentificationRequest, IdentificationResponse,
};

/// Separator between top-level message fields
pub const PARTS_DELIMITER: char = ';';

/// Separator between a key and its value inside a field
pub const ITEM_DELIMITER: char = ':';

/// Separator between capability codes
pub const CAPABILITY_SEPARATOR: char = ',';

/// Broadcast by clients looking for a server
pub const DISCOVERY_PROBE: &str = "WHO_IS_MEDIA_SERVER";

/// Server reply to a discovery probe
pub const DISCOVERY_RESPONSE: &str = "I_AM_MEDIA_SERVER";

/// Client introduction
pub const IDENTIFICATION_REQUEST: &str = "I_AM_CLIENT";

/// Server reply to a client introduction
pub const IDENTIFICATION_RESPONSE: &str = "HI_CLIENT";

/// Key of the name field in an identification request
pub const NAME_KEY: &str = "NAME";

/// Key of the capabilities field in an identification request
pub const CAPABILITIES_KEY: &str = "CAPABILITIES";

/// Leading keyword of every audio datagram
pub const AUDIO_KEYWORD: &str = "AUDIO";

/// Length of a hyphenated UUID session token
pub const SESSION_TOKEN_LEN: usize = 36;

/// `AUDIO;<token>;`
pub const AUDIO_HEADER_LEN: usize = AUDIO_KEYWORD.len() + 1 + SESSION_TOKEN_LEN + 1;

/// What a datagram asks the receiver to do, judged from its leading keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Discovery probe or discovery response
    Discover,
    /// Identification request or identification response
    Identification,
    /// Tagged audio data
    ExchangeAudio,
    Unknown,
}

impl Action {
    /// Classify a full or partial message without parsing it.
    ///
    /// Only the bytes before the first [`PARTS_DELIMITER`] are inspected, so
    /// audio payloads are never touched.
    pub fn classify(message: &[u8]) -> Action {
        let keyword = match message.iter().position(|&b| b == PARTS_DELIMITER as u8) {
            Some(end) => &message[..end],
            None => message,
        };

        match keyword {
            k if k == DISCOVERY_PROBE.as_bytes() || k == DISCOVERY_RESPONSE.as_bytes() => {
                Action::Discover
            }
            k if k == IDENTIFICATION_REQUEST.as_bytes()
                || k == IDENTIFICATION_RESPONSE.as_bytes() =>
            {
                Action::Identification
            }
            k if k == AUDIO_KEYWORD.as_bytes() => Action::ExchangeAudio,
            _ => Action::Unknown,
        }
    }
}

/// Returns true if `c` may not appear inside a name or token
pub fn is_reserved(c: char) -> bool {
    matches!(c, PARTS_DELIMITER | ITEM_DELIMITER | CAPABILITY_SEPARATOR)
}

/// Opaque per-connection identifier issued at handshake time
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionToken(String);

impl SessionToken {
    /// Mint a fresh random token
    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    /// Validate a token received off the wire
    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        let valid = s.len() == SESSION_TOKEN_LEN
            && s.chars().all(|c| c.is_ascii_graphic() && !is_reserved(c));

        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(ProtocolError::InvalidSessionToken(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SessionToken {
    fn borrow(&self) -> &str {
        &self.0
    }
}
