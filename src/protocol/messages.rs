//! Encode/decode pairs for every message kind
//!
//! Decoders return `Ok(None)` when the input is simply a different message
//! (wrong keyword or field count) and `Err` when the keyword matched but the
//! body is malformed.

use crate::error::ProtocolError;
use crate::protocol::{
    is_reserved, SessionToken, AUDIO_HEADER_LEN, AUDIO_KEYWORD, CAPABILITIES_KEY,
    CAPABILITY_SEPARATOR, DISCOVERY_RESPONSE, IDENTIFICATION_REQUEST, IDENTIFICATION_RESPONSE,
    ITEM_DELIMITER, NAME_KEY, PARTS_DELIMITER,
};

/// A client introducing itself to the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentificationRequest {
    pub name: String,
    /// Positive capability codes; unparseable codes are dropped on decode
    pub capabilities: Vec<u32>,
}

/// The server's answer to an [`IdentificationRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentificationResponse {
    pub ok: bool,
    /// Empty on the wire when the request was rejected
    pub session_token: Option<SessionToken>,
}

impl IdentificationResponse {
    pub fn accepted(session_token: SessionToken) -> Self {
        Self {
            ok: true,
            session_token: Some(session_token),
        }
    }

    pub fn rejected() -> Self {
        Self {
            ok: false,
            session_token: None,
        }
    }
}

/// A decoded audio datagram, borrowing from the receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioPacket<'a> {
    pub session_token: &'a str,
    pub payload: &'a [u8],
}

fn join_parts(parts: &[&str]) -> String {
    parts.join(&PARTS_DELIMITER.to_string())
}

fn join_items(key: &str, value: &str) -> String {
    format!("{}{}{}", key, ITEM_DELIMITER, value)
}

/// Split `KEY:value`, returning the value only if the key matches
fn item_value<'a>(field: &'a str, key: &str) -> Option<&'a str> {
    let mut items = field.split(ITEM_DELIMITER);
    match (items.next(), items.next(), items.next()) {
        (Some(k), Some(value), None) if k == key => Some(value),
        _ => None,
    }
}

/// `I_AM_MEDIA_SERVER;<port>`
pub fn encode_discovery_response(port: u16) -> String {
    join_parts(&[DISCOVERY_RESPONSE, &port.to_string()])
}

/// Returns the advertised audio port, `None` if this is not a discovery response
pub fn decode_discovery_response(message: &str) -> Result<Option<u16>, ProtocolError> {
    let parts: Vec<&str> = message.split(PARTS_DELIMITER).collect();
    if parts.len() != 2 || parts[0] != DISCOVERY_RESPONSE {
        return Ok(None);
    }

    parts[1]
        .parse::<u16>()
        .map(Some)
        .map_err(|_| ProtocolError::InvalidPort(parts[1].to_string()))
}

/// `I_AM_CLIENT;NAME:<name>;CAPABILITIES:<c1,c2,...>`
pub fn encode_identification_request(
    name: &str,
    capabilities: &[u32],
) -> Result<String, ProtocolError> {
    if name.is_empty() || name.chars().any(is_reserved) {
        return Err(ProtocolError::ReservedDelimiter(name.to_string()));
    }

    let capabilities = capabilities
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(&CAPABILITY_SEPARATOR.to_string());

    Ok(join_parts(&[
        IDENTIFICATION_REQUEST,
        &join_items(NAME_KEY, name),
        &join_items(CAPABILITIES_KEY, &capabilities),
    ]))
}

pub fn decode_identification_request(
    message: &str,
) -> Result<Option<IdentificationRequest>, ProtocolError> {
    let parts: Vec<&str> = message.split(PARTS_DELIMITER).collect();
    if parts[0] != IDENTIFICATION_REQUEST {
        return Ok(None);
    }

    let name = parts
        .get(1)
        .and_then(|field| item_value(field, NAME_KEY))
        .filter(|name| !name.is_empty())
        .ok_or(ProtocolError::MissingName)?;

    if parts.len() != 3 {
        return Err(ProtocolError::MissingCapabilities);
    }
    let capabilities = item_value(parts[2], CAPABILITIES_KEY)
        .ok_or(ProtocolError::MissingCapabilities)?
        .split(CAPABILITY_SEPARATOR)
        .filter_map(|code| code.trim().parse::<u32>().ok())
        .filter(|&code| code > 0)
        .collect();

    Ok(Some(IdentificationRequest {
        name: name.to_string(),
        capabilities,
    }))
}

/// `HI_CLIENT;<true|false>;<session token>`
pub fn encode_identification_response(response: &IdentificationResponse) -> String {
    let token = response
        .session_token
        .as_ref()
        .map(SessionToken::as_str)
        .unwrap_or("");
    join_parts(&[
        IDENTIFICATION_RESPONSE,
        if response.ok { "true" } else { "false" },
        token,
    ])
}

/// Unlike the other decoders, a keyword or field-count mismatch is reported as
/// [`ProtocolError::NotIdentificationResponse`].
pub fn decode_identification_response(
    message: &str,
) -> Result<IdentificationResponse, ProtocolError> {
    let parts: Vec<&str> = message.split(PARTS_DELIMITER).collect();
    if parts.len() != 3 || parts[0] != IDENTIFICATION_RESPONSE {
        return Err(ProtocolError::NotIdentificationResponse);
    }

    let ok = parts[1]
        .parse::<bool>()
        .map_err(|_| ProtocolError::InvalidBool(parts[1].to_string()))?;

    let session_token = match parts[2] {
        "" => None,
        token => Some(SessionToken::parse(token)?),
    };

    Ok(IdentificationResponse { ok, session_token })
}

/// The fixed `AUDIO;<token>;` prefix of every audio datagram
pub fn encode_audio_header(session_token: &SessionToken) -> [u8; AUDIO_HEADER_LEN] {
    let mut header = [0u8; AUDIO_HEADER_LEN];
    let keyword_len = AUDIO_KEYWORD.len();

    header[..keyword_len].copy_from_slice(AUDIO_KEYWORD.as_bytes());
    header[keyword_len] = PARTS_DELIMITER as u8;
    header[keyword_len + 1..AUDIO_HEADER_LEN - 1].copy_from_slice(session_token.as_str().as_bytes());
    header[AUDIO_HEADER_LEN - 1] = PARTS_DELIMITER as u8;
    header
}

pub fn encode_audio_packet(session_token: &SessionToken, payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(AUDIO_HEADER_LEN + payload.len());
    packet.extend_from_slice(&encode_audio_header(session_token));
    packet.extend_from_slice(payload);
    packet
}

/// Parse only the fixed-length header; everything after it is payload.
pub fn decode_audio_packet(datagram: &[u8]) -> Option<AudioPacket<'_>> {
    if datagram.len() < AUDIO_HEADER_LEN {
        return None;
    }

    let keyword_len = AUDIO_KEYWORD.len();
    let (header, payload) = datagram.split_at(AUDIO_HEADER_LEN);
    if &header[..keyword_len] != AUDIO_KEYWORD.as_bytes()
        || header[keyword_len] != PARTS_DELIMITER as u8
        || header[AUDIO_HEADER_LEN - 1] != PARTS_DELIMITER as u8
    {
        return None;
    }

    let session_token = std::str::from_utf8(&header[keyword_len + 1..AUDIO_HEADER_LEN - 1]).ok()?;
    if session_token.chars().any(|c| !c.is_ascii_graphic() || is_reserved(c)) {
        return None;
    }

    Some(AudioPacket {
        session_token,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DISCOVERY_PROBE;

    #[test]
    fn test_discovery_response_roundtrip() {
        let encoded = encode_discovery_response(5000);
        assert_eq!(encoded, "I_AM_MEDIA_SERVER;5000");
        assert_eq!(decode_discovery_response(&encoded), Ok(Some(5000)));
    }

    #[test]
    fn test_discovery_response_not_this_message() {
        assert_eq!(decode_discovery_response(DISCOVERY_PROBE), Ok(None));
        assert_eq!(decode_discovery_response("HI_CLIENT;5000"), Ok(None));
        assert_eq!(decode_discovery_response("I_AM_MEDIA_SERVER;1;2"), Ok(None));
    }

    #[test]
    fn test_discovery_response_non_numeric_port() {
        assert_eq!(
            decode_discovery_response("I_AM_MEDIA_SERVER;abc"),
            Err(ProtocolError::InvalidPort("abc".to_string()))
        );
    }

    #[test]
    fn test_identification_request_roundtrip() {
        for capabilities in [vec![], vec![1], vec![1, 2, 7]] {
            let encoded = encode_identification_request("studio-1", &capabilities).unwrap();
            let decoded = decode_identification_request(&encoded).unwrap().unwrap();
            assert_eq!(decoded.name, "studio-1");
            assert_eq!(decoded.capabilities, capabilities);
        }
    }

    #[test]
    fn test_identification_request_wire_format() {
        let encoded = encode_identification_request("studio-1", &[1, 2]).unwrap();
        assert_eq!(encoded, "I_AM_CLIENT;NAME:studio-1;CAPABILITIES:1,2");
    }

    #[test]
    fn test_identification_request_rejects_reserved_name() {
        assert!(matches!(
            encode_identification_request("bad;name", &[1]),
            Err(ProtocolError::ReservedDelimiter(_))
        ));
        assert!(matches!(
            encode_identification_request("bad:name", &[1]),
            Err(ProtocolError::ReservedDelimiter(_))
        ));
        assert!(matches!(
            encode_identification_request("bad,name", &[1]),
            Err(ProtocolError::ReservedDelimiter(_))
        ));
    }

    #[test]
    fn test_identification_request_missing_capabilities() {
        let message = "I_AM_CLIENT;NAME:studio-1";
        assert_eq!(
            crate::protocol::Action::classify(message.as_bytes()),
            crate::protocol::Action::Identification
        );
        assert_eq!(
            decode_identification_request(message),
            Err(ProtocolError::MissingCapabilities)
        );
        assert_eq!(
            decode_identification_request("I_AM_CLIENT;NAME:studio-1;CAPS:1"),
            Err(ProtocolError::MissingCapabilities)
        );
    }

    #[test]
    fn test_identification_request_missing_name() {
        assert_eq!(
            decode_identification_request("I_AM_CLIENT;NOM:x;CAPABILITIES:1"),
            Err(ProtocolError::MissingName)
        );
        assert_eq!(
            decode_identification_request("I_AM_CLIENT"),
            Err(ProtocolError::MissingName)
        );
    }

    #[test]
    fn test_identification_request_drops_garbage_capabilities() {
        let decoded = decode_identification_request("I_AM_CLIENT;NAME:a;CAPABILITIES:1,x,-3,0,2")
            .unwrap()
            .unwrap();
        assert_eq!(decoded.capabilities, vec![1, 2]);
    }

    #[test]
    fn test_identification_request_other_keyword() {
        assert_eq!(decode_identification_request("HI_CLIENT;true;x"), Ok(None));
    }

    #[test]
    fn test_identification_response_roundtrip() {
        let token = SessionToken::generate();
        let accepted = IdentificationResponse::accepted(token);
        let encoded = encode_identification_response(&accepted);
        assert_eq!(decode_identification_response(&encoded), Ok(accepted));

        let rejected = IdentificationResponse::rejected();
        let encoded = encode_identification_response(&rejected);
        assert_eq!(encoded, "HI_CLIENT;false;");
        assert_eq!(decode_identification_response(&encoded), Ok(rejected));
    }

    #[test]
    fn test_identification_response_errors() {
        assert_eq!(
            decode_identification_response("I_AM_MEDIA_SERVER;5000"),
            Err(ProtocolError::NotIdentificationResponse)
        );
        assert_eq!(
            decode_identification_response("HI_CLIENT;maybe;"),
            Err(ProtocolError::InvalidBool("maybe".to_string()))
        );
    }

    #[test]
    fn test_audio_packet_roundtrip_with_delimiters_in_payload() {
        let token = SessionToken::generate();
        let payload = [b';', b':', 0, 255, b';'];
        let packet = encode_audio_packet(&token, &payload);
        assert_eq!(packet.len(), AUDIO_HEADER_LEN + payload.len());

        let decoded = decode_audio_packet(&packet).unwrap();
        assert_eq!(decoded.session_token, token.as_str());
        assert_eq!(decoded.payload, &payload);
    }

    #[test]
    fn test_audio_packet_rejects_short_or_foreign() {
        let token = SessionToken::generate();
        let packet = encode_audio_packet(&token, &[]);
        assert!(decode_audio_packet(&packet).is_some());
        assert!(decode_audio_packet(&packet[..AUDIO_HEADER_LEN - 1]).is_none());

        let mut foreign = packet.clone();
        foreign[0] = b'X';
        assert!(decode_audio_packet(&foreign).is_none());
    }
}
