//! Parsing and validation of the `/chat` admission header.
//!
//! The client offers a single subprotocol `{accessKey}.{urlEncodedDisplayName}`
//! in `Sec-WebSocket-Protocol`.

use percent_encoding::percent_decode_str;

use crate::auth::gate;

pub const PROTOCOL_HEADER: &str = "Sec-WebSocket-Protocol";

/// An admitted identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub display_name: String,
}

/// Why a connection was turned away. Each maps to the line sent before close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeRejection {
    Malformed,
    InvalidAccessKey,
    UndecodableName,
    EmptyName,
    /// Registration and the join notice did not finish within the handshake deadline.
    Timeout,
}

impl HandshakeRejection {
    pub fn reason(self) -> &'static str {
        match self {
            HandshakeRejection::Malformed => "Malformed handshake",
            HandshakeRejection::InvalidAccessKey => "Invalid API key",
            HandshakeRejection::UndecodableName => "Username decoding error",
            HandshakeRejection::EmptyName => "Invalid Username",
            HandshakeRejection::Timeout => "Handshake timed out",
        }
    }
}

/// Validate the offered header against the configured access key.
///
/// Single pass, no retries: the first failing check decides the rejection.
pub fn parse(header: Option<&str>, access_key: &str) -> Result<Handshake, HandshakeRejection> {
    let (key, encoded_name) = header
        .map(str::trim)
        .and_then(|h| h.split_once('.'))
        .ok_or(HandshakeRejection::Malformed)?;

    if !gate::authorize(Some(key), access_key) {
        return Err(HandshakeRejection::InvalidAccessKey);
    }

    let decoded = percent_decode_str(encoded_name)
        .decode_utf8()
        .map_err(|_| HandshakeRejection::UndecodableName)?;

    let display_name = decoded.trim();
    if display_name.is_empty() {
        return Err(HandshakeRejection::EmptyName);
    }

    Ok(Handshake {
        display_name: display_name.to_string(),
    })
}
