//! UDP presence beacon payload.
//!
//! Peers announce themselves by broadcasting a small text datagram on the
//! discovery port:
//!
//! ```text
//! OVERSEER_BEACON|192.168.0.42|online
//! └─── tag ─────┘ └─ origin ─┘ └status┘
//! ```
//!
//! Listeners only care about the literal `OVERSEER_BEACON` prefix; anything
//! else arriving on the port is noise and is dropped without complaint.

use std::fmt;

use thiserror::Error;

/// Literal tag that starts every beacon payload.
pub const BEACON_TAG: &str = "OVERSEER_BEACON";

/// Field separator inside a beacon payload.
pub const FIELD_SEPARATOR: char = '|';

/// Status advertised by a running peer.
pub const STATUS_ONLINE: &str = "online";

/// Errors produced when a datagram cannot be read as a [`BeaconMessage`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BeaconParseError {
    /// The payload does not start with [`BEACON_TAG`].
    #[error("payload does not start with OVERSEER_BEACON")]
    MissingTag,
    /// The payload does not have exactly three fields.
    #[error("expected 3 pipe-delimited fields, found {0}")]
    FieldCount(usize),
    /// The payload is not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    NotUtf8,
}

/// A presence advertisement.  Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconMessage {
    origin_address: String,
    status: String,
}

impl BeaconMessage {
    pub fn new(origin_address: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            origin_address: origin_address.into(),
            status: status.into(),
        }
    }

    /// Beacon with the `online` status.
    pub fn online(origin_address: impl Into<String>) -> Self {
        Self::new(origin_address, STATUS_ONLINE)
    }

    pub fn tag(&self) -> &'static str {
        BEACON_TAG
    }

    pub fn origin_address(&self) -> &str {
        &self.origin_address
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// Serialises to `tag|originAddress|status`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use overseer_core::BeaconMessage;
    ///
    /// let beacon = BeaconMessage::online("10.0.0.7");
    /// assert_eq!(beacon.encode(), "OVERSEER_BEACON|10.0.0.7|online");
    /// ```
    pub fn encode(&self) -> String {
        format!(
            "{BEACON_TAG}{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}{}",
            self.origin_address, self.status
        )
    }

    /// Parses a full beacon payload.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconParseError`] if the tag is missing or the field count
    /// is wrong.
    pub fn parse(payload: &str) -> Result<Self, BeaconParseError> {
        if !payload.starts_with(BEACON_TAG) {
            return Err(BeaconParseError::MissingTag);
        }
        let fields: Vec<&str> = payload.split(FIELD_SEPARATOR).collect();
        match fields.as_slice() {
            [BEACON_TAG, origin, status] => Ok(Self::new(*origin, *status)),
            [_, _, _] => Err(BeaconParseError::MissingTag),
            other => Err(BeaconParseError::FieldCount(other.len())),
        }
    }

    /// Parses a raw datagram.
    ///
    /// # Errors
    ///
    /// Returns [`BeaconParseError::NotUtf8`] for non-text datagrams, otherwise
    /// the same errors as [`BeaconMessage::parse`].
    pub fn from_datagram(datagram: &[u8]) -> Result<Self, BeaconParseError> {
        let text = std::str::from_utf8(datagram).map_err(|_| BeaconParseError::NotUtf8)?;
        Self::parse(text)
    }
}

impl fmt::Display for BeaconMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Returns `true` when `datagram` starts with the exact [`BEACON_TAG`] bytes.
///
/// This is the listener's filter: it accepts anything carrying the tag, even
/// if the remaining fields are malformed.
pub fn is_beacon(datagram: &[u8]) -> bool {
    datagram.starts_with(BEACON_TAG.as_bytes())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_uses_pipe_delimited_layout() {
        let beacon = BeaconMessage::new("192.168.0.42", "online");
        assert_eq!(beacon.encode(), "OVERSEER_BEACON|192.168.0.42|online");
        assert_eq!(beacon.to_string(), beacon.encode());
        assert_eq!(beacon.tag(), "OVERSEER_BEACON");
    }

    #[test]
    fn test_parse_reads_encoded_beacon() {
        let parsed = BeaconMessage::parse("OVERSEER_BEACON|10.1.2.3|online").unwrap();

        assert_eq!(parsed.origin_address(), "10.1.2.3");
        assert_eq!(parsed.status(), "online");
    }

    #[test]
    fn test_parse_rejects_missing_tag() {
        assert_eq!(
            BeaconMessage::parse("HELLO|10.1.2.3|online"),
            Err(BeaconParseError::MissingTag)
        );
    }

    #[test]
    fn test_parse_rejects_tag_with_suffix() {
        assert_eq!(
            BeaconMessage::parse("OVERSEER_BEACONX|10.1.2.3|online"),
            Err(BeaconParseError::MissingTag)
        );
    }

    #[test]
    fn test_parse_rejects_wrong_field_count() {
        assert_eq!(
            BeaconMessage::parse("OVERSEER_BEACON|10.1.2.3"),
            Err(BeaconParseError::FieldCount(2))
        );
        assert_eq!(
            BeaconMessage::parse("OVERSEER_BEACON|a|b|c"),
            Err(BeaconParseError::FieldCount(4))
        );
    }

    #[test]
    fn test_from_datagram_rejects_invalid_utf8() {
        assert_eq!(
            BeaconMessage::from_datagram(&[0xFF, 0xFE]),
            Err(BeaconParseError::NotUtf8)
        );
    }

    #[test]
    fn test_is_beacon_checks_exact_prefix() {
        assert!(is_beacon(b"OVERSEER_BEACON|x|online"));
        assert!(is_beacon(b"OVERSEER_BEACON"));
        assert!(!is_beacon(b"overseer_beacon|x|online"));
        assert!(!is_beacon(b" OVERSEER_BEACON"));
        assert!(!is_beacon(b""));
    }

    proptest! {
        #[test]
        fn prop_encoded_beacon_is_always_recognised(origin in "[0-9a-z.:]{0,40}") {
            let beacon = BeaconMessage::online(origin.clone());
            let encoded = beacon.encode();
            prop_assert!(is_beacon(encoded.as_bytes()));
            prop_assert_eq!(BeaconMessage::parse(&encoded), Ok(beacon));
        }

        #[test]
        fn prop_untagged_bytes_are_never_beacons(
            payload in proptest::collection::vec(any::<u8>(), 0..256)
        ) {
            prop_assume!(!payload.starts_with(BEACON_TAG.as_bytes()));
            prop_assert!(!is_beacon(&payload));
        }
    }
}
