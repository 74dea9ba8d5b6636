//! Implements the protocol header and its incremental matching

use std::convert::TryFrom;

use bytes::Bytes;

const PROTOCOL_HEADER_PREFIX: &[u8; 4] = b"AMQP";

/// Length of a protocol header in octets
pub const PROTOCOL_HEADER_LEN: usize = 8;

/// Protocol header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolHeader {
    /// Protocol ID
    pub id: ProtocolId,

    /// Major number
    pub major: u8,

    /// Minor number
    pub minor: u8,

    /// Revision number
    pub revision: u8,
}

impl Default for ProtocolHeader {
    fn default() -> Self {
        Self::amqp()
    }
}

impl ProtocolHeader {
    /// Creates a new protocol header
    pub fn new(id: ProtocolId, major: u8, minor: u8, revision: u8) -> Self {
        Self {
            id,
            major,
            minor,
            revision,
        }
    }

    /// Creates the AMQP 1.0.0 protocol header, ie. `b"AMQP\x00\x01\x00\x00"`
    pub fn amqp() -> Self {
        Self::new(
            ProtocolId::Amqp,
            fe2o3_amqp_types::definitions::MAJOR,
            fe2o3_amqp_types::definitions::MINOR,
            fe2o3_amqp_types::definitions::REVISION,
        )
    }

    /// Returns whether the protocol id is AMQP
    pub fn is_amqp(&self) -> bool {
        matches!(self.id, ProtocolId::Amqp)
    }
}

impl From<ProtocolHeader> for [u8; PROTOCOL_HEADER_LEN] {
    fn from(value: ProtocolHeader) -> Self {
        [
            PROTOCOL_HEADER_PREFIX[0], // b'A'
            PROTOCOL_HEADER_PREFIX[1], // b'M'
            PROTOCOL_HEADER_PREFIX[2], // b'Q'
            PROTOCOL_HEADER_PREFIX[3], // b'P'
            value.id as u8,
            value.major,
            value.minor,
            value.revision,
        ]
    }
}

impl From<ProtocolHeader> for Bytes {
    fn from(header: ProtocolHeader) -> Self {
        let bytes: [u8; PROTOCOL_HEADER_LEN] = header.into();
        Bytes::copy_from_slice(&bytes[..])
    }
}

impl TryFrom<[u8; PROTOCOL_HEADER_LEN]> for ProtocolHeader {
    type Error = [u8; PROTOCOL_HEADER_LEN];

    fn try_from(v: [u8; PROTOCOL_HEADER_LEN]) -> Result<Self, Self::Error> {
        if &v[..4] != PROTOCOL_HEADER_PREFIX {
            return Err(v);
        }
        let id = ProtocolId::try_from(v[4]).map_err(|_| v)?;
        Ok(Self::new(id, v[5], v[6], v[7]))
    }
}

/// Protocol ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolId {
    /// AMQP
    Amqp = 0x0,

    /// TLS
    Tls = 0x2,

    /// SASL
    Sasl = 0x3,
}

impl TryFrom<u8> for ProtocolId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        let val = match value {
            0x0 => Self::Amqp,
            0x2 => Self::Tls,
            0x3 => Self::Sasl,
            _ => return Err(value),
        };
        Ok(val)
    }
}

/// Outcome of feeding bytes into a [`HeaderMatcher`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMatch {
    /// Every byte seen so far matches, but the header is not complete yet
    Incomplete,

    /// The full header has been matched. `consumed` is the number of octets taken from the
    /// last chunk; anything after that belongs to the frame stream.
    Matched {
        /// Number of octets of the last chunk that belonged to the header
        consumed: usize,
    },

    /// The octet at `position` differs from the expected header
    Mismatch {
        /// Zero based position within the header
        position: usize,

        /// The octet that was received
        found: u8,
    },
}

/// Compares an incoming byte stream against an expected protocol header.
///
/// The comparison is positional and tolerates arbitrary chunking, so feeding the header one octet
/// at a time yields the same outcome as feeding it in one piece.
#[derive(Debug, Clone)]
pub struct HeaderMatcher {
    expected: [u8; PROTOCOL_HEADER_LEN],
    position: usize,
}

impl Default for HeaderMatcher {
    fn default() -> Self {
        Self::new(ProtocolHeader::amqp())
    }
}

impl HeaderMatcher {
    /// Creates a matcher expecting `header`
    pub fn new(header: ProtocolHeader) -> Self {
        Self {
            expected: header.into(),
            position: 0,
        }
    }

    /// Number of header octets matched so far
    pub fn position(&self) -> usize {
        self.position
    }

    /// Whether the full header has been matched
    pub fn is_complete(&self) -> bool {
        self.position == PROTOCOL_HEADER_LEN
    }

    /// Feeds the next chunk of received bytes into the matcher
    pub fn feed(&mut self, src: &[u8]) -> HeaderMatch {
        if self.is_complete() {
            return HeaderMatch::Matched { consumed: 0 };
        }

        for (consumed, &byte) in src.iter().enumerate() {
            let position = self.position;
            if byte != self.expected[position] {
                return HeaderMatch::Mismatch {
                    position,
                    found: byte,
                };
            }

            self.position += 1;
            if self.is_complete() {
                return HeaderMatch::Matched {
                    consumed: consumed + 1,
                };
            }
        }

        HeaderMatch::Incomplete
    }

    /// Starts over from the first octet
    pub fn reset(&mut self) {
        self.position = 0;
    }
}
