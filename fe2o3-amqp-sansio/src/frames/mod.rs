//! Frame encoding and decoding
//!
//! The [`FrameCodec`] trait is the seam between the connection state machine and the octets on
//! the wire. It covers two layers: [`FrameCodec::receive_bytes`] splits the byte stream into
//! frames and validates the frame header, while [`FrameCodec::decode_frame`] decodes the
//! performative carried in each frame body.

use std::fmt;

use bytes::Bytes;
use serde::Serialize;
use serde_amqp::value::Value;

pub mod amqp;
mod error;

pub use amqp::AmqpFrameCodec;
pub use error::Error;

/// Frame type of AMQP frames
pub const FRAME_TYPE_AMQP: u8 = 0x00;

/// Frame type of SASL frames
pub const FRAME_TYPE_SASL: u8 = 0x01;

/// Size of the fixed frame header in octets
pub const FRAME_HEADER_SIZE: usize = 8;

/// Smallest max-frame-size a peer is allowed to advertise
pub const MIN_MAX_FRAME_SIZE: u32 = fe2o3_amqp_types::definitions::MIN_MAX_FRAME_SIZE as u32;

/// A decoded AMQP frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// AMQP frame channel
    pub channel: u16,

    /// AMQP frame body
    pub body: FrameBody,
}

impl Frame {
    /// Creates an empty frame, which is only used to reset the remote idle timeout
    pub fn empty(channel: u16) -> Self {
        Self {
            channel,
            body: FrameBody::Empty,
        }
    }
}

/// AMQP frame body
#[derive(Clone, PartialEq)]
pub enum FrameBody {
    /// A performative followed by an optional payload. `performative` is `None` if the body
    /// decoded to the AMQP null value.
    Performative {
        /// The decoded performative
        performative: Option<Value>,

        /// Octets following the performative
        payload: Bytes,
    },

    /// An empty frame used only for resetting idle timeout
    Empty,
}

impl fmt::Debug for FrameBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Performative {
                performative,
                payload,
            } => f
                .debug_struct("Performative")
                .field("performative", performative)
                .field("payload.len", &payload.len())
                .finish(),
            Self::Empty => write!(f, "Empty"),
        }
    }
}

/// Encoder and decoder of AMQP frames used by a connection
pub trait FrameCodec {
    /// The largest frame, including the frame header, that will be accepted or produced
    fn max_frame_size(&self) -> u32;

    /// Sets the largest frame size. Values below [`MIN_MAX_FRAME_SIZE`] are rejected.
    fn set_max_frame_size(&mut self, max_frame_size: u32) -> Result<(), Error>;

    /// Buffers received octets and splits them into frames
    fn receive_bytes(&mut self, src: &[u8]) -> Result<(), Error>;

    /// Decodes the next buffered frame, if any
    fn decode_frame(&mut self) -> Result<Option<Frame>, Error>;

    /// Encodes a performative followed by the payload chunks as a single frame on `channel`
    fn encode_frame<P>(
        &mut self,
        channel: u16,
        performative: &P,
        payloads: &[Bytes],
    ) -> Result<Bytes, Error>
    where
        P: Serialize + ?Sized;

    /// Encodes an empty frame on channel 0
    fn encode_empty_frame(&mut self) -> Result<Bytes, Error>;
}
