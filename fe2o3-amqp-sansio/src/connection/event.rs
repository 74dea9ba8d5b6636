use bytes::Bytes;
use serde_amqp::value::Value;

use crate::{
    frames::{self, Frame, FrameBody},
    transport::{self, OpenResult, TransportEvent},
};

/// Inputs of the connection state machine.
///
/// [`Connection::do_work`](super::Connection::do_work) produces these from the transport and the
/// frame codec. They can also be fed directly with
/// [`Connection::handle_event`](super::Connection::handle_event).
#[derive(Debug)]
pub enum ConnectionEvent {
    /// The transport finished opening
    TransportOpened(OpenResult),

    /// Octets received from the transport
    BytesReceived(Bytes),

    /// The transport failed
    TransportError(transport::Error),

    /// A frame carrying a performative was decoded
    PerformativeReceived {
        /// Channel the frame arrived on
        channel: u16,

        /// `None` if the frame body was the AMQP null value
        performative: Option<Value>,

        /// Octets following the performative
        payload: Bytes,
    },

    /// An empty frame was decoded
    EmptyFrameReceived,

    /// The frame codec failed to decode a frame
    CodecError(frames::Error),
}

impl From<TransportEvent> for ConnectionEvent {
    fn from(event: TransportEvent) -> Self {
        match event {
            TransportEvent::OpenComplete(result) => Self::TransportOpened(result),
            TransportEvent::BytesReceived(bytes) => Self::BytesReceived(bytes),
            TransportEvent::Error(err) => Self::TransportError(err),
        }
    }
}

impl From<Frame> for ConnectionEvent {
    fn from(frame: Frame) -> Self {
        match frame.body {
            FrameBody::Performative {
                performative,
                payload,
            } => Self::PerformativeReceived {
                channel: frame.channel,
                performative,
                payload,
            },
            FrameBody::Empty => Self::EmptyFrameReceived,
        }
    }
}
