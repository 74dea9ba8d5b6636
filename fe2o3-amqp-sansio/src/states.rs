//! Connection states, following AMQP 1.0 Part 2.4.6

use std::fmt;

/// Connection states driven by [`Connection`](crate::Connection).
///
/// The header-received and pipelined states of the protocol are not modelled since this side
/// always initiates the header exchange and waits for it before sending OPEN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// The connection exists but nothing has been sent or received
    Start,

    /// The protocol header has been sent, no header has been received yet
    HeaderSent,

    /// Protocol headers have been sent and received
    HeaderExchange,

    /// The open frame has been sent, the peer's open frame has not arrived yet
    OpenSent,

    /// The peer's open frame has been received and is being validated
    OpenReceived,

    /// Open frames have been both sent and received
    Opened,

    /// The peer initiated a close. Frames may still be sent but none are expected to arrive.
    CloseReceived,

    /// A close frame has been sent. Nothing more may be written; incoming frames other than the
    /// peer's close are dropped.
    CloseSent,

    /// Like [`CloseSent`](Self::CloseSent), but the close was triggered by an error. Incoming
    /// frames are silently discarded until the peer's close arrives.
    Discarding,

    /// Nothing more may be written by either side
    End,
}

impl ConnectionState {
    /// Whether the protocol headers have been exchanged and frames flow on the transport
    pub fn is_header_exchanged(&self) -> bool {
        !matches!(self, Self::Start | Self::HeaderSent | Self::End)
    }

    /// Whether a close frame has been sent and the connection waits for the peer's close
    pub fn is_closing(&self) -> bool {
        matches!(self, Self::CloseSent | Self::Discarding)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "START",
            Self::HeaderSent => "HDR_SENT",
            Self::HeaderExchange => "HDR_EXCH",
            Self::OpenSent => "OPEN_SENT",
            Self::OpenReceived => "OPEN_RCVD",
            Self::Opened => "OPENED",
            Self::CloseReceived => "CLOSE_RCVD",
            Self::CloseSent => "CLOSE_SENT",
            Self::Discarding => "DISCARDING",
            Self::End => "END",
        };
        f.write_str(name)
    }
}
