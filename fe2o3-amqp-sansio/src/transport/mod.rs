//! Transport abstraction consumed by the connection
//!
//! A transport never completes an operation synchronously from the connection's point of view.
//! `open`, `send` and `close` only schedule work; the outcome, together with any received octets,
//! is reported through [`Transport::poll_event`] which the connection drains on every
//! [`do_work`](crate::Connection::do_work) tick.

use bytes::Bytes;

mod error;
mod stream;

pub use error::Error;
pub use stream::StreamTransport;

/// Outcome of an open request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenResult {
    /// The transport is open
    Ok,

    /// The transport failed to open
    Error,

    /// The open request was cancelled before it completed
    Cancelled,
}

/// Notifications produced by a [`Transport`]
#[derive(Debug)]
pub enum TransportEvent {
    /// The open request has completed
    OpenComplete(OpenResult),

    /// Octets received from the remote peer
    BytesReceived(Bytes),

    /// The transport failed and is no longer usable
    Error(Error),
}

/// A byte oriented transport such as a socket or a TLS stream
pub trait Transport {
    /// Requests the transport to open
    fn open(&mut self) -> Result<(), Error>;

    /// Requests the transport to close. This is best effort and is not awaited.
    fn close(&mut self) -> Result<(), Error>;

    /// Schedules `buf` to be sent
    fn send(&mut self, buf: Bytes) -> Result<(), Error>;

    /// Advances pending IO
    fn do_work(&mut self);

    /// Takes the next pending notification
    fn poll_event(&mut self) -> Option<TransportEvent>;
}

impl<T> Transport for &mut T
where
    T: Transport + ?Sized,
{
    fn open(&mut self) -> Result<(), Error> {
        (**self).open()
    }

    fn close(&mut self) -> Result<(), Error> {
        (**self).close()
    }

    fn send(&mut self, buf: Bytes) -> Result<(), Error> {
        (**self).send(buf)
    }

    fn do_work(&mut self) {
        (**self).do_work()
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        (**self).poll_event()
    }
}

impl<T> Transport for Box<T>
where
    T: Transport + ?Sized,
{
    fn open(&mut self) -> Result<(), Error> {
        (**self).open()
    }

    fn close(&mut self) -> Result<(), Error> {
        (**self).close()
    }

    fn send(&mut self, buf: Bytes) -> Result<(), Error> {
        (**self).send(buf)
    }

    fn do_work(&mut self) {
        (**self).do_work()
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        (**self).poll_event()
    }
}
