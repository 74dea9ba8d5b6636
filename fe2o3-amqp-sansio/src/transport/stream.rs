use std::{
    collections::VecDeque,
    io::{self, Read, Write},
};

use bytes::{Buf, Bytes, BytesMut};

use super::{Error, OpenResult, Transport, TransportEvent};

const READ_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Closed,
    Opening,
    Open,
    /// Close requested while octets are still queued
    Closing,
    Error,
}

/// A [`Transport`] over an already connected byte stream.
///
/// The stream is expected to be non-blocking (eg. a `std::net::TcpStream` after
/// `set_nonblocking(true)`). Each [`do_work`](Transport::do_work) flushes queued octets and reads
/// until the stream reports [`io::ErrorKind::WouldBlock`].
///
/// [`close`](Transport::close) does not drop queued octets. If they cannot all be written at
/// once, later calls to `do_work` keep flushing them before the transport is closed.
#[derive(Debug)]
pub struct StreamTransport<S> {
    stream: S,
    state: StreamState,
    outgoing: BytesMut,
    events: VecDeque<TransportEvent>,
}

impl<S> StreamTransport<S> {
    /// Wraps a connected stream
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            state: StreamState::Closed,
            outgoing: BytesMut::new(),
            events: VecDeque::new(),
        }
    }

    /// Gets a reference to the underlying stream
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Gets a mutable reference to the underlying stream
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Consumes the transport and returns the underlying stream
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Whether the transport is open
    pub fn is_open(&self) -> bool {
        self.state == StreamState::Open
    }
}

impl<S> StreamTransport<S>
where
    S: Read + Write,
{
    fn fail(&mut self, error: Error) {
        self.state = StreamState::Error;
        self.events.push_back(TransportEvent::Error(error));
    }

    fn flush_outgoing(&mut self) -> Result<(), Error> {
        while !self.outgoing.is_empty() {
            match self.stream.write(&self.outgoing) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => self.outgoing.advance(n),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }

        match self.stream.flush() {
            Err(err) if err.kind() != io::ErrorKind::WouldBlock => Err(err.into()),
            _ => Ok(()),
        }
    }

    fn read_available(&mut self) -> Result<(), Error> {
        let mut buf = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Err(Error::ClosedByPeer),
                Ok(n) => self
                    .events
                    .push_back(TransportEvent::BytesReceived(Bytes::copy_from_slice(&buf[..n]))),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: Read + Write,
{
    fn open(&mut self) -> Result<(), Error> {
        match self.state {
            StreamState::Closed => {
                self.state = StreamState::Opening;
                Ok(())
            }
            _ => Err(Error::AlreadyOpen),
        }
    }

    fn close(&mut self) -> Result<(), Error> {
        match self.state {
            StreamState::Open => {
                if let Err(err) = self.flush_outgoing() {
                    self.state = StreamState::Closed;
                    self.outgoing.clear();
                    return Err(err);
                }
                self.state = if self.outgoing.is_empty() {
                    StreamState::Closed
                } else {
                    StreamState::Closing
                };
            }
            StreamState::Opening => {
                self.events
                    .push_back(TransportEvent::OpenComplete(OpenResult::Cancelled));
                self.state = StreamState::Closed;
            }
            StreamState::Closing => {}
            StreamState::Closed | StreamState::Error => {
                self.state = StreamState::Closed;
                self.outgoing.clear();
            }
        }
        Ok(())
    }

    fn send(&mut self, buf: Bytes) -> Result<(), Error> {
        match self.state {
            StreamState::Open => {
                self.outgoing.extend_from_slice(&buf);
                Ok(())
            }
            _ => Err(Error::NotOpen),
        }
    }

    fn do_work(&mut self) {
        match self.state {
            StreamState::Opening => {
                // The stream is connected on construction
                self.state = StreamState::Open;
                self.events
                    .push_back(TransportEvent::OpenComplete(OpenResult::Ok));
            }
            StreamState::Open => {
                if let Err(err) = self.flush_outgoing() {
                    self.fail(err);
                    return;
                }
                if let Err(err) = self.read_available() {
                    self.fail(err);
                }
            }
            StreamState::Closing => {
                if let Err(err) = self.flush_outgoing() {
                    self.outgoing.clear();
                    self.fail(err);
                    return;
                }
                if self.outgoing.is_empty() {
                    self.state = StreamState::Closed;
                }
            }
            StreamState::Closed | StreamState::Error => {}
        }
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }
}
