use std::io::{self, Read, Write};

use fe2o3_amqp_sansio::{transport::StreamTransport, Builder, Connection, ConnectionState};
use fe2o3_amqp_types::performatives::{Close, Open};

mod common;
use common::*;

/// In-memory duplex stream that reports `WouldBlock` once the input is drained
#[derive(Debug, Default)]
struct MemoryStream {
    input: Vec<u8>,
    output: Vec<u8>,
    write_blocked: bool,
}

impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.input.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(self.input.len());
        buf[..n].copy_from_slice(&self.input[..n]);
        self.input.drain(..n);
        Ok(n)
    }
}

impl Write for MemoryStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.write_blocked {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn drive_until(
    connection: &mut Connection<StreamTransport<MemoryStream>>,
    state: ConnectionState,
) {
    for _ in 0..8 {
        if connection.state() == state {
            return;
        }
        connection.do_work();
    }
    assert_eq!(connection.state(), state);
}

/// Splits the written octets into the protocol header and the frames following it
fn written_frames(stream: &MemoryStream) -> Vec<fe2o3_amqp_sansio::frames::Frame> {
    assert_eq!(&stream.output[..8], &AMQP_HEADER[..]);
    let mut rest = &stream.output[8..];
    let mut frames = Vec::new();
    while !rest.is_empty() {
        let size = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
        frames.push(decode(&rest[..size]));
        rest = &rest[size..];
    }
    frames
}

#[test]
fn open_and_close_over_a_stream() {
    let mut stream = MemoryStream::default();
    stream.input.extend_from_slice(&AMQP_HEADER);
    stream.input.extend_from_slice(&encode(0, &peer_open(4096)));

    let mut connection = Builder::new()
        .container_id("stream-connection")
        .hostname("localhost")
        .build(StreamTransport::new(stream))
        .unwrap();

    drive_until(&mut connection, ConnectionState::Opened);
    assert_eq!(connection.remote_max_frame_size(), Some(4096));

    connection.close(None).unwrap();
    assert_eq!(connection.state(), ConnectionState::CloseSent);
    connection
        .transport_mut()
        .get_mut()
        .input
        .extend_from_slice(&encode(0, &Close { error: None }));
    drive_until(&mut connection, ConnectionState::End);

    let frames = written_frames(connection.transport().get_ref());
    assert_eq!(frames.len(), 2);

    let open: Open = performative(&frames[0]);
    assert_eq!(open.container_id, "stream-connection");
    assert_eq!(open.hostname.as_deref(), Some("localhost"));

    let close: Close = performative(&frames[1]);
    assert!(close.error.is_none());
    assert!(!connection.transport().is_open());
}

#[test]
fn close_reply_is_written_after_peer_close_on_blocked_stream() {
    let mut stream = MemoryStream::default();
    stream.input.extend_from_slice(&AMQP_HEADER);
    stream.input.extend_from_slice(&encode(0, &peer_open(4096)));

    let mut connection = Builder::new()
        .container_id("blocked-writer")
        .build(StreamTransport::new(stream))
        .unwrap();
    drive_until(&mut connection, ConnectionState::Opened);

    {
        let stream = connection.transport_mut().get_mut();
        stream.write_blocked = true;
        stream
            .input
            .extend_from_slice(&encode(0, &Close { error: None }));
    }
    connection.do_work();
    assert_eq!(connection.state(), ConnectionState::End);

    connection.transport_mut().get_mut().write_blocked = false;
    for _ in 0..4 {
        connection.do_work();
    }

    let frames = written_frames(connection.transport().get_ref());
    assert_eq!(frames.len(), 2);
    let _open: Open = performative(&frames[0]);
    let close: Close = performative(&frames[1]);
    assert!(close.error.is_none());
    assert!(!connection.transport().is_open());
}

#[test]
fn peer_hang_up_ends_connection() {
    #[derive(Debug)]
    struct HangUp;

    impl Read for HangUp {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
    }

    impl Write for HangUp {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let mut connection = Builder::new()
        .container_id("hang-up")
        .build(StreamTransport::new(HangUp))
        .unwrap();

    for _ in 0..4 {
        connection.do_work();
    }
    assert_eq!(connection.state(), ConnectionState::End);
}
