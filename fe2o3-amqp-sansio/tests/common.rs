#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    io,
    rc::Rc,
};

use bytes::Bytes;
use fe2o3_amqp_types::{
    definitions::{self, AmqpError, ErrorCondition},
    performatives::{Close, Open},
};
use fe2o3_amqp_sansio::{
    connection::{Builder, Connection, ConnectionEvent},
    frames::{self, AmqpFrameCodec, Frame, FrameBody, FrameCodec},
    states::ConnectionState,
    tick_counter::TickCounter,
    transport::{self, OpenResult, Transport, TransportEvent},
    EndpointHandler,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_amqp::value::Value;

pub const AMQP_HEADER: [u8; 8] = [b'A', b'M', b'Q', b'P', 0, 1, 0, 0];

/* -------------------------------------------------------------------------- */
/*                                  Transport                                 */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Default)]
pub struct TransportState {
    pub calls: Vec<&'static str>,
    pub sent: Vec<Bytes>,
    pub events: VecDeque<TransportEvent>,
    pub fail_open: bool,
    pub fail_send: bool,
}

impl TransportState {
    pub fn count(&self, call: &str) -> usize {
        self.calls.iter().filter(|c| **c == call).count()
    }
}

/// Records every call and replays queued events
#[derive(Debug, Clone, Default)]
pub struct FakeTransport(pub Rc<RefCell<TransportState>>);

impl Transport for FakeTransport {
    fn open(&mut self) -> Result<(), transport::Error> {
        let mut state = self.0.borrow_mut();
        state.calls.push("open");
        if state.fail_open {
            return Err(io::Error::new(io::ErrorKind::Other, "open failed").into());
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), transport::Error> {
        self.0.borrow_mut().calls.push("close");
        Ok(())
    }

    fn send(&mut self, buf: Bytes) -> Result<(), transport::Error> {
        let mut state = self.0.borrow_mut();
        state.calls.push("send");
        if state.fail_send {
            return Err(io::Error::new(io::ErrorKind::Other, "send failed").into());
        }
        state.sent.push(buf);
        Ok(())
    }

    fn do_work(&mut self) {
        self.0.borrow_mut().calls.push("do_work");
    }

    fn poll_event(&mut self) -> Option<TransportEvent> {
        self.0.borrow_mut().events.pop_front()
    }
}

/* -------------------------------------------------------------------------- */
/*                                 Frame codec                                */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Default)]
pub struct CodecFaults {
    pub fail_set_max_frame_size: bool,
    pub fail_receive_bytes: bool,
    pub fail_encode: bool,
    pub max_frame_size_calls: Vec<u32>,
}

fn injected() -> frames::Error {
    io::Error::new(io::ErrorKind::Other, "injected").into()
}

/// [`AmqpFrameCodec`] with failures that can be switched on
#[derive(Debug)]
pub struct FaultyCodec {
    inner: AmqpFrameCodec,
    faults: Rc<RefCell<CodecFaults>>,
}

impl FrameCodec for FaultyCodec {
    fn max_frame_size(&self) -> u32 {
        self.inner.max_frame_size()
    }

    fn set_max_frame_size(&mut self, max_frame_size: u32) -> Result<(), frames::Error> {
        let mut faults = self.faults.borrow_mut();
        faults.max_frame_size_calls.push(max_frame_size);
        if faults.fail_set_max_frame_size {
            return Err(injected());
        }
        self.inner.set_max_frame_size(max_frame_size)
    }

    fn receive_bytes(&mut self, src: &[u8]) -> Result<(), frames::Error> {
        if self.faults.borrow().fail_receive_bytes {
            return Err(injected());
        }
        self.inner.receive_bytes(src)
    }

    fn decode_frame(&mut self) -> Result<Option<Frame>, frames::Error> {
        self.inner.decode_frame()
    }

    fn encode_frame<P>(
        &mut self,
        channel: u16,
        performative: &P,
        payloads: &[Bytes],
    ) -> Result<Bytes, frames::Error>
    where
        P: Serialize + ?Sized,
    {
        if self.faults.borrow().fail_encode {
            return Err(injected());
        }
        self.inner.encode_frame(channel, performative, payloads)
    }

    fn encode_empty_frame(&mut self) -> Result<Bytes, frames::Error> {
        if self.faults.borrow().fail_encode {
            return Err(injected());
        }
        self.inner.encode_empty_frame()
    }
}

/* -------------------------------------------------------------------------- */
/*                                    Clock                                   */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Clone, Default)]
pub struct ManualTicks(Rc<Cell<u64>>);

impl ManualTicks {
    pub fn advance(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }
}

impl TickCounter for ManualTicks {
    fn current_ms(&self) -> u64 {
        self.0.get()
    }
}

/* -------------------------------------------------------------------------- */
/*                                  Endpoint                                  */
/* -------------------------------------------------------------------------- */

#[derive(Debug, Default)]
pub struct EndpointLog {
    pub frames: Vec<(u16, Value, Bytes)>,
    pub states: Vec<(ConnectionState, ConnectionState)>,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingEndpoint(pub Rc<RefCell<EndpointLog>>);

impl EndpointHandler for RecordingEndpoint {
    fn on_frame_received(&mut self, channel: u16, performative: Value, payload: Bytes) {
        self.0
            .borrow_mut()
            .frames
            .push((channel, performative, payload));
    }

    fn on_connection_state_changed(
        &mut self,
        new_state: ConnectionState,
        previous_state: ConnectionState,
    ) {
        self.0.borrow_mut().states.push((new_state, previous_state));
    }
}

/* -------------------------------------------------------------------------- */
/*                                    Peer                                    */
/* -------------------------------------------------------------------------- */

pub fn peer_open(max_frame_size: u32) -> Open {
    Open {
        container_id: "peer".into(),
        hostname: None,
        max_frame_size: max_frame_size.into(),
        channel_max: 255u16.into(),
        idle_time_out: None,
        outgoing_locales: None,
        incoming_locales: None,
        offered_capabilities: None,
        desired_capabilities: None,
        properties: None,
    }
}

/// Encodes a frame the way the remote peer would
pub fn encode<P: Serialize>(channel: u16, performative: &P) -> Bytes {
    AmqpFrameCodec::new()
        .encode_frame(channel, performative, &[])
        .unwrap()
}

/// Decodes a single frame written by the connection
pub fn decode(bytes: &[u8]) -> Frame {
    let mut codec = AmqpFrameCodec::new();
    codec.receive_bytes(bytes).unwrap();
    codec.decode_frame().unwrap().unwrap()
}

/// Decodes the performative of a frame into a concrete type
pub fn performative<P: DeserializeOwned>(frame: &Frame) -> P {
    match &frame.body {
        FrameBody::Performative {
            performative: Some(value),
            ..
        } => serde_amqp::from_slice(&serde_amqp::to_vec(value).unwrap()).unwrap(),
        body => panic!("expecting a performative, found {:?}", body),
    }
}

pub fn amqp_condition(error: &definitions::Error) -> &AmqpError {
    match &error.condition {
        ErrorCondition::AmqpError(condition) => condition,
        other => panic!("expecting an amqp error, found {:?}", other),
    }
}

/* -------------------------------------------------------------------------- */
/*                                   Harness                                  */
/* -------------------------------------------------------------------------- */

pub struct Harness {
    pub connection: Connection<FakeTransport, FaultyCodec>,
    pub transport: Rc<RefCell<TransportState>>,
    pub faults: Rc<RefCell<CodecFaults>>,
    pub ticks: ManualTicks,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(|builder| builder)
    }

    pub fn with(configure: impl FnOnce(Builder<FaultyCodec>) -> Builder<FaultyCodec>) -> Self {
        let transport = FakeTransport::default();
        let faults = Rc::new(RefCell::new(CodecFaults::default()));
        let ticks = ManualTicks::default();

        let builder = Builder::new()
            .container_id("1234")
            .tick_counter(ticks.clone())
            .frame_codec(FaultyCodec {
                inner: AmqpFrameCodec::new(),
                faults: faults.clone(),
            });
        let connection = configure(builder).build(transport.clone()).unwrap();

        Self {
            connection,
            transport: transport.0,
            faults,
            ticks,
        }
    }

    pub fn endpoint(&mut self) -> (fe2o3_amqp_sansio::Endpoint, Rc<RefCell<EndpointLog>>) {
        let endpoint = RecordingEndpoint::default();
        let log = endpoint.0.clone();
        let handle = self.connection.create_endpoint(endpoint).unwrap();
        (handle, log)
    }

    pub fn receive(&mut self, bytes: &[u8]) {
        self.connection
            .handle_event(ConnectionEvent::BytesReceived(Bytes::copy_from_slice(bytes)));
    }

    pub fn receive_frame<P: Serialize>(&mut self, channel: u16, performative: &P) {
        self.receive(&encode(channel, performative));
    }

    /// START -> HDR_SENT
    pub fn open_transport(&mut self) {
        self.transport
            .borrow_mut()
            .events
            .push_back(TransportEvent::OpenComplete(OpenResult::Ok));
        self.connection.do_work();
        assert_eq!(self.connection.state(), ConnectionState::HeaderSent);
    }

    /// START -> OPEN_SENT
    pub fn exchange_header(&mut self) {
        self.open_transport();
        self.receive(&AMQP_HEADER);
        assert_eq!(self.connection.state(), ConnectionState::OpenSent);
    }

    /// START -> OPENED
    pub fn opened(&mut self) {
        self.exchange_header();
        self.receive_frame(0, &peer_open(1024));
        assert_eq!(self.connection.state(), ConnectionState::Opened);
    }

    pub fn sent(&self) -> Vec<Bytes> {
        self.transport.borrow().sent.clone()
    }

    pub fn last_sent_frame(&self) -> Frame {
        let sent = self.sent();
        decode(sent.last().expect("nothing was sent"))
    }

    pub fn last_sent_close(&self) -> Close {
        performative(&self.last_sent_frame())
    }
}
