//! Implements the AMQP1.0 connection state machine
//!
//! The [`Connection`] never performs IO by itself. It is driven by [`Connection::do_work`], which
//! advances the [`Transport`] and feeds every resulting [`ConnectionEvent`] through
//! [`Connection::handle_event`]. All transitions, frames sent in response, and notifications to
//! endpoints happen synchronously inside these two calls.

use std::{fmt, time::Duration};

use bytes::Bytes;
use fe2o3_amqp_types::{
    definitions::{self, AmqpError, Fields},
    performatives::{Begin, Close, Open},
};
use serde::{de::DeserializeOwned, Serialize};
use serde_amqp::{descriptor::Descriptor, value::Value};

use crate::{
    endpoint::{Endpoint, EndpointHandler, Endpoints},
    frames::{self, AmqpFrameCodec, FrameCodec, MIN_MAX_FRAME_SIZE},
    protocol_header::{HeaderMatch, HeaderMatcher, ProtocolHeader},
    states::ConnectionState,
    tick_counter::TickCounter,
    transport::{self, OpenResult, Transport},
};

mod builder;
mod error;
mod event;
pub mod heartbeat;

pub use builder::Builder;
pub use error::*;
pub use event::ConnectionEvent;

use error::amqp_error;
use heartbeat::HeartBeat;

/// Default max-frame-size
pub const DEFAULT_MAX_FRAME_SIZE: u32 = u32::MAX;

/// Default channel-max
pub const DEFAULT_CHANNEL_MAX: u16 = u16::MAX;

type StateObserver = Box<dyn FnMut(ConnectionState, ConnectionState)>;
type IoErrorObserver = Box<dyn FnMut(&transport::Error)>;
type CloseReceivedCallback = Box<dyn FnMut(Option<&definitions::Error>)>;

/// Handle returned by [`Connection::subscribe_on_close_received`]
#[derive(Debug)]
pub struct CloseReceivedSubscription {
    id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PerformativeKind {
    Open,
    Begin,
    Close,
    Other,
}

fn performative_kind(value: &Value) -> PerformativeKind {
    let descriptor = match value {
        Value::Described(described) => &described.descriptor,
        _ => return PerformativeKind::Other,
    };

    match descriptor {
        Descriptor::Code(0x0000_0000_0000_0010) => PerformativeKind::Open,
        Descriptor::Code(0x0000_0000_0000_0011) => PerformativeKind::Begin,
        Descriptor::Code(0x0000_0000_0000_0018) => PerformativeKind::Close,
        Descriptor::Name(name) => match name.as_str() {
            "amqp:open:list" => PerformativeKind::Open,
            "amqp:begin:list" => PerformativeKind::Begin,
            "amqp:close:list" => PerformativeKind::Close,
            _ => PerformativeKind::Other,
        },
        Descriptor::Code(_) => PerformativeKind::Other,
    }
}

/// Decodes a generic value into a concrete performative
fn decode_performative<P: DeserializeOwned>(value: &Value) -> Result<P, serde_amqp::Error> {
    let buf = serde_amqp::to_vec(value)?;
    serde_amqp::from_slice(&buf)
}

fn trace_frame(_direction: &str, _channel: u16, _frame: &dyn fmt::Debug) {
    #[cfg(feature = "tracing")]
    tracing::trace!("{} channel = {}, frame = {:?}", _direction, _channel, _frame);
    #[cfg(feature = "log")]
    log::trace!("{} channel = {}, frame = {:?}", _direction, _channel, _frame);
}

/// An AMQP 1.0 connection over a [`Transport`].
///
/// The connection drives the protocol header exchange and the OPEN/CLOSE handshake, and
/// multiplexes endpoints over channels. It does not own the lifetime of the remote peer's
/// resources: dropping a connection neither closes the transport nor notifies endpoints.
///
/// # Example
///
/// ```rust,ignore
/// let mut connection = Builder::new()
///     .container_id("connection-1")
///     .hostname("localhost")
///     .max_frame_size(4096)
///     .build(transport)?;
///
/// loop {
///     connection.do_work();
///     if connection.state() == ConnectionState::Opened {
///         break;
///     }
/// }
/// ```
pub struct Connection<T, C = AmqpFrameCodec> {
    transport: T,
    frame_codec: C,
    tick_counter: Box<dyn TickCounter>,
    state: ConnectionState,

    container_id: String,
    hostname: Option<String>,
    max_frame_size: u32,
    channel_max: u16,
    properties: Option<Fields>,

    is_transport_open_requested: bool,
    is_open_sent: bool,
    is_trace_on: bool,
    header_matcher: HeaderMatcher,
    remote_open: Option<Open>,
    heartbeat: HeartBeat,

    endpoints: Endpoints,
    close_received: Option<(u64, CloseReceivedCallback)>,
    next_subscription_id: u64,
    on_state_changed: Option<StateObserver>,
    on_io_error: Option<IoErrorObserver>,
}

impl<T, C> fmt::Debug for Connection<T, C>
where
    T: fmt::Debug,
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("transport", &self.transport)
            .field("frame_codec", &self.frame_codec)
            .field("state", &self.state)
            .field("container_id", &self.container_id)
            .field("hostname", &self.hostname)
            .field("max_frame_size", &self.max_frame_size)
            .field("channel_max", &self.channel_max)
            .field("idle_timeout", &self.heartbeat.local_idle_timeout())
            .field("is_open_sent", &self.is_open_sent)
            .field("remote_open", &self.remote_open)
            .field("endpoints", &self.endpoints.len())
            .finish()
    }
}

impl<T, C> Connection<T, C> {
    /// Current state of the connection
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Container id sent in the OPEN frame
    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Hostname sent in the OPEN frame
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// Local max-frame-size
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Sets the local max-frame-size.
    ///
    /// Fails if the value is below 512 or if the OPEN frame has already been sent. The previous
    /// value is kept on failure.
    pub fn set_max_frame_size(&mut self, max_frame_size: u32) -> Result<(), ConfigError> {
        if max_frame_size < MIN_MAX_FRAME_SIZE {
            return Err(ConfigError::MaxFrameSizeTooSmall(max_frame_size));
        }
        if self.is_open_sent {
            return Err(ConfigError::OpenAlreadySent);
        }
        self.max_frame_size = max_frame_size;
        Ok(())
    }

    /// Local channel-max
    pub fn channel_max(&self) -> u16 {
        self.channel_max
    }

    /// Sets the local channel-max. Fails if the OPEN frame has already been sent.
    pub fn set_channel_max(&mut self, channel_max: u16) -> Result<(), ConfigError> {
        if self.is_open_sent {
            return Err(ConfigError::OpenAlreadySent);
        }
        self.channel_max = channel_max;
        Ok(())
    }

    /// Local idle timeout in milliseconds. Zero means no idle timeout.
    pub fn idle_timeout(&self) -> u32 {
        self.heartbeat.local_idle_timeout()
    }

    /// Sets the local idle timeout in milliseconds. Fails if the OPEN frame has already been sent.
    pub fn set_idle_timeout(&mut self, idle_timeout: u32) -> Result<(), ConfigError> {
        if self.is_open_sent {
            return Err(ConfigError::OpenAlreadySent);
        }
        self.heartbeat.set_local_idle_timeout(idle_timeout);
        Ok(())
    }

    /// Returns a copy of the connection properties
    pub fn properties(&self) -> Option<Fields> {
        self.properties.clone()
    }

    /// Stores a copy of `properties`, or clears them with `None`
    pub fn set_properties(&mut self, properties: Option<&Fields>) {
        self.properties = properties.cloned();
    }

    /// Sets the fraction of the peer's idle-time-out after which an empty frame is sent
    pub fn set_remote_idle_timeout_empty_frame_send_ratio(
        &mut self,
        ratio: f64,
    ) -> Result<(), ConfigError> {
        if !heartbeat::is_valid_ratio(ratio) {
            return Err(ConfigError::InvalidEmptyFrameSendRatio(ratio));
        }
        self.heartbeat.set_empty_frame_send_ratio(ratio);
        Ok(())
    }

    /// Turns frame level tracing on or off
    pub fn set_trace(&mut self, trace_on: bool) {
        self.is_trace_on = trace_on;
    }

    /// Whether frame level tracing is on
    pub fn is_trace_on(&self) -> bool {
        self.is_trace_on
    }

    /// The OPEN frame received from the peer
    pub fn remote_open(&self) -> Option<&Open> {
        self.remote_open.as_ref()
    }

    /// Max-frame-size advertised by the peer
    pub fn remote_max_frame_size(&self) -> Option<u32> {
        self.remote_open.as_ref().map(|open| open.max_frame_size.0)
    }

    /// Idle-time-out advertised by the peer
    pub fn remote_idle_timeout(&self) -> Option<u32> {
        self.remote_open.as_ref().and_then(|open| open.idle_time_out)
    }

    /// Registers an endpoint on the lowest free outgoing channel
    pub fn create_endpoint(
        &mut self,
        handler: impl EndpointHandler + 'static,
    ) -> Result<Endpoint, CreateEndpointError> {
        self.endpoints
            .allocate(self.channel_max, Box::new(handler))
            .ok_or(CreateEndpointError::ChannelMaxReached)
    }

    /// Removes an endpoint and frees its channel. A stale handle is ignored.
    pub fn destroy_endpoint(&mut self, endpoint: Endpoint) {
        self.endpoints.remove(&endpoint);
    }

    /// Registers the callback invoked when the peer's CLOSE arrives. Only one subscription can be
    /// active at a time.
    pub fn subscribe_on_close_received<F>(
        &mut self,
        callback: F,
    ) -> Result<CloseReceivedSubscription, SubscribeError>
    where
        F: FnMut(Option<&definitions::Error>) + 'static,
    {
        if self.close_received.is_some() {
            return Err(SubscribeError::AlreadySubscribed);
        }
        let id = self.next_subscription_id;
        self.next_subscription_id += 1;
        self.close_received = Some((id, Box::new(callback)));
        Ok(CloseReceivedSubscription { id })
    }

    /// Removes the close received subscription
    pub fn unsubscribe_on_close_received(&mut self, subscription: CloseReceivedSubscription) {
        if matches!(&self.close_received, Some((id, _)) if *id == subscription.id) {
            self.close_received = None;
        }
    }

    /// Gets a reference to the transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Gets a mutable reference to the transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Gets a reference to the frame codec
    pub fn frame_codec(&self) -> &C {
        &self.frame_codec
    }
}

impl<T, C> Connection<T, C>
where
    T: Transport,
    C: FrameCodec,
{
    /// Asks the transport to open.
    ///
    /// [`do_work`](Self::do_work) calls this on its first invocation, so calling it explicitly is
    /// only needed to observe a synchronous failure.
    pub fn open(&mut self) -> Result<(), OpenError> {
        if self.is_transport_open_requested {
            return Err(OpenError::AlreadyOpened);
        }
        if self.state != ConnectionState::Start {
            return Err(OpenError::IllegalState(self.state));
        }

        self.is_transport_open_requested = true;
        if let Err(err) = self.transport.open() {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to open transport {:?}", err);
            #[cfg(feature = "log")]
            log::error!("Failed to open transport {:?}", err);
            self.set_state(ConnectionState::End);
            return Err(err.into());
        }
        Ok(())
    }

    /// Advances the connection.
    ///
    /// Opens the transport if that has not been requested yet, advances the transport, handles
    /// every event it reports, and finally checks idle-timeout deadlines.
    pub fn do_work(&mut self) {
        if !self.is_transport_open_requested {
            if self.state != ConnectionState::Start {
                return;
            }
            if self.open().is_err() {
                return;
            }
        }

        self.transport.do_work();
        while let Some(event) = self.transport.poll_event() {
            self.handle_event(event.into());
        }
        self.handle_deadlines();
    }

    /// Feeds a single event into the state machine
    pub fn handle_event(&mut self, event: ConnectionEvent) {
        if self.state == ConnectionState::End {
            #[cfg(feature = "tracing")]
            tracing::trace!("Event ignored after end {:?}", event);
            #[cfg(feature = "log")]
            log::trace!("Event ignored after end {:?}", event);
            return;
        }

        match event {
            ConnectionEvent::TransportOpened(result) => self.on_transport_open_complete(result),
            ConnectionEvent::BytesReceived(bytes) => self.on_bytes_received(&bytes),
            ConnectionEvent::TransportError(err) => self.on_transport_error(err),
            ConnectionEvent::PerformativeReceived {
                channel,
                performative,
                payload,
            } => self.on_performative_received(channel, performative, payload),
            ConnectionEvent::EmptyFrameReceived => {
                let now = self.tick_counter.current_ms();
                self.heartbeat.frame_received(now);
            }
            ConnectionEvent::CodecError(err) => self.on_codec_error(err),
        }
    }

    /// Sends a frame on behalf of `endpoint`.
    ///
    /// Only allowed while the connection is [`Opened`](ConnectionState::Opened).
    pub fn encode_frame<P>(
        &mut self,
        endpoint: &Endpoint,
        performative: &P,
        payloads: &[Bytes],
    ) -> Result<(), EncodeFrameError>
    where
        P: Serialize + fmt::Debug + ?Sized,
    {
        if self.state != ConnectionState::Opened {
            return Err(EncodeFrameError::IllegalState(self.state));
        }
        if !self.endpoints.contains(endpoint) {
            return Err(EncodeFrameError::UnknownEndpoint);
        }

        let channel = endpoint.outgoing_channel();
        let frame = self
            .frame_codec
            .encode_frame(channel, performative, payloads)?;
        if let Some(max) = self.remote_max_frame_size() {
            if frame.len() > max as usize {
                return Err(EncodeFrameError::FrameTooLarge {
                    size: frame.len(),
                    max,
                });
            }
        }

        if self.is_trace_on {
            trace_frame("SEND", channel, &performative);
        }
        self.send_bytes(frame)?;
        Ok(())
    }

    /// Closes the connection from the local side.
    ///
    /// Before the header exchange completes the transport is simply closed. Once the OPEN frame
    /// has been sent, a CLOSE carrying `error` is sent and the connection waits for the peer's
    /// CLOSE.
    pub fn close(&mut self, error: Option<definitions::Error>) -> Result<(), CloseError> {
        match self.state {
            ConnectionState::Start => {
                if self.is_transport_open_requested {
                    self.close_transport();
                }
                self.set_state(ConnectionState::End);
                Ok(())
            }
            ConnectionState::HeaderSent | ConnectionState::HeaderExchange => {
                self.abort();
                Ok(())
            }
            ConnectionState::OpenSent | ConnectionState::OpenReceived | ConnectionState::Opened => {
                let close = Close { error };
                match self.send_performative::<_, CloseError>(0, &close) {
                    Ok(()) => {
                        self.set_state(ConnectionState::CloseSent);
                        Ok(())
                    }
                    Err(err) => {
                        self.abort();
                        Err(err)
                    }
                }
            }
            state => Err(CloseError::IllegalState(state)),
        }
    }

    /// Enforces idle timeouts and returns the time left until the next deadline.
    ///
    /// Called at the end of every [`do_work`](Self::do_work).
    pub fn handle_deadlines(&mut self) -> Option<Duration> {
        let check_local = matches!(
            self.state,
            ConnectionState::OpenSent | ConnectionState::OpenReceived | ConnectionState::Opened
        );
        let check_remote = self.state == ConnectionState::Opened;

        let now = self.tick_counter.current_ms();
        if check_local && self.heartbeat.is_local_expired(now) {
            #[cfg(feature = "tracing")]
            tracing::error!("Idle timeout of {} ms expired", self.heartbeat.local_idle_timeout());
            #[cfg(feature = "log")]
            log::error!("Idle timeout of {} ms expired", self.heartbeat.local_idle_timeout());
            self.close_with_error(
                AmqpError::ResourceLimitExceeded,
                "Connection idle timeout expired",
            );
            return None;
        }

        if check_remote && self.heartbeat.is_empty_frame_due(now) {
            if let Err(_err) = self.send_empty_frame() {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to send empty frame {:?}", _err);
                #[cfg(feature = "log")]
                log::error!("Failed to send empty frame {:?}", _err);
                self.close_with_error(AmqpError::InternalError, "Failed to send empty frame");
                return None;
            }
        }

        self.heartbeat.next_deadline(now, check_local, check_remote)
    }

    fn set_state(&mut self, new_state: ConnectionState) {
        let previous_state = std::mem::replace(&mut self.state, new_state);

        #[cfg(feature = "tracing")]
        tracing::debug!("Connection state {} -> {}", previous_state, new_state);
        #[cfg(feature = "log")]
        log::debug!("Connection state {} -> {}", previous_state, new_state);

        if let Some(observer) = self.on_state_changed.as_mut() {
            observer(new_state, previous_state);
        }
        self.endpoints.notify_state_changed(new_state, previous_state);
    }

    fn close_transport(&mut self) {
        if let Err(_err) = self.transport.close() {
            #[cfg(feature = "tracing")]
            tracing::warn!("Failed to close transport {:?}", _err);
            #[cfg(feature = "log")]
            log::warn!("Failed to close transport {:?}", _err);
        }
    }

    /// Closes the transport and ends the connection without sending anything
    fn abort(&mut self) {
        self.close_transport();
        self.set_state(ConnectionState::End);
    }

    fn send_bytes(&mut self, bytes: Bytes) -> Result<(), transport::Error> {
        self.transport.send(bytes)?;
        let now = self.tick_counter.current_ms();
        self.heartbeat.frame_sent(now);
        Ok(())
    }

    fn send_performative<P, E>(&mut self, channel: u16, performative: &P) -> Result<(), E>
    where
        P: Serialize + fmt::Debug,
        E: From<frames::Error> + From<transport::Error>,
    {
        let frame = self.frame_codec.encode_frame(channel, performative, &[])?;
        if self.is_trace_on {
            trace_frame("SEND", channel, performative);
        }
        self.send_bytes(frame)?;
        Ok(())
    }

    fn send_empty_frame(&mut self) -> Result<(), EncodeFrameError> {
        let frame = self.frame_codec.encode_empty_frame()?;
        if self.is_trace_on {
            trace_frame("SEND", 0, &"Empty");
        }
        self.send_bytes(frame)?;
        Ok(())
    }

    /// Sends a CLOSE carrying an error and starts discarding incoming frames
    fn close_with_error(&mut self, condition: AmqpError, description: impl Into<String>) {
        if self.state.is_closing() {
            // A CLOSE is already on its way
            self.abort();
            return;
        }

        let error = amqp_error(condition, description.into());
        #[cfg(feature = "tracing")]
        tracing::warn!("Closing connection with error {:?}", error);
        #[cfg(feature = "log")]
        log::warn!("Closing connection with error {:?}", error);

        let close = Close { error: Some(error) };
        match self.send_performative::<_, CloseError>(0, &close) {
            Ok(()) => self.set_state(ConnectionState::Discarding),
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to send close {:?}", _err);
                #[cfg(feature = "log")]
                log::error!("Failed to send close {:?}", _err);
                self.abort();
            }
        }
    }

    fn on_transport_open_complete(&mut self, result: OpenResult) {
        if self.state != ConnectionState::Start {
            return;
        }

        match result {
            OpenResult::Ok => {
                let header: Bytes = ProtocolHeader::amqp().into();
                if self.is_trace_on {
                    trace_frame("SEND", 0, &ProtocolHeader::amqp());
                }
                match self.send_bytes(header) {
                    Ok(()) => self.set_state(ConnectionState::HeaderSent),
                    Err(_err) => {
                        #[cfg(feature = "tracing")]
                        tracing::error!("Failed to send protocol header {:?}", _err);
                        #[cfg(feature = "log")]
                        log::error!("Failed to send protocol header {:?}", _err);
                        self.abort();
                    }
                }
            }
            OpenResult::Error | OpenResult::Cancelled => {
                #[cfg(feature = "tracing")]
                tracing::error!("Transport failed to open {:?}", result);
                #[cfg(feature = "log")]
                log::error!("Transport failed to open {:?}", result);
                self.abort();
            }
        }
    }

    fn on_transport_error(&mut self, err: transport::Error) {
        #[cfg(feature = "tracing")]
        tracing::error!("Transport error {:?}", err);
        #[cfg(feature = "log")]
        log::error!("Transport error {:?}", err);

        if let Some(observer) = self.on_io_error.as_mut() {
            observer(&err);
        }
        self.abort();
    }

    fn on_codec_error(&mut self, _err: frames::Error) {
        #[cfg(feature = "tracing")]
        tracing::error!("Frame codec error {:?}", _err);
        #[cfg(feature = "log")]
        log::error!("Frame codec error {:?}", _err);
        self.abort();
    }

    fn on_bytes_received(&mut self, bytes: &[u8]) {
        match self.state {
            ConnectionState::Start | ConnectionState::End => {}
            ConnectionState::HeaderSent => match self.header_matcher.feed(bytes) {
                HeaderMatch::Incomplete => {}
                HeaderMatch::Mismatch {
                    position: _position,
                    found: _found,
                } => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(
                        "Protocol header mismatch at position {}, found {:#04x}",
                        _position,
                        _found
                    );
                    #[cfg(feature = "log")]
                    log::error!(
                        "Protocol header mismatch at position {}, found {:#04x}",
                        _position,
                        _found
                    );
                    self.abort();
                }
                HeaderMatch::Matched { consumed } => {
                    if self.is_trace_on {
                        trace_frame("RECV", 0, &ProtocolHeader::amqp());
                    }
                    self.set_state(ConnectionState::HeaderExchange);
                    self.send_open();

                    if self.state != ConnectionState::End && consumed < bytes.len() {
                        self.receive_frames(&bytes[consumed..]);
                    }
                }
            },
            _ => self.receive_frames(bytes),
        }
    }

    fn send_open(&mut self) {
        if let Err(_err) = self.frame_codec.set_max_frame_size(self.max_frame_size) {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to set max frame size {:?}", _err);
            #[cfg(feature = "log")]
            log::error!("Failed to set max frame size {:?}", _err);
            self.abort();
            return;
        }

        let open = Open {
            container_id: self.container_id.clone(),
            hostname: self.hostname.clone(),
            max_frame_size: self.max_frame_size.into(),
            channel_max: self.channel_max.into(),
            idle_time_out: match self.heartbeat.local_idle_timeout() {
                0 => None,
                timeout => Some(timeout),
            },
            outgoing_locales: None,
            incoming_locales: None,
            offered_capabilities: None,
            desired_capabilities: None,
            properties: self.properties.clone(),
        };

        match self.send_performative::<_, EncodeFrameError>(0, &open) {
            Ok(()) => {
                self.is_open_sent = true;
                // The idle clock starts with our OPEN
                let now = self.tick_counter.current_ms();
                self.heartbeat.frame_received(now);
                self.set_state(ConnectionState::OpenSent);
            }
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to send open {:?}", _err);
                #[cfg(feature = "log")]
                log::error!("Failed to send open {:?}", _err);
                self.abort();
            }
        }
    }

    fn receive_frames(&mut self, bytes: &[u8]) {
        if let Err(_err) = self.frame_codec.receive_bytes(bytes) {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to process received bytes {:?}", _err);
            #[cfg(feature = "log")]
            log::error!("Failed to process received bytes {:?}", _err);
            self.close_with_error(AmqpError::InternalError, "Failed to process received bytes");
            return;
        }

        while self.state != ConnectionState::End {
            match self.frame_codec.decode_frame() {
                Ok(Some(frame)) => self.handle_event(frame.into()),
                Ok(None) => break,
                Err(err) => self.on_codec_error(err),
            }
        }
    }

    fn on_performative_received(
        &mut self,
        channel: u16,
        performative: Option<Value>,
        payload: Bytes,
    ) {
        let now = self.tick_counter.current_ms();
        self.heartbeat.frame_received(now);

        match self.state {
            ConnectionState::Start | ConnectionState::End => return,
            ConnectionState::HeaderSent | ConnectionState::HeaderExchange => {
                #[cfg(feature = "tracing")]
                tracing::error!("Frame received before the protocol header exchange");
                #[cfg(feature = "log")]
                log::error!("Frame received before the protocol header exchange");
                self.abort();
                return;
            }
            _ => {}
        }

        let performative = match performative {
            Some(performative) => performative,
            // Only the peer's CLOSE matters once our CLOSE is out
            None if self.state.is_closing() => return,
            None => {
                self.close_with_error(
                    AmqpError::InternalError,
                    "Frame received without a performative",
                );
                return;
            }
        };

        if self.is_trace_on {
            trace_frame("RECV", channel, &performative);
        }

        match performative_kind(&performative) {
            PerformativeKind::Open => self.on_open_received(channel, &performative),
            PerformativeKind::Close => self.on_close_received(channel, &performative),
            PerformativeKind::Begin => {
                self.on_endpoint_frame_received(channel, performative, payload, true)
            }
            PerformativeKind::Other => {
                self.on_endpoint_frame_received(channel, performative, payload, false)
            }
        }
    }

    fn on_open_received(&mut self, channel: u16, performative: &Value) {
        match self.state {
            ConnectionState::Discarding | ConnectionState::CloseSent => return,
            _ if channel != 0 => {
                self.close_with_error(
                    AmqpError::NotAllowed,
                    format!("OPEN received on channel {}", channel),
                );
                return;
            }
            ConnectionState::Opened => {
                self.close_with_error(AmqpError::IllegalState, "OPEN received while opened");
                return;
            }
            _ => {}
        }

        self.set_state(ConnectionState::OpenReceived);

        let open: Open = match decode_performative(performative) {
            Ok(open) => open,
            Err(_err) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to decode open {:?}", _err);
                #[cfg(feature = "log")]
                log::error!("Failed to decode open {:?}", _err);
                self.close_with_error(AmqpError::InvalidField, "Invalid OPEN frame");
                return;
            }
        };

        if open.max_frame_size.0 < MIN_MAX_FRAME_SIZE {
            self.close_with_error(
                AmqpError::InvalidField,
                format!(
                    "Remote max frame size {} is below the minimum of {}",
                    open.max_frame_size.0, MIN_MAX_FRAME_SIZE
                ),
            );
            return;
        }

        self.heartbeat
            .set_remote_idle_timeout(open.idle_time_out.unwrap_or(0));
        self.remote_open = Some(open);
        self.set_state(ConnectionState::Opened);
    }

    fn on_close_received(&mut self, channel: u16, performative: &Value) {
        if channel > self.channel_max {
            self.close_with_error(
                AmqpError::InvalidField,
                format!("CLOSE received on channel {} above channel max", channel),
            );
            return;
        }

        // A CLOSE that fails to decode is treated as one without error
        let error = decode_performative::<Close>(performative)
            .ok()
            .and_then(|close| close.error);
        if let Some(_error) = &error {
            #[cfg(feature = "tracing")]
            tracing::warn!("Remote closed with error {:?}", _error);
            #[cfg(feature = "log")]
            log::warn!("Remote closed with error {:?}", _error);
        }

        if let Some((_, callback)) = self.close_received.as_mut() {
            callback(error.as_ref());
        }

        match self.state {
            ConnectionState::OpenSent | ConnectionState::OpenReceived | ConnectionState::Opened => {
                self.set_state(ConnectionState::CloseReceived);
                let close = Close { error: None };
                if let Err(_err) = self.send_performative::<_, CloseError>(0, &close) {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Failed to send close {:?}", _err);
                    #[cfg(feature = "log")]
                    log::warn!("Failed to send close {:?}", _err);
                }
                self.abort();
            }
            ConnectionState::Discarding | ConnectionState::CloseSent => self.abort(),
            _ => {}
        }
    }

    fn on_endpoint_frame_received(
        &mut self,
        channel: u16,
        performative: Value,
        payload: Bytes,
        is_begin: bool,
    ) {
        match self.state {
            ConnectionState::Opened => {}
            ConnectionState::Discarding | ConnectionState::CloseSent => return,
            _ => {
                self.close_with_error(
                    AmqpError::IllegalState,
                    "Frame received before the connection is opened",
                );
                return;
            }
        }

        if channel > self.channel_max {
            self.close_with_error(
                AmqpError::InvalidField,
                format!("Frame received on channel {} above channel max", channel),
            );
            return;
        }

        if is_begin {
            if let Ok(Begin {
                remote_channel: Some(remote_channel),
                ..
            }) = decode_performative::<Begin>(&performative)
            {
                self.endpoints.bind_incoming_channel(remote_channel, channel);
            }
        }

        if !self.endpoints.dispatch_frame(channel, performative, payload) {
            #[cfg(feature = "tracing")]
            tracing::debug!("No endpoint bound to incoming channel {}", channel);
            #[cfg(feature = "log")]
            log::debug!("No endpoint bound to incoming channel {}", channel);
        }
    }
}
