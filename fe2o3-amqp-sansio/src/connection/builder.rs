use std::fmt;

use fe2o3_amqp_types::definitions::Fields;

use crate::{
    endpoint::Endpoints,
    frames::{AmqpFrameCodec, FrameCodec, MIN_MAX_FRAME_SIZE},
    protocol_header::HeaderMatcher,
    states::ConnectionState,
    tick_counter::{SystemTickCounter, TickCounter},
    transport::{self, Transport},
};

use super::{
    heartbeat::{self, HeartBeat, DEFAULT_EMPTY_FRAME_SEND_RATIO},
    BuildError, Connection, IoErrorObserver, StateObserver, DEFAULT_CHANNEL_MAX,
    DEFAULT_MAX_FRAME_SIZE,
};

/// Connection builder
///
/// ```rust,ignore
/// let connection = Builder::new()
///     .container_id("1234")
///     .idle_time_out(30_000)
///     .build(transport)?;
/// ```
pub struct Builder<C = AmqpFrameCodec> {
    container_id: String,
    hostname: Option<String>,
    max_frame_size: u32,
    channel_max: u16,
    idle_time_out: u32,
    properties: Option<Fields>,
    trace: bool,
    empty_frame_send_ratio: f64,
    frame_codec: C,
    tick_counter: Option<Box<dyn TickCounter>>,
    on_state_changed: Option<StateObserver>,
    on_io_error: Option<IoErrorObserver>,
}

impl<C: fmt::Debug> fmt::Debug for Builder<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("container_id", &self.container_id)
            .field("hostname", &self.hostname)
            .field("max_frame_size", &self.max_frame_size)
            .field("channel_max", &self.channel_max)
            .field("idle_time_out", &self.idle_time_out)
            .field("properties", &self.properties)
            .field("trace", &self.trace)
            .field("empty_frame_send_ratio", &self.empty_frame_send_ratio)
            .field("frame_codec", &self.frame_codec)
            .finish()
    }
}

impl Default for Builder<AmqpFrameCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder<AmqpFrameCodec> {
    /// Creates a builder with the default configuration
    pub fn new() -> Self {
        Self {
            container_id: String::new(),
            hostname: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            channel_max: DEFAULT_CHANNEL_MAX,
            idle_time_out: 0,
            properties: None,
            trace: false,
            empty_frame_send_ratio: DEFAULT_EMPTY_FRAME_SEND_RATIO,
            frame_codec: AmqpFrameCodec::new(),
            tick_counter: None,
            on_state_changed: None,
            on_io_error: None,
        }
    }
}

impl<C> Builder<C> {
    /// Container id. This is required and must not be empty.
    pub fn container_id(mut self, id: impl Into<String>) -> Self {
        self.container_id = id.into();
        self
    }

    /// Hostname sent in the OPEN frame
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Max frame size. Must be at least 512.
    pub fn max_frame_size(mut self, max_frame_size: u32) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Channel max
    pub fn channel_max(mut self, channel_max: u16) -> Self {
        self.channel_max = channel_max;
        self
    }

    /// Idle time-out in milliseconds. Zero disables it.
    pub fn idle_time_out(mut self, idle_time_out: u32) -> Self {
        self.idle_time_out = idle_time_out;
        self
    }

    /// Connection properties
    pub fn properties(mut self, properties: Fields) -> Self {
        self.properties = Some(properties);
        self
    }

    /// Frame level tracing
    pub fn trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    /// Fraction of the peer's idle-time-out after which an empty frame is sent
    pub fn empty_frame_send_ratio(mut self, ratio: f64) -> Self {
        self.empty_frame_send_ratio = ratio;
        self
    }

    /// Replaces the frame codec
    pub fn frame_codec<C2>(self, frame_codec: C2) -> Builder<C2> {
        Builder {
            container_id: self.container_id,
            hostname: self.hostname,
            max_frame_size: self.max_frame_size,
            channel_max: self.channel_max,
            idle_time_out: self.idle_time_out,
            properties: self.properties,
            trace: self.trace,
            empty_frame_send_ratio: self.empty_frame_send_ratio,
            frame_codec,
            tick_counter: self.tick_counter,
            on_state_changed: self.on_state_changed,
            on_io_error: self.on_io_error,
        }
    }

    /// Replaces the clock used for idle timeouts
    pub fn tick_counter(mut self, tick_counter: impl TickCounter + 'static) -> Self {
        self.tick_counter = Some(Box::new(tick_counter));
        self
    }

    /// Observer invoked with `(new, previous)` on every state change, before endpoints are
    /// notified
    pub fn on_state_changed<F>(mut self, observer: F) -> Self
    where
        F: FnMut(ConnectionState, ConnectionState) + 'static,
    {
        self.on_state_changed = Some(Box::new(observer));
        self
    }

    /// Observer invoked when the transport reports an error
    pub fn on_io_error<F>(mut self, observer: F) -> Self
    where
        F: FnMut(&transport::Error) + 'static,
    {
        self.on_io_error = Some(Box::new(observer));
        self
    }

    /// Creates the connection over `transport`. The transport is not opened until
    /// [`Connection::open`] or [`Connection::do_work`] is called.
    pub fn build<T>(self, transport: T) -> Result<Connection<T, C>, BuildError>
    where
        T: Transport,
        C: FrameCodec,
    {
        if self.container_id.is_empty() {
            return Err(BuildError::EmptyContainerId);
        }
        if self.max_frame_size < MIN_MAX_FRAME_SIZE {
            return Err(BuildError::MaxFrameSizeTooSmall(self.max_frame_size));
        }
        if !heartbeat::is_valid_ratio(self.empty_frame_send_ratio) {
            return Err(BuildError::InvalidEmptyFrameSendRatio(
                self.empty_frame_send_ratio,
            ));
        }

        let tick_counter: Box<dyn TickCounter> = match self.tick_counter {
            Some(tick_counter) => tick_counter,
            None => Box::new(SystemTickCounter::new()),
        };

        Ok(Connection {
            transport,
            frame_codec: self.frame_codec,
            tick_counter,
            state: ConnectionState::Start,

            container_id: self.container_id,
            hostname: self.hostname,
            max_frame_size: self.max_frame_size,
            channel_max: self.channel_max,
            properties: self.properties,

            is_transport_open_requested: false,
            is_open_sent: false,
            is_trace_on: self.trace,
            header_matcher: HeaderMatcher::default(),
            remote_open: None,
            heartbeat: HeartBeat::new(self.idle_time_out, self.empty_frame_send_ratio),

            endpoints: Endpoints::new(),
            close_received: None,
            next_subscription_id: 0,
            on_state_changed: self.on_state_changed,
            on_io_error: self.on_io_error,
        })
    }
}
