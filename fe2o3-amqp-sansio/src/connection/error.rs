//! Implements errors associated with the connection

use fe2o3_amqp_types::definitions::{self, AmqpError, ErrorCondition};

use crate::{frames, states::ConnectionState, transport};

/// Builds the error carried by a CLOSE frame
pub(crate) fn amqp_error(
    condition: impl Into<AmqpError>,
    description: impl Into<Option<String>>,
) -> definitions::Error {
    definitions::Error {
        condition: ErrorCondition::AmqpError(condition.into()),
        description: description.into(),
        info: None,
    }
}

/// Error building a [`Connection`](super::Connection)
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The container id must not be empty
    #[error("Container id is empty")]
    EmptyContainerId,

    /// The local max-frame-size is below the protocol minimum of 512
    #[error("Max frame size {0} is below the minimum of 512")]
    MaxFrameSizeTooSmall(u32),

    /// The empty frame send ratio must be in `(0, 1]`
    #[error("Empty frame send ratio {0} is not within (0, 1]")]
    InvalidEmptyFrameSendRatio(f64),
}

/// Error changing the configuration of a [`Connection`](super::Connection)
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The local max-frame-size is below the protocol minimum of 512
    #[error("Max frame size {0} is below the minimum of 512")]
    MaxFrameSizeTooSmall(u32),

    /// The value is frozen once the OPEN frame has been sent
    #[error("Open frame has already been sent")]
    OpenAlreadySent,

    /// The empty frame send ratio must be in `(0, 1]`
    #[error("Empty frame send ratio {0} is not within (0, 1]")]
    InvalidEmptyFrameSendRatio(f64),
}

/// Error associated with opening the transport
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    /// The transport has already been asked to open
    #[error("Transport open has already been requested")]
    AlreadyOpened,

    /// The connection was closed before the transport was opened
    #[error("Illegal local state {0}")]
    IllegalState(ConnectionState),

    /// The transport failed to schedule the open
    #[error(transparent)]
    Transport(#[from] transport::Error),
}

/// Error associated with creating an endpoint
#[derive(Debug, thiserror::Error)]
pub enum CreateEndpointError {
    /// Every channel up to the local channel-max is taken
    #[error("Reached connection channel max")]
    ChannelMaxReached,
}

/// Error associated with sending a frame on behalf of an endpoint
#[derive(Debug, thiserror::Error)]
pub enum EncodeFrameError {
    /// Frames can only be sent while the connection is opened
    #[error("Illegal local state {0}")]
    IllegalState(ConnectionState),

    /// The endpoint has been destroyed
    #[error("Endpoint is not registered on this connection")]
    UnknownEndpoint,

    /// The encoded frame exceeds the max-frame-size advertised by the peer
    #[error("Frame size {size} exceeds remote max frame size {max}")]
    FrameTooLarge {
        /// Size of the encoded frame
        size: usize,

        /// Max frame size advertised by the peer
        max: u32,
    },

    /// Encoding failed
    #[error(transparent)]
    Codec(#[from] frames::Error),

    /// The transport refused the frame
    #[error(transparent)]
    Transport(#[from] transport::Error),
}

/// Error associated with closing the connection locally
#[derive(Debug, thiserror::Error)]
pub enum CloseError {
    /// A close has already been sent or received, or the connection has ended
    #[error("Illegal local state {0}")]
    IllegalState(ConnectionState),

    /// Encoding the close frame failed
    #[error(transparent)]
    Codec(#[from] frames::Error),

    /// The transport refused the close frame
    #[error(transparent)]
    Transport(#[from] transport::Error),
}

/// Error subscribing to close-received notifications
#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    /// Only one subscription may be active at a time
    #[error("A close received subscription is already active")]
    AlreadySubscribed,
}
