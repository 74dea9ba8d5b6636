use std::io;

/// Errors raised by a [`FrameCodec`](super::FrameCodec)
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error, which includes frames exceeding the configured max-frame-size
    #[error("IO Error {0:?}")]
    Io(#[from] io::Error),

    /// The frame size is below the 8 octets of a frame header
    #[error("Frame size {0} is smaller than the frame header")]
    FrameTooSmall(usize),

    /// The data offset is below 2 or points past the end of the frame
    #[error("Invalid data offset {0}")]
    InvalidDataOffset(u8),

    /// Only AMQP frames (type 0x00) are handled
    #[error("Frame type {0:#04x} is not supported")]
    UnsupportedFrameType(u8),

    /// A max-frame-size below the protocol minimum was requested
    #[error("Max frame size {0} is below the minimum of 512")]
    MaxFrameSizeTooSmall(u32),

    /// Encoding or decoding of a performative failed
    #[error(transparent)]
    Serde(#[from] serde_amqp::Error),
}
