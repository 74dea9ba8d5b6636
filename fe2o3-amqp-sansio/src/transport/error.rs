use std::io;

/// Errors raised by a [`Transport`](super::Transport)
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error
    #[error("IO Error {0:?}")]
    Io(#[from] io::Error),

    /// The transport has already been asked to open
    #[error("Transport is already open")]
    AlreadyOpen,

    /// The operation requires an open transport
    #[error("Transport is not open")]
    NotOpen,

    /// The remote peer closed its outgoing stream
    #[error("Transport closed by remote peer")]
    ClosedByPeer,
}
