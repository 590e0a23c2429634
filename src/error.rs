use thiserror::Error;

pub use color_eyre::eyre::eyre;

use crate::protocol::response::ErrPayload;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// ERR packet reported by the server for a command.
    #[error("server error: {0}")]
    ServerError(#[from] ErrPayload),

    /// Transport EOF or I/O failure mid-packet. Fatal to the connection.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The server rejected the handshake. Fatal.
    #[error("authentication rejected: {0}")]
    AuthFailed(ErrPayload),

    #[error("bad config: {0}")]
    BadConfig(String),

    /// A packet whose leading byte did not match any expected response for
    /// the current command. The protocol is desynchronized; fatal.
    #[error("unexpected packet with leading byte 0x{0:02X}")]
    UnexpectedPacket(u8),

    /// A command was issued while a previous result set was still open.
    #[error("previous result set has not been fully consumed")]
    UnconsumedResultSet,

    /// The value codec failed to parse a field.
    #[error("decode error: {0}")]
    Decode(color_eyre::Report),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Whether this error leaves the connection unusable.
    ///
    /// Server errors arrive framed, so the stream stays in sync; the
    /// consumed guard is a precondition failure on the caller side.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::ServerError(_) | Error::UnconsumedResultSet)
    }
}

impl From<core::convert::Infallible> for Error {
    fn from(err: core::convert::Infallible) -> Self {
        match err {}
    }
}
