use std::time::Duration;

use tfwire_frame::{ErrorCode, FrameError};

/// Errors that can occur in connection and device operations.
#[derive(Debug, thiserror::Error)]
pub enum IpconError {
    /// Connecting to the daemon failed (refused, unreachable, timed out).
    #[error("connection failed: {0}")]
    Connection(#[from] tfwire_transport::TransportError),

    /// The operation needs a connected session.
    #[error("not connected")]
    NotConnected,

    /// `connect` was called while connected or connecting.
    #[error("already connected or connecting")]
    AlreadyConnected,

    /// The call was aborted because the connection went away.
    #[error("disconnected before a response arrived")]
    Disconnected,

    /// No response arrived before the deadline.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The device answered with a non-zero error code.
    #[error("function {function_id} failed on device: {code}")]
    Protocol { function_id: u8, code: ErrorCode },

    /// The byte stream from the daemon could not be framed.
    #[error("malformed packet stream: {0}")]
    MalformedFrame(FrameError),

    /// Frame-level error (encoding, I/O on the write path, invalid uid).
    #[error("frame error: {0}")]
    Frame(FrameError),

    /// No device with this uid is registered on the connection.
    #[error("device {0} is not registered")]
    NotFound(String),

    /// A response payload was shorter than the function defines.
    #[error("invalid response to function {function_id}: expected {expected} bytes, got {actual}")]
    InvalidResponse {
        function_id: u8,
        expected: usize,
        actual: usize,
    },

    /// The function always sends a response; the flag cannot be cleared.
    #[error("function {0} always expects a response")]
    ResponseAlwaysExpected(u8),

    /// A chunked transfer lost track of its offset.
    #[error("stream out of sync")]
    StreamOutOfSync,

    /// An argument is outside the range the protocol can carry.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A worker thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },
}

impl From<FrameError> for IpconError {
    fn from(err: FrameError) -> Self {
        if err.is_malformed() {
            IpconError::MalformedFrame(err)
        } else {
            IpconError::Frame(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, IpconError>;
