/// Errors that can occur during packet encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The byte stream does not hold a valid packet header.
    ///
    /// Once this is seen the stream position can no longer be trusted.
    #[error("malformed packet: {0}")]
    Malformed(MalformedReason),

    /// The payload exceeds the protocol maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The sequence number does not fit the 4-bit field.
    #[error("sequence number {0} out of range (max 15)")]
    SequenceOutOfRange(u8),

    /// A UID string could not be decoded.
    #[error("invalid uid {uid:?}: {reason}")]
    InvalidUid { uid: String, reason: &'static str },

    /// An I/O error occurred while reading or writing packets.
    #[error("packet I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete packet was received.
    #[error("connection closed (incomplete packet)")]
    ConnectionClosed,
}

/// Why a header was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    /// Declared length is smaller than the header itself.
    LengthTooSmall(u8),
    /// Declared length exceeds the maximum packet size.
    LengthTooLarge { length: u8, max: usize },
    /// Function id 0 is never assigned.
    InvalidFunctionId,
}

impl std::fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MalformedReason::LengthTooSmall(length) => {
                write!(f, "declared length {length} is shorter than the header")
            }
            MalformedReason::LengthTooLarge { length, max } => {
                write!(f, "declared length {length} exceeds maximum {max}")
            }
            MalformedReason::InvalidFunctionId => write!(f, "function id 0"),
        }
    }
}

impl FrameError {
    /// True when the error means the byte stream is corrupt.
    pub fn is_malformed(&self) -> bool {
        matches!(self, FrameError::Malformed(_))
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
