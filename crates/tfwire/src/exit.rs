use std::fmt;
use std::io;

use tfwire_frame::FrameError;
use tfwire_ipcon::IpconError;
use tfwire_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DEVICE_ERROR: i32 = 40;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Connect { source, .. } | TransportError::Io(source) => {
            io_error(context, source)
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. }
        | FrameError::InvalidUid { .. }
        | FrameError::SequenceOutOfRange(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        FrameError::Malformed(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
    }
}

pub fn ipcon_error(context: &str, err: IpconError) -> CliError {
    match err {
        IpconError::Connection(err) => transport_error(context, err),
        IpconError::Frame(err) | IpconError::MalformedFrame(err) => frame_error(context, err),
        IpconError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        IpconError::Protocol { .. } => CliError::new(DEVICE_ERROR, format!("{context}: {err}")),
        IpconError::InvalidResponse { .. } | IpconError::StreamOutOfSync => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        IpconError::InvalidArgument(_) | IpconError::ResponseAlwaysExpected(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        IpconError::NotConnected | IpconError::Disconnected => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tfwire_frame::ErrorCode;

    use super::*;

    #[test]
    fn timeouts_map_to_124() {
        let err = ipcon_error("call", IpconError::Timeout(Duration::from_millis(100)));
        assert_eq!(err.code, TIMEOUT);
        assert!(err.message.starts_with("call: "));
    }

    #[test]
    fn device_errors_are_distinct() {
        let err = ipcon_error(
            "call",
            IpconError::Protocol {
                function_id: 9,
                code: ErrorCode::FunctionNotSupported,
            },
        );
        assert_eq!(err.code, DEVICE_ERROR);
    }

    #[test]
    fn refused_connection_is_transport_error() {
        let err = ipcon_error(
            "connect",
            IpconError::Connection(TransportError::Connect {
                addr: "127.0.0.1:4223".to_string(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            }),
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
    }

    #[test]
    fn bad_uid_is_usage_error() {
        let err = ipcon_error(
            "register",
            tfwire_frame::decode_uid("0").unwrap_err().into(),
        );
        assert_eq!(err.code, USAGE);
    }
}
