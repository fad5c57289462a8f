//! TCP stream transport for brickd connections.
//!
//! This is the lowest layer of tfwire. It resolves `host:port` endpoints,
//! connects with a bounded timeout and hands out an [`IpStream`] that the
//! framing layer reads from and writes to. A [`TcpTransport`] listener is
//! provided for local peers (test daemons, loopback tools).

pub mod error;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use stream::IpStream;
pub use tcp::{Endpoint, TcpTransport, DEFAULT_HOST, DEFAULT_PORT};
