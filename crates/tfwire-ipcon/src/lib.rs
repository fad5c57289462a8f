//! Connection management for brickd devices.
//!
//! Open an [`IpConnection`], register devices by their base58 uid and call
//! their functions; responses are matched to requests by sequence number and
//! callbacks are delivered to listeners on a dedicated thread.
//!
//! ```no_run
//! use tfwire_ipcon::{ConnectionConfig, IpConnection, Rs232V2Bricklet};
//!
//! let ipcon = IpConnection::new(ConnectionConfig::new("localhost", 4223));
//! let rs232 = Rs232V2Bricklet::new("XYZ", &ipcon)?;
//! ipcon.connect()?;
//!
//! rs232.add_read_listener(|message| match message {
//!     Some(bytes) => println!("read {}", String::from_utf8_lossy(&bytes)),
//!     None => println!("stream out of sync"),
//! });
//! rs232.enable_read_callback()?;
//! rs232.write(b"test")?;
//! # Ok::<(), tfwire_ipcon::IpconError>(())
//! ```

mod callback;
pub mod config;
pub mod connection;
pub mod device;
mod dispatcher;
pub mod error;
mod registry;
pub mod rs232_v2;

pub use config::{
    ConnectionConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT, DEFAULT_WRITE_TIMEOUT,
};
pub use connection::{ConnectionEvent, ConnectionState, DisconnectReason, IpConnection};
pub use device::{Device, Identity};
pub use error::{IpconError, Result};
pub use registry::{ListenerId, ListenerResult, ResponseExpected};
pub use rs232_v2::{Rs232Error, Rs232V2Bricklet};
