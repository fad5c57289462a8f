//! Client for Tinkerforge-style bricklets behind a brickd daemon.
//!
//! tfwire speaks the daemon's compact binary protocol over TCP: fixed 8-byte
//! packet headers, request/response correlation by 4-bit sequence number, and
//! unsolicited callbacks delivered to listeners on their own thread.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP connect/listen and the stream wrapper
//! - [`frame`]: Packet codec, base58 uids, blocking packet reader/writer
//! - [`ipcon`]: Connection, request dispatch, callbacks and typed devices

/// Re-export transport types.
pub mod transport {
    pub use tfwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use tfwire_frame::*;
}

/// Re-export connection and device types.
pub mod ipcon {
    pub use tfwire_ipcon::*;
}

pub use tfwire_ipcon::{ConnectionConfig, Device, IpConnection, IpconError, Rs232V2Bricklet};
