//! Function ids shared by every device.
//!
//! Ids 1-127 are device-specific. Ids from 128 up are reserved for functions
//! every device (or the daemon itself) understands.

/// Daemon keep-alive probe, sent to [`crate::uid::BROADCAST_UID`].
pub const DISCONNECT_PROBE: u8 = 128;

/// Ask every device to announce itself.
pub const ENUMERATE: u8 = 254;

/// Callback answering [`ENUMERATE`] or announcing a (dis)connected device.
pub const CALLBACK_ENUMERATE: u8 = 253;

/// Read the identity record of a single device.
pub const GET_IDENTITY: u8 = 255;

/// First function id that is not device-specific.
pub const RESERVED_START: u8 = 128;

/// Returns a human-readable name for a reserved function id.
pub fn function_name(id: u8) -> &'static str {
    match id {
        DISCONNECT_PROBE => "DISCONNECT_PROBE",
        ENUMERATE => "ENUMERATE",
        CALLBACK_ENUMERATE => "CALLBACK_ENUMERATE",
        GET_IDENTITY => "GET_IDENTITY",
        0 => "INVALID",
        RESERVED_START..=u8::MAX => "RESERVED",
        _ => "DEVICE",
    }
}

/// Returns true if the function id is in the reserved range.
pub fn is_reserved(id: u8) -> bool {
    id >= RESERVED_START
}
