//! Packet framing for the brickd binary protocol.
//!
//! Every packet carries a fixed 8-byte header:
//! - A 4-byte little-endian device UID
//! - A 1-byte total length (header + payload, at most 80)
//! - A 1-byte function id
//! - A sequence number, response-expected flag and error code packed into
//!   the remaining two bytes
//!
//! [`PacketReader`] turns an arbitrary byte stream into whole packets; no
//! partial reads or buffer management in user code.

pub mod codec;
pub mod error;
pub mod function;
pub mod reader;
#[cfg(feature = "async")]
pub mod tokio_codec;
pub mod uid;
pub mod writer;

pub use codec::{
    decode_packet, decode_stream, encode_packet, peek_length, Decoded, ErrorCode, FrameConfig,
    Packet, CALLBACK_SEQUENCE_NUMBER, HEADER_SIZE, MAX_PACKET_SIZE, MAX_PAYLOAD_SIZE,
    MAX_SEQUENCE_NUMBER,
};
pub use error::{FrameError, MalformedReason, Result};
pub use function::{CALLBACK_ENUMERATE, DISCONNECT_PROBE, ENUMERATE, GET_IDENTITY};
pub use reader::PacketReader;
#[cfg(feature = "async")]
pub use tokio_codec::TfpCodec;
pub use uid::{decode_uid, encode_uid};
pub use writer::PacketWriter;
