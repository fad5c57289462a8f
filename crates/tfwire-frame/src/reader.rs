use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use tfwire_transport::IpStream;

use crate::codec::{decode_packet, peek_length, FrameConfig, Packet, MAX_PACKET_SIZE};
use crate::error::{FrameError, MalformedReason, Result};

const INITIAL_BUFFER_CAPACITY: usize = 4 * MAX_PACKET_SIZE;
const READ_CHUNK_SIZE: usize = 1024;

/// Reads complete packets from any `Read` stream.
///
/// Handles partial reads internally; callers always get complete packets.
pub struct PacketReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> PacketReader<T> {
    /// Create a new packet reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new packet reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete packet (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` when EOF is reached. A
    /// header declaring more than `max_packet_size` bytes is malformed.
    pub fn read_packet(&mut self) -> Result<Packet> {
        loop {
            if let Some(length) = peek_length(&self.buf)? {
                if length > self.config.max_packet_size {
                    return Err(FrameError::Malformed(MalformedReason::LengthTooLarge {
                        // peek_length caps this at MAX_PACKET_SIZE
                        length: length as u8,
                        max: self.config.max_packet_size,
                    }));
                }
            }
            if let Some(packet) = decode_packet(&mut self.buf)? {
                return Ok(packet);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

}

impl PacketReader<IpStream> {
    /// Create a packet reader for `IpStream` and apply read timeout from config.
    pub fn with_config_ip(inner: IpStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_frame_error(err: tfwire_transport::TransportError) -> FrameError {
    match err {
        tfwire_transport::TransportError::Io(io)
        | tfwire_transport::TransportError::Accept(io) => FrameError::Io(io),
        tfwire_transport::TransportError::Bind { source, .. }
        | tfwire_transport::TransportError::Connect { source, .. }
        | tfwire_transport::TransportError::Resolve { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}
