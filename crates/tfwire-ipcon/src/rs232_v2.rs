//! RS232 Bricklet 2.0.
//!
//! Serial messages longer than one packet travel as 60-byte chunks, each
//! tagged with the total message length and the chunk's offset. This module
//! splits outgoing messages, reassembles incoming ones and reports a stream
//! that lost chunks as out of sync.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use bytes::{BufMut, BytesMut};
use tracing::debug;

use crate::connection::IpConnection;
use crate::device::Device;
use crate::error::{IpconError, Result};
use crate::registry::{ListenerId, ResponseExpected};

pub const DEVICE_IDENTIFIER: u16 = 2108;
pub const DEVICE_DISPLAY_NAME: &str = "RS232 Bricklet 2.0";

pub const FUNCTION_WRITE_LOW_LEVEL: u8 = 1;
pub const FUNCTION_READ_LOW_LEVEL: u8 = 2;
pub const FUNCTION_ENABLE_READ_CALLBACK: u8 = 3;
pub const FUNCTION_DISABLE_READ_CALLBACK: u8 = 4;
pub const FUNCTION_IS_READ_CALLBACK_ENABLED: u8 = 5;

pub const CALLBACK_READ_LOW_LEVEL: u8 = 12;
pub const CALLBACK_ERROR: u8 = 13;

/// Data bytes per chunk.
pub const CHUNK_SIZE: usize = 60;

const CHUNK_PAYLOAD_SIZE: usize = 4 + CHUNK_SIZE;

/// Chunk offset the device reports when it has nothing to read.
const NO_DATA_OFFSET: u16 = u16::MAX;

/// Error reported by the bricklet's UART.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rs232Error {
    Overrun,
    Parity,
    Framing,
    Other(u8),
}

impl From<u8> for Rs232Error {
    fn from(code: u8) -> Self {
        match code {
            0 => Rs232Error::Overrun,
            1 => Rs232Error::Parity,
            2 => Rs232Error::Framing,
            other => Rs232Error::Other(other),
        }
    }
}

impl fmt::Display for Rs232Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rs232Error::Overrun => f.write_str("overrun"),
            Rs232Error::Parity => f.write_str("parity"),
            Rs232Error::Framing => f.write_str("framing"),
            Rs232Error::Other(code) => write!(f, "unknown error {code}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Chunk {
    message_length: u16,
    offset: u16,
    data: [u8; CHUNK_SIZE],
}

impl Chunk {
    fn parse(function_id: u8, payload: &[u8]) -> Result<Self> {
        if payload.len() < CHUNK_PAYLOAD_SIZE {
            return Err(IpconError::InvalidResponse {
                function_id,
                expected: CHUNK_PAYLOAD_SIZE,
                actual: payload.len(),
            });
        }
        let mut data = [0u8; CHUNK_SIZE];
        data.copy_from_slice(&payload[4..CHUNK_PAYLOAD_SIZE]);
        Ok(Self {
            message_length: u16::from_le_bytes([payload[0], payload[1]]),
            offset: u16::from_le_bytes([payload[2], payload[3]]),
            data,
        })
    }

    fn encode(message_length: u16, offset: u16, data: &[u8]) -> BytesMut {
        let mut buf = BytesMut::with_capacity(CHUNK_PAYLOAD_SIZE);
        buf.put_u16_le(message_length);
        buf.put_u16_le(offset);
        buf.put_slice(data);
        buf.put_bytes(0, CHUNK_SIZE - data.len());
        buf
    }
}

/// Reassembles read-callback chunks into whole messages.
#[derive(Debug, Default)]
struct ReadAssembler {
    /// `Some` while a message is in progress.
    message: Option<Vec<u8>>,
    expected: usize,
}

impl ReadAssembler {
    /// Feed one chunk and return what it produced, in order: `Some(msg)`
    /// for a complete message, `None` when the stream fell out of sync.
    ///
    /// A zero-offset chunk always starts a new message, even when it also
    /// ends the previous one early.
    fn push(&mut self, chunk: &Chunk) -> Vec<Option<Vec<u8>>> {
        let mut out = Vec::new();
        let offset = usize::from(chunk.offset);
        if let Some(received) = self.message.as_ref().map(Vec::len) {
            if received != offset {
                self.message = None;
                out.push(None);
            }
        }

        if self.message.is_none() {
            if offset != 0 {
                // Tail of a message whose start we missed.
                return out;
            }
            self.expected = usize::from(chunk.message_length);
            self.message = Some(Vec::with_capacity(self.expected));
        }

        let Some(message) = self.message.as_mut() else {
            return out;
        };
        let take = CHUNK_SIZE.min(self.expected - message.len());
        message.extend_from_slice(&chunk.data[..take]);
        if message.len() >= self.expected {
            out.push(self.message.take());
        }
        out
    }
}

/// Typed handle for an RS232 Bricklet 2.0.
#[derive(Debug, Clone)]
pub struct Rs232V2Bricklet {
    device: Device,
}

impl Rs232V2Bricklet {
    pub fn new(uid: &str, ipcon: &IpConnection) -> Result<Self> {
        let device = ipcon.register(uid)?;
        device.declare_functions(&[
            (FUNCTION_WRITE_LOW_LEVEL, ResponseExpected::AlwaysTrue),
            (FUNCTION_READ_LOW_LEVEL, ResponseExpected::AlwaysTrue),
            (FUNCTION_ENABLE_READ_CALLBACK, ResponseExpected::True),
            (FUNCTION_DISABLE_READ_CALLBACK, ResponseExpected::True),
            (FUNCTION_IS_READ_CALLBACK_ENABLED, ResponseExpected::AlwaysTrue),
        ]);
        Ok(Self { device })
    }

    /// The untyped device handle.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Write `message` to the serial port. Returns the number of bytes the
    /// bricklet accepted, which is less than the message length when its
    /// send buffer is full.
    pub fn write(&self, message: &[u8]) -> Result<usize> {
        let message_length = u16::try_from(message.len()).map_err(|_| {
            IpconError::InvalidArgument(format!(
                "message of {} bytes exceeds {}",
                message.len(),
                u16::MAX
            ))
        })?;

        let mut written = 0usize;
        let mut offset = 0usize;
        loop {
            let end = (offset + CHUNK_SIZE).min(message.len());
            // offset < message.len() <= u16::MAX, or offset == 0
            let payload = Chunk::encode(message_length, offset as u16, &message[offset..end]);
            let response = self
                .device
                .call_expecting(FUNCTION_WRITE_LOW_LEVEL, &payload, 1)?;
            let chunk_written = usize::from(response[0]).min(end - offset);
            written += chunk_written;

            offset += CHUNK_SIZE;
            if chunk_written < CHUNK_SIZE || offset >= message.len() {
                break;
            }
        }
        Ok(written)
    }

    /// Read up to `length` buffered bytes.
    ///
    /// Fails with `StreamOutOfSync` when the chunks do not line up; the rest
    /// of that message is drained first so the next read starts clean.
    pub fn read(&self, length: u16) -> Result<Vec<u8>> {
        let first = self.read_chunk(length)?;
        if first.offset == NO_DATA_OFFSET {
            return Ok(Vec::new());
        }

        let message_length = usize::from(first.message_length);
        let mut message = Vec::with_capacity(message_length);
        let mut in_sync = first.offset == 0;
        let mut offset = usize::from(first.offset);

        if in_sync {
            message.extend_from_slice(&first.data[..CHUNK_SIZE.min(message_length)]);
            while message.len() < message_length {
                let chunk = self.read_chunk(length)?;
                if usize::from(chunk.offset) != message.len() {
                    in_sync = false;
                    offset = usize::from(chunk.offset);
                    break;
                }
                let take = CHUNK_SIZE.min(message_length - message.len());
                message.extend_from_slice(&chunk.data[..take]);
            }
        }

        if !in_sync {
            while offset + CHUNK_SIZE < message_length {
                offset = usize::from(self.read_chunk(length)?.offset);
            }
            debug!(uid = %self.device.uid_text(), "read stream out of sync");
            return Err(IpconError::StreamOutOfSync);
        }

        Ok(message)
    }

    fn read_chunk(&self, length: u16) -> Result<Chunk> {
        let response = self.device.call_expecting(
            FUNCTION_READ_LOW_LEVEL,
            &length.to_le_bytes(),
            CHUNK_PAYLOAD_SIZE,
        )?;
        Chunk::parse(FUNCTION_READ_LOW_LEVEL, &response)
    }

    /// Start delivering received data through read listeners.
    pub fn enable_read_callback(&self) -> Result<()> {
        self.device
            .call(FUNCTION_ENABLE_READ_CALLBACK, &[])
            .map(|_| ())
    }

    pub fn disable_read_callback(&self) -> Result<()> {
        self.device
            .call(FUNCTION_DISABLE_READ_CALLBACK, &[])
            .map(|_| ())
    }

    pub fn is_read_callback_enabled(&self) -> Result<bool> {
        let response = self
            .device
            .call_expecting(FUNCTION_IS_READ_CALLBACK_ENABLED, &[], 1)?;
        Ok(response[0] != 0)
    }

    /// Receive whole messages from the read callback.
    ///
    /// `listener` gets `Some(message)` per message and `None` once when
    /// chunks were lost; reassembly resumes at the next message start.
    pub fn add_read_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(Option<Vec<u8>>) + Send + Sync + 'static,
    {
        let assembler = Mutex::new(ReadAssembler::default());
        self.device
            .add_listener(CALLBACK_READ_LOW_LEVEL, move |payload| {
                let chunk = Chunk::parse(CALLBACK_READ_LOW_LEVEL, payload)?;
                let produced = assembler
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(&chunk);
                for message in produced {
                    listener(message);
                }
                Ok(())
            })
    }

    pub fn add_error_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(Rs232Error) + Send + Sync + 'static,
    {
        self.device.add_listener(CALLBACK_ERROR, move |payload| {
            let code = payload.first().copied().ok_or(IpconError::InvalidResponse {
                function_id: CALLBACK_ERROR,
                expected: 1,
                actual: 0,
            })?;
            listener(Rs232Error::from(code));
            Ok(())
        })
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.device.remove_listener(id)
    }
}
