use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, MalformedReason, Result};

/// Packet header: uid (4) + length (1) + function id (1) + seq/options (1) + flags (1).
pub const HEADER_SIZE: usize = 8;

/// Maximum total packet size (header + payload) accepted by brickd.
pub const MAX_PACKET_SIZE: usize = 80;

/// Maximum payload carried by a single packet.
pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - HEADER_SIZE;

/// Highest sequence number representable in the 4-bit field.
pub const MAX_SEQUENCE_NUMBER: u8 = 0x0F;

/// Sequence number carried by callbacks (never used for requests).
pub const CALLBACK_SEQUENCE_NUMBER: u8 = 0;

const SEQUENCE_SHIFT: u8 = 4;
const RESPONSE_EXPECTED_BIT: u8 = 0x08;
const ERROR_CODE_SHIFT: u8 = 6;

/// Error code reported by the remote side in a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Ok,
    InvalidParameter,
    FunctionNotSupported,
    Unknown,
}

impl ErrorCode {
    /// Decode from the 2-bit wire field.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => ErrorCode::Ok,
            1 => ErrorCode::InvalidParameter,
            2 => ErrorCode::FunctionNotSupported,
            _ => ErrorCode::Unknown,
        }
    }

    /// The 2-bit wire value.
    pub fn bits(self) -> u8 {
        match self {
            ErrorCode::Ok => 0,
            ErrorCode::InvalidParameter => 1,
            ErrorCode::FunctionNotSupported => 2,
            ErrorCode::Unknown => 3,
        }
    }

    pub fn is_ok(self) -> bool {
        self == ErrorCode::Ok
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ErrorCode::Ok => "ok",
            ErrorCode::InvalidParameter => "invalid parameter",
            ErrorCode::FunctionNotSupported => "function not supported",
            ErrorCode::Unknown => "unknown error",
        };
        f.write_str(text)
    }
}

/// A single protocol packet addressed to or sent by a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Numeric UID of the device.
    pub uid: u32,
    /// Function (request) or callback id.
    pub function_id: u8,
    /// Correlator for responses; 0 for callbacks.
    pub sequence_number: u8,
    /// Whether the sender asks for a response.
    pub response_expected: bool,
    /// Error reported by the device (responses only).
    pub error_code: ErrorCode,
    /// Raw little-endian payload.
    pub payload: Bytes,
}

impl Packet {
    /// Build an outgoing request.
    pub fn request(
        uid: u32,
        function_id: u8,
        sequence_number: u8,
        response_expected: bool,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            uid,
            function_id,
            sequence_number,
            response_expected,
            error_code: ErrorCode::Ok,
            payload: payload.into(),
        }
    }

    /// Build a response to `request`, as the daemon side would.
    pub fn response_to(request: &Packet, error_code: ErrorCode, payload: impl Into<Bytes>) -> Self {
        Self {
            uid: request.uid,
            function_id: request.function_id,
            sequence_number: request.sequence_number,
            response_expected: true,
            error_code,
            payload: payload.into(),
        }
    }

    /// Build an unsolicited callback packet.
    pub fn callback(uid: u32, function_id: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            uid,
            function_id,
            sequence_number: CALLBACK_SEQUENCE_NUMBER,
            response_expected: true,
            error_code: ErrorCode::Ok,
            payload: payload.into(),
        }
    }

    /// The value of the header length field.
    pub fn length(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// True for packets that answer no request.
    pub fn is_callback(&self) -> bool {
        self.sequence_number == CALLBACK_SEQUENCE_NUMBER
    }
}

/// Encode a packet into the wire format.
///
/// Wire format:
/// ```text
/// ┌────────────┬──────────┬──────────┬──────────────────────┬──────────────────┬──────────┐
/// │ UID        │ Length   │ Function │ Seq(4) Resp(1) Opt(3)│ Err(2) Future(6) │ Payload  │
/// │ (4B LE)    │ (1B)     │ (1B)     │ (1B)                 │ (1B)             │ (≤72B)   │
/// └────────────┴──────────┴──────────┴──────────────────────┴──────────────────┴──────────┘
/// ```
pub fn encode_packet(packet: &Packet, dst: &mut BytesMut) -> Result<()> {
    if packet.payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge {
            size: packet.payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }
    if packet.sequence_number > MAX_SEQUENCE_NUMBER {
        return Err(FrameError::SequenceOutOfRange(packet.sequence_number));
    }
    if packet.function_id == 0 {
        return Err(FrameError::Malformed(MalformedReason::InvalidFunctionId));
    }

    let mut seq_options = packet.sequence_number << SEQUENCE_SHIFT;
    if packet.response_expected {
        seq_options |= RESPONSE_EXPECTED_BIT;
    }

    dst.reserve(packet.length());
    dst.put_u32_le(packet.uid);
    dst.put_u8(packet.length() as u8);
    dst.put_u8(packet.function_id);
    dst.put_u8(seq_options);
    dst.put_u8(packet.error_code.bits() << ERROR_CODE_SHIFT);
    dst.put_slice(&packet.payload);
    Ok(())
}

/// Validate the header at the front of `src` and return the declared total length.
///
/// Returns `Ok(None)` if fewer than [`HEADER_SIZE`] bytes are available.
pub fn peek_length(src: &[u8]) -> Result<Option<usize>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let length = src[4];
    if (length as usize) < HEADER_SIZE {
        return Err(FrameError::Malformed(MalformedReason::LengthTooSmall(
            length,
        )));
    }
    if length as usize > MAX_PACKET_SIZE {
        return Err(FrameError::Malformed(MalformedReason::LengthTooLarge {
            length,
            max: MAX_PACKET_SIZE,
        }));
    }
    if src[5] == 0 {
        return Err(FrameError::Malformed(MalformedReason::InvalidFunctionId));
    }

    Ok(Some(length as usize))
}

/// Decode a packet from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete packet yet.
/// On success, consumes the packet bytes from the buffer.
pub fn decode_packet(src: &mut BytesMut) -> Result<Option<Packet>> {
    let total = match peek_length(src)? {
        Some(total) => total,
        None => return Ok(None), // Need more data
    };
    if src.len() < total {
        return Ok(None); // Need more data
    }

    let uid = src.get_u32_le();
    let _length = src.get_u8();
    let function_id = src.get_u8();
    let seq_options = src.get_u8();
    let flags = src.get_u8();
    let payload = src.split_to(total - HEADER_SIZE).freeze();

    Ok(Some(Packet {
        uid,
        function_id,
        sequence_number: seq_options >> SEQUENCE_SHIFT,
        response_expected: seq_options & RESPONSE_EXPECTED_BIT != 0,
        error_code: ErrorCode::from_bits(flags >> ERROR_CODE_SHIFT),
        payload,
    }))
}

/// Result of decoding as much of an accumulated buffer as possible.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// Complete packets, in stream order.
    pub packets: Vec<Packet>,
    /// Bytes at the front of the input that those packets occupied.
    pub consumed: usize,
}

impl Decoded {
    /// True when not even one packet was complete.
    pub fn needs_more_data(&self) -> bool {
        self.packets.is_empty()
    }
}

/// Decode every complete packet at the front of `src`.
///
/// Trailing bytes of an incomplete packet are left unconsumed; the caller keeps
/// them and appends the next read before calling again.
pub fn decode_stream(src: &[u8]) -> Result<Decoded> {
    let mut buf = BytesMut::from(src);
    let mut decoded = Decoded::default();

    while let Some(packet) = decode_packet(&mut buf)? {
        decoded.consumed += packet.length();
        decoded.packets.push(packet);
    }

    Ok(decoded)
}

/// Configuration for the packet reader/writer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum total packet size in bytes. Default: 80.
    pub max_packet_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(packet: &Packet) -> BytesMut {
        let mut buf = BytesMut::new();
        encode_packet(packet, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let packet = Packet::request(0x1234_5678, 1, 7, true, &b"hello, brickd"[..]);
        let mut buf = encode(&packet);

        assert_eq!(buf.len(), HEADER_SIZE + 13);

        let decoded = decode_packet(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, packet);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_header_layout() {
        let packet = Packet {
            uid: 0x0403_0201,
            function_id: 12,
            sequence_number: 0x0A,
            response_expected: true,
            error_code: ErrorCode::FunctionNotSupported,
            payload: Bytes::from_static(&[0xEE]),
        };
        let buf = encode(&packet);

        assert_eq!(&buf[..], &[0x01, 0x02, 0x03, 0x04, 9, 12, 0xA8, 0x80, 0xEE]);
    }

    #[test]
    fn test_decode_incomplete_header() {
        let mut buf = BytesMut::from(&[0x01, 0x02, 0x03][..]);
        let result = decode_packet(&mut buf).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_decode_incomplete_payload() {
        let mut buf = encode(&Packet::callback(1, 12, &b"hello"[..]));
        buf.truncate(HEADER_SIZE + 2);

        let result = decode_packet(&mut buf).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_decode_length_too_small() {
        let mut buf = BytesMut::from(&[0, 0, 0, 0, 4, 1, 0x18, 0][..]);
        let result = decode_packet(&mut buf);
        assert!(matches!(
            result,
            Err(FrameError::Malformed(MalformedReason::LengthTooSmall(4)))
        ));
    }

    #[test]
    fn test_decode_length_too_large() {
        let mut buf = BytesMut::from(&[0, 0, 0, 0, 200, 1, 0x18, 0][..]);
        let result = decode_packet(&mut buf);
        assert!(matches!(
            result,
            Err(FrameError::Malformed(MalformedReason::LengthTooLarge { .. }))
        ));
    }

    #[test]
    fn test_decode_zero_function_id() {
        let mut buf = BytesMut::from(&[1, 0, 0, 0, 8, 0, 0x18, 0][..]);
        let result = decode_packet(&mut buf);
        assert!(matches!(
            result,
            Err(FrameError::Malformed(MalformedReason::InvalidFunctionId))
        ));
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let packet = Packet::request(1, 1, 1, true, vec![0u8; MAX_PAYLOAD_SIZE + 1]);
        let mut buf = BytesMut::new();
        let result = encode_packet(&packet, &mut buf);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_encode_rejects_wide_sequence_number() {
        let packet = Packet::request(1, 1, 16, true, Bytes::new());
        let result = encode_packet(&packet, &mut BytesMut::new());
        assert!(matches!(result, Err(FrameError::SequenceOutOfRange(16))));
    }

    #[test]
    fn test_max_payload_fits() {
        let packet = Packet::callback(9, 12, vec![0x5A; MAX_PAYLOAD_SIZE]);
        let mut buf = encode(&packet);
        assert_eq!(buf.len(), MAX_PACKET_SIZE);
        assert_eq!(decode_packet(&mut buf).unwrap().unwrap(), packet);
    }

    #[test]
    fn test_multiple_packets() {
        let mut buf = encode(&Packet::request(1, 1, 1, true, &b"first"[..]));
        buf.extend_from_slice(&encode(&Packet::callback(2, 12, &b"second"[..])));

        let p1 = decode_packet(&mut buf).unwrap().unwrap();
        assert_eq!(p1.uid, 1);
        assert_eq!(p1.payload.as_ref(), b"first");

        let p2 = decode_packet(&mut buf).unwrap().unwrap();
        assert!(p2.is_callback());
        assert_eq!(p2.payload.as_ref(), b"second");

        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_stream_reports_consumed() {
        let mut wire = encode(&Packet::request(1, 3, 2, true, Bytes::new()));
        wire.extend_from_slice(&encode(&Packet::callback(1, 12, &b"abc"[..])));
        let complete = wire.len();
        wire.extend_from_slice(&[0x01, 0x00, 0x00]);

        let decoded = decode_stream(&wire).unwrap();
        assert_eq!(decoded.packets.len(), 2);
        assert_eq!(decoded.consumed, complete);
        assert!(!decoded.needs_more_data());

        let decoded = decode_stream(&wire[complete..]).unwrap();
        assert!(decoded.needs_more_data());
        assert_eq!(decoded.consumed, 0);
    }

    #[test]
    fn test_decode_stream_is_chunk_independent() {
        let packets: Vec<Packet> = (1..=6u8)
            .map(|i| {
                if i % 2 == 0 {
                    Packet::callback(u32::from(i) * 1000, 12, vec![i; usize::from(i) * 9])
                } else {
                    Packet::request(u32::from(i), i, i, i % 3 == 0, vec![i; usize::from(i)])
                }
            })
            .collect();

        let mut wire = BytesMut::new();
        for packet in &packets {
            encode_packet(packet, &mut wire).unwrap();
        }

        for chunk_size in [1usize, 2, 3, 7, 8, 13, 64, wire.len()] {
            let mut pending: Vec<u8> = Vec::new();
            let mut out = Vec::new();
            for chunk in wire.chunks(chunk_size) {
                pending.extend_from_slice(chunk);
                let decoded = decode_stream(&pending).unwrap();
                pending.drain(..decoded.consumed);
                out.extend(decoded.packets);
            }
            assert!(pending.is_empty(), "chunk size {chunk_size}");
            assert_eq!(out, packets, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn test_empty_payload() {
        let packet = Packet::request(7, 255, 15, true, Bytes::new());
        let mut buf = encode(&packet);

        let decoded = decode_packet(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.sequence_number, 15);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_response_to_copies_correlation() {
        let request = Packet::request(42, 5, 3, true, Bytes::new());
        let response = Packet::response_to(&request, ErrorCode::InvalidParameter, Bytes::new());
        assert_eq!(response.uid, 42);
        assert_eq!(response.function_id, 5);
        assert_eq!(response.sequence_number, 3);
        assert!(!response.error_code.is_ok());
    }

    #[test]
    fn test_error_code_bits() {
        for bits in 0..4u8 {
            assert_eq!(ErrorCode::from_bits(bits).bits(), bits);
        }
    }
}
