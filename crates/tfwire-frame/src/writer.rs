use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use tfwire_transport::IpStream;

use crate::codec::{encode_packet, FrameConfig, Packet, MAX_PACKET_SIZE};
use crate::error::{FrameError, Result};
use crate::reader::transport_to_frame_error;

/// Writes complete packets to any `Write` stream.
///
/// Each packet is encoded into an internal buffer and written in full before
/// returning, so a writer shared behind a mutex never interleaves packets.
pub struct PacketWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> PacketWriter<T> {
    /// Create a new packet writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new packet writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(MAX_PACKET_SIZE),
            config,
        }
    }

    /// Encode and write a complete packet (blocking).
    pub fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        if packet.length() > self.config.max_packet_size {
            return Err(FrameError::PayloadTooLarge {
                size: packet.length(),
                max: self.config.max_packet_size,
            });
        }

        self.buf.clear();
        encode_packet(packet, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl PacketWriter<IpStream> {
    /// Create a packet writer for `IpStream` and apply write timeout from config.
    pub fn with_config_ip(inner: IpStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::decode_packet;

    fn written(writer: PacketWriter<Cursor<Vec<u8>>>) -> BytesMut {
        BytesMut::from(writer.into_inner().into_inner().as_slice())
    }

    #[test]
    fn write_single_packet() {
        let mut writer = PacketWriter::new(Cursor::new(Vec::<u8>::new()));
        let packet = Packet::request(9, 1, 1, true, &b"hello"[..]);

        writer.write_packet(&packet).unwrap();

        let mut wire = written(writer);
        assert_eq!(decode_packet(&mut wire).unwrap().unwrap(), packet);
        assert!(wire.is_empty());
    }

    #[test]
    fn write_multiple_packets() {
        let mut writer = PacketWriter::new(Cursor::new(Vec::<u8>::new()));
        let packets = [
            Packet::request(1, 1, 1, true, &b"one"[..]),
            Packet::request(1, 2, 2, true, &b"two"[..]),
            Packet::request(1, 3, 3, false, &b"three"[..]),
        ];
        for packet in &packets {
            writer.write_packet(packet).unwrap();
        }

        let mut wire = written(writer);
        for expected in &packets {
            assert_eq!(&decode_packet(&mut wire).unwrap().unwrap(), expected);
        }
    }

    #[test]
    fn oversized_packet_rejected_before_write() {
        let cfg = FrameConfig {
            max_packet_size: 12,
            ..FrameConfig::default()
        };
        let mut writer = PacketWriter::with_config(Cursor::new(Vec::<u8>::new()), cfg);

        let err = writer
            .write_packet(&Packet::request(1, 1, 1, true, &b"oversized"[..]))
            .unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
        assert!(written(writer).is_empty());
    }

    #[test]
    fn flush_propagates() {
        let sink = FlushTrackingWriter::default();
        let flag = Arc::clone(&sink.flushed);
        let mut writer = PacketWriter::new(sink);

        writer
            .write_packet(&Packet::request(1, 1, 1, false, &b"x"[..]))
            .unwrap();

        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn handles_interrupted_and_short_writes() {
        let mut writer = PacketWriter::new(ChoppyWriter {
            interrupted: false,
            data: Vec::new(),
        });
        let packet = Packet::request(77, 4, 9, true, &b"retry"[..]);
        writer.write_packet(&packet).unwrap();

        let mut wire = BytesMut::from(writer.into_inner().data.as_slice());
        assert_eq!(decode_packet(&mut wire).unwrap().unwrap(), packet);
    }

    #[test]
    fn connection_closed_when_write_returns_zero() {
        let mut writer = PacketWriter::new(ZeroWriter);
        let err = writer
            .write_packet(&Packet::request(1, 1, 1, true, &b"x"[..]))
            .unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[derive(Default)]
    struct FlushTrackingWriter {
        flushed: Arc<AtomicBool>,
        data: Vec<u8>,
    }

    impl Write for FlushTrackingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Interrupts once, then accepts at most three bytes per call.
    struct ChoppyWriter {
        interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for ChoppyWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            let n = buf.len().min(3);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
