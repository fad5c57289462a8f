//! `tokio_util::codec` adapter for async transports.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_packet, encode_packet, Packet};
use crate::error::FrameError;

/// Packet codec for `Framed`, `FramedRead` and `FramedWrite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TfpCodec;

impl TfpCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for TfpCodec {
    type Item = Packet;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_packet(src)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(packet) => Ok(Some(packet)),
            None if buf.is_empty() => Ok(None),
            None => Err(FrameError::ConnectionClosed),
        }
    }
}

impl Encoder<Packet> for TfpCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_packet(&item, dst)
    }
}

impl Encoder<&Packet> for TfpCodec {
    type Error = FrameError;

    fn encode(&mut self, item: &Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_packet(item, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;

    #[tokio::test]
    async fn framed_roundtrip() {
        let packets = vec![
            Packet::request(1, 3, 1, true, bytes::Bytes::new()),
            Packet::callback(1, 12, &b"abc"[..]),
        ];

        let mut sink = FramedWrite::new(Vec::new(), TfpCodec::new());
        for packet in &packets {
            sink.send(packet).await.unwrap();
        }
        let wire = sink.into_inner();

        let mut stream = FramedRead::new(wire.as_slice(), TfpCodec::new());
        let mut out = Vec::new();
        while let Some(packet) = stream.next().await {
            out.push(packet.unwrap());
        }
        assert_eq!(out, packets);
    }

    #[tokio::test]
    async fn truncated_stream_reports_closed() {
        let mut wire = BytesMut::new();
        encode_packet(&Packet::callback(2, 12, &b"hello"[..]), &mut wire).unwrap();
        wire.truncate(wire.len() - 1);
        let wire = wire.to_vec();

        let mut stream = FramedRead::new(wire.as_slice(), TfpCodec::new());
        let result = stream.next().await.unwrap();
        assert!(matches!(result, Err(FrameError::ConnectionClosed)));
    }
}
