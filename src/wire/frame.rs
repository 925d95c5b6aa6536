use std::{error, fmt, io};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec;

use crate::error::ProtocolError;

/// Header length: 4 bytes length, 1 control byte, 4 bytes correlation id.
const HEADER_LEN: usize = 9;

/// Control byte values, pinned per spec §4.1. Any other byte is a
/// `ProtocolError`, replacing the source's looser control-byte handling.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Control {
    /// Opaque payload: a literal command string or literal result.
    Opaque = 0,
    /// Payload is a space-separated list of cache keys.
    KeyList = 1,
    /// Payload is a space-separated list of base64-encoded values.
    ValueList = 2,
    /// Payload is alternating key / base64-value pairs.
    KeyValuePairs = 3,
}

impl TryFrom<u8> for Control {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Control::Opaque),
            1 => Ok(Control::KeyList),
            2 => Ok(Control::ValueList),
            3 => Ok(Control::KeyValuePairs),
            other => Err(ProtocolError::UnknownControlByte(other)),
        }
    }
}

/// A single frame on the wire: `[len: u32 LE][control: u8][correlation: u32 LE][payload]`.
///
/// Correlation id `0` is reserved for host-originated notifications that are
/// not a reply to any specific request (§4.1); client waiters are keyed by
/// ids starting at 1.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    pub control: u8,
    pub correlation: u32,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(control: Control, correlation: u32, payload: Bytes) -> Self {
        Frame { control: control as u8, correlation, payload }
    }
}

/// A decoder for a stream of `Frame`s, parameterised by the configured
/// maximum frame size (spec §6's "maximum frame size (bytes)" option).
///
/// Mirrors the teacher's split decoder/encoder-plus-state-machine shape
/// (`wire/decoder.rs`), but the header here is fixed-width rather than
/// newline-delimited, so there are only two states instead of three.
#[derive(Debug)]
pub struct Decoder {
    max_frame_size: u32,
    state: DecodeState,
}

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    Header,
    Body { control: u8, correlation: u32, len: usize },
}

impl Decoder {
    pub fn new(max_frame_size: u32) -> Self {
        Decoder { max_frame_size, state: DecodeState::Header }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        // 16 MiB: generous default, overridden by host/client configuration.
        Decoder::new(16 * 1024 * 1024)
    }
}

impl codec::Decoder for Decoder {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                DecodeState::Header => {
                    if src.len() < HEADER_LEN {
                        return Ok(None);
                    }

                    // Panic safety: indexing is safe as src.len() >= HEADER_LEN.
                    let len = u32::from_le_bytes(src[0..4].try_into().unwrap());
                    let control = src[4];
                    let correlation = u32::from_le_bytes(src[5..9].try_into().unwrap());

                    if len > self.max_frame_size {
                        src.advance(HEADER_LEN);
                        self.state = DecodeState::Header;
                        return Err(ProtocolError::FrameTooLarge {
                            len,
                            max: self.max_frame_size,
                        }
                        .into());
                    }

                    if Control::try_from(control).is_err() {
                        src.advance(HEADER_LEN);
                        self.state = DecodeState::Header;
                        return Err(ProtocolError::UnknownControlByte(control).into());
                    }

                    src.advance(HEADER_LEN);
                    self.state = DecodeState::Body { control, correlation, len: len as usize };
                },
                DecodeState::Body { control, correlation, len } => {
                    if src.len() < len {
                        return Ok(None);
                    }

                    // Panic safety: split_to requires len <= src.len(), just checked.
                    let payload = src.split_to(len).freeze();
                    self.state = DecodeState::Header;

                    return Ok(Some(Frame { control, correlation, payload }));
                },
            }
        }
    }
}

/// An encoder that writes `Frame`s to the wire.
#[derive(Debug, Default)]
pub struct Encoder {}

impl codec::Encoder<Frame> for Encoder {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = item.payload.len() as u32;

        dst.reserve(HEADER_LEN + item.payload.len());
        dst.put_u32_le(len);
        dst.put_u8(item.control);
        dst.put_u32_le(item.correlation);
        dst.extend_from_slice(&item.payload);

        Ok(())
    }
}

#[derive(Debug)]
pub enum Error {
    Protocol(ProtocolError),
    Io(io::Error),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<ProtocolError> for Error {
    fn from(value: ProtocolError) -> Self {
        Self::Protocol(value)
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;
    use tokio_util::codec::FramedRead;

    #[tokio::test]
    async fn round_trips_a_frame() {
        let mut buf = BytesMut::new();
        let mut enc = Encoder::default();
        codec::Encoder::encode(
            &mut enc,
            Frame::new(Control::KeyList, 7, Bytes::from_static(b"user:1 user:2")),
            &mut buf,
        )
        .unwrap();

        let mut dec = Decoder::new(1024);
        let got = codec::Decoder::decode(&mut dec, &mut buf).unwrap().unwrap();
        assert_eq!(got.control, Control::KeyList as u8);
        assert_eq!(got.correlation, 7);
        assert_eq!(&got.payload[..], b"user:1 user:2");
    }

    #[tokio::test]
    async fn reassembles_partial_reads() {
        let whole = {
            let mut buf = BytesMut::new();
            let mut enc = Encoder::default();
            codec::Encoder::encode(
                &mut enc,
                Frame::new(Control::Opaque, 1, Bytes::from_static(b"clear")),
                &mut buf,
            )
            .unwrap();
            buf.freeze()
        };

        let mut framed = FramedRead::new(
            tokio_test::io::Builder::new()
                .read(&whole[..5])
                .read(&whole[5..])
                .build(),
            Decoder::new(1024),
        );

        let got = framed.next().await.unwrap().unwrap();
        assert_eq!(&got.payload[..], b"clear");
        assert_eq!(got.correlation, 1);
    }

    #[tokio::test]
    async fn rejects_oversized_frame() {
        let mut buf = BytesMut::new();
        let mut enc = Encoder::default();
        codec::Encoder::encode(
            &mut enc,
            Frame::new(Control::Opaque, 1, Bytes::from_static(&[0u8; 100])),
            &mut buf,
        )
        .unwrap();

        let mut dec = Decoder::new(10);
        let err = codec::Decoder::decode(&mut dec, &mut buf).unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::FrameTooLarge { .. })));
    }

    #[tokio::test]
    async fn rejects_unknown_control_byte() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(0);
        buf.put_u8(9);
        buf.put_u32_le(0);

        let mut dec = Decoder::new(1024);
        let err = codec::Decoder::decode(&mut dec, &mut buf).unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::UnknownControlByte(9))));
    }
}
