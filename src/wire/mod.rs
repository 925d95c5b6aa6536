pub mod command;
pub mod frame;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

/// Composes the frame decoder and encoder into a single duplex codec, the
/// way the teacher's `wire::Codec` composed its decoder/encoder pair.
#[derive(Debug)]
pub struct Codec {
    decoder: frame::Decoder,
    encoder: frame::Encoder,
}

impl Codec {
    pub fn new(max_frame_size: u32) -> Self {
        Codec { decoder: frame::Decoder::new(max_frame_size), encoder: frame::Encoder::default() }
    }
}

impl tokio_util::codec::Decoder for Codec {
    type Item = frame::Frame;
    type Error = frame::Error;

    fn decode(
        &mut self,
        src: &mut bytes::BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        self.decoder.decode(src)
    }
}

impl tokio_util::codec::Encoder<frame::Frame> for Codec {
    type Error = frame::Error;

    fn encode(&mut self, item: frame::Frame, dst: &mut bytes::BytesMut) -> Result<(), Self::Error> {
        self.encoder.encode(item, dst)
    }
}

/// Wraps an `AsyncRead + AsyncWrite` stream in the frame codec, parameterised
/// by the configured maximum frame size (spec §6).
pub fn framed<T>(io: T, max_frame_size: u32) -> Framed<T, Codec>
where
    T: AsyncRead + AsyncWrite,
{
    Framed::new(io, Codec::new(max_frame_size))
}
