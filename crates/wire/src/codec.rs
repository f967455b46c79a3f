//! Tokio codec for frames

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{Frame, HEADER_LEN};
use crate::WireError;

/// Reads and writes `[type u8][len u16 BE][payload]` frames
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        if src.len() < HEADER_LEN {
            src.reserve(HEADER_LEN - src.len());
            return Ok(None);
        }
        let len = u16::from_be_bytes([src[1], src[2]]) as usize;
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }
        let kind = src.get_u8();
        src.advance(2);
        let payload = src.split_to(len).freeze();
        Ok(Some(Frame::raw(kind, payload)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WireError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(WireError::Truncated { buffered: src.len() }),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), WireError> {
        let header = frame.header()?;
        dst.reserve(HEADER_LEN + frame.payload().len());
        dst.put_slice(&header);
        dst.put_slice(frame.payload());
        Ok(())
    }
}
