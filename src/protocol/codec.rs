use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::{FrameKind, WireFrame};
use crate::core::{Error, MAX_FRAME_SIZE};

const LENGTH_BYTES: usize = 4;

/// Length-prefixed frame codec
///
/// Each frame is a big-endian `u32` length followed by that many bytes: the
/// kind byte and the body. Frames longer than [`MAX_FRAME_SIZE`] are rejected
/// before they are buffered.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    /// Creates a frame codec with the default size limit
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        FrameCodec { max_frame_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = WireFrame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_BYTES {
            // Need more data to read frame length
            return Ok(None);
        }

        let mut length_bytes = [0u8; LENGTH_BYTES];
        length_bytes.copy_from_slice(&src[..LENGTH_BYTES]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length == 0 {
            return Err(Error::protocol("empty frame"));
        }
        if length > self.max_frame_size {
            return Err(Error::protocol(format!(
                "frame of {} bytes exceeds limit of {} bytes",
                length, self.max_frame_size
            )));
        }

        if src.len() < LENGTH_BYTES + length {
            src.reserve(LENGTH_BYTES + length - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_BYTES);
        let mut frame = src.split_to(length);
        let kind = frame.get_u8();
        let body = frame.freeze();

        let frame = match FrameKind::try_from(kind) {
            Ok(FrameKind::Data) => WireFrame::Data(body),
            Ok(FrameKind::Ping) => WireFrame::Ping(body),
            Ok(FrameKind::Pong) => WireFrame::Pong(body),
            Ok(FrameKind::Close) => WireFrame::Close(String::from_utf8_lossy(&body).into_owned()),
            Err(kind) => return Err(Error::protocol(format!("unknown frame kind {:#04x}", kind))),
        };
        Ok(Some(frame))
    }
}

impl Encoder<WireFrame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: WireFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = item.body();
        let length = body.len() + 1;
        if length > self.max_frame_size {
            return Err(Error::encoding(format!(
                "frame of {} bytes exceeds limit of {} bytes",
                length, self.max_frame_size
            )));
        }

        dst.reserve(LENGTH_BYTES + length);
        dst.put_u32(length as u32);
        dst.put_u8(item.kind() as u8);
        dst.extend_from_slice(body);
        Ok(())
    }
}
