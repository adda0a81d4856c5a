//! Tokio codec that splits raw 0x7E-delimited frames out of a byte stream.
//!
//! The codec deals in still-escaped frames, sentinels included; unescaping,
//! checksum verification and head parsing happen in the parser layer.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::{FRAME_SIGN, MAX_FRAME_SIZE};
use crate::error::CodecError;

/// Framing codec for the JT808 TCP byte stream.
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Vec<u8>;
    type Error = crate::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // Resynchronize on the first sentinel, dropping any noise.
            let Some(start) = src.iter().position(|&b| b == FRAME_SIGN) else {
                src.clear();
                return Ok(None);
            };
            if start > 0 {
                src.advance(start);
            }

            // Find the closing sentinel.
            let Some(end) = src[1..].iter().position(|&b| b == FRAME_SIGN).map(|p| p + 1)
            else {
                if src.len() > self.max_frame_size {
                    src.clear();
                    return Err(CodecError::BadFrame.into());
                }
                return Ok(None);
            };

            // Two adjacent sentinels: the first closed a previous frame (or
            // is stray); treat the second as the next frame's opener.
            if end == 1 {
                src.advance(1);
                continue;
            }

            let frame = src.split_to(end + 1);
            return Ok(Some(frame.to_vec()));
        }
    }
}

impl Encoder<Vec<u8>> for FrameCodec {
    type Error = crate::Error;

    fn encode(&mut self, item: Vec<u8>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.len() > self.max_frame_size {
            return Err(CodecError::BodyTooLarge {
                size: item.len(),
                max: self.max_frame_size,
            }
            .into());
        }
        dst.reserve(item.len());
        dst.put_slice(&item);
        Ok(())
    }
}

/// Incremental frame extractor for transports that deliver raw chunks.
///
/// Wraps [`FrameCodec`] with an internal buffer so session loops can feed
/// `recv` results and drain complete frames.
pub struct FrameBuffer {
    codec: FrameCodec,
    buf: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            codec: FrameCodec::new(),
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Append received bytes.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete frame, if any.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, crate::Error> {
        self.codec.decode(&mut self.buf)
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
