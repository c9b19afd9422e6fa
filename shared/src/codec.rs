//! Socket framing
//!
//! Each frame is a big-endian `u32` byte count followed by one protobuf
//! [`WireMessage`]. Frames are capped well below anything a chat socket
//! should carry; attachments travel over separate uploads.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use thiserror::Error;

use crate::WireMessage;

/// Size of the length prefix
pub const PREFIX_LEN: usize = 4;

/// Default cap on a single frame body
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Malformed frame: {0}")]
    Malformed(#[from] prost::DecodeError),

    #[error("Frame encode failed: {0}")]
    Encode(#[from] prost::EncodeError),
}

/// Encode one message as a complete frame
pub fn encode(message: &WireMessage) -> Result<Bytes, CodecError> {
    let len = message.encoded_len();
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }

    let mut frame = BytesMut::with_capacity(PREFIX_LEN + len);
    frame.put_u32(len as u32);
    message.encode(&mut frame)?;
    Ok(frame.freeze())
}

/// Reassembles frames from arbitrarily split socket reads
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_len: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_len(MAX_FRAME_LEN)
    }

    /// Decoder rejecting frames longer than `max_frame_len`
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            max_frame_len,
        }
    }

    /// Append bytes read from the socket
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Next complete message, or `None` until more bytes arrive
    ///
    /// An oversized length prefix is rejected as soon as it is seen, before
    /// its body is buffered.
    pub fn decode_next(&mut self) -> Result<Option<WireMessage>, CodecError> {
        let Some(mut prefix) = self.buffer.get(..PREFIX_LEN) else {
            return Ok(None);
        };
        let len = prefix.get_u32() as usize;
        if len > self.max_frame_len {
            return Err(CodecError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }
        if self.buffer.len() < PREFIX_LEN + len {
            return Ok(None);
        }

        self.buffer.advance(PREFIX_LEN);
        let body = self.buffer.split_to(len).freeze();
        Ok(Some(WireMessage::decode(body)?))
    }

    /// Bytes held back waiting for the rest of a frame
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{paths, Handshake, WireRequest};

    fn push(body: &[u8]) -> WireMessage {
        WireMessage::request(WireRequest::new(7, "PUT", paths::MESSAGE).with_body(body.to_vec()))
    }

    #[test]
    fn test_byte_at_a_time() {
        let frame = encode(&push(b"hello")).unwrap();
        let mut decoder = FrameDecoder::new();

        for byte in &frame[..frame.len() - 1] {
            decoder.extend(&[*byte]);
            assert!(decoder.decode_next().unwrap().is_none());
        }
        decoder.extend(&frame[frame.len() - 1..]);

        let message = decoder.decode_next().unwrap().expect("complete frame");
        assert_eq!(message.request.unwrap().body, b"hello");
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[test]
    fn test_handshake_and_push_in_one_read() {
        let mut read = BytesMut::new();
        read.extend_from_slice(&encode(&WireMessage::handshake(Handshake::unidentified("t"))).unwrap());
        read.extend_from_slice(&encode(&push(b"x")).unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.extend(&read);

        let first = decoder.decode_next().unwrap().unwrap();
        assert!(first.handshake.is_some());
        let second = decoder.decode_next().unwrap().unwrap();
        assert_eq!(second.request.unwrap().path, paths::MESSAGE);
        assert!(decoder.decode_next().unwrap().is_none());
    }

    #[test]
    fn test_oversized_prefix_rejected_early() {
        let mut decoder = FrameDecoder::with_max_frame_len(16);
        decoder.extend(&17u32.to_be_bytes());

        let err = decoder.decode_next().unwrap_err();
        assert!(matches!(err, CodecError::FrameTooLarge { len: 17, max: 16 }));
    }

    #[test]
    fn test_encode_refuses_oversized_message() {
        let big = push(&vec![0u8; MAX_FRAME_LEN]);
        assert!(matches!(encode(&big), Err(CodecError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_garbage_body_is_malformed() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&3u32.to_be_bytes());
        decoder.extend(&[0xff, 0xff, 0xff]);

        assert!(matches!(decoder.decode_next(), Err(CodecError::Malformed(_))));
    }
}
