//! Line codec for the chat transport
//!
//! Inbound lines must end in `\r\n`. Anything else is classified rather
//! than rejected so the connection can answer with the right notice.
//! Outbound lines are written with a trailing `\n`.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::AppError;

/// Default longest payload accepted, excluding the `\r\n` terminator
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024;

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A well-formed line, terminator stripped
    Line(String),
    /// A frame of two bytes or fewer, ignored
    Blank,
    /// A line ending in a bare `\n`
    Unterminated,
    /// A line longer than the limit; the connection must be dropped
    Oversized,
}

/// Frames `\r\n` terminated lines up to a payload limit
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_line_bytes: usize,
}

impl LineCodec {
    pub fn new(max_line_bytes: usize) -> Self {
        Self { max_line_bytes }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_BYTES)
    }
}

impl Decoder for LineCodec {
    type Item = Inbound;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(newline) = src.iter().position(|b| *b == b'\n') else {
            // No terminator yet; a partial line already over the limit
            // can never become valid.
            if src.len() > self.max_line_bytes + 2 {
                src.clear();
                return Ok(Some(Inbound::Oversized));
            }
            return Ok(None);
        };

        let frame = src.split_to(newline + 1);
        if frame.len() <= 2 {
            return Ok(Some(Inbound::Blank));
        }
        if frame.len() > self.max_line_bytes + 2 {
            return Ok(Some(Inbound::Oversized));
        }
        if frame[frame.len() - 2] != b'\r' {
            return Ok(Some(Inbound::Unterminated));
        }

        let payload = &frame[..frame.len() - 2];
        Ok(Some(Inbound::Line(String::from_utf8_lossy(payload).into_owned())))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                // Trailing bytes without a terminator are dropped
                src.advance(src.len());
                Ok(None)
            }
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = AppError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
