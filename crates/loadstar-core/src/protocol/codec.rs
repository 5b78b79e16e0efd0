//! Line framing
//!
//! Requests are terminated by a carriage return. Responses are terminated by
//! CR+LF or a bare LF depending on firmware generation, and are trimmed of
//! surrounding whitespace before anyone looks at them.

use std::borrow::Cow;
use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use super::{commands::Request, ProtocolError, MAX_FRAME_SIZE};

/// Terminator appended to every request
pub const REQUEST_TERMINATOR: &[u8] = b"\r";

/// Terminator ending a response line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseTerminator {
    /// `\r\n`
    CrLf,
    /// `\n`
    Lf,
}

impl ResponseTerminator {
    /// Terminator bytes
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            ResponseTerminator::CrLf => b"\r\n",
            ResponseTerminator::Lf => b"\n",
        }
    }
}

/// One trimmed response line.
///
/// The empty frame means nothing arrived before the read deadline.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Frame {
    payload: Bytes,
}

impl Frame {
    /// The "no data yet" frame
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a frame from a raw line, trimming whitespace
    pub fn from_line(line: &[u8]) -> Self {
        Self {
            payload: Bytes::copy_from_slice(line.trim_ascii()),
        }
    }

    /// Check if this is the "no data" frame
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Raw payload
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Payload as text, replacing invalid UTF-8
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Check the payload against an exact token
    pub fn matches(&self, token: &str) -> bool {
        self.payload.as_ref() == token.as_bytes()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({:?})", self.text())
    }
}

impl From<&str> for Frame {
    fn from(s: &str) -> Self {
        Self::from_line(s.as_bytes())
    }
}

/// Codec for the sensor's line protocol
#[derive(Debug, Clone)]
pub struct FrameCodec {
    response_terminator: ResponseTerminator,
    max_frame_size: usize,
    /// Inside an oversized line; everything up to the next terminator is dropped
    discarding: bool,
}

impl FrameCodec {
    /// Create a codec for the given response terminator
    pub fn new(response_terminator: ResponseTerminator) -> Self {
        Self {
            response_terminator,
            max_frame_size: MAX_FRAME_SIZE,
            discarding: false,
        }
    }

    /// Response terminator in use
    pub fn response_terminator(&self) -> ResponseTerminator {
        self.response_terminator
    }

    /// Drop unterminated bytes, keeping a trailing partial terminator
    fn discard_unterminated(&mut self, src: &mut BytesMut) {
        let delim = self.response_terminator.as_bytes();
        let partial = &delim[..delim.len() - 1];
        let keep = if !partial.is_empty() && src.ends_with(partial) {
            partial.len()
        } else {
            0
        };
        src.advance(src.len() - keep);
    }
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        let delim = self.response_terminator.as_bytes();
        loop {
            let found = find_subsequence(&src[..], delim);

            if self.discarding {
                match found {
                    Some(pos) => {
                        src.advance(pos + delim.len());
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        self.discard_unterminated(src);
                        return Ok(None);
                    }
                }
            }

            let Some(pos) = found else {
                if src.len() > self.max_frame_size {
                    tracing::warn!(
                        bytes = src.len(),
                        "discarding oversized unterminated response"
                    );
                    self.discarding = true;
                    self.discard_unterminated(src);
                }
                return Ok(None);
            };

            if pos > self.max_frame_size {
                tracing::warn!(bytes = pos, "discarding oversized response");
                src.advance(pos + delim.len());
                continue;
            }

            let line = src.split_to(pos + delim.len());
            let frame = Frame::from_line(&line[..pos]);
            // Blank lines carry nothing
            if !frame.is_empty() {
                return Ok(Some(frame));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        let rest = src.split();
        if std::mem::take(&mut self.discarding) || rest.len() > self.max_frame_size {
            return Ok(None);
        }
        let frame = Frame::from_line(&rest);
        Ok((!frame.is_empty()).then_some(frame))
    }
}

impl Encoder<Request> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        dst.reserve(item.as_bytes().len() + REQUEST_TERMINATOR.len());
        dst.put_slice(item.as_bytes());
        dst.put_slice(REQUEST_TERMINATOR);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut FrameCodec, input: &[u8]) -> Vec<String> {
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            out.push(frame.text().into_owned());
        }
        out
    }

    #[test]
    fn test_encode_appends_carriage_return() {
        let mut codec = FrameCodec::new(ResponseTerminator::CrLf);
        let mut buf = BytesMut::new();
        codec.encode(Request::from("w"), &mut buf).unwrap();
        codec.encode(Request::ping(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"w\r\r");
    }

    #[test]
    fn test_decode_crlf() {
        let mut codec = FrameCodec::new(ResponseTerminator::CrLf);
        let frames = decode_all(&mut codec, b"12.34\r\n  A \r\npartial");
        assert_eq!(frames, vec!["12.34", "A"]);
    }

    #[test]
    fn test_decode_lf() {
        let mut codec = FrameCodec::new(ResponseTerminator::Lf);
        let frames = decode_all(&mut codec, b"1.5\n2.5\r\n");
        assert_eq!(frames, vec!["1.5", "2.5"]);
    }

    #[test]
    fn test_decode_skips_blank_lines() {
        let mut codec = FrameCodec::new(ResponseTerminator::CrLf);
        let frames = decode_all(&mut codec, b"\r\n \r\nA\r\n");
        assert_eq!(frames, vec!["A"]);
    }

    #[test]
    fn test_decode_waits_for_terminator() {
        let mut codec = FrameCodec::new(ResponseTerminator::CrLf);
        let mut buf = BytesMut::from(&b"12.3"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"4\r");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::from("12.34")));
    }

    #[test]
    fn test_decode_eof_flushes_remainder() {
        let mut codec = FrameCodec::new(ResponseTerminator::CrLf);
        let mut buf = BytesMut::from(&b"Tared"[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(Frame::from("Tared")));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_oversized_line_is_discarded() {
        let mut codec = FrameCodec::new(ResponseTerminator::CrLf);
        let mut buf = BytesMut::from(vec![b'x'; MAX_FRAME_SIZE + 1].as_slice());
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
        buf.extend_from_slice(b"A\r\n");
        // Still inside the oversized line: "A" is its tail
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"A\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::from("A")));
    }

    #[test]
    fn test_oversized_tail_is_not_a_frame() {
        let mut codec = FrameCodec::new(ResponseTerminator::CrLf);
        let mut buf = BytesMut::from(vec![b'x'; MAX_FRAME_SIZE + 1].as_slice());
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"xxxx\r\nA\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::from("A")));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_oversized_terminated_line_is_dropped() {
        let mut codec = FrameCodec::new(ResponseTerminator::CrLf);
        let mut input = vec![b'x'; 2 * MAX_FRAME_SIZE];
        input.extend_from_slice(b"\r\nA\r\n");
        assert_eq!(decode_all(&mut codec, &input), vec!["A"]);
    }

    #[test]
    fn test_line_at_size_limit_is_kept() {
        let mut codec = FrameCodec::new(ResponseTerminator::Lf);
        let mut input = vec![b'7'; MAX_FRAME_SIZE];
        input.push(b'\n');
        let frames = decode_all(&mut codec, &input);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), MAX_FRAME_SIZE);
    }

    #[test]
    fn test_discard_keeps_split_terminator() {
        let mut codec = FrameCodec::new(ResponseTerminator::CrLf);
        let mut input = vec![b'x'; MAX_FRAME_SIZE + 1];
        input.push(b'\r');
        let mut buf = BytesMut::from(input.as_slice());
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(&buf[..], b"\r");

        buf.extend_from_slice(b"\n12.5\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::from("12.5")));
    }

    #[test]
    fn test_decode_eof_drops_oversized_remainder() {
        let mut codec = FrameCodec::new(ResponseTerminator::CrLf);
        let mut buf = BytesMut::from(vec![b'x'; MAX_FRAME_SIZE + 1].as_slice());
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"tail");
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_frame_matches() {
        let frame = Frame::from_line(b" A\r\n");
        assert!(frame.matches("A"));
        assert!(!frame.matches("Tared"));
        assert!(Frame::empty().is_empty());
    }
}
