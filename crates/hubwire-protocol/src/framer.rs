//! Record-separator framing.
//!
//! Each frame is one payload followed by a single 0x1E byte. Several frames
//! may share one transport buffer, and one frame may be spread over
//! several buffers. [`split`] handles the first case for a single buffer;
//! [`FrameReader`] handles both across successive reads.

use bytes::{Buf, Bytes, BytesMut};

use crate::ProtocolError;

/// ASCII "record separator"; terminates every frame.
pub const RECORD_SEPARATOR: u8 = 0x1E;

/// Returns `payload` with the separator appended.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.extend_from_slice(payload);
    out.push(RECORD_SEPARATOR);
    out
}

/// Appends the separator to an owned payload without copying it.
pub(crate) fn terminate(mut payload: Vec<u8>) -> Vec<u8> {
    payload.push(RECORD_SEPARATOR);
    payload
}

/// The result of splitting one buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split<'a> {
    /// Complete payloads, separators stripped, in stream order.
    pub frames: Vec<&'a [u8]>,
    /// Bytes after the last separator: the start of a frame that has not
    /// fully arrived yet.
    pub remainder: &'a [u8],
}

/// Splits a buffer into complete payloads.
///
/// An empty buffer yields nothing.
///
/// # Errors
/// Returns `ProtocolError::Framing` if the buffer is non-empty but holds
/// no separator: a conforming peer always terminates the first message it
/// queues.
pub fn split(buffer: &[u8]) -> Result<Split<'_>, ProtocolError> {
    if buffer.is_empty() {
        return Ok(Split {
            frames: Vec::new(),
            remainder: buffer,
        });
    }

    let Some(last) = buffer.iter().rposition(|&b| b == RECORD_SEPARATOR) else {
        return Err(ProtocolError::Framing(format!(
            "missing separator in {} byte buffer",
            buffer.len()
        )));
    };

    // `split` on the terminated prefix yields one empty slice after the
    // final separator; drop it.
    let mut frames: Vec<&[u8]> =
        buffer[..=last].split(|&b| b == RECORD_SEPARATOR).collect();
    frames.pop();

    Ok(Split {
        frames,
        remainder: &buffer[last + 1..],
    })
}

/// Reassembles frames across transport reads.
///
/// Bytes are appended with [`push`](Self::push) and complete payloads
/// taken with [`next_frame`](Self::next_frame), in the order their
/// separators appear. A partial frame stays buffered until the rest of it
/// arrives.
#[derive(Debug)]
pub struct FrameReader {
    buf: BytesMut,
    max_buffered: usize,
}

impl FrameReader {
    /// Default cap on unterminated bytes: 1 MiB.
    pub const DEFAULT_MAX_BUFFERED: usize = 1024 * 1024;

    /// Creates a reader that tolerates at most `max_buffered` bytes of an
    /// unterminated frame.
    pub fn new(max_buffered: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_buffered,
        }
    }

    /// Appends bytes read from the transport.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Takes the next complete payload, if one is buffered.
    ///
    /// # Errors
    /// Returns `ProtocolError::Framing` when more than `max_buffered` bytes
    /// have piled up without a separator. The buffer is discarded so the
    /// reader can resynchronize on the next frame the peer sends.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        match self.buf.iter().position(|&b| b == RECORD_SEPARATOR) {
            Some(idx) => {
                let payload = self.buf.split_to(idx).freeze();
                self.buf.advance(1);
                Ok(Some(payload))
            }
            None if self.buf.len() > self.max_buffered => {
                let dropped = self.buf.len();
                self.buf.clear();
                Err(ProtocolError::Framing(format!(
                    "missing separator after {dropped} buffered bytes"
                )))
            }
            None => Ok(None),
        }
    }

    /// Number of bytes waiting for a separator.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drops any partial frame, e.g. after the transport was replaced.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_BUFFERED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_appends_separator() {
        assert_eq!(frame(b"{}"), b"{}\x1e");
    }

    #[test]
    fn test_split_of_two_frames_returns_both_payloads() {
        let mut wire = frame(br#"{"type":6}"#);
        wire.extend(frame(br#"{"type":7}"#));

        let split = split(&wire).unwrap();
        assert_eq!(split.frames, vec![&br#"{"type":6}"#[..], &br#"{"type":7}"#[..]]);
        assert!(split.remainder.is_empty());
    }

    #[test]
    fn test_split_keeps_partial_tail_as_remainder() {
        let split = split(b"{\"type\":6}\x1e{\"ty").unwrap();
        assert_eq!(split.frames.len(), 1);
        assert_eq!(split.remainder, b"{\"ty");
    }

    #[test]
    fn test_split_empty_buffer_is_noop() {
        let split = split(b"").unwrap();
        assert!(split.frames.is_empty());
        assert!(split.remainder.is_empty());
    }

    #[test]
    fn test_split_without_separator_is_framing_error() {
        let result = split(br#"{"type":6}"#);
        assert!(matches!(result, Err(ProtocolError::Framing(_))));
    }

    #[test]
    fn test_split_preserves_empty_payload_between_separators() {
        let split = split(b"\x1e\x1e").unwrap();
        assert_eq!(split.frames, vec![&b""[..], &b""[..]]);
    }

    #[test]
    fn test_reader_reassembles_across_pushes() {
        let mut reader = FrameReader::default();
        reader.push(b"{\"type\"");
        assert!(reader.next_frame().unwrap().is_none());
        assert_eq!(reader.buffered(), 7);

        reader.push(b":6}\x1e{\"type\":7}\x1e{\"ty");
        assert_eq!(reader.next_frame().unwrap().unwrap(), &b"{\"type\":6}"[..]);
        assert_eq!(reader.next_frame().unwrap().unwrap(), &b"{\"type\":7}"[..]);
        assert!(reader.next_frame().unwrap().is_none());
        assert_eq!(reader.buffered(), 4);
    }

    #[test]
    fn test_reader_overflow_is_framing_error_and_resets() {
        let mut reader = FrameReader::new(4);
        reader.push(b"12345");
        assert!(matches!(reader.next_frame(), Err(ProtocolError::Framing(_))));
        assert_eq!(reader.buffered(), 0);

        reader.push(b"ok\x1e");
        assert_eq!(reader.next_frame().unwrap().unwrap(), &b"ok"[..]);
    }

    #[test]
    fn test_reader_clear_drops_partial_frame() {
        let mut reader = FrameReader::default();
        reader.push(b"partial");
        reader.clear();
        reader.push(b"x\x1e");
        assert_eq!(reader.next_frame().unwrap().unwrap(), &b"x"[..]);
    }
}
