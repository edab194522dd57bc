//! Buffered byte cursor with mark/reset.
//!
//! Readers use [`ByteStream`] to look ahead speculatively and rewind, for
//! example when searching for a record terminator that is not where the
//! leader says it is. Everything read after a mark is retained until the
//! next mark, so a reset never fails no matter how far past the hint the
//! caller has read; the hint only sizes the retained buffer up front.

use crate::error::{MarcError, Result};
use bytes::{Buf, BytesMut};
use std::io::{ErrorKind, Read};

const CHUNK_SIZE: usize = 8192;

/// Mark/reset-capable cursor over any [`Read`] source.
#[derive(Debug)]
pub struct ByteStream<R: Read> {
    inner: R,
    buffer: BytesMut,
    pos: usize,
    mark: Option<usize>,
    watermark: usize,
    consumed: u64,
    eof: bool,
}

impl<R: Read> ByteStream<R> {
    /// Wrap a reader
    pub fn new(inner: R) -> Self {
        ByteStream {
            inner,
            buffer: BytesMut::with_capacity(CHUNK_SIZE),
            pos: 0,
            mark: None,
            watermark: 0,
            consumed: 0,
            eof: false,
        }
    }

    /// Remember the current position.
    ///
    /// `hint` is how many bytes the caller expects to read before calling
    /// [`ByteStream::reset`]. Reading further is allowed; the retained
    /// window grows to cover it.
    pub fn mark(&mut self, hint: usize) {
        self.discard_consumed();
        self.mark = Some(0);
        self.watermark = hint;
        self.buffer.reserve(hint.min(1 << 20));
    }

    /// Rewind to the last mark. The mark stays valid.
    ///
    /// # Errors
    ///
    /// Returns an error if [`ByteStream::mark`] was never called.
    pub fn reset(&mut self) -> Result<()> {
        match self.mark {
            Some(mark) => {
                self.pos = mark;
                Ok(())
            },
            None => Err(MarcError::InvalidRecord(
                "reset called on a stream without a mark".to_string(),
            )),
        }
    }

    /// Read one byte, or `None` at end of input.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reader fails.
    pub fn read_byte(&mut self) -> Result<Option<u8>> {
        if self.pos >= self.buffer.len() && !self.fill()? {
            return Ok(None);
        }
        let byte = self.buffer[self.pos];
        self.pos += 1;
        Ok(Some(byte))
    }

    /// Look at the next byte without consuming it.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reader fails.
    pub fn peek_byte(&mut self) -> Result<Option<u8>> {
        if self.pos >= self.buffer.len() && !self.fill()? {
            return Ok(None);
        }
        Ok(Some(self.buffer[self.pos]))
    }

    /// Read up to `n` bytes. Fewer are returned only at end of input.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reader fails.
    pub fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        while self.buffer.len() - self.pos < n {
            if !self.fill()? {
                break;
            }
        }
        let end = (self.pos + n).min(self.buffer.len());
        let out = self.buffer[self.pos..end].to_vec();
        self.pos = end;
        Ok(out)
    }

    /// Read exactly `n` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MarcError::TruncatedRecord`] if the input ends first.
    pub fn read_exact_vec(&mut self, n: usize) -> Result<Vec<u8>> {
        let out = self.read(n)?;
        if out.len() < n {
            return Err(MarcError::TruncatedRecord(format!(
                "expected {n} bytes, found {}",
                out.len()
            )));
        }
        Ok(out)
    }

    /// Bytes the current mark is prepared to retain; grows as reads run
    /// past it and is reset by the next [`ByteStream::mark`]
    #[must_use]
    pub fn lookahead(&self) -> usize {
        self.watermark
    }

    /// Absolute offset of the next byte in the source
    #[must_use]
    pub fn position(&self) -> u64 {
        self.consumed + self.pos as u64
    }

    /// Whether the input is exhausted.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reader fails.
    pub fn is_at_end(&mut self) -> Result<bool> {
        Ok(self.peek_byte()?.is_none())
    }

    fn discard_consumed(&mut self) {
        let drop_to = self.pos;
        self.buffer.advance(drop_to);
        self.consumed += drop_to as u64;
        self.pos = 0;
        self.mark = None;
    }

    fn fill(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        if self.mark.is_none() && self.pos > 0 {
            self.discard_consumed();
        }
        if let Some(mark) = self.mark {
            let retained = self.buffer.len() - mark;
            if retained >= self.watermark {
                self.watermark = (retained + CHUNK_SIZE).max(self.watermark.saturating_mul(2));
                tracing::trace!(watermark = self.watermark, "lookahead window grown");
            }
            self.buffer.reserve(self.watermark - retained);
        }
        let mut chunk = [0u8; CHUNK_SIZE];
        loop {
            match self.inner.read(&mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(false);
                },
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    return Ok(true);
                },
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_read_and_reset() {
        let mut stream = ByteStream::new(Cursor::new(b"abcdef".to_vec()));
        assert_eq!(stream.read_byte().unwrap(), Some(b'a'));
        stream.mark(2);
        assert_eq!(stream.read(3).unwrap(), b"bcd");
        stream.reset().unwrap();
        assert_eq!(stream.read(10).unwrap(), b"bcdef");
        assert_eq!(stream.read_byte().unwrap(), None);
    }

    #[test]
    fn test_reset_past_hint() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let mut stream = ByteStream::new(Cursor::new(data.clone()));
        stream.mark(10);
        let first = stream.read(40_000).unwrap();
        assert_eq!(first.len(), 40_000);
        assert!(stream.lookahead() >= 40_000);
        stream.reset().unwrap();
        assert_eq!(stream.read(50_000).unwrap(), data);

        stream.mark(16);
        assert_eq!(stream.lookahead(), 16);
    }

    #[test]
    fn test_reset_without_mark_fails() {
        let mut stream = ByteStream::new(Cursor::new(b"xyz".to_vec()));
        assert!(stream.reset().is_err());
    }

    #[test]
    fn test_position_tracks_source_offset() {
        let mut stream = ByteStream::new(Cursor::new(b"0123456789".to_vec()));
        stream.read(4).unwrap();
        stream.mark(1);
        stream.read(3).unwrap();
        assert_eq!(stream.position(), 7);
        stream.reset().unwrap();
        assert_eq!(stream.position(), 4);
        assert_eq!(stream.peek_byte().unwrap(), Some(b'4'));
    }

    #[test]
    fn test_read_exact_reports_truncation() {
        let mut stream = ByteStream::new(Cursor::new(b"abc".to_vec()));
        assert!(matches!(
            stream.read_exact_vec(5),
            Err(MarcError::TruncatedRecord(_))
        ));
    }
}
