//! Line/literal stream framer
//!
//! Both protocols are line-oriented, but IMAP interleaves byte-counted
//! literals (`{N}\r\n<N bytes>`) with command lines. The framer owns the read
//! buffer and yields exactly one frame per call, so the engine can switch
//! between line mode and literal mode before the next byte is consumed.
//! Bytes already buffered survive a mode switch, which is what makes
//! LITERAL+ work when the literal data arrives in the same packet as the
//! command line.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("line length {0} exceeds maximum {1}")]
    LineTooLong(usize, usize),

    #[error("connection closed mid-frame")]
    Truncated,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

const READ_CHUNK: usize = 8192;

/// Buffered reader that frames a byte stream into lines and literals
pub struct FrameReader {
    buf: Vec<u8>,
    max_line_length: usize,
}

impl FrameReader {
    pub fn new(max_line_length: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line_length,
        }
    }

    /// Discard all buffered bytes. Required after a STARTTLS upgrade: any
    /// bytes buffered before the handshake belong to the plaintext phase.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Read one line, terminator stripped. Returns `None` on a clean EOF at
    /// a frame boundary.
    pub async fn read_line<S>(&mut self, stream: &mut S) -> Result<Option<String>, FrameError>
    where
        S: AsyncRead + Unpin,
    {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop(); // \n
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if line.len() > self.max_line_length {
                    return Err(FrameError::LineTooLong(line.len(), self.max_line_length));
                }
                // malformed sequences are replaced, not fatal; engines spot
                // binary junk (stray ClientHello) themselves
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }

            if self.buf.len() > self.max_line_length {
                return Err(FrameError::LineTooLong(self.buf.len(), self.max_line_length));
            }

            if self.fill(stream).await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(FrameError::Truncated);
            }
        }
    }

    /// Read exactly `len` raw bytes, then consume at most one trailing CR
    /// and one trailing LF (the line ending that closes the literal's
    /// command line).
    pub async fn read_literal<S>(
        &mut self,
        stream: &mut S,
        len: usize,
    ) -> Result<Vec<u8>, FrameError>
    where
        S: AsyncRead + Unpin,
    {
        while self.buf.len() < len {
            if self.fill(stream).await? == 0 {
                return Err(FrameError::Truncated);
            }
        }
        let data: Vec<u8> = self.buf.drain(..len).collect();

        // The trailing CRLF may not be buffered yet; peek one byte at a time
        // without blocking past it.
        if self.peek_byte(stream).await? == Some(b'\r') {
            self.buf.remove(0);
        }
        if self.peek_byte(stream).await? == Some(b'\n') {
            self.buf.remove(0);
        }

        Ok(data)
    }

    async fn fill<S>(&mut self, stream: &mut S) -> Result<usize, FrameError>
    where
        S: AsyncRead + Unpin,
    {
        let mut chunk = [0u8; READ_CHUNK];
        let n = stream.read(&mut chunk).await?;
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// First buffered byte, reading once from the stream if the buffer is
    /// empty. `None` on EOF.
    async fn peek_byte<S>(&mut self, stream: &mut S) -> Result<Option<u8>, FrameError>
    where
        S: AsyncRead + Unpin,
    {
        if self.buf.is_empty() && self.fill(stream).await? == 0 {
            return Ok(None);
        }
        Ok(self.buf.first().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_read_lines() {
        let mut stream = Cursor::new(b"a1 NOOP\r\nplain lf\nlast".to_vec());
        let mut reader = FrameReader::new(1024);

        assert_eq!(
            reader.read_line(&mut stream).await.unwrap().as_deref(),
            Some("a1 NOOP")
        );
        assert_eq!(
            reader.read_line(&mut stream).await.unwrap().as_deref(),
            Some("plain lf")
        );
        // trailing bytes with no terminator: truncated, not a line
        assert!(matches!(
            reader.read_line(&mut stream).await,
            Err(FrameError::Truncated)
        ));
    }

    #[tokio::test]
    async fn test_eof_at_boundary() {
        let mut stream = Cursor::new(b"".to_vec());
        let mut reader = FrameReader::new(1024);
        assert!(reader.read_line(&mut stream).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_line_too_long() {
        let long = vec![b'x'; 64];
        let mut stream = Cursor::new([&long[..], b"\r\n"].concat());
        let mut reader = FrameReader::new(16);
        assert!(matches!(
            reader.read_line(&mut stream).await,
            Err(FrameError::LineTooLong(_, 16))
        ));
    }

    #[tokio::test]
    async fn test_literal_exact_bytes_and_trailing_crlf() {
        let mut stream = Cursor::new(b"Subject: x\r\n\r\n\r\na2 NOOP\r\n".to_vec());
        let mut reader = FrameReader::new(1024);

        let literal = reader.read_literal(&mut stream, 14).await.unwrap();
        assert_eq!(literal, b"Subject: x\r\n\r\n");

        // the CRLF terminating the APPEND line is consumed, the next command
        // parses cleanly
        assert_eq!(
            reader.read_line(&mut stream).await.unwrap().as_deref(),
            Some("a2 NOOP")
        );
    }

    #[tokio::test]
    async fn test_literal_without_trailing_crlf() {
        let mut stream = Cursor::new(b"abcNEXT\r\n".to_vec());
        let mut reader = FrameReader::new(1024);

        let literal = reader.read_literal(&mut stream, 3).await.unwrap();
        assert_eq!(literal, b"abc");
        // no CRLF followed the literal; the next line is intact
        assert_eq!(
            reader.read_line(&mut stream).await.unwrap().as_deref(),
            Some("NEXT")
        );
    }

    #[tokio::test]
    async fn test_literal_truncated() {
        let mut stream = Cursor::new(b"short".to_vec());
        let mut reader = FrameReader::new(1024);
        assert!(matches!(
            reader.read_literal(&mut stream, 100).await,
            Err(FrameError::Truncated)
        ));
    }

    #[tokio::test]
    async fn test_buffered_bytes_survive_mode_switch() {
        // LITERAL+ shape: command line and literal arrive in one packet
        let mut stream = Cursor::new(b"a1 APPEND INBOX {3+}\r\nhij\r\n".to_vec());
        let mut reader = FrameReader::new(1024);

        assert_eq!(
            reader.read_line(&mut stream).await.unwrap().as_deref(),
            Some("a1 APPEND INBOX {3+}")
        );
        let literal = reader.read_literal(&mut stream, 3).await.unwrap();
        assert_eq!(literal, b"hij");
    }

    #[tokio::test]
    async fn test_reset_discards_buffer() {
        let mut stream = Cursor::new(b"first\r\nleftover".to_vec());
        let mut reader = FrameReader::new(1024);
        reader.read_line(&mut stream).await.unwrap();
        reader.reset();
        assert!(matches!(
            reader.read_line(&mut stream).await,
            Err(FrameError::Truncated) | Ok(None)
        ));
    }
}
