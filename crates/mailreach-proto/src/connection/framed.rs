//! Framed I/O for line-oriented mail protocols.
//!
//! Both IMAP and POP3 use CRLF-terminated lines. IMAP responses may also
//! embed literals (`{n}\r\n` followed by `n` raw bytes). Partial input is
//! kept in the stream between calls, so a read interrupted by a timeout can
//! be resumed without losing bytes.

#![allow(clippy::missing_errors_doc)]

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::{Error, Result};

/// Default buffer size for reading.
const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Maximum line length to prevent memory exhaustion.
const MAX_LINE_LENGTH: usize = 1024 * 1024; // 1 MB

/// Maximum literal size to prevent memory exhaustion.
const MAX_LITERAL_SIZE: usize = 100 * 1024 * 1024; // 100 MB

/// Buffered, line-framed stream.
pub struct FramedStream<S> {
    reader: BufReader<S>,
    line: BytesMut,
    response: Vec<u8>,
    literal_remaining: usize,
}

impl<S> FramedStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new framed stream.
    pub fn new(stream: S) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, stream),
            line: BytesMut::with_capacity(256),
            response: Vec::new(),
            literal_remaining: 0,
        }
    }

    /// Reads a complete IMAP response, including any embedded literals.
    pub async fn read_response(&mut self) -> Result<Vec<u8>> {
        loop {
            if self.literal_remaining > 0 {
                let buf = self.reader.fill_buf().await?;
                if buf.is_empty() {
                    return Err(closed());
                }
                let n = buf.len().min(self.literal_remaining);
                self.response.extend_from_slice(&buf[..n]);
                self.reader.consume(n);
                self.literal_remaining -= n;
                continue;
            }

            let line = self.read_line().await?;
            self.response.extend_from_slice(&line);

            match parse_literal_length(&line) {
                Some(len) if len > MAX_LITERAL_SIZE => {
                    self.response.clear();
                    return Err(Error::Protocol(format!(
                        "literal too large: {len} bytes (max {MAX_LITERAL_SIZE})"
                    )));
                }
                Some(len) => self.literal_remaining = len,
                None => return Ok(std::mem::take(&mut self.response)),
            }
        }
    }

    /// Reads a single CRLF-terminated line, terminator included.
    pub async fn read_line(&mut self) -> Result<Vec<u8>> {
        loop {
            let buf = self.reader.fill_buf().await?;
            if buf.is_empty() {
                return Err(closed());
            }

            // A CR may already sit at the end of the partial line.
            let search_from = self.line.len().saturating_sub(1);
            self.line.extend_from_slice(buf);
            let taken = buf.len();

            if let Some(pos) = find_crlf(&self.line[search_from..]) {
                let end = search_from + pos + 2;
                let surplus = self.line.len() - end;
                self.reader.consume(taken - surplus);
                self.line.truncate(end);
                return Ok(self.line.split().to_vec());
            }

            self.reader.consume(taken);

            if self.line.len() > MAX_LINE_LENGTH {
                self.line.clear();
                return Err(Error::Protocol("line too long".to_string()));
            }
        }
    }

    /// Writes and flushes a command.
    pub async fn write_command(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.reader.get_mut();
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Returns true if undelivered input is buffered.
    #[must_use]
    pub fn has_buffered_input(&self) -> bool {
        !self.reader.buffer().is_empty() || !self.line.is_empty()
    }

    /// Gets a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        self.reader.get_ref()
    }

    /// Consumes the framed stream and returns the inner stream.
    ///
    /// Note: Any buffered data will be lost.
    pub fn into_inner(self) -> S {
        self.reader.into_inner()
    }
}

fn closed() -> Error {
    Error::Transport(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "connection closed",
    ))
}

/// Finds the position of CRLF in a buffer.
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Parses a literal length from the end of a line.
///
/// Matches patterns like `{123}\r\n` or `{123+}\r\n` (non-synchronizing).
fn parse_literal_length(line: &[u8]) -> Option<usize> {
    let line = line.strip_suffix(b"\r\n")?;
    let line = line.strip_suffix(b"}")?;
    let line = line.strip_suffix(b"+").unwrap_or(line);
    let open = line.iter().rposition(|&b| b == b'{')?;
    std::str::from_utf8(&line[open + 1..]).ok()?.parse().ok()
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use tokio_test::io::Builder;

    use super::*;

    #[test]
    fn test_find_crlf() {
        assert_eq!(find_crlf(b"hello\r\n"), Some(5));
        assert_eq!(find_crlf(b"\r\n"), Some(0));
        assert_eq!(find_crlf(b"no newline"), None);
        assert_eq!(find_crlf(b"just\n"), None);
    }

    #[test]
    fn test_parse_literal_length() {
        assert_eq!(parse_literal_length(b"BODY {123}\r\n"), Some(123));
        assert_eq!(parse_literal_length(b"BODY {123+}\r\n"), Some(123));
        assert_eq!(parse_literal_length(b"{0}\r\n"), Some(0));
        assert_eq!(parse_literal_length(b"no literal\r\n"), None);
        assert_eq!(parse_literal_length(b"incomplete {123"), None);
        assert_eq!(parse_literal_length(b"wrong {abc}\r\n"), None);
    }

    #[tokio::test]
    async fn test_read_lines_from_one_chunk() {
        let mock = Builder::new().read(b"+OK first\r\n+OK second\r\n").build();
        let mut framed = FramedStream::new(mock);

        assert_eq!(framed.read_line().await.unwrap(), b"+OK first\r\n");
        assert!(framed.has_buffered_input());
        assert_eq!(framed.read_line().await.unwrap(), b"+OK second\r\n");
    }

    #[tokio::test]
    async fn test_crlf_split_across_reads() {
        let mock = Builder::new().read(b"+OK split\r").read(b"\nnext\r\n").build();
        let mut framed = FramedStream::new(mock);

        assert_eq!(framed.read_line().await.unwrap(), b"+OK split\r\n");
        assert_eq!(framed.read_line().await.unwrap(), b"next\r\n");
    }

    #[tokio::test]
    async fn test_read_response_with_literal() {
        let mock = Builder::new()
            .read(b"* 1 FETCH (BODY[] {5}\r\n")
            .read(b"hel")
            .read(b"lo)\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        let response = framed.read_response().await.unwrap();
        assert_eq!(response, b"* 1 FETCH (BODY[] {5}\r\nhello)\r\n");
    }

    #[tokio::test]
    async fn test_literal_containing_crlf() {
        let mock = Builder::new()
            .read(b"* 2 FETCH (BODY[] {4}\r\na\r\nb)\r\nA1 OK done\r\n")
            .build();
        let mut framed = FramedStream::new(mock);

        let response = framed.read_response().await.unwrap();
        assert_eq!(response, b"* 2 FETCH (BODY[] {4}\r\na\r\nb)\r\n");
        assert_eq!(framed.read_response().await.unwrap(), b"A1 OK done\r\n");
    }

    #[tokio::test]
    async fn test_write_command() {
        let mock = Builder::new().write(b"A0001 NOOP\r\n").build();
        let mut framed = FramedStream::new(mock);
        framed.write_command(b"A0001 NOOP\r\n").await.unwrap();
    }

    #[tokio::test]
    async fn test_literal_size_validation() {
        let header = format!("* 1 FETCH (BODY {{{}}}\r\n", MAX_LITERAL_SIZE + 1);
        let mock = Builder::new().read(header.as_bytes()).build();
        let mut framed = FramedStream::new(mock);

        let err = framed.read_response().await.unwrap_err();
        assert!(err.to_string().contains("literal too large"));
    }

    #[tokio::test]
    async fn test_eof_is_transport_error() {
        let mock = Builder::new().read(b"partial").build();
        let mut framed = FramedStream::new(mock);

        let err = framed.read_line().await.unwrap_err();
        assert!(matches!(err, Error::Transport(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_line_length_limit() {
        let long_line = "A".repeat(MAX_LINE_LENGTH + 100);
        let mock = Builder::new().read(long_line.as_bytes()).build();
        let mut framed = FramedStream::new(mock);

        let err = framed.read_line().await.unwrap_err();
        assert!(err.to_string().contains("line too long"));
    }
}
