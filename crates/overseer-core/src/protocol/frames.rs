//! Wire literals and line framing for the TCP session protocol.
//!
//! Every frame on the wire is a single line of text terminated by `\n`.
//! A conversation looks like this:
//!
//! ```text
//! server → Hello, client!
//! server → REQUEST_PASSWORD
//! client → wrong
//! server → FAILED
//! client → admin123
//! server → PASSED
//! server → Welcome! You are now authenticated.
//! client → ping
//! server → Echo: ping
//! client → exit
//! (server closes the connection)
//! ```
//!
//! Inbound bytes arrive in arbitrary chunks, so the server accumulates them in
//! a [`LineBuffer`] and only acts on complete lines.

use thiserror::Error;

/// Sent after the greeting to ask the client for the shared secret.
pub const REQUEST_PASSWORD: &str = "REQUEST_PASSWORD";

/// Reply to a correct password.
pub const PASSED: &str = "PASSED";

/// Reply to a wrong password.
pub const FAILED: &str = "FAILED";

/// Command that ends an authenticated session (compared case-insensitively).
pub const EXIT_COMMAND: &str = "exit";

/// Prefix of every echo reply.
pub const ECHO_PREFIX: &str = "Echo: ";

/// Greeting line used when the configuration does not provide one.
pub const DEFAULT_GREETING: &str = "Hello, client!";

/// Welcome line sent right after `PASSED`.
pub const DEFAULT_WELCOME: &str = "Welcome! You are now authenticated.";

/// Longest unterminated line the server will buffer for one connection.
pub const MAX_LINE_LEN: usize = 8 * 1024;

/// Raised when a peer sends more than the buffer limit without a newline.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("line exceeds {limit} bytes without a terminator")]
pub struct LineTooLong {
    pub limit: usize,
}

/// Encodes `line` as a single newline-terminated frame.
///
/// # Examples
///
/// ```rust
/// use overseer_core::encode_line;
///
/// assert_eq!(encode_line("PASSED"), b"PASSED\n".to_vec());
/// ```
pub fn encode_line(line: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(line.len() + 1);
    frame.extend_from_slice(line.as_bytes());
    frame.push(b'\n');
    frame
}

/// Builds the reply for an authenticated, non-exit line.
pub fn echo_reply(line: &str) -> String {
    format!("{ECHO_PREFIX}{line}")
}

/// Accumulates inbound bytes and yields complete lines.
///
/// Only the line terminator is stripped (`\n`, plus a `\r` directly before
/// it); surrounding whitespace is preserved so that password comparison stays
/// byte-exact.  Invalid UTF-8 is decoded lossily.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    limit: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBuffer {
    /// Creates an empty buffer with the [`MAX_LINE_LEN`] limit.
    pub fn new() -> Self {
        Self::with_limit(MAX_LINE_LEN)
    }

    /// Creates an empty buffer that rejects unterminated tails longer than `limit`.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
        }
    }

    /// Appends raw bytes read from the socket.
    ///
    /// # Errors
    ///
    /// Returns [`LineTooLong`] when the bytes after the last newline exceed the
    /// buffer limit.  The bytes are still retained so that complete lines
    /// received before the overflow can be drained.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), LineTooLong> {
        self.buf.extend_from_slice(bytes);
        let tail = match self.buf.iter().rposition(|&b| b == b'\n') {
            Some(idx) => self.buf.len() - idx - 1,
            None => self.buf.len(),
        };
        if tail > self.limit {
            return Err(LineTooLong { limit: self.limit });
        }
        Ok(())
    }

    /// Removes and returns the next complete line, if any.
    pub fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop();
        Some(decode(line))
    }

    /// Removes and returns the unterminated tail, if any.
    ///
    /// Used at end-of-stream, where a final line without a newline still counts.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        Some(decode(std::mem::take(&mut self.buf)))
    }

    /// Number of buffered bytes not yet returned as lines.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

fn decode(mut line: Vec<u8>) -> String {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    match String::from_utf8(line) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_line_appends_newline() {
        assert_eq!(encode_line("Echo: hi"), b"Echo: hi\n".to_vec());
        assert_eq!(encode_line(""), b"\n".to_vec());
    }

    #[test]
    fn test_echo_reply_prefixes_line_verbatim() {
        assert_eq!(echo_reply("  spaced  "), "Echo:   spaced  ");
    }

    #[test]
    fn test_next_line_returns_none_until_newline_arrives() {
        // Arrange
        let mut buf = LineBuffer::new();

        // Act
        buf.push(b"adm").unwrap();
        let first = buf.next_line();
        buf.push(b"in123\n").unwrap();
        let second = buf.next_line();

        // Assert
        assert_eq!(first, None);
        assert_eq!(second.as_deref(), Some("admin123"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_next_line_splits_multiple_lines_in_one_chunk() {
        let mut buf = LineBuffer::new();
        buf.push(b"one\ntwo\nthr").unwrap();

        assert_eq!(buf.next_line().as_deref(), Some("one"));
        assert_eq!(buf.next_line().as_deref(), Some("two"));
        assert_eq!(buf.next_line(), None);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_next_line_strips_crlf_but_keeps_inner_whitespace() {
        let mut buf = LineBuffer::new();
        buf.push(b" secret \r\n").unwrap();

        assert_eq!(buf.next_line().as_deref(), Some(" secret "));
    }

    #[test]
    fn test_next_line_yields_empty_line() {
        let mut buf = LineBuffer::new();
        buf.push(b"\n").unwrap();

        assert_eq!(buf.next_line().as_deref(), Some(""));
    }

    #[test]
    fn test_next_line_decodes_invalid_utf8_lossily() {
        let mut buf = LineBuffer::new();
        buf.push(&[0x66, 0xFF, 0x6F, b'\n']).unwrap();

        assert_eq!(buf.next_line().as_deref(), Some("f\u{FFFD}o"));
    }

    #[test]
    fn test_take_remainder_returns_unterminated_tail_once() {
        let mut buf = LineBuffer::new();
        buf.push(b"exit").unwrap();

        assert_eq!(buf.take_remainder().as_deref(), Some("exit"));
        assert_eq!(buf.take_remainder(), None);
    }

    #[test]
    fn test_push_rejects_tail_over_limit() {
        // Arrange
        let mut buf = LineBuffer::with_limit(4);

        // Act
        let ok = buf.push(b"abc\n1234");
        let overflow = buf.push(b"5");

        // Assert
        assert!(ok.is_ok());
        assert_eq!(overflow, Err(LineTooLong { limit: 4 }));
        assert_eq!(buf.next_line().as_deref(), Some("abc"));
    }
}
