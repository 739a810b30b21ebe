//! Control-channel reply reader.
//!
//! A reply is one line `ddd text` or a continuation block opened by
//! `ddd-text` and closed only by a line starting with the same code followed
//! by a space.  Lines inside the block may look like anything, including
//! other codes.  Lines that arrive before any code (banners from broken
//! servers, stray blank lines) are ignored.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::time::{timeout, Instant};
use tracing::debug;

use crate::error::{Result, UplinkError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    /// The terminating line; for single-line replies the only one.
    pub fn last_line(&self) -> &str {
        self.lines.last().map(String::as_str).unwrap_or("")
    }

    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    pub fn is_positive(&self) -> bool {
        (200..400).contains(&self.code)
    }

    pub fn is_error(&self) -> bool {
        self.code >= 400
    }

    /// Shorthand for turning an unexpected reply into an error.
    pub fn unexpected(&self, step: &'static str) -> UplinkError {
        UplinkError::Protocol {
            step,
            code: self.code,
            line: self.last_line().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    ReadingLine,
    ReadingContinuation(u16),
    Done(u16),
}

/// Split a line into its reply code and the separator byte after it.
/// A bare three-digit line counts as terminal.
fn reply_code(line: &str) -> Option<(u16, u8)> {
    let bytes = line.as_bytes();
    if bytes.len() < 3 || !bytes[..3].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let sep = match bytes.get(3) {
        None => b' ',
        Some(b' ') => b' ',
        Some(b'-') => b'-',
        Some(_) => return None,
    };
    let code = bytes[..3]
        .iter()
        .fold(0u16, |acc, d| acc * 10 + u16::from(d - b'0'));
    Some((code, sep))
}

pub struct ControlReplyReader<S> {
    inner: BufReader<S>,
    /// Bytes of a line whose read was interrupted by a deadline.
    pending: Vec<u8>,
}

impl<S: AsyncRead + Unpin> ControlReplyReader<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: BufReader::new(stream),
            pending: Vec::with_capacity(128),
        }
    }

    /// The underlying stream, for writing commands.
    pub fn get_mut(&mut self) -> &mut S {
        self.inner.get_mut()
    }

    /// Read one complete reply, failing with `Timeout(step)` if it has not
    /// fully arrived within `limit`.
    pub async fn read_with_deadline(&mut self, limit: Duration, step: &'static str) -> Result<Reply> {
        match timeout(limit, self.read_reply()).await {
            Ok(reply) => reply,
            Err(_) => Err(UplinkError::Timeout(step)),
        }
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let mut state = ReaderState::ReadingLine;
        let mut lines = Vec::new();
        loop {
            if let ReaderState::Done(code) = state {
                return Ok(Reply { code, lines });
            }
            let line = self.next_line().await?;
            debug!(line = %line, "ftp <<");
            state = match (state, reply_code(&line)) {
                (ReaderState::ReadingLine, None) => ReaderState::ReadingLine,
                (ReaderState::ReadingLine, Some((code, b'-'))) => {
                    lines.push(line);
                    ReaderState::ReadingContinuation(code)
                }
                (ReaderState::ReadingLine, Some((code, _))) => {
                    lines.push(line);
                    ReaderState::Done(code)
                }
                (ReaderState::ReadingContinuation(open), Some((code, b' '))) if code == open => {
                    lines.push(line);
                    ReaderState::Done(code)
                }
                (ReaderState::ReadingContinuation(open), _) => {
                    lines.push(line);
                    ReaderState::ReadingContinuation(open)
                }
                (ReaderState::Done(code), _) => ReaderState::Done(code),
            };
        }
    }

    /// Next line without its terminator.  Partial bytes survive a cancelled
    /// read in `pending`.
    async fn next_line(&mut self) -> Result<String> {
        let n = self.inner.read_until(b'\n', &mut self.pending).await?;
        if n == 0 && self.pending.is_empty() {
            return Err(UplinkError::ConnectionClosed);
        }
        let line = String::from_utf8_lossy(&self.pending)
            .trim_end_matches(['\r', '\n'])
            .to_string();
        self.pending.clear();
        Ok(line)
    }

    /// Discard whatever the server sends for up to `window`, stopping early
    /// once it has been quiet for `quiet`.  Used after ABOR and re-login.
    pub async fn drain(&mut self, window: Duration, quiet: Duration) -> usize {
        let until = Instant::now() + window;
        let mut scratch = [0u8; 256];
        let mut dropped = self.pending.len();
        self.pending.clear();
        loop {
            let now = Instant::now();
            if now >= until {
                break;
            }
            let wait = quiet.min(until - now);
            match timeout(wait, self.inner.read(&mut scratch)).await {
                Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
                Ok(Ok(n)) => dropped += n,
            }
        }
        if dropped > 0 {
            debug!(bytes = dropped, "drained stale control data");
        }
        dropped
    }
}

// ===========================================================================
// Tests
// ===========================================================================
