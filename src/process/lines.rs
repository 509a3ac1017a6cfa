//! Reassembles complete text lines from arbitrarily split output chunks.

use bytes::{Buf, BytesMut};

/// Longest line held back waiting for a terminator. Anything longer is
/// released as a line of its own.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Stateful splitter that turns output chunks into complete lines.
///
/// Bytes after the last newline are kept as a pending tail and prefixed to
/// the next chunk. Lines are decoded only once complete, so a chunk boundary
/// inside a multi-byte character is harmless.
#[derive(Debug, Default)]
pub struct LineAssembler {
    tail: BytesMut,
    /// Prefix of `tail` already known to hold no newline.
    scanned: usize,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line it completed, without the
    /// terminator (`\n` or `\r\n`).
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.tail.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.tail[self.scanned..].iter().position(|b| *b == b'\n') {
            let line = self.tail.split_to(self.scanned + pos);
            self.tail.advance(1);
            self.scanned = 0;
            lines.push(decode(&line));
        }
        while self.tail.len() > MAX_LINE_LEN {
            let line = self.tail.split_to(MAX_LINE_LEN);
            lines.push(decode(&line));
        }
        self.scanned = self.tail.len();
        lines
    }

    /// Release the unterminated tail once the stream has closed.
    pub fn flush(&mut self) -> Option<String> {
        if self.tail.is_empty() {
            return None;
        }
        let line = self.tail.split();
        self.scanned = 0;
        Some(decode(&line))
    }

    /// Bytes currently held back waiting for a terminator.
    pub fn pending(&self) -> usize {
        self.tail.len()
    }
}

fn decode(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
