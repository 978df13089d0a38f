//! Incremental SSE (Server-Sent Events) parser.
//!
//! Handles:
//! - Partial lines across TCP chunks
//! - Multi-line data fields
//! - LF, CRLF and bare CR line endings, including a CRLF split between chunks
//! - Comment lines and unknown fields (ignored)

use bytes::{Buf, BytesMut};
use memchr::memchr2;

/// Stream termination marker carried in a `data:` field.
pub const DONE_SENTINEL: &str = "[DONE]";

/// A complete SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Line-based SSE parser.
///
/// Bytes go in through [`SseParser::feed`]; complete events come out of
/// [`SseParser::next_event`]. Only whole lines are interpreted, so feeding the
/// same bytes with any chunking yields the same events.
pub struct SseParser {
    buffer: BytesMut,
    /// Last consumed line ended with a `\r` at the end of the buffer; a `\n`
    /// arriving next belongs to that line break.
    skip_lf: bool,
    data: String,
    has_data: bool,
    event: Option<String>,
    id: Option<String>,
}

impl SseParser {
    /// Create a new parser with default buffer capacity.
    pub fn new() -> Self {
        Self::with_capacity(8192)
    }

    /// Create a new parser with specified initial capacity.
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(cap),
            skip_lf: false,
            data: String::with_capacity(1024),
            has_data: false,
            event: None,
            id: None,
        }
    }

    /// Feed bytes into the parser.
    #[inline]
    pub fn feed(&mut self, mut data: &[u8]) {
        if self.skip_lf && !data.is_empty() {
            if data[0] == b'\n' {
                data = &data[1..];
            }
            self.skip_lf = false;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Try to parse the next complete event.
    /// Returns `None` if more data is needed.
    pub fn next_event(&mut self) -> Option<SseEvent> {
        while let Some(line) = self.next_line() {
            if let Some(event) = self.process_line(&line) {
                return Some(event);
            }
        }
        None
    }

    /// Flush state at end of input: an unterminated last line is processed and a
    /// pending event is dispatched as if a blank line had followed.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let line = self.buffer.split();
            if let Some(event) = self.process_line(&line) {
                return Some(event);
            }
        }
        self.skip_lf = false;
        self.dispatch()
    }

    /// Check if the data is the end-of-stream sentinel.
    #[inline]
    pub fn is_done(data: &str) -> bool {
        data == DONE_SENTINEL
    }

    /// Bytes buffered but not yet part of a complete line.
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Split off the next complete line, without its terminator.
    fn next_line(&mut self) -> Option<BytesMut> {
        let pos = memchr2(b'\n', b'\r', &self.buffer)?;

        let terminator_len = if self.buffer[pos] == b'\r' {
            match self.buffer.get(pos + 1) {
                Some(b'\n') => 2,
                Some(_) => 1,
                None => {
                    self.skip_lf = true;
                    1
                }
            }
        } else {
            1
        };

        let line = self.buffer.split_to(pos);
        self.buffer.advance(terminator_len);
        Some(line)
    }

    fn process_line(&mut self, line: &[u8]) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }

        // Comment
        if line[0] == b':' {
            return None;
        }

        let (field, value) = match memchr::memchr(b':', line) {
            Some(colon) => {
                let value = &line[colon + 1..];
                (&line[..colon], value.strip_prefix(b" ").unwrap_or(value))
            }
            None => (line, &b""[..]),
        };
        let value = String::from_utf8_lossy(value);

        match field {
            b"data" => {
                if self.has_data {
                    self.data.push('\n');
                }
                self.data.push_str(&value);
                self.has_data = true;
            }
            b"event" => self.event = Some(value.into_owned()),
            b"id" => self.id = Some(value.into_owned()),
            _ => {} // Ignore unknown fields
        }
        None
    }

    /// End of an event block. Blocks without any `data` field produce nothing.
    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let id = self.id.take();
        if !self.has_data {
            return None;
        }
        self.has_data = false;
        Some(SseEvent {
            event,
            data: std::mem::take(&mut self.data),
            id,
        })
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}
