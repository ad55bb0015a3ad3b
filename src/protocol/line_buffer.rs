//! Line buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a small state machine for newline-delimited records:
//! - `Collecting`: appending bytes until a `\n` shows up
//! - `Discarding`: the current line grew past the limit, skip to the next `\n`
//!
//! # Example
//!
//! ```
//! use simwire_client::protocol::LineBuffer;
//!
//! let mut buffer = LineBuffer::new();
//!
//! assert!(buffer.push(b"{\"id\":1,").is_empty());
//! let lines = buffer.push(b"\"ok\":true}\n{\"id\":2");
//! assert_eq!(lines.len(), 1);
//! assert_eq!(&lines[0][..], b"{\"id\":1,\"ok\":true}");
//! ```

use bytes::{Bytes, BytesMut};

/// Default maximum line length (64 MiB). Chat replies carry base64 audio.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024 * 1024;

/// State machine for line parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Accumulating the current line.
    Collecting,
    /// Dropping an oversized line until its terminating newline.
    Discarding,
}

/// Buffer for accumulating incoming bytes and extracting complete lines.
pub struct LineBuffer {
    /// Accumulated bytes of the current (incomplete) line.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed line length, excluding the newline.
    max_line_length: usize,
    /// Lines dropped because they exceeded the limit.
    discarded: u64,
}

impl LineBuffer {
    /// Create a new line buffer with default settings.
    pub fn new() -> Self {
        Self::with_max_line_length(DEFAULT_MAX_LINE_LENGTH)
    }

    /// Create a new line buffer with a custom maximum line length.
    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::Collecting,
            max_line_length,
            discarded: 0,
        }
    }

    /// Push data into the buffer and extract all complete lines.
    ///
    /// Returned lines have their `\n` (and a trailing `\r`) removed.
    /// Blank lines are skipped. Partial data is kept for the next push.
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        let mut lines = Vec::new();
        let mut rest = data;

        while !rest.is_empty() {
            match memchr_newline(rest) {
                Some(pos) => {
                    let (head, tail) = rest.split_at(pos);
                    rest = &tail[1..];

                    if self.state == State::Discarding {
                        self.state = State::Collecting;
                        continue;
                    }

                    if self.buffer.len() + head.len() > self.max_line_length {
                        self.drop_current();
                        self.state = State::Collecting;
                        continue;
                    }

                    self.buffer.extend_from_slice(head);
                    let mut line = self.buffer.split().freeze();
                    if line.last() == Some(&b'\r') {
                        line.truncate(line.len() - 1);
                    }
                    if !line.iter().all(u8::is_ascii_whitespace) {
                        lines.push(line);
                    }
                }
                None => {
                    if self.state == State::Collecting {
                        if self.buffer.len() + rest.len() > self.max_line_length {
                            self.drop_current();
                            self.state = State::Discarding;
                        } else {
                            self.buffer.extend_from_slice(rest);
                        }
                    }
                    rest = &[];
                }
            }
        }

        lines
    }

    fn drop_current(&mut self) {
        self.buffer.clear();
        self.discarded += 1;
        tracing::warn!(
            max = self.max_line_length,
            "Discarding worker output line over the length limit"
        );
    }

    /// Get the number of buffered bytes of the incomplete line.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if no partial line is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of lines dropped for exceeding the length limit.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Clear the buffer and reset state.
    ///
    /// Called at EOF: a partial line without its newline is a truncated record.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::Collecting;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::Collecting => "Collecting",
            State::Discarding => "Discarding",
        }
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn memchr_newline(data: &[u8]) -> Option<usize> {
    data.iter().position(|&b| b == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_complete_line() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"{\"id\":1}\n");

        assert_eq!(lines.len(), 1);
        assert_eq!(&lines[0][..], b"{\"id\":1}");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_lines_in_one_push() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"first\nsecond\nthird\n");

        assert_eq!(lines.len(), 3);
        assert_eq!(&lines[0][..], b"first");
        assert_eq!(&lines[1][..], b"second");
        assert_eq!(&lines[2][..], b"third");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_line() {
        let mut buffer = LineBuffer::new();

        assert!(buffer.push(b"{\"id\":").is_empty());
        assert_eq!(buffer.len(), 6);

        let lines = buffer.push(b"7}\n");
        assert_eq!(lines.len(), 1);
        assert_eq!(&lines[0][..], b"{\"id\":7}");
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = LineBuffer::new();
        let mut all = Vec::new();

        for byte in b"hi\nthere\n" {
            all.extend(buffer.push(&[*byte]));
        }

        assert_eq!(all.len(), 2);
        assert_eq!(&all[0][..], b"hi");
        assert_eq!(&all[1][..], b"there");
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"one\r\n\n  \r\ntwo\n");

        assert_eq!(lines.len(), 2);
        assert_eq!(&lines[0][..], b"one");
        assert_eq!(&lines[1][..], b"two");
    }

    #[test]
    fn test_mixed_complete_and_partial() {
        let mut buffer = LineBuffer::new();

        let lines = buffer.push(b"done\npart");
        assert_eq!(lines.len(), 1);
        assert_eq!(buffer.len(), 4);

        let lines = buffer.push(b"ial\n");
        assert_eq!(&lines[0][..], b"partial");
    }

    #[test]
    fn test_oversized_line_is_discarded() {
        let mut buffer = LineBuffer::with_max_line_length(8);

        assert!(buffer.push(b"0123456789").is_empty());
        assert_eq!(buffer.state_name(), "Discarding");
        assert!(buffer.is_empty());

        let lines = buffer.push(b"abc\nok\n");
        assert_eq!(lines.len(), 1);
        assert_eq!(&lines[0][..], b"ok");
        assert_eq!(buffer.discarded(), 1);
        assert_eq!(buffer.state_name(), "Collecting");
    }

    #[test]
    fn test_oversized_complete_line_is_discarded() {
        let mut buffer = LineBuffer::with_max_line_length(4);
        let lines = buffer.push(b"toolong\nfine\n");

        assert_eq!(lines.len(), 1);
        assert_eq!(&lines[0][..], b"fine");
    }

    #[test]
    fn test_clear_drops_partial_line() {
        let mut buffer = LineBuffer::new();
        buffer.push(b"{\"id\":3,\"ok\"");
        assert!(!buffer.is_empty());

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.state_name(), "Collecting");
    }
}
