//! Line framing for the inspection path
//!
//! Response bodies arrive as byte chunks that do not align with line
//! boundaries. [`LineBuffer`] reassembles them into complete lines, the unit
//! the frame decoder works on for both JSON-lines and SSE bodies.

/// Buffer for accumulating incomplete lines across chunk boundaries.
///
/// Works on raw bytes so that a multi-byte UTF-8 sequence split between two
/// chunks is reassembled before any decoding happens.
///
/// # Example
/// ```
/// use llm_proxy::streaming::LineBuffer;
///
/// let mut buffer = LineBuffer::new();
///
/// // First chunk contains partial line
/// let lines1 = buffer.feed(b"data: {\"content\":\"hel");
/// assert!(lines1.is_empty());
///
/// // Second chunk completes the line
/// let lines2 = buffer.feed(b"lo\"}\n");
/// assert_eq!(lines2, vec![b"data: {\"content\":\"hello\"}".to_vec()]);
/// ```
#[derive(Debug, Default)]
pub struct LineBuffer {
    /// Accumulated incomplete line data
    incomplete: Vec<u8>,
}

impl LineBuffer {
    /// Create a new empty buffer
    pub fn new() -> Self {
        Self {
            incomplete: Vec::new(),
        }
    }

    /// Feed bytes into the buffer and return any complete lines.
    ///
    /// Lines are split on `\n`; the newline and a single trailing `\r` are
    /// stripped. Empty lines are kept so callers can count them, and the
    /// unterminated tail is retained for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.incomplete.extend_from_slice(bytes);

        let mut complete_lines = Vec::new();
        let mut start = 0;

        while let Some(offset) = self.incomplete[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            complete_lines.push(strip_cr(&self.incomplete[start..end]).to_vec());
            start = end + 1;
        }

        self.incomplete.drain(..start);
        complete_lines
    }

    /// Take the unterminated tail at end of stream.
    ///
    /// A body that does not end with a newline still carries a final line.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.incomplete.is_empty() {
            return None;
        }

        let tail = std::mem::take(&mut self.incomplete);
        Some(strip_cr(&tail).to_vec())
    }

    /// Check if there's any incomplete data remaining in the buffer.
    pub fn has_incomplete(&self) -> bool {
        !self.incomplete.is_empty()
    }

    /// Get any remaining incomplete data.
    pub fn remaining(&self) -> &[u8] {
        &self.incomplete
    }
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}
