//! Pattern buffer with tail-search optimization.
//!
//! Output is accumulated one byte at a time through a VT parser so that
//! ANSI escape sequences never reach the prompt detector. Searches only
//! look at the last `search_depth` bytes, which keeps detection cheap on
//! large configuration dumps.

use std::fmt;

use memchr::memmem;
use vte::{Parser, Perform};

/// Collects printable output produced by the VT parser.
struct Sink<'a>(&'a mut Vec<u8>);

impl Perform for Sink<'_> {
    fn print(&mut self, c: char) {
        let mut utf8 = [0u8; 4];
        self.0.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
    }

    fn execute(&mut self, byte: u8) {
        if matches!(byte, b'\n' | b'\r' | b'\t') {
            self.0.push(byte);
        }
    }
}

/// Buffer for accumulating output and searching its tail.
pub struct PatternBuffer {
    /// The accumulated output, escape sequences removed.
    buffer: Vec<u8>,

    /// Parser state, kept across pushes so sequences split between
    /// reads are still recognized.
    parser: Parser,

    /// How many bytes from the end to search.
    search_depth: usize,
}

impl PatternBuffer {
    /// Create a new pattern buffer with the specified search depth.
    pub fn new(search_depth: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            parser: Parser::new(),
            search_depth,
        }
    }

    /// Feed one raw byte. Returns how many bytes were appended to the
    /// visible output (zero while inside an escape sequence or a
    /// multi-byte character).
    pub fn push(&mut self, byte: u8) -> usize {
        let before = self.buffer.len();
        self.parser.advance(&mut Sink(&mut self.buffer), &[byte]);
        self.buffer.len() - before
    }

    /// Feed a run of raw bytes.
    pub fn extend(&mut self, data: &[u8]) {
        self.parser.advance(&mut Sink(&mut self.buffer), data);
    }

    /// The last `search_depth` bytes of visible output.
    pub fn tail(&self) -> &[u8] {
        let start = self.buffer.len().saturating_sub(self.search_depth);
        &self.buffer[start..]
    }

    /// Check if the tail contains `needle`.
    pub fn tail_contains(&self, needle: &[u8]) -> bool {
        memmem::find(self.tail(), needle).is_some()
    }

    /// Check if the tail contains `needle`, ignoring case.
    pub fn tail_contains_ignore_case(&self, needle: &str) -> bool {
        String::from_utf8_lossy(self.tail())
            .to_lowercase()
            .contains(&needle.to_lowercase())
    }

    /// Take ownership of the buffer contents and reset.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Get the buffer contents as a string (lossy UTF-8 conversion).
    pub fn as_str_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.buffer)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for PatternBuffer {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl fmt::Debug for PatternBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternBuffer")
            .field("len", &self.buffer.len())
            .field("search_depth", &self.search_depth)
            .finish()
    }
}
