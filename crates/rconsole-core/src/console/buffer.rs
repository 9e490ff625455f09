//! Bounded output buffer
//!
//! Keeps the tail of console stdout. When an append pushes the size over the
//! ceiling the oldest bytes are dropped silently; completion detection and
//! callers only care about the most recent output.

use std::collections::VecDeque;

#[derive(Debug)]
pub struct OutputBuffer {
    data: VecDeque<u8>,
    max_bytes: usize,
}

impl OutputBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(max_bytes.min(64 * 1024)),
            max_bytes,
        }
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend(bytes);
        if self.data.len() > self.max_bytes {
            let drain = self.data.len() - self.max_bytes;
            self.data.drain(..drain);
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Current contents as text. Invalid UTF-8 (including a code point split
    /// by truncation) is replaced, never rejected.
    pub fn snapshot(&self) -> String {
        let (front, back) = self.data.as_slices();
        if back.is_empty() {
            return String::from_utf8_lossy(front).into_owned();
        }
        let mut bytes = Vec::with_capacity(self.data.len());
        bytes.extend_from_slice(front);
        bytes.extend_from_slice(back);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
