use std::borrow::Cow;
use std::path::Path;

use deepsight_core::Result;

/// Reusable response buffer for query-style calls.
///
/// Mirrors the runtime's fill-by-reference contract: the caller creates the
/// buffer once (cheap, infallible), passes it to any number of query calls,
/// and reads the payload of the most recent successful fill. Before the
/// first fill the buffer is observably empty. The bytes are owned, so a
/// result read from a sample stays valid after the sample is freed.
#[derive(Debug, Default)]
pub struct Buffer {
    bytes: Vec<u8>,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Payload as text, replacing invalid UTF-8.
    pub fn as_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Replace the payload. Query operations call this on success.
    pub fn fill(&mut self, bytes: Vec<u8>) {
        self.bytes = bytes;
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Dump the payload to a file (e.g. `result.xml`).
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, &self.bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_before_first_fill() {
        let buf = Buffer::new();
        assert!(buf.is_empty());
        assert_eq!(buf.as_text(), "");
    }

    #[test]
    fn fill_replaces_payload() {
        let mut buf = Buffer::new();
        buf.fill(b"first".to_vec());
        buf.fill(b"second".to_vec());
        assert_eq!(buf.as_bytes(), b"second");
        buf.clear();
        assert!(buf.is_empty());
    }
}
