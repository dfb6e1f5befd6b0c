/// Splits a chunked byte stream into newline-terminated lines.
///
/// Splitting happens on raw bytes, so a multi-byte UTF-8 character that straddles
/// two chunks is decoded only once the full line is available. A trailing partial
/// line is withheld until its newline arrives and is dropped by [`finish`].
///
/// [`finish`]: LineSplitter::finish
#[derive(Debug, Default)]
pub struct LineSplitter {
    buffer: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers `chunk` and returns every line it completed, without terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.buffer[consumed..].iter().position(|byte| *byte == b'\n') {
            let end = consumed + offset;
            let line = &self.buffer[consumed..end];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            lines.push(String::from_utf8_lossy(line).into_owned());
            consumed = end + 1;
        }

        self.buffer.drain(..consumed);
        lines
    }

    /// Number of bytes waiting for a newline.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Ends the stream, returning how many withheld bytes were discarded.
    pub fn finish(self) -> usize {
        self.buffer.len()
    }
}
