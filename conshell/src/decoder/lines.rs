//! Per-line byte accumulation and UTF-8 decoding.

/// Accumulates the bytes of one output line.
///
/// Two ways out: [`LineBuffer::take_line`] decodes everything lossily and is used when the
/// line is known to be finished, and [`LineBuffer::take_complete`] leaves an unfinished
/// multi-byte character behind so the next read can complete it.
#[derive(Debug, Default)]
pub struct LineBuffer {
    bytes: Vec<u8>,
    max_len: usize,
}

impl LineBuffer {
    pub fn new(max_len: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(max_len.min(64 * 1024)),
            max_len,
        }
    }

    pub fn push(&mut self, byte: u8) {
        self.bytes.push(byte);
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn over_limit(&self) -> bool {
        self.bytes.len() > self.max_len
    }

    /// Decodes and clears the whole buffer, substituting U+FFFD for malformed input.
    pub fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.bytes).into_owned();
        self.bytes.clear();
        line
    }

    /// Decodes and removes everything except a trailing incomplete UTF-8 sequence.
    pub fn take_complete(&mut self) -> String {
        let keep = incomplete_tail_len(&self.bytes);
        let split = self.bytes.len() - keep;
        let line = String::from_utf8_lossy(&self.bytes[..split]).into_owned();
        self.bytes.drain(..split);
        line
    }
}

/// Length of a UTF-8 sequence that starts near the end of `bytes` but is cut short.
fn incomplete_tail_len(bytes: &[u8]) -> usize {
    let window = bytes.len().min(3);
    for back in 1..=window {
        let byte = bytes[bytes.len() - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            // Continuation byte, keep looking for the lead.
            continue;
        }
        let width = match byte {
            0xc0..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf7 => 4,
            _ => return 0,
        };
        return if width > back { back } else { 0 };
    }
    0
}
