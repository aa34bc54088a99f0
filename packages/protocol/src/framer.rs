/// Line the firmware prints between two readings.
pub const RECORD_SEPARATOR: &str =
    "==========================================================";

/// Default cap for the retained partial record.
pub const DEFAULT_BUFFER_CAP: usize = 10_000;

/// Accumulates decoded text and cuts it into complete records on [`RECORD_SEPARATOR`].
///
/// The trailing segment after the last separator is kept until more text arrives. When that
/// retained segment grows past the cap (a separator that never shows up), it is dropped
/// wholesale and framing restarts from the next separator.
#[derive(Debug, Clone)]
pub struct RecordFramer {
    buffer: String,
    cap: usize,
}

impl Default for RecordFramer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAP)
    }
}

impl RecordFramer {
    pub fn new(cap: usize) -> Self {
        Self {
            buffer: String::new(),
            cap,
        }
    }

    /// Append `chunk` and return every record it completed, in stream order.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        if chunk.is_empty() {
            return Vec::new();
        }
        self.buffer.push_str(chunk);

        let mut records = Vec::new();
        let mut segments: Vec<&str> = self.buffer.split(RECORD_SEPARATOR).collect();
        // split always yields at least one segment
        let tail = segments.pop().unwrap_or_default().to_string();
        for segment in segments {
            let record = segment.trim();
            if !record.is_empty() {
                records.push(record.to_string());
            }
        }
        self.buffer = tail;

        if self.buffer.len() > self.cap {
            log::warn!(
                "Record buffer exceeded {} bytes without a separator, discarding {} bytes",
                self.cap,
                self.buffer.len()
            );
            self.buffer.clear();
        }

        records
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}

/// Incremental UTF-8 decoder for a byte stream cut at arbitrary points.
///
/// An incomplete multi-byte sequence at the end of a chunk is held back for the next call;
/// bytes that can never be valid become U+FFFD.
#[derive(Debug, Default, Clone)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;
        let mut held = 0usize;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    // valid_up_to marks a checked boundary
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            held = after.len();
                            break;
                        }
                    }
                }
            }
        }

        let keep_from = self.pending.len() - held;
        self.pending.drain(..keep_from);
        out
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
