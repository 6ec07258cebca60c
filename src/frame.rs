//! Frame decoding and stream reassembly.
//!
//! Wire format (one message):
//! ```text
//! 0H\nSHOT_ID=12\nSPEED_MPH=148.20\n...\nHMT=0\n\t
//! ```
//!
//! A marker line, then `KEY=VALUE` lines, terminated by `\n\t`. The device
//! delivers this in 64-byte USB packets with no alignment to message
//! boundaries, so [`FrameAccumulator`] rebuilds complete payloads and
//! [`RawFrame::decode`] turns one payload into a key/value map.

use std::collections::HashMap;

use crate::protocol::{SHOT_MARKER, STATUS_MARKER};

const SEPARATOR: char = '=';
const TERMINATOR: &[u8] = b"\n\t";

/// Unterminated backlog above this is treated as line noise and dropped.
const MAX_BACKLOG: usize = 64 * 1024;

/// One decoded message payload: field name to raw field value.
///
/// Duplicate keys keep the last value. Values are left as text; typed access
/// goes through [`get_f64`](Self::get_f64) and friends, which return `None`
/// on absent or unparsable fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFrame {
    fields: HashMap<String, String>,
}

impl RawFrame {
    /// Decode a line-oriented payload.
    ///
    /// Blank lines, bare message markers and lines without `=` are skipped.
    /// Keys and values are split at the first `=`, so values may contain `=`.
    pub fn decode(payload: &str) -> Self {
        let mut fields = HashMap::new();
        for line in payload.lines() {
            let line = line.trim();
            if line.is_empty() || line == SHOT_MARKER || line == STATUS_MARKER {
                continue;
            }
            if let Some((key, value)) = line.split_once(SEPARATOR) {
                fields.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Self { fields }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Field as `f64`. Rust float parsing is locale-independent (`.` only).
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key)?.parse().ok()
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key)?.parse().ok()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Reassembles complete messages from arbitrarily split transport chunks.
///
/// Partial data is buffered across calls, so it can be fed USB packet or TCP
/// segment boundaries directly.
pub struct FrameAccumulator {
    buf: Vec<u8>,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(512),
        }
    }

    /// Feed new data and extract any complete payloads (terminator stripped).
    ///
    /// Empty payloads (back-to-back terminators) are skipped. Invalid UTF-8 is
    /// replaced rather than rejected; the parsers decide what is usable.
    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(data);
        let mut payloads = Vec::new();

        while let Some(end) = find_terminator(&self.buf) {
            let payload = String::from_utf8_lossy(&self.buf[..end]).into_owned();
            self.buf.drain(..end + TERMINATOR.len());
            if !payload.trim().is_empty() {
                payloads.push(payload);
            }
        }

        if self.buf.len() > MAX_BACKLOG {
            log::warn!(
                "discarding {} bytes of unterminated frame data",
                self.buf.len()
            );
            self.buf.clear();
        }

        payloads
    }

    /// Bytes buffered but not yet terminated.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(TERMINATOR.len()).position(|w| w == TERMINATOR)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
