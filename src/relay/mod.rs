//! Relay to a golf simulator speaking GSPro Open Connect v1.
//!
//! Outbound traffic is one JSON object per message ([`message`]). Inbound
//! acknowledgements are JSON objects with no delimiter between them; the
//! peer may batch several into one TCP segment, so responses are extracted
//! one object at a time by brace matching.

pub mod client;
pub mod message;

pub use client::RelayClient;
pub use message::{BallData, ClubData, OpenConnectMessage, ShotDataOptions};

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Unterminated data kept waiting for a closing brace before it is dropped.
const MAX_BACKLOG: usize = 64 * 1024;

/// Response code meaning "shot accepted, player state attached".
pub const CODE_PLAYER_INFO: u16 = 201;

/// Acknowledgement from the relay peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RelayResponse {
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerInfo>,
}

impl RelayResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }
}

/// Active player state reported with [`CODE_PLAYER_INFO`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayerInfo {
    /// `"RH"` or `"LH"`
    #[serde(default)]
    pub handed: String,
    /// Selected club code, e.g. `"DR"`, `"7I"`, `"PT"`
    #[serde(default)]
    pub club: String,
    /// Yards
    #[serde(default)]
    pub distance_to_target: f64,
}

/// Byte span of the first complete JSON object in `text`.
///
/// Starts at the first `{` and ends at the brace that closes it. Braces
/// inside string literals (including after escaped quotes) are not counted.
/// Returns `None` if there is no `{` or the object is not closed yet.
pub fn find_object(text: &str) -> Option<Range<usize>> {
    // Structural characters are ASCII, so byte offsets are char boundaries.
    find_object_bytes(text.as_bytes())
}

/// [`find_object`] over raw bytes. Non-ASCII and invalid UTF-8 bytes are
/// only ever skipped over.
fn find_object_bytes(bytes: &[u8]) -> Option<Range<usize>> {
    let start = bytes.iter().position(|&b| b == b'{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start..i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Decode the first complete object in `text` as a response.
///
/// `None` for no object, an unterminated object, or an object that is not
/// a valid response.
pub fn parse_first(text: &str) -> Option<RelayResponse> {
    let span = find_object(text)?;
    serde_json::from_str(&text[span]).ok()
}

/// [`parse_first`] over the first `len` bytes of `bytes`.
///
/// Bytes after the longest valid UTF-8 prefix are ignored, so a read that
/// splits a multi-byte character still yields the objects before it.
pub fn parse_first_bytes(bytes: &[u8], len: usize) -> Option<RelayResponse> {
    parse_first(valid_prefix(&bytes[..len.min(bytes.len())]))
}

fn valid_prefix(bytes: &[u8]) -> &str {
    match std::str::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => std::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or_default(),
    }
}

/// Accumulates inbound bytes and yields complete JSON objects in order.
#[derive(Debug, Default)]
pub struct ResponseBuffer {
    buf: Vec<u8>,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes. An unterminated object that grows past 64 KiB
    /// is dropped.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
        if self.buf.len() > MAX_BACKLOG && find_object_bytes(&self.buf).is_none() {
            log::warn!(
                "relay response buffer overflow, dropping {} bytes",
                self.buf.len()
            );
            self.buf.clear();
        }
    }

    /// Remove and return the text of the next complete object.
    ///
    /// Bytes before the object's opening brace are dropped, whatever they
    /// are. With no `{` in the buffer at all, everything is discarded as
    /// noise. A complete object that is not UTF-8 is skipped.
    pub fn next_object(&mut self) -> Option<String> {
        loop {
            let Some(span) = find_object_bytes(&self.buf) else {
                let noise = self
                    .buf
                    .iter()
                    .position(|&b| b == b'{')
                    .unwrap_or(self.buf.len());
                if noise > 0 {
                    log::debug!("dropping {noise} bytes of non-JSON relay data");
                    self.buf.drain(..noise);
                }
                return None;
            };
            let object: Vec<u8> = self.buf.drain(..span.end).skip(span.start).collect();
            match String::from_utf8(object) {
                Ok(text) => return Some(text),
                Err(e) => log::debug!("skipping relay object: {e}"),
            }
        }
    }

    /// Next decodable response. Complete objects that are not responses are
    /// skipped.
    pub fn next_response(&mut self) -> Option<RelayResponse> {
        while let Some(object) = self.next_object() {
            match serde_json::from_str(&object) {
                Ok(response) => return Some(response),
                Err(e) => log::debug!("skipping undecodable relay object: {e}"),
            }
        }
        None
    }

    /// Bytes held waiting for an object to complete.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
