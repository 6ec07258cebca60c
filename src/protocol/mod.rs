//! Message classification and parse dispatch.
//!
//! The GC2 sends two message kinds over the same stream, distinguished only by
//! the marker on the first line:
//!
//! - `0H`: shot result ([`shot::ShotSample`])
//! - `0M`: device status ([`status::DeviceStatus`])
//!
//! Parsing is total: every entry point returns `Option`, and "no value" covers
//! both garbled payloads and physically implausible readings.

pub mod shot;
pub mod status;

pub use shot::{ClubMetrics, Misread, ShotSample};
pub use status::DeviceStatus;

/// First line of a shot message.
pub const SHOT_MARKER: &str = "0H";
/// First line of a device status message.
pub const STATUS_MARKER: &str = "0M";

/// USB vendor ID of the GC2.
pub const VENDOR_ID: u16 = 0x2C79;
/// USB product ID of the GC2.
pub const PRODUCT_ID: u16 = 0x0110;

/// Message kind, from the leading marker alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Shot,
    DeviceStatus,
    Unknown,
}

impl MessageKind {
    /// Classify a raw payload without decoding it.
    pub fn classify(payload: &str) -> Self {
        let trimmed = payload.trim_start();
        if trimmed.starts_with(SHOT_MARKER) {
            MessageKind::Shot
        } else if trimmed.starts_with(STATUS_MARKER) {
            MessageKind::DeviceStatus
        } else {
            MessageKind::Unknown
        }
    }
}

/// A validated message from the device.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Shot(ShotSample),
    DeviceStatus(DeviceStatus),
}

impl Message {
    /// Classify and parse a raw payload.
    ///
    /// Unmarked payloads are tried as shots, since the shot parser keys off
    /// `SPEED_MPH` rather than the marker.
    pub fn parse(payload: &str) -> Option<Self> {
        match MessageKind::classify(payload) {
            MessageKind::DeviceStatus => status::parse(payload).map(Message::DeviceStatus),
            MessageKind::Shot | MessageKind::Unknown => shot::parse(payload).map(Message::Shot),
        }
    }
}
