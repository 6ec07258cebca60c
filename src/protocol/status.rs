//! Device status messages (`0M`).

use serde::{Deserialize, Serialize};

use super::STATUS_MARKER;
use crate::frame::RawFrame;

pub const KEY_FLAGS: &str = "FLAGS";
pub const KEY_BALLS: &str = "BALLS";
pub const KEY_BALL_POSITION: &str = "BALL1";

/// Readiness code meaning "armed, ball settled, ready to hit".
pub const READY_CODE: i32 = 7;

/// Device readiness and ball detection snapshot.
///
/// Compared with `==` to detect changes between consecutive `0M` messages.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// `readiness_code == 7`
    pub is_ready: bool,
    /// `ball_count > 0`
    pub ball_detected: bool,
    /// Raw `FLAGS` value
    pub readiness_code: i32,
    /// Balls in the hitting zone
    pub ball_count: u32,
    /// First ball position [x, y, z] (device-local mm)
    pub ball_position: Option<[f64; 3]>,
}

impl DeviceStatus {
    /// Status while disconnected or before the first `0M` arrives.
    pub const UNKNOWN: DeviceStatus = DeviceStatus {
        is_ready: false,
        ball_detected: false,
        readiness_code: 0,
        ball_count: 0,
        ball_position: None,
    };

    pub fn from_codes(readiness_code: i32, ball_count: u32) -> Self {
        Self {
            is_ready: readiness_code == READY_CODE,
            ball_detected: ball_count > 0,
            readiness_code,
            ball_count,
            ball_position: None,
        }
    }
}

/// Parse a `0M` payload.
///
/// Returns `None` unless the payload starts with the status marker and
/// carries a parsable `FLAGS` field. `BALLS` defaults to 0; a malformed
/// `BALL1` triple yields no position.
pub fn parse(payload: &str) -> Option<DeviceStatus> {
    if !payload.trim_start().starts_with(STATUS_MARKER) {
        return None;
    }
    let frame = RawFrame::decode(payload);

    let readiness_code = i32::try_from(frame.get_i64(KEY_FLAGS)?).ok()?;
    let ball_count = frame
        .get_i64(KEY_BALLS)
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0);

    Some(DeviceStatus {
        ball_position: frame.get(KEY_BALL_POSITION).and_then(parse_position),
        ..DeviceStatus::from_codes(readiness_code, ball_count)
    })
}

/// Parse `x,y,z` into three floats; anything else is `None`.
fn parse_position(raw: &str) -> Option<[f64; 3]> {
    let mut parts = raw.split(',').map(|p| p.trim().parse::<f64>());
    let x = parts.next()?.ok()?;
    let y = parts.next()?.ok()?;
    let z = parts.next()?.ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some([x, y, z])
}
