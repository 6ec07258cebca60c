//! Shot result messages (`0H`).

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::RawFrame;

// ---------------------------------------------------------------------------
// Field names
// ---------------------------------------------------------------------------

pub const KEY_SHOT_ID: &str = "SHOT_ID";
pub const KEY_MSEC_SINCE_CONTACT: &str = "MSEC_SINCE_CONTACT";
pub const KEY_SPEED: &str = "SPEED_MPH";
pub const KEY_ELEVATION: &str = "ELEVATION_DEG";
pub const KEY_AZIMUTH: &str = "AZIMUTH_DEG";
pub const KEY_SPIN: &str = "SPIN_RPM";
pub const KEY_BACK_SPIN: &str = "BACK_RPM";
pub const KEY_SIDE_SPIN: &str = "SIDE_RPM";
pub const KEY_SPIN_AXIS: &str = "SPIN_AXIS_DEG";
/// Club tracking (HMT) capability flag. Club fields are read only when `1`.
pub const KEY_HMT: &str = "HMT";
pub const KEY_CLUB_SPEED: &str = "CLUBSPEED_MPH";
pub const KEY_CLUB_PATH: &str = "HPATH_DEG";
pub const KEY_ATTACK_ANGLE: &str = "VPATH_DEG";
pub const KEY_FACE_TO_TARGET: &str = "FACE_T_DEG";
pub const KEY_LOFT: &str = "LOFT_DEG";
pub const KEY_LIE: &str = "LIE_DEG";

// ---------------------------------------------------------------------------
// Misread thresholds
// ---------------------------------------------------------------------------

pub const MIN_BALL_SPEED: f64 = 10.0;
pub const MAX_BALL_SPEED: f64 = 250.0;
pub const MIN_LAUNCH_ANGLE: f64 = -10.0;
pub const MAX_LAUNCH_ANGLE: f64 = 60.0;
pub const MAX_DIRECTION: f64 = 45.0;
pub const MAX_SPIN_AXIS: f64 = 90.0;
/// Device error code that leaks into `BACK_RPM` on a failed spin read.
pub const BACK_SPIN_ERROR_CODE: f64 = 2222.0;
/// "Flat read": fast ball with almost no spin.
pub const FLAT_READ_SPEED: f64 = 80.0;
pub const FLAT_READ_SPIN: f64 = 100.0;

const ERROR_CODE_TOLERANCE: f64 = 0.01;

/// Club head measurements, present only when the HMT is fitted.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ClubMetrics {
    /// Club head speed (mph)
    pub speed: f64,
    /// Horizontal swing path (deg, + = in-to-out)
    pub path: f64,
    /// Vertical path / attack angle (deg)
    pub attack_angle: f64,
    /// Face angle relative to target (deg)
    pub face_to_target: f64,
    /// Dynamic loft at impact (deg)
    pub dynamic_loft: f64,
    /// Lie angle at impact (deg)
    pub lie: f64,
}

/// A validated shot.
///
/// Only [`parse`] constructs these from wire data, and it never returns a
/// sample that failed [`validate`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ShotSample {
    /// Device shot counter
    pub shot_id: u32,
    /// Wall-clock capture time (ms since Unix epoch)
    pub timestamp_ms: u64,
    /// Time since impact when the reading was taken (ms). Early readings
    /// (~200ms) usually lack spin; the final reading (~1000ms) carries it.
    pub msec_since_contact: u32,
    /// Ball speed (mph)
    pub ball_speed: f64,
    /// Vertical launch angle (deg)
    pub launch_angle: f64,
    /// Horizontal launch direction (deg, + = right)
    pub direction: f64,
    /// Total spin (rpm)
    pub total_spin: f64,
    /// Back spin (rpm)
    pub back_spin: f64,
    /// Side spin (rpm, + = fade/slice)
    pub side_spin: f64,
    /// Spin axis tilt (deg, + = right)
    pub spin_axis: f64,
    pub club: Option<ClubMetrics>,
    /// Early reading: total spin only, no `BACK_RPM`/`SIDE_RPM`. The back
    /// and side split is derived from the axis, and a final reading with the
    /// same `shot_id` follows.
    #[serde(default)]
    pub provisional: bool,
}

impl ShotSample {
    pub fn has_club_data(&self) -> bool {
        self.club.is_some()
    }
}

/// Why a syntactically valid shot was rejected as a sensor misread.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum Misread {
    #[error("{field} is not a finite number ({value})")]
    NonFinite { field: &'static str, value: f64 },

    #[error("ball speed {0} mph outside [10, 250]")]
    BallSpeed(f64),

    #[error("launch angle {0}° outside [-10, 60]")]
    LaunchAngle(f64),

    #[error("direction {0}° beyond ±45")]
    Direction(f64),

    #[error("zero total spin")]
    ZeroSpin,

    #[error("back spin carries device error code 2222")]
    ErrorCodeBackSpin,

    #[error("flat read: {speed} mph with {spin} rpm")]
    FlatRead { speed: f64, spin: f64 },

    #[error("spin axis {0}° beyond ±90")]
    SpinAxis(f64),
}

/// Parse a shot payload, stamping it with the current wall-clock time.
pub fn parse(payload: &str) -> Option<ShotSample> {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    parse_at(payload, now_ms)
}

/// Parse a shot payload with an explicit capture timestamp.
///
/// Returns `None` if `SPEED_MPH` is absent or the reading fails [`validate`].
/// Unparsable numeric fields read as zero and are left for validation to
/// catch.
pub fn parse_at(payload: &str, timestamp_ms: u64) -> Option<ShotSample> {
    let frame = RawFrame::decode(payload);
    if !frame.contains(KEY_SPEED) {
        return None;
    }

    let num = |key: &str| frame.get_f64(key).unwrap_or(0.0);

    let club = if frame.get_i64(KEY_HMT) == Some(1) {
        Some(ClubMetrics {
            speed: num(KEY_CLUB_SPEED),
            path: num(KEY_CLUB_PATH),
            attack_angle: num(KEY_ATTACK_ANGLE),
            face_to_target: num(KEY_FACE_TO_TARGET),
            dynamic_loft: num(KEY_LOFT),
            lie: num(KEY_LIE),
        })
    } else {
        None
    };

    let mut shot = ShotSample {
        shot_id: frame
            .get_i64(KEY_SHOT_ID)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0),
        timestamp_ms,
        msec_since_contact: frame
            .get_i64(KEY_MSEC_SINCE_CONTACT)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0),
        ball_speed: num(KEY_SPEED),
        launch_angle: num(KEY_ELEVATION),
        direction: num(KEY_AZIMUTH),
        total_spin: num(KEY_SPIN),
        back_spin: num(KEY_BACK_SPIN),
        side_spin: num(KEY_SIDE_SPIN),
        spin_axis: num(KEY_SPIN_AXIS),
        club,
        provisional: !frame.contains(KEY_BACK_SPIN) && !frame.contains(KEY_SIDE_SPIN),
    };

    derive_spin_components(&mut shot);

    match validate(&shot) {
        Ok(()) => Some(shot),
        Err(reason) => {
            log::debug!("rejecting shot {}: {reason}", shot.shot_id);
            None
        }
    }
}

/// Split total spin into back/side using the spin axis when the device only
/// reported total spin and axis.
fn derive_spin_components(shot: &mut ShotSample) {
    if shot.back_spin == 0.0 && shot.side_spin == 0.0 && shot.total_spin != 0.0 {
        let axis = shot.spin_axis.to_radians();
        shot.back_spin = shot.total_spin * axis.cos();
        shot.side_spin = shot.total_spin * axis.sin();
    }
}

/// Reject physically implausible readings.
///
/// Checks are independent; the first failure is reported.
pub fn validate(shot: &ShotSample) -> Result<(), Misread> {
    let fields = [
        ("ball speed", shot.ball_speed),
        ("launch angle", shot.launch_angle),
        ("direction", shot.direction),
        ("total spin", shot.total_spin),
        ("back spin", shot.back_spin),
        ("side spin", shot.side_spin),
        ("spin axis", shot.spin_axis),
    ];
    if let Some(&(field, value)) = fields.iter().find(|(_, v)| !v.is_finite()) {
        return Err(Misread::NonFinite { field, value });
    }
    if !(MIN_BALL_SPEED..=MAX_BALL_SPEED).contains(&shot.ball_speed) {
        return Err(Misread::BallSpeed(shot.ball_speed));
    }
    if !(MIN_LAUNCH_ANGLE..=MAX_LAUNCH_ANGLE).contains(&shot.launch_angle) {
        return Err(Misread::LaunchAngle(shot.launch_angle));
    }
    if shot.direction.abs() > MAX_DIRECTION {
        return Err(Misread::Direction(shot.direction));
    }
    if shot.total_spin == 0.0 {
        return Err(Misread::ZeroSpin);
    }
    if (shot.back_spin - BACK_SPIN_ERROR_CODE).abs() < ERROR_CODE_TOLERANCE {
        return Err(Misread::ErrorCodeBackSpin);
    }
    if shot.ball_speed > FLAT_READ_SPEED && shot.total_spin < FLAT_READ_SPIN {
        return Err(Misread::FlatRead {
            speed: shot.ball_speed,
            spin: shot.total_spin,
        });
    }
    if shot.spin_axis.abs() > MAX_SPIN_AXIS {
        return Err(Misread::SpinAxis(shot.spin_axis));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const TS: u64 = 1_700_000_000_000;

    fn valid() -> ShotSample {
        ShotSample {
            shot_id: 1,
            timestamp_ms: TS,
            msec_since_contact: 1000,
            ball_speed: 150.0,
            launch_angle: 12.0,
            direction: 1.5,
            total_spin: 2600.0,
            back_spin: 2550.0,
            side_spin: -300.0,
            spin_axis: -6.7,
            club: None,
            provisional: false,
        }
    }

    /// Render a sample the way the device would send it.
    fn payload(shot: &ShotSample) -> String {
        let mut s = format!(
            "0H\nSHOT_ID={}\nTIME_SEC=0\nMSEC_SINCE_CONTACT={}\nSPEED_MPH={:.2}\nAZIMUTH_DEG={:.2}\nELEVATION_DEG={:.2}\nSPIN_RPM={:.0}\nBACK_RPM={:.0}\nSIDE_RPM={:.0}\nSPIN_AXIS_DEG={:.2}\n",
            shot.shot_id,
            shot.msec_since_contact,
            shot.ball_speed,
            shot.direction,
            shot.launch_angle,
            shot.total_spin,
            shot.back_spin,
            shot.side_spin,
            shot.spin_axis,
        );
        match shot.club {
            Some(c) => s.push_str(&format!(
                "HMT=1\nCLUBSPEED_MPH={:.1}\nHPATH_DEG={:.1}\nVPATH_DEG={:.1}\nFACE_T_DEG={:.1}\nLOFT_DEG={:.1}\nLIE_DEG={:.1}\n",
                c.speed, c.path, c.attack_angle, c.face_to_target, c.dynamic_loft, c.lie,
            )),
            None => s.push_str("HMT=0\n"),
        }
        s.push('\t');
        s
    }

    #[test]
    fn parse_final_reading() {
        let shot = parse_at(&payload(&valid()), TS).unwrap();
        assert_eq!(shot, valid());
        assert!(!shot.has_club_data());
    }

    #[test]
    fn parse_with_club_block() {
        let mut expected = valid();
        expected.club = Some(ClubMetrics {
            speed: 105.0,
            path: 2.5,
            attack_angle: -1.5,
            face_to_target: 0.5,
            dynamic_loft: 14.0,
            lie: 1.0,
        });
        let shot = parse_at(&payload(&expected), TS).unwrap();
        assert_eq!(shot.club, expected.club);
    }

    #[test]
    fn club_block_absent_unless_flag_is_one() {
        let base = "SPEED_MPH=150\nELEVATION_DEG=12\nSPIN_RPM=2600\nCLUBSPEED_MPH=105";
        for flag in ["", "\nHMT=0", "\nHMT=2", "\nHMT=yes"] {
            let shot = parse_at(&format!("{base}{flag}"), TS).unwrap();
            assert_eq!(shot.club, None, "flag {flag:?}");
        }
        let shot = parse_at(&format!("{base}\nHMT=1"), TS).unwrap();
        assert_eq!(shot.club.map(|c| c.speed), Some(105.0));
        assert_eq!(shot.club.map(|c| c.lie), Some(0.0));
    }

    #[test]
    fn missing_ball_speed_is_none() {
        assert_eq!(parse_at("0H\nSHOT_ID=1\nSPIN_RPM=3000\nELEVATION_DEG=12", TS), None);
        assert_eq!(parse_at("", TS), None);
        assert_eq!(parse_at("0M\nFLAGS=7\nBALLS=1", TS), None);
    }

    #[test]
    fn garbled_speed_defaults_to_zero_and_is_rejected() {
        assert_eq!(parse_at("SPEED_MPH=1x0\nSPIN_RPM=3000", TS), None);
    }

    #[test]
    fn derives_spin_from_axis() {
        let payload = "BALL=1\nSPEED_MPH=95\nELEVATION_DEG=12\nAZIMUTH_DEG=3\nSPIN_RPM=2500\nBACK_RPM=0\nSIDE_RPM=0\nSPIN_AXIS_DEG=10";
        let shot = parse_at(payload, TS).unwrap();
        assert!((shot.back_spin - 2500.0 * 10f64.to_radians().cos()).abs() < 1e-9);
        assert!((shot.side_spin - 2500.0 * 10f64.to_radians().sin()).abs() < 1e-9);
        assert!((shot.back_spin - 2462.7).abs() < 1.0);
        assert!((shot.side_spin - 434.1).abs() < 0.1);
    }

    #[test]
    fn derives_spin_for_any_axis() {
        for axis in [-89.0, -45.0, -10.0, 0.0, 7.5, 30.0, 90.0] {
            let p = format!("SPEED_MPH=120\nELEVATION_DEG=15\nSPIN_RPM=5000\nSPIN_AXIS_DEG={axis}");
            let shot = parse_at(&p, TS).unwrap();
            let rad = axis * std::f64::consts::PI / 180.0;
            assert!((shot.back_spin - 5000.0 * rad.cos()).abs() < 1e-6, "axis {axis}");
            assert!((shot.side_spin - 5000.0 * rad.sin()).abs() < 1e-6, "axis {axis}");
        }
    }

    #[test]
    fn early_reading_without_components_uses_total_as_backspin() {
        let p = "0H\nSHOT_ID=4\nMSEC_SINCE_CONTACT=200\nSPEED_MPH=160\nAZIMUTH_DEG=0.5\nELEVATION_DEG=11\nSPIN_RPM=2700\nHMT=0\n\t";
        let shot = parse_at(p, TS).unwrap();
        assert_eq!(shot.msec_since_contact, 200);
        assert!(shot.provisional);
        assert_eq!(shot.back_spin, 2700.0);
        assert_eq!(shot.side_spin, 0.0);
    }

    #[test]
    fn reported_components_are_not_overwritten() {
        let p = "SPEED_MPH=150\nELEVATION_DEG=12\nSPIN_RPM=3000\nBACK_RPM=0\nSIDE_RPM=-400\nSPIN_AXIS_DEG=20";
        let shot = parse_at(p, TS).unwrap();
        assert!(!shot.provisional);
        assert_eq!(shot.back_spin, 0.0);
        assert_eq!(shot.side_spin, -400.0);
    }

    #[test]
    fn flat_read_rejected_regardless_of_other_fields() {
        let p = "SPEED_MPH=90\nELEVATION_DEG=12\nAZIMUTH_DEG=0\nSPIN_RPM=50\nBACK_RPM=40\nSIDE_RPM=5";
        assert_eq!(parse_at(p, TS), None);

        let mut shot = valid();
        shot.ball_speed = 90.0;
        shot.total_spin = 50.0;
        assert!(matches!(validate(&shot), Err(Misread::FlatRead { .. })));
    }

    #[test]
    fn slow_low_spin_chip_accepted() {
        let mut shot = valid();
        shot.ball_speed = 80.0;
        shot.total_spin = 50.0;
        assert_eq!(validate(&shot), Ok(()));
    }

    #[test]
    fn error_code_backspin_rejected() {
        let mut shot = valid();
        shot.back_spin = 2222.0;
        assert_eq!(validate(&shot), Err(Misread::ErrorCodeBackSpin));
        shot.back_spin = 2222.001;
        assert_eq!(validate(&shot), Err(Misread::ErrorCodeBackSpin));
        shot.back_spin = 2223.0;
        assert_eq!(validate(&shot), Ok(()));
    }

    #[test]
    fn boundaries_inclusive() {
        let cases: [(fn(&mut ShotSample), bool); 10] = [
            (|s| s.ball_speed = 10.0, true),
            (|s| s.ball_speed = 9.99, false),
            (|s| s.ball_speed = 250.0, true),
            (|s| s.ball_speed = 250.01, false),
            (|s| s.launch_angle = -10.0, true),
            (|s| s.launch_angle = 60.01, false),
            (|s| s.direction = -45.0, true),
            (|s| s.direction = 45.5, false),
            (|s| s.spin_axis = -90.0, true),
            (|s| s.spin_axis = 90.5, false),
        ];
        for (i, (mutate, ok)) in cases.into_iter().enumerate() {
            let mut shot = valid();
            mutate(&mut shot);
            assert_eq!(validate(&shot).is_ok(), ok, "case {i}");
        }
    }

    #[test]
    fn each_violation_rejects_and_more_never_accept() {
        let violations: [fn(&mut ShotSample); 7] = [
            |s| s.ball_speed = 300.0,
            |s| s.launch_angle = 75.0,
            |s| s.direction = -50.0,
            |s| s.total_spin = 0.0,
            |s| s.back_spin = 2222.0,
            |s| s.total_spin = 60.0,
            |s| s.spin_axis = 120.0,
        ];
        // Every non-empty subset of violations must reject.
        for mask in 1u32..(1 << violations.len()) {
            let mut shot = valid();
            for (i, v) in violations.iter().enumerate() {
                if mask & (1 << i) != 0 {
                    v(&mut shot);
                }
            }
            assert!(validate(&shot).is_err(), "mask {mask:07b}");
        }
    }

    #[test]
    fn non_finite_values_rejected() {
        let fields: [fn(&mut ShotSample) -> &mut f64; 7] = [
            |s| &mut s.ball_speed,
            |s| &mut s.launch_angle,
            |s| &mut s.direction,
            |s| &mut s.total_spin,
            |s| &mut s.back_spin,
            |s| &mut s.side_spin,
            |s| &mut s.spin_axis,
        ];
        for (i, field) in fields.iter().enumerate() {
            for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
                let mut shot = valid();
                *field(&mut shot) = bad;
                assert!(
                    matches!(validate(&shot), Err(Misread::NonFinite { .. })),
                    "field {i} = {bad}"
                );
            }
        }
    }

    #[test]
    fn non_finite_wire_values_never_parse() {
        for p in [
            "0H\nSHOT_ID=1\nSPEED_MPH=150\nELEVATION_DEG=12\nSPIN_RPM=NaN",
            "0H\nSHOT_ID=1\nSPEED_MPH=150\nELEVATION_DEG=12\nSPIN_RPM=inf\nBACK_RPM=inf",
            "0H\nSHOT_ID=1\nSPEED_MPH=150\nELEVATION_DEG=12\nSPIN_RPM=3000\nSIDE_RPM=-inf",
            "0H\nSHOT_ID=1\nSPEED_MPH=150\nELEVATION_DEG=12\nSPIN_RPM=3000\nSPIN_AXIS_DEG=nan",
        ] {
            assert_eq!(parse_at(p, TS), None, "{p:?}");
        }
    }

    #[test]
    fn zero_spin_rejected() {
        let mut shot = valid();
        shot.ball_speed = 40.0;
        shot.total_spin = 0.0;
        assert_eq!(validate(&shot), Err(Misread::ZeroSpin));
    }

    #[test]
    fn serde_round_trip() {
        let mut shot = valid();
        shot.club = Some(ClubMetrics {
            speed: 101.3,
            ..ClubMetrics::default()
        });
        let json = serde_json::to_string(&shot).unwrap();
        let back: ShotSample = serde_json::from_str(&json).unwrap();
        assert_eq!(back, shot);
    }
}
