//! Outbound Open Connect v1 messages.

use serde::{Deserialize, Serialize};

use crate::protocol::{ClubMetrics, DeviceStatus, ShotSample};

pub const DEVICE_ID: &str = "GC2";
pub const UNITS: &str = "Yards";
pub const API_VERSION: &str = "1";

/// One message to the simulator: a shot, a status update, or a heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OpenConnectMessage {
    #[serde(rename = "DeviceID")]
    pub device_id: String,
    pub units: String,
    pub shot_number: u32,
    #[serde(rename = "APIversion")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ball_data: Option<BallData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub club_data: Option<ClubData>,
    pub shot_data_options: ShotDataOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BallData {
    /// mph
    pub speed: f64,
    pub spin_axis: f64,
    pub total_spin: f64,
    pub back_spin: f64,
    pub side_spin: f64,
    /// Horizontal launch angle (deg)
    #[serde(rename = "HLA")]
    pub hla: f64,
    /// Vertical launch angle (deg)
    #[serde(rename = "VLA")]
    pub vla: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClubData {
    /// mph
    pub speed: f64,
    pub angle_of_attack: f64,
    pub face_to_target: f64,
    pub lie: f64,
    pub loft: f64,
    pub path: f64,
    pub speed_at_impact: f64,
    #[serde(default)]
    pub vertical_face_impact: f64,
    #[serde(default)]
    pub horizontal_face_impact: f64,
    #[serde(default)]
    pub closure_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ShotDataOptions {
    pub contains_ball_data: bool,
    pub contains_club_data: bool,
    #[serde(default)]
    pub launch_monitor_is_ready: bool,
    #[serde(default)]
    pub launch_monitor_ball_detected: bool,
    #[serde(default)]
    pub is_heart_beat: bool,
}

impl From<&ClubMetrics> for ClubData {
    fn from(c: &ClubMetrics) -> Self {
        Self {
            speed: c.speed,
            angle_of_attack: c.attack_angle,
            face_to_target: c.face_to_target,
            lie: c.lie,
            loft: c.dynamic_loft,
            path: c.path,
            speed_at_impact: c.speed,
            ..Self::default()
        }
    }
}

impl From<&ClubData> for ClubMetrics {
    fn from(c: &ClubData) -> Self {
        Self {
            speed: c.speed,
            path: c.path,
            attack_angle: c.angle_of_attack,
            face_to_target: c.face_to_target,
            dynamic_loft: c.loft,
            lie: c.lie,
        }
    }
}

impl OpenConnectMessage {
    fn base(shot_number: u32, options: ShotDataOptions) -> Self {
        Self {
            device_id: DEVICE_ID.to_string(),
            units: UNITS.to_string(),
            shot_number,
            api_version: API_VERSION.to_string(),
            ball_data: None,
            club_data: None,
            shot_data_options: options,
        }
    }

    /// A shot. Club data is included when the sample carries it.
    pub fn shot(sample: &ShotSample, shot_number: u32) -> Self {
        let club_data = sample.club.as_ref().map(ClubData::from);
        Self {
            ball_data: Some(BallData {
                speed: sample.ball_speed,
                spin_axis: sample.spin_axis,
                total_spin: sample.total_spin,
                back_spin: sample.back_spin,
                side_spin: sample.side_spin,
                hla: sample.direction,
                vla: sample.launch_angle,
            }),
            club_data,
            ..Self::base(
                shot_number,
                ShotDataOptions {
                    contains_ball_data: true,
                    contains_club_data: club_data.is_some(),
                    launch_monitor_is_ready: true,
                    launch_monitor_ball_detected: true,
                    is_heart_beat: false,
                },
            )
        }
    }

    /// Readiness update without ball data. The simulator does not answer.
    pub fn status(status: &DeviceStatus, shot_number: u32) -> Self {
        Self::base(
            shot_number,
            ShotDataOptions {
                launch_monitor_is_ready: status.is_ready,
                launch_monitor_ball_detected: status.ball_detected,
                ..ShotDataOptions::default()
            },
        )
    }

    /// Keep-alive. The simulator does not answer.
    pub fn heartbeat(shot_number: u32) -> Self {
        Self::base(
            shot_number,
            ShotDataOptions {
                launch_monitor_is_ready: true,
                is_heart_beat: true,
                ..ShotDataOptions::default()
            },
        )
    }

    pub fn is_shot(&self) -> bool {
        self.shot_data_options.contains_ball_data && self.ball_data.is_some()
    }

    pub fn is_heartbeat(&self) -> bool {
        self.shot_data_options.is_heart_beat
    }

    /// Rebuild the shot carried by this message. `shot_id` is the shot
    /// number; capture timing is not carried on the wire and comes back as 0.
    pub fn to_shot_sample(&self) -> Option<ShotSample> {
        if !self.is_shot() {
            return None;
        }
        let ball = self.ball_data?;
        let club = if self.shot_data_options.contains_club_data {
            self.club_data.as_ref().map(ClubMetrics::from)
        } else {
            None
        };
        Some(ShotSample {
            shot_id: self.shot_number,
            timestamp_ms: 0,
            msec_since_contact: 0,
            ball_speed: ball.speed,
            launch_angle: ball.vla,
            direction: ball.hla,
            total_spin: ball.total_spin,
            back_spin: ball.back_spin,
            side_spin: ball.side_spin,
            spin_axis: ball.spin_axis,
            club,
            provisional: false,
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
