//! JSON command/response boundary.
//!
//! Inbound objects are parsed into [`WireCommand`], which accepts every
//! verbose field name and its short alias, then normalised into the single
//! canonical [`Command`] the controller works with.

use crate::profile::ProfileSummary;
use crate::types::{Segment, CALIBRATION_POINTS};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct WireSegment {
    #[serde(rename = "startTime", alias = "start_time", alias = "st")]
    pub start_time: u32,
    #[serde(rename = "endTime", alias = "end_time", alias = "et")]
    pub end_time: u32,
    #[serde(rename = "startPressure", alias = "start_pressure", alias = "sp")]
    pub start_pressure: f32,
    #[serde(rename = "endPressure", alias = "end_pressure", alias = "ep")]
    pub end_pressure: f32,
}

impl From<WireSegment> for Segment {
    fn from(seg: WireSegment) -> Self {
        Segment::new(seg.start_time, seg.end_time, seg.start_pressure, seg.end_pressure)
    }
}

/// Profile body as sent by the web frontend, nested under `profile`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WireProfile {
    #[serde(default, alias = "n")]
    pub name: Option<String>,
    #[serde(default, alias = "seg")]
    pub segments: Option<Vec<WireSegment>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum WireCommand {
    StartProfile {
        #[serde(default, alias = "seg")]
        segments: Option<Vec<WireSegment>>,
        #[serde(default)]
        profile: Option<WireProfile>,
    },
    StopProfile,
    StoreProfile {
        #[serde(alias = "profile_id", alias = "profileId", alias = "pid")]
        id: i32,
        #[serde(default, alias = "n")]
        name: Option<String>,
        #[serde(default, alias = "seg")]
        segments: Option<Vec<WireSegment>>,
        #[serde(default)]
        profile: Option<WireProfile>,
    },
    StartProfileById {
        #[serde(alias = "profileId", alias = "pid", alias = "id")]
        profile_id: i32,
    },
    SetDefaultProfile {
        #[serde(alias = "btn")]
        button: i32,
        #[serde(alias = "profileId", alias = "pid")]
        profile_id: i32,
    },
    SetCalibrationData {
        #[serde(alias = "cal")]
        calibration: BTreeMap<String, f32>,
    },
    SetCalibrationPoint {
        step: i32,
        #[serde(alias = "pr")]
        pressure: f32,
    },
    StartCalibration,
    GetStatus,
    GetProfileStatus,
    GetCalibrationStatus,
    SetDimLevel {
        #[serde(alias = "lvl")]
        level: i32,
    },
    ClearAllProfiles,
}

/// Canonical command, independent of field spelling.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StartProfile { segments: Vec<Segment> },
    StopProfile,
    StoreProfile { id: i32, name: String, segments: Vec<Segment> },
    StartProfileById { profile_id: i32 },
    SetDefaultProfile { button: i32, profile_id: i32 },
    /// (level %, pressure) pairs. Keys that are not integers become -1.
    SetCalibrationData { points: Vec<(i32, f32)> },
    SetCalibrationPoint { step: i32, pressure: f32 },
    StartCalibration,
    GetStatus,
    GetProfileStatus,
    GetCalibrationStatus,
    SetDimLevel { level: i32 },
    ClearAllProfiles,
}

fn merge_segments(top: Option<Vec<WireSegment>>, nested: Option<&WireProfile>) -> Vec<Segment> {
    top.or_else(|| nested.and_then(|p| p.segments.clone()))
        .unwrap_or_default()
        .into_iter()
        .map(Segment::from)
        .collect()
}

impl From<WireCommand> for Command {
    fn from(wire: WireCommand) -> Self {
        match wire {
            WireCommand::StartProfile { segments, profile } => Command::StartProfile {
                segments: merge_segments(segments, profile.as_ref()),
            },
            WireCommand::StopProfile => Command::StopProfile,
            WireCommand::StoreProfile {
                id,
                name,
                segments,
                profile,
            } => {
                let name = name
                    .or_else(|| profile.as_ref().and_then(|p| p.name.clone()))
                    .unwrap_or_default();
                Command::StoreProfile {
                    id,
                    name,
                    segments: merge_segments(segments, profile.as_ref()),
                }
            }
            WireCommand::StartProfileById { profile_id } => Command::StartProfileById { profile_id },
            WireCommand::SetDefaultProfile { button, profile_id } => {
                Command::SetDefaultProfile { button, profile_id }
            }
            WireCommand::SetCalibrationData { calibration } => Command::SetCalibrationData {
                points: calibration
                    .into_iter()
                    .map(|(level, pressure)| (level.trim().parse().unwrap_or(-1), pressure))
                    .collect(),
            },
            WireCommand::SetCalibrationPoint { step, pressure } => {
                Command::SetCalibrationPoint { step, pressure }
            }
            WireCommand::StartCalibration => Command::StartCalibration,
            WireCommand::GetStatus => Command::GetStatus,
            WireCommand::GetProfileStatus => Command::GetProfileStatus,
            WireCommand::GetCalibrationStatus => Command::GetCalibrationStatus,
            WireCommand::SetDimLevel { level } => Command::SetDimLevel { level },
            WireCommand::ClearAllProfiles => Command::ClearAllProfiles,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    InvalidJson,
    InvalidCommand(String),
}

impl ParseError {
    pub fn reason(&self) -> String {
        match self {
            ParseError::InvalidJson => "invalid_json".to_string(),
            ParseError::InvalidCommand(detail) => format!("invalid_command: {}", detail),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason())
    }
}

impl std::error::Error for ParseError {}

pub fn parse_command(line: &str) -> Result<Command, ParseError> {
    let value: serde_json::Value = serde_json::from_str(line).map_err(|e| {
        warn!("JSON parsing failed: {}", e);
        ParseError::InvalidJson
    })?;
    let wire: WireCommand = serde_json::from_value(value).map_err(|e| {
        warn!("Rejected command: {}", e);
        ParseError::InvalidCommand(e.to_string())
    })?;
    debug!("Command: {:?}", wire);
    Ok(wire.into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartSource {
    Command,
    StoredProfile,
    Switch,
}

/// Periodic and on-demand device snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub is_running: bool,
    pub current_segment: usize,
    pub total_segments: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_pressure: Option<f32>,
    pub dim_level: u8,
    pub firing_delay_us: u32,
    pub zero_cross_count: u32,
    pub pulse_count: u32,
    pub skipped_half_cycles: u32,
    pub is_calibrated: bool,
    pub safety_locked: bool,
    pub persistence_degraded: bool,
    pub engine_fault: bool,
    pub uptime: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    ProfileStarted {
        segments: usize,
        source: StartSource,
        #[serde(skip_serializing_if = "Option::is_none")]
        profile_id: Option<u8>,
        #[serde(skip_serializing_if = "Option::is_none")]
        profile_name: Option<String>,
    },
    ProfileStopped {
        reason: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        elapsed_ms: Option<u64>,
    },
    ProfileError {
        reason: String,
    },
    PressureUpdate {
        target_pressure: f32,
        level: u8,
        current_time: f32,
        segment: usize,
    },
    StatusUpdate(StatusReport),
    ProfileStatus {
        profile_count: usize,
        default_profile1: u8,
        default_profile2: u8,
        profiles: Vec<ProfileSummary>,
        corrupt_profiles: Vec<u8>,
    },
    CalibrationStatus {
        is_calibrated: bool,
        points: [f32; CALIBRATION_POINTS],
    },
    CalibrationDataSet {
        total_points: usize,
        valid_points: usize,
        is_calibrated: bool,
    },
    CalibrationPointSet {
        step: i32,
        pressure: f32,
    },
    CalibrationError {
        reason: String,
    },
    CalibrationStarted {
        steps: u8,
    },
    DefaultProfileSet {
        button: u8,
        profile_id: u8,
    },
    ProfileStored {
        profile: ProfileSummary,
    },
    ProfilesCleared,
    DimLevelSet {
        level: u8,
        firing_delay_us: u32,
    },
    CommandError {
        reason: String,
    },
    SwitchFault {
        button: u8,
        reason: String,
    },
}

impl Response {
    /// One JSON object, no trailing newline.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            warn!("Failed to serialise response: {}", e);
            r#"{"type":"command_error","reason":"serialisation_failed"}"#.to_string()
        })
    }
}
