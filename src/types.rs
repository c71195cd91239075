use serde::{Deserialize, Serialize};

/// Number of persisted profile slots.
pub const MAX_PROFILES: usize = 10;
/// Maximum number of segments in one profile.
pub const MAX_SEGMENTS: usize = 10;
/// Maximum stored profile name length (a terminator byte follows).
pub const MAX_NAME_LEN: usize = 15;
/// Wire/record sentinel for "no profile".
pub const NO_PROFILE: u8 = 255;
/// Highest pressure a stored profile may carry, in deci-bar.
pub const MAX_STORED_DECIBAR: u8 = 120;
/// Number of calibration points (0 %, 10 %, ... 100 %).
pub const CALIBRATION_POINTS: usize = 11;
/// Upper bound of the calibration and uncalibrated fallback range.
pub const MAX_PRESSURE_BAR: f32 = 12.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutorState {
    Idle,
    Running,
}

/// One time interval of a brew profile with a linear pressure ramp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start_time_s: u32,
    pub end_time_s: u32,
    pub start_pressure_bar: f32,
    pub end_pressure_bar: f32,
}

impl Segment {
    pub fn new(start_time_s: u32, end_time_s: u32, start_pressure_bar: f32, end_pressure_bar: f32) -> Self {
        Self {
            start_time_s,
            end_time_s,
            start_pressure_bar,
            end_pressure_bar,
        }
    }

    /// A segment without a positive duration can never be interpolated.
    pub fn is_valid(&self) -> bool {
        self.end_time_s > self.start_time_s
    }
}

/// Fixed-capacity segment list, independent of any wire format.
pub type Segments = heapless::Vec<Segment, MAX_SEGMENTS>;

/// Validated profile slot id (0-9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ProfileId(u8);

impl ProfileId {
    pub fn new(id: u8) -> Option<Self> {
        if (id as usize) < MAX_PROFILES {
            Some(Self(id))
        } else {
            None
        }
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn all() -> impl Iterator<Item = ProfileId> {
        (0..MAX_PROFILES as u8).map(ProfileId)
    }
}

impl TryFrom<u8> for ProfileId {
    type Error = String;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        ProfileId::new(id).ok_or_else(|| format!("profile id {} out of range", id))
    }
}

impl From<ProfileId> for u8 {
    fn from(id: ProfileId) -> Self {
        id.0
    }
}

impl core::fmt::Display for ProfileId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Encode an optional profile assignment using the 255 wire sentinel.
pub fn profile_id_to_wire(id: Option<ProfileId>) -> u8 {
    id.map(ProfileId::value).unwrap_or(NO_PROFILE)
}

/// Physical switch channel, numbered 1 and 2 on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchId {
    One,
    Two,
}

impl SwitchId {
    pub const ALL: [SwitchId; 2] = [SwitchId::One, SwitchId::Two];

    pub fn from_button(button: u8) -> Option<Self> {
        match button {
            1 => Some(SwitchId::One),
            2 => Some(SwitchId::Two),
            _ => None,
        }
    }

    pub fn button(self) -> u8 {
        match self {
            SwitchId::One => 1,
            SwitchId::Two => 2,
        }
    }

    pub fn index(self) -> usize {
        self.button() as usize - 1
    }
}
