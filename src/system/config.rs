//! Centralized configuration management

use crate::types::{CALIBRATION_POINTS, NO_PROFILE};
use embassy_time::Duration;
use serde::{Deserialize, Serialize};

// Version for settings migration
pub const SETTINGS_VERSION: u8 = 1;

/// Board wiring and loop timing. Compile-time defaults, no persistence.
#[derive(Debug, Clone)]
pub struct FirmwareConfig {
    pub gate_gpio: i32,
    pub zero_cross_gpio: i32,
    pub switch_gpios: [i32; 2],
    pub status_led_gpio: i32,
    /// Switch inputs use pull-ups, so a closed switch reads low.
    pub switch_active_low: bool,

    pub mains_frequency_hz: u32,
    pub gate_pulse_us: u32,
    pub min_firing_lead_us: u32,

    pub tick_period: Duration,
    pub debounce: Duration,
    pub status_interval: Duration,
    /// Minimum spacing of `pressure_update` events during a brew.
    pub pressure_update_interval: Duration,
}

impl Default for FirmwareConfig {
    fn default() -> Self {
        Self {
            gate_gpio: 25,
            zero_cross_gpio: 33,
            switch_gpios: [26, 27],
            status_led_gpio: 2,
            switch_active_low: true,

            mains_frequency_hz: 50,
            gate_pulse_us: 50,
            min_firing_lead_us: 300,

            tick_period: Duration::from_millis(2),
            debounce: Duration::from_millis(50),
            status_interval: Duration::from_secs(1),
            pressure_update_interval: Duration::from_millis(200),
        }
    }
}

impl FirmwareConfig {
    pub fn dimmer_timing(&self) -> DimmerTiming {
        DimmerTiming::for_mains(self.mains_frequency_hz, self.gate_pulse_us, self.min_firing_lead_us)
    }
}

/// Phase delay anchors derived from the mains frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimmerTiming {
    pub half_cycle_us: u32,
    pub gate_pulse_us: u32,
    /// Delay at 100 %.
    pub min_delay_us: u32,
    /// Latest usable firing point for any level above zero.
    pub max_active_delay_us: u32,
    /// Level 0 anchor, beyond the half-cycle so it never fires.
    pub off_delay_us: u32,
}

impl DimmerTiming {
    const GUARD_US: u32 = 100;

    pub fn for_mains(mains_frequency_hz: u32, gate_pulse_us: u32, min_delay_us: u32) -> Self {
        let hz = mains_frequency_hz.clamp(40, 70);
        let half_cycle_us = 1_000_000 / (2 * hz);
        Self {
            half_cycle_us,
            gate_pulse_us,
            min_delay_us,
            max_active_delay_us: half_cycle_us - gate_pulse_us - Self::GUARD_US,
            off_delay_us: half_cycle_us + half_cycle_us / 20,
        }
    }
}

impl Default for DimmerTiming {
    fn default() -> Self {
        FirmwareConfig::default().dimmer_timing()
    }
}

/// Settings that survive a power cycle, persisted as a JSON blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub version: u8,
    /// Pressure in bar per 10 % level step, 0 means unset.
    pub calibration: [f32; CALIBRATION_POINTS],
    /// Default profile per switch channel, 255 when unassigned.
    pub default_profiles: [u8; 2],
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            calibration: [0.0; CALIBRATION_POINTS],
            default_profiles: [NO_PROFILE; 2],
        }
    }
}
