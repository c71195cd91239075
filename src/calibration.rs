//! Level to pressure lookup for the pump.
//!
//! Pressure is read manually from a manometer at each 10 % step. Lookups
//! snap to the nearest measured step; without any measurement a linear
//! 0-12 bar mapping is used.

use crate::error::ProfilerError;
use crate::types::{CALIBRATION_POINTS, MAX_PRESSURE_BAR};
use log::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTable {
    points: [f32; CALIBRATION_POINTS],
}

/// Outcome of a bulk calibration update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationUpdate {
    pub total_points: usize,
    pub valid_points: usize,
}

impl Default for CalibrationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CalibrationTable {
    pub fn new() -> Self {
        Self {
            points: [0.0; CALIBRATION_POINTS],
        }
    }

    /// Restore from persisted points. Out-of-range values are treated as unset.
    pub fn from_points(points: [f32; CALIBRATION_POINTS]) -> Self {
        let mut table = Self::new();
        for (slot, pressure) in table.points.iter_mut().zip(points) {
            if Self::pressure_in_range(pressure) {
                *slot = pressure;
            }
        }
        table
    }

    pub fn points(&self) -> [f32; CALIBRATION_POINTS] {
        self.points
    }

    pub fn is_calibrated(&self) -> bool {
        self.points.iter().any(|&p| p > 0.0)
    }

    /// Set points as (level %, pressure) pairs, e.g. `("50", 6.2)` from the wire.
    ///
    /// Previous data is cleared first. Pairs outside 0-100 % or 0-12 bar are
    /// skipped. Fails if no pair could be applied, leaving the table unchanged.
    pub fn set_bulk<I>(&mut self, pairs: I) -> Result<CalibrationUpdate, ProfilerError>
    where
        I: IntoIterator<Item = (i32, f32)>,
    {
        let mut points = [0.0; CALIBRATION_POINTS];
        let mut total_points = 0;
        let mut valid_points = 0;

        for (level, pressure) in pairs {
            total_points += 1;
            if (0..=100).contains(&level) && Self::pressure_in_range(pressure) {
                points[(level / 10) as usize] = pressure;
                valid_points += 1;
                info!("Calibration: {}% -> {:.1} bar", level, pressure);
            } else {
                warn!("Invalid calibration point: {}% -> {:.1} bar", level, pressure);
            }
        }

        if total_points == 0 {
            return Err(ProfilerError::validation("no calibration data received"));
        }
        if valid_points == 0 {
            return Err(ProfilerError::validation("no valid calibration points"));
        }

        self.points = points;
        info!("Calibration data set with {} of {} valid points", valid_points, total_points);
        Ok(CalibrationUpdate {
            total_points,
            valid_points,
        })
    }

    pub fn set_point(&mut self, step: i32, pressure: f32) -> Result<(), ProfilerError> {
        if !(0..CALIBRATION_POINTS as i32).contains(&step) {
            return Err(ProfilerError::validation(format!("calibration step {} out of range", step)));
        }
        if !Self::pressure_in_range(pressure) {
            return Err(ProfilerError::validation(format!(
                "calibration pressure {:.2} bar out of range",
                pressure
            )));
        }
        self.points[step as usize] = pressure;
        info!("Calibration point {}: {:.1} bar", step, pressure);
        Ok(())
    }

    /// Convert a target pressure to a dim level in percent.
    pub fn level_for_pressure(&self, pressure: f32) -> u8 {
        if !pressure.is_finite() {
            return 0;
        }

        if !self.is_calibrated() {
            let scaled = (pressure * 100.0) as i32;
            return (scaled * 100 / 1200).clamp(0, 100) as u8;
        }

        let mut best_level = 0;
        let mut best_diff = f32::MAX;
        for (i, &point) in self.points.iter().enumerate() {
            if i != 0 && point <= 0.0 {
                continue;
            }
            let diff = (pressure - point).abs();
            if diff < best_diff {
                best_diff = diff;
                best_level = i as u8 * 10;
            }
        }
        best_level
    }

    fn pressure_in_range(pressure: f32) -> bool {
        pressure.is_finite() && (0.0..=MAX_PRESSURE_BAR).contains(&pressure)
    }
}
