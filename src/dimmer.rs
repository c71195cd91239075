//! Zero-cross synchronised phase-angle firing of the pump TRIAC.
//!
//! Three contexts cooperate:
//!
//! - the zero-cross edge ISR calls [`DimmerShared::on_zero_cross`], which only
//!   records a timestamp and raises a pending flag,
//! - the cooperative loop calls [`PhaseFiringEngine::process_zero_cross`], which
//!   cancels and re-arms the one-shot alarm for the current firing delay,
//! - the alarm ISR calls [`DimmerShared::on_timer_fire`], which emits one gate
//!   pulse of fixed width.
//!
//! Mode, level and delay are packed into a single atomic word so the ISRs can
//! never observe a delay without its matching level.

use crate::error::DimmerError;
use crate::system::config::DimmerTiming;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use embedded_hal::blocking::delay::DelayUs;
use log::{error, info};
use serde::Serialize;
use std::sync::Arc;

/// Alarm lead used when the loop sees a zero-cross after its firing point.
pub const LATE_FIRING_LEAD_US: u32 = 1;

/// TRIAC gate output. Must be callable from interrupt context.
pub trait GateOutput: Send + Sync {
    fn set_gate(&self, high: bool);
}

/// One-shot microsecond alarm whose expiry calls [`DimmerShared::on_timer_fire`].
pub trait FiringAlarm {
    type Error: core::fmt::Debug;

    /// Arm the alarm. Any previously armed alarm must already be cancelled.
    fn arm_after_us(&mut self, delay_us: u32) -> Result<(), Self::Error>;

    fn cancel(&mut self) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DimmerMode {
    Off,
    On,
}

/// Consistent snapshot of the firing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DimmerState {
    pub mode: DimmerMode,
    pub level: u8,
    pub firing_delay_us: u32,
}

impl DimmerState {
    const DELAY_MASK: u32 = 0xFFFF;
    const LEVEL_SHIFT: u32 = 16;

    fn pack(level: u8, firing_delay_us: u32) -> u32 {
        ((level as u32) << Self::LEVEL_SHIFT) | (firing_delay_us & Self::DELAY_MASK)
    }

    fn unpack(word: u32) -> Self {
        let level = (word >> Self::LEVEL_SHIFT) as u8;
        Self {
            mode: if level == 0 { DimmerMode::Off } else { DimmerMode::On },
            level,
            firing_delay_us: word & Self::DELAY_MASK,
        }
    }
}

/// Map a level in percent to the gate delay after zero-cross.
///
/// Linear between `off_delay_us` at 0 % and `min_delay_us` at 100 %, with
/// every non-zero level clamped to the last usable point of the half-cycle.
pub fn firing_delay_us(timing: &DimmerTiming, level: u8) -> u32 {
    let level = level.min(100) as u32;
    if level == 0 {
        return timing.off_delay_us;
    }
    let span = timing.off_delay_us.saturating_sub(timing.min_delay_us);
    let delay = timing.off_delay_us - span * level / 100;
    delay.min(timing.max_active_delay_us)
}

/// State shared between the loop and both interrupt handlers.
pub struct DimmerShared {
    params: AtomicU32,
    pending_fire: AtomicBool,
    last_zero_cross_us: AtomicU32,
    zero_cross_count: AtomicU32,
    pulse_count: AtomicU32,
    gate_pulse_us: u32,
}

impl DimmerShared {
    pub fn new(timing: &DimmerTiming) -> Self {
        Self {
            params: AtomicU32::new(DimmerState::pack(0, timing.off_delay_us)),
            pending_fire: AtomicBool::new(false),
            last_zero_cross_us: AtomicU32::new(0),
            zero_cross_count: AtomicU32::new(0),
            pulse_count: AtomicU32::new(0),
            gate_pulse_us: timing.gate_pulse_us,
        }
    }

    /// Zero-cross edge ISR.
    pub fn on_zero_cross(&self, now_us: u32) {
        self.last_zero_cross_us.store(now_us, Ordering::Relaxed);
        self.zero_cross_count.fetch_add(1, Ordering::Relaxed);
        self.pending_fire.store(true, Ordering::Release);
    }

    /// Alarm ISR. Emits one fixed-width gate pulse unless the output is off.
    pub fn on_timer_fire<G, D>(&self, gate: &G, delay: &mut D)
    where
        G: GateOutput + ?Sized,
        D: DelayUs<u32>,
    {
        if self.state().mode == DimmerMode::Off {
            gate.set_gate(false);
            return;
        }
        gate.set_gate(true);
        delay.delay_us(self.gate_pulse_us);
        gate.set_gate(false);
        self.pulse_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn state(&self) -> DimmerState {
        DimmerState::unpack(self.params.load(Ordering::Acquire))
    }

    pub fn zero_cross_count(&self) -> u32 {
        self.zero_cross_count.load(Ordering::Relaxed)
    }

    pub fn pulse_count(&self) -> u32 {
        self.pulse_count.load(Ordering::Relaxed)
    }

    fn store(&self, level: u8, firing_delay_us: u32) {
        self.params
            .store(DimmerState::pack(level, firing_delay_us), Ordering::Release);
    }

    fn take_pending(&self) -> Option<u32> {
        if self.pending_fire.swap(false, Ordering::Acquire) {
            Some(self.last_zero_cross_us.load(Ordering::Relaxed))
        } else {
            None
        }
    }
}

/// Loop-side owner of the firing alarm and gate.
pub struct PhaseFiringEngine<G: GateOutput, A: FiringAlarm> {
    shared: Arc<DimmerShared>,
    gate: Arc<G>,
    alarm: A,
    timing: DimmerTiming,
    faulted: bool,
    skipped_half_cycles: u32,
}

impl<G: GateOutput, A: FiringAlarm> PhaseFiringEngine<G, A> {
    pub fn new(shared: Arc<DimmerShared>, gate: Arc<G>, alarm: A, timing: DimmerTiming) -> Self {
        gate.set_gate(false);
        shared.store(0, timing.off_delay_us);
        info!(
            "Phase firing engine ready: half-cycle {}us, delay {}..{}us",
            timing.half_cycle_us, timing.min_delay_us, timing.max_active_delay_us
        );
        Self {
            shared,
            gate,
            alarm,
            timing,
            faulted: false,
            skipped_half_cycles: 0,
        }
    }

    pub fn shared(&self) -> &Arc<DimmerShared> {
        &self.shared
    }

    pub fn state(&self) -> DimmerState {
        self.shared.state()
    }

    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn skipped_half_cycles(&self) -> u32 {
        self.skipped_half_cycles
    }

    /// Set the output level in percent, clamped to 0-100.
    ///
    /// Level 0 cancels any armed alarm and pulls the gate low before returning.
    pub fn set_level(&mut self, level: i32) -> Result<u8, DimmerError> {
        let level = level.clamp(0, 100) as u8;

        if level == 0 {
            self.force_off();
            return Ok(0);
        }
        if self.faulted {
            self.force_off();
            return Err(DimmerError::Faulted);
        }

        let delay = firing_delay_us(&self.timing, level);
        self.shared.store(level, delay);
        Ok(level)
    }

    /// Cooperative half of the zero-cross handling. Call once per loop tick.
    pub fn process_zero_cross(&mut self, now_us: u32) -> Result<(), DimmerError> {
        let Some(zero_cross_us) = self.shared.take_pending() else {
            return Ok(());
        };

        let state = self.shared.state();
        if state.mode == DimmerMode::Off || self.faulted {
            return Ok(());
        }

        // A newer zero-cross always wins over an alarm that is still pending.
        if let Err(e) = self.alarm.cancel() {
            return Err(self.latch_fault(format!("cancel failed: {:?}", e)));
        }

        let latency = now_us.wrapping_sub(zero_cross_us);
        let Some(after_us) = self.remaining_delay_us(state.firing_delay_us, latency) else {
            // The usable part of this half-cycle has passed, wait for the next one.
            self.skipped_half_cycles = self.skipped_half_cycles.wrapping_add(1);
            return Ok(());
        };

        if let Err(e) = self.alarm.arm_after_us(after_us) {
            return Err(self.latch_fault(format!("arm failed: {:?}", e)));
        }
        Ok(())
    }

    /// Time left until the firing point. A firing point that already passed
    /// fires at once while the half-cycle can still conduct.
    fn remaining_delay_us(&self, firing_delay_us: u32, latency_us: u32) -> Option<u32> {
        if latency_us < firing_delay_us {
            Some(firing_delay_us - latency_us)
        } else if latency_us < self.timing.max_active_delay_us {
            Some(LATE_FIRING_LEAD_US)
        } else {
            None
        }
    }

    fn force_off(&mut self) {
        self.shared.store(0, self.timing.off_delay_us);
        if let Err(e) = self.alarm.cancel() {
            error!("Failed to cancel firing alarm while switching off: {:?}", e);
        }
        self.gate.set_gate(false);
    }

    fn latch_fault(&mut self, msg: String) -> DimmerError {
        error!("Phase firing engine fault, output latched off: {}", msg);
        self.faulted = true;
        self.force_off();
        DimmerError::Alarm(msg)
    }
}
