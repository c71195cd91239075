//! Brew profile execution state machine.
//! States: Idle, Running

use crate::calibration::CalibrationTable;
use crate::error::ProfilerError;
use crate::types::{ExecutorState, Segment, Segments, MAX_SEGMENTS};
use embassy_time::Instant;
use log::{debug, error, info, warn};
use statig::prelude::*;

// Input events to the state machine
#[derive(Debug, Clone)]
pub enum ExecutorInput {
    Start { segments: Segments, now: Instant },
    Tick { now: Instant },
    Stop { now: Instant },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    Completed,
    /// A new start replaced the running profile.
    Restarted,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Requested => "requested",
            StopReason::Completed => "completed",
            StopReason::Restarted => "restarted",
        }
    }
}

// Output events from the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutorOutput {
    SetLevel(u8),
    Started {
        segment_count: usize,
    },
    PressureUpdate {
        target_pressure: f32,
        level: u8,
        elapsed_s: f32,
        segment: usize,
    },
    Stopped {
        elapsed_ms: u64,
        reason: StopReason,
    },
    ArithmeticFault {
        segment: usize,
    },
}

pub type ExecutorOutputs = heapless::Vec<ExecutorOutput, 8>;

enum Progress {
    Continue,
    Exhausted,
}

/// Interpolated target pressure for `elapsed_s` within `seg`.
///
/// Returns `None` when the result is not finite.
pub fn interpolate(seg: &Segment, elapsed_s: f32) -> Option<f32> {
    let span = seg.end_time_s as f32 - seg.start_time_s as f32;
    let progress = ((elapsed_s - seg.start_time_s as f32) / span).clamp(0.0, 1.0);
    let target = seg.start_pressure_bar + (seg.end_pressure_bar - seg.start_pressure_bar) * progress;
    target.is_finite().then_some(target)
}

// Shared context for the state machine
#[derive(Debug)]
pub struct ExecutorContext {
    segments: Segments,
    current_segment: usize,
    start_time: Option<Instant>,
    last_target: Option<f32>,
    calibration: CalibrationTable,
    outputs: ExecutorOutputs,
}

impl Default for ExecutorContext {
    fn default() -> Self {
        Self {
            segments: Segments::new(),
            current_segment: 0,
            start_time: None,
            last_target: None,
            calibration: CalibrationTable::new(),
            outputs: ExecutorOutputs::new(),
        }
    }
}

impl ExecutorContext {
    fn push(&mut self, output: ExecutorOutput) {
        if self.outputs.push(output).is_err() {
            warn!("Executor output queue full, dropping event");
        }
    }

    fn begin(&mut self, segments: &Segments, now: Instant) {
        self.segments = segments.clone();
        self.current_segment = 0;
        self.start_time = Some(now);
        self.last_target = None;
        info!("Profile started with {} segments", self.segments.len());
        self.push(ExecutorOutput::Started {
            segment_count: self.segments.len(),
        });
    }

    fn finish(&mut self, now: Instant, reason: StopReason) {
        self.push(ExecutorOutput::SetLevel(0));
        let elapsed_ms = self
            .start_time
            .map(|start| now.saturating_duration_since(start).as_millis())
            .unwrap_or(0);
        info!("Profile stopped ({}) after {}ms", reason.as_str(), elapsed_ms);
        self.segments.clear();
        self.start_time = None;
        self.last_target = None;
        self.push(ExecutorOutput::Stopped { elapsed_ms, reason });
    }

    fn advance(&mut self, now: Instant) -> Progress {
        let Some(start) = self.start_time else {
            return Progress::Exhausted;
        };
        let elapsed_s = now.saturating_duration_since(start).as_millis() as f32 / 1000.0;

        let Some(seg) = self.segments.get(self.current_segment).copied() else {
            return Progress::Exhausted;
        };

        if !seg.is_valid() {
            warn!(
                "Skipping malformed segment {} ({}s..{}s)",
                self.current_segment, seg.start_time_s, seg.end_time_s
            );
            self.current_segment += 1;
            return Progress::Continue;
        }

        if elapsed_s < seg.start_time_s as f32 {
            // Pre-roll until the segment begins.
            self.push(ExecutorOutput::SetLevel(0));
            return Progress::Continue;
        }

        if elapsed_s <= seg.end_time_s as f32 {
            let target = match interpolate(&seg, elapsed_s) {
                Some(target) => target,
                None => {
                    error!("Non-finite target pressure in segment {}, holding 0 bar", self.current_segment);
                    self.push(ExecutorOutput::ArithmeticFault {
                        segment: self.current_segment,
                    });
                    0.0
                }
            };
            let level = self.calibration.level_for_pressure(target);
            self.last_target = Some(target);
            debug!(
                "t={:.2}s seg={} target={:.2}bar level={}%",
                elapsed_s, self.current_segment, target, level
            );
            self.push(ExecutorOutput::SetLevel(level));
            self.push(ExecutorOutput::PressureUpdate {
                target_pressure: target,
                level,
                elapsed_s,
                segment: self.current_segment,
            });
        } else {
            self.current_segment += 1;
        }
        Progress::Continue
    }
}

#[derive(Debug, Default)]
pub struct ExecutorMachine;

#[state_machine(
    initial = "State::idle()",
    state(derive(Debug)),
    on_transition = "Self::on_transition"
)]
impl ExecutorMachine {
    #[state]
    fn idle(context: &mut ExecutorContext, event: &ExecutorInput) -> Response<State> {
        use Response::*;

        match event {
            ExecutorInput::Start { segments, now } => {
                context.begin(segments, *now);
                Transition(State::running())
            }
            ExecutorInput::Stop { .. } => {
                // Stopping is always allowed and always cuts the output.
                context.push(ExecutorOutput::SetLevel(0));
                Handled
            }
            ExecutorInput::Tick { .. } => Handled,
        }
    }

    #[state]
    fn running(context: &mut ExecutorContext, event: &ExecutorInput) -> Response<State> {
        use Response::*;

        match event {
            ExecutorInput::Start { segments, now } => {
                context.finish(*now, StopReason::Restarted);
                context.begin(segments, *now);
                Handled
            }
            ExecutorInput::Stop { now } => {
                context.finish(*now, StopReason::Requested);
                Transition(State::idle())
            }
            ExecutorInput::Tick { now } => match context.advance(*now) {
                Progress::Continue => Handled,
                Progress::Exhausted => {
                    context.finish(*now, StopReason::Completed);
                    Transition(State::idle())
                }
            },
        }
    }

    fn on_transition(&mut self, source: &State, target: &State) {
        info!("🔄 Executor transition: {:?} -> {:?}", source, target);
    }
}

pub struct ProfileExecutor {
    machine: statig::prelude::StateMachine<ExecutorMachine>,
    context: ExecutorContext,
}

impl Default for ProfileExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileExecutor {
    pub fn new() -> Self {
        Self {
            machine: ExecutorMachine::default().state_machine(),
            context: ExecutorContext::default(),
        }
    }

    fn handle(&mut self, input: ExecutorInput) -> ExecutorOutputs {
        self.context.outputs.clear();
        self.machine.handle_with_context(&input, &mut self.context);
        core::mem::take(&mut self.context.outputs)
    }

    /// Start a copy of `segments`. A running profile is stopped first.
    pub fn start(&mut self, segments: &[Segment], now: Instant) -> Result<ExecutorOutputs, ProfilerError> {
        if segments.is_empty() {
            return Err(ProfilerError::validation("profile has no segments"));
        }
        if segments.len() > MAX_SEGMENTS {
            return Err(ProfilerError::validation(format!(
                "profile has {} segments, at most {} supported",
                segments.len(),
                MAX_SEGMENTS
            )));
        }
        let mut copy = Segments::new();
        for seg in segments {
            let _ = copy.push(*seg);
        }
        Ok(self.handle(ExecutorInput::Start { segments: copy, now }))
    }

    /// Idempotent stop. The outputs always begin with `SetLevel(0)`.
    pub fn stop(&mut self, now: Instant) -> ExecutorOutputs {
        self.handle(ExecutorInput::Stop { now })
    }

    pub fn tick(&mut self, now: Instant) -> ExecutorOutputs {
        self.handle(ExecutorInput::Tick { now })
    }

    pub fn set_calibration(&mut self, calibration: CalibrationTable) {
        self.context.calibration = calibration;
    }

    pub fn state(&self) -> ExecutorState {
        match self.machine.state() {
            State::Idle {} => ExecutorState::Idle,
            State::Running {} => ExecutorState::Running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == ExecutorState::Running
    }

    pub fn current_segment(&self) -> usize {
        self.context.current_segment
    }

    pub fn total_segments(&self) -> usize {
        self.context.segments.len()
    }

    pub fn last_target(&self) -> Option<f32> {
        self.context.last_target
    }

    pub fn elapsed_ms(&self, now: Instant) -> Option<u64> {
        self.context
            .start_time
            .map(|start| now.saturating_duration_since(start).as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    fn classic() -> [Segment; 2] {
        [Segment::new(0, 10, 0.0, 9.0), Segment::new(10, 30, 9.0, 9.0)]
    }

    fn target_of(outputs: &ExecutorOutputs) -> Option<f32> {
        outputs.iter().find_map(|o| match o {
            ExecutorOutput::PressureUpdate { target_pressure, .. } => Some(*target_pressure),
            _ => None,
        })
    }

    fn level_of(outputs: &ExecutorOutputs) -> Option<u8> {
        outputs.iter().find_map(|o| match o {
            ExecutorOutput::SetLevel(level) => Some(*level),
            _ => None,
        })
    }

    #[test]
    fn test_interpolation_endpoints_and_midpoint() {
        let seg = Segment::new(4, 12, 2.0, 8.0);
        assert_eq!(interpolate(&seg, 4.0), Some(2.0));
        assert_eq!(interpolate(&seg, 12.0), Some(8.0));
        assert_eq!(interpolate(&seg, 8.0), Some(5.0));
        // Clock jitter outside the segment is clamped.
        assert_eq!(interpolate(&seg, 3.9), Some(2.0));
        assert_eq!(interpolate(&seg, 12.5), Some(8.0));
    }

    #[test]
    fn test_interpolation_non_finite() {
        let seg = Segment::new(0, 10, 0.0, f32::INFINITY);
        assert_eq!(interpolate(&seg, 5.0), None);
    }

    #[test]
    fn test_start_rejects_empty() {
        let mut executor = ProfileExecutor::new();
        assert!(matches!(executor.start(&[], at(0)), Err(ProfilerError::Validation(_))));
        assert_eq!(executor.state(), ExecutorState::Idle);
    }

    #[test]
    fn test_classic_profile_walkthrough() {
        let mut executor = ProfileExecutor::new();
        let outputs = executor.start(&classic(), at(1_000)).unwrap();
        assert!(outputs.contains(&ExecutorOutput::Started { segment_count: 2 }));
        assert!(executor.is_running());

        let outputs = executor.tick(at(6_000));
        assert_eq!(target_of(&outputs), Some(4.5));
        // Uncalibrated fallback: 4.5 bar -> 37 %.
        assert_eq!(level_of(&outputs), Some(37));

        // First tick past the segment end only advances.
        let outputs = executor.tick(at(26_000));
        assert!(outputs.is_empty());
        assert_eq!(executor.current_segment(), 1);

        let outputs = executor.tick(at(26_000));
        assert_eq!(target_of(&outputs), Some(9.0));

        executor.tick(at(32_000));
        let outputs = executor.tick(at(32_000));
        assert_eq!(executor.state(), ExecutorState::Idle);
        assert_eq!(level_of(&outputs), Some(0));
        assert!(outputs
            .iter()
            .any(|o| matches!(o, ExecutorOutput::Stopped { reason: StopReason::Completed, elapsed_ms: 31_000 })));
    }

    #[test]
    fn test_segment_end_is_inclusive() {
        let mut executor = ProfileExecutor::new();
        executor.start(&classic(), at(0)).unwrap();
        let outputs = executor.tick(at(10_000));
        assert_eq!(target_of(&outputs), Some(9.0));
        assert_eq!(executor.current_segment(), 0);
    }

    #[test]
    fn test_pre_roll_holds_zero() {
        let mut executor = ProfileExecutor::new();
        executor.start(&[Segment::new(5, 10, 3.0, 6.0)], at(0)).unwrap();
        let outputs = executor.tick(at(2_000));
        assert_eq!(level_of(&outputs), Some(0));
        assert_eq!(target_of(&outputs), None);
    }

    #[test]
    fn test_malformed_segment_is_skipped() {
        let mut executor = ProfileExecutor::new();
        executor
            .start(&[Segment::new(5, 5, 3.0, 6.0), Segment::new(0, 10, 2.0, 2.0)], at(0))
            .unwrap();
        let outputs = executor.tick(at(1_000));
        assert!(outputs.is_empty());
        assert_eq!(executor.current_segment(), 1);

        let outputs = executor.tick(at(1_000));
        assert_eq!(target_of(&outputs), Some(2.0));
    }

    #[test]
    fn test_arithmetic_fault_holds_zero_and_continues() {
        let mut executor = ProfileExecutor::new();
        executor
            .start(&[Segment::new(0, 10, f32::MAX, -f32::MAX)], at(0))
            .unwrap();
        let outputs = executor.tick(at(5_000));
        assert!(outputs.iter().any(|o| matches!(o, ExecutorOutput::ArithmeticFault { segment: 0 })));
        assert_eq!(target_of(&outputs), Some(0.0));
        assert_eq!(level_of(&outputs), Some(0));
        assert!(executor.is_running());
    }

    #[test]
    fn test_stop_is_idempotent_and_cuts_output() {
        let mut executor = ProfileExecutor::new();
        executor.start(&classic(), at(0)).unwrap();

        let outputs = executor.stop(at(3_000));
        assert_eq!(outputs.first(), Some(&ExecutorOutput::SetLevel(0)));
        assert!(outputs
            .iter()
            .any(|o| matches!(o, ExecutorOutput::Stopped { elapsed_ms: 3_000, reason: StopReason::Requested })));
        assert_eq!(executor.total_segments(), 0);

        let outputs = executor.stop(at(4_000));
        assert_eq!(outputs.as_slice(), &[ExecutorOutput::SetLevel(0)]);
        assert_eq!(executor.state(), ExecutorState::Idle);
    }

    #[test]
    fn test_start_while_running_restarts() {
        let mut executor = ProfileExecutor::new();
        executor.start(&classic(), at(0)).unwrap();
        executor.tick(at(12_000));

        let outputs = executor.start(&[Segment::new(0, 5, 1.0, 1.0)], at(12_000)).unwrap();
        assert!(outputs
            .iter()
            .any(|o| matches!(o, ExecutorOutput::Stopped { reason: StopReason::Restarted, .. })));
        assert!(outputs.contains(&ExecutorOutput::Started { segment_count: 1 }));
        assert_eq!(executor.current_segment(), 0);
        assert!(executor.is_running());
    }

    #[test]
    fn test_calibrated_levels() {
        let mut calibration = CalibrationTable::new();
        calibration.set_point(9, 9.0).unwrap();
        let mut executor = ProfileExecutor::new();
        executor.set_calibration(calibration);

        executor.start(&classic(), at(0)).unwrap();
        let outputs = executor.tick(at(10_000));
        assert_eq!(level_of(&outputs), Some(90));
    }
}
