use crate::{
    calibration::CalibrationTable,
    dimmer::{FiringAlarm, GateOutput, PhaseFiringEngine},
    error::ProfilerError,
    executor::{ExecutorOutput, ExecutorOutputs, ProfileExecutor},
    interlock::{InterlockAction, SwitchInterlock},
    profile::ProfileStore,
    protocol::{parse_command, Command, Response, StartSource, StatusReport},
    storage::{load_settings, save_settings, KeyValueStore},
    system::config::{DeviceSettings, FirmwareConfig},
    types::{profile_id_to_wire, ProfileId, Segment, SwitchId, CALIBRATION_POINTS, NO_PROFILE},
};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use embassy_time::{Duration, Instant};
use log::{error, info, warn};

pub const MAX_RESPONSES: usize = 16;
pub type Responses = heapless::Vec<Response, MAX_RESPONSES>;

/// Inbound commands from the transport, drained by the control loop.
pub type CommandChannel = Channel<CriticalSectionRawMutex, Command, 8>;

pub const RESPONSE_QUEUE_LEN: usize = 32;

/// Outbound events, drained by the transport so the control loop never blocks on I/O.
pub type ResponseChannel = Channel<CriticalSectionRawMutex, Response, RESPONSE_QUEUE_LEN>;

/// Queue `responses` for the transport without waiting. Returns how many were
/// dropped because the queue was full.
pub fn publish(responses: Responses, channel: &ResponseChannel) -> usize {
    let mut dropped = 0;
    for response in responses {
        if let Err(_) = channel.try_send(response) {
            dropped += 1;
        }
    }
    if dropped > 0 {
        warn!("Response channel full, dropped {} events", dropped);
    }
    dropped
}

fn push(responses: &mut Responses, response: Response) {
    if responses.push(response).is_err() {
        warn!("Response queue full, dropping event");
    }
}

fn due(last: Option<Instant>, now: Instant, interval: Duration) -> bool {
    last.map_or(true, |last| now.saturating_duration_since(last) >= interval)
}

/// Owns every subsystem and runs them from one cooperative loop.
pub struct ProfilerController<G: GateOutput, A: FiringAlarm, K: KeyValueStore> {
    config: FirmwareConfig,
    engine: PhaseFiringEngine<G, A>,
    executor: ProfileExecutor,
    interlock: SwitchInterlock,
    store: ProfileStore<K>,
    calibration: CalibrationTable,
    settings: DeviceSettings,

    boot_time: Instant,
    last_status: Option<Instant>,
    last_pressure_update: Option<Instant>,
    persistence_degraded: bool,
}

impl<G: GateOutput, A: FiringAlarm, K: KeyValueStore> ProfilerController<G, A, K> {
    pub fn new(config: FirmwareConfig, engine: PhaseFiringEngine<G, A>, backend: K, now: Instant) -> Self {
        let settings = load_settings(&backend);
        let persistence_degraded = !backend.is_persistent();
        if persistence_degraded {
            warn!("⚠️ Persistence degraded: profiles and settings will not survive a power cycle");
        }

        let calibration = CalibrationTable::from_points(settings.calibration);
        let mut executor = ProfileExecutor::new();
        executor.set_calibration(calibration.clone());

        let mut interlock = SwitchInterlock::new(config.debounce);
        for switch in SwitchId::ALL {
            interlock.assign(switch, ProfileId::new(settings.default_profiles[switch.index()]));
        }

        info!(
            "Profiler controller ready (calibrated: {}, defaults: {:?})",
            calibration.is_calibrated(),
            settings.default_profiles
        );

        Self {
            config,
            engine,
            executor,
            interlock,
            store: ProfileStore::new(backend),
            calibration,
            settings,
            boot_time: now,
            last_status: None,
            last_pressure_update: None,
            persistence_degraded,
        }
    }

    pub fn config(&self) -> &FirmwareConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.executor.is_running()
    }

    pub fn engine(&self) -> &PhaseFiringEngine<G, A> {
        &self.engine
    }

    pub fn store(&self) -> &ProfileStore<K> {
        &self.store
    }

    pub fn calibration(&self) -> &CalibrationTable {
        &self.calibration
    }

    /// Parse one JSON line from the transport and handle it.
    pub fn handle_line(&mut self, line: &str, now: Instant) -> Responses {
        match parse_command(line) {
            Ok(cmd) => self.handle_command(cmd, now),
            Err(e) => {
                let mut responses = Responses::new();
                push(&mut responses, Response::CommandError { reason: e.reason() });
                responses
            }
        }
    }

    pub fn handle_command(&mut self, cmd: Command, now: Instant) -> Responses {
        let mut responses = Responses::new();

        match cmd {
            Command::StartProfile { segments } => {
                if let Err(e) = self.start_segments(&segments, now, StartSource::Command, None, &mut responses) {
                    push(&mut responses, Response::ProfileError { reason: e.reason() });
                }
            }
            Command::StopProfile => {
                let was_running = self.executor.is_running();
                let outputs = self.executor.stop(now);
                self.apply(outputs, now, &mut responses);
                if !was_running {
                    push(
                        &mut responses,
                        Response::ProfileStopped {
                            reason: "not_running",
                            elapsed_ms: None,
                        },
                    );
                }
            }
            Command::StoreProfile { id, name, segments } => match self.store_profile(id, &name, &segments) {
                Ok(response) => push(&mut responses, response),
                Err(e) => push(&mut responses, Response::ProfileError { reason: e.reason() }),
            },
            Command::StartProfileById { profile_id } => {
                let result = u8::try_from(profile_id)
                    .map_err(|_| ProfilerError::integrity(format!("profile id {} out of range", profile_id)))
                    .and_then(|id| self.start_stored(id, now, StartSource::StoredProfile, &mut responses));
                if let Err(e) = result {
                    push(&mut responses, Response::ProfileError { reason: e.reason() });
                }
            }
            Command::SetDefaultProfile { button, profile_id } => {
                match self.set_default_profile(button, profile_id) {
                    Ok(response) => push(&mut responses, response),
                    Err(e) => push(&mut responses, Response::CommandError { reason: e.reason() }),
                }
            }
            Command::SetCalibrationData { points } => match self.calibration.set_bulk(points) {
                Ok(update) => {
                    self.calibration_changed();
                    push(
                        &mut responses,
                        Response::CalibrationDataSet {
                            total_points: update.total_points,
                            valid_points: update.valid_points,
                            is_calibrated: self.calibration.is_calibrated(),
                        },
                    );
                }
                Err(e) => push(&mut responses, Response::CalibrationError { reason: e.reason() }),
            },
            Command::SetCalibrationPoint { step, pressure } => {
                match self.calibration.set_point(step, pressure) {
                    Ok(()) => {
                        self.calibration_changed();
                        push(&mut responses, Response::CalibrationPointSet { step, pressure });
                    }
                    Err(e) => push(&mut responses, Response::CalibrationError { reason: e.reason() }),
                }
            }
            Command::StartCalibration => {
                info!("Calibration started, waiting for manometer readings");
                push(
                    &mut responses,
                    Response::CalibrationStarted {
                        steps: (CALIBRATION_POINTS - 1) as u8,
                    },
                );
            }
            Command::GetStatus => push(&mut responses, Response::StatusUpdate(self.status(now))),
            Command::GetProfileStatus => push(&mut responses, self.profile_status()),
            Command::GetCalibrationStatus => push(
                &mut responses,
                Response::CalibrationStatus {
                    is_calibrated: self.calibration.is_calibrated(),
                    points: self.calibration.points(),
                },
            ),
            Command::SetDimLevel { level } => match self.engine.set_level(level) {
                Ok(level) => {
                    info!("Dim level set directly to {}%", level);
                    push(
                        &mut responses,
                        Response::DimLevelSet {
                            level,
                            firing_delay_us: self.engine.state().firing_delay_us,
                        },
                    );
                }
                Err(e) => push(
                    &mut responses,
                    Response::CommandError {
                        reason: ProfilerError::from(e).reason(),
                    },
                ),
            },
            Command::ClearAllProfiles => match self.store.clear_all() {
                Ok(()) => push(&mut responses, Response::ProfilesCleared),
                Err(e) => push(&mut responses, Response::ProfileError { reason: e.reason() }),
            },
        }

        responses
    }

    /// One cooperative loop iteration. `pressed` holds the raw switch levels.
    pub fn tick(&mut self, now: Instant, pressed: [bool; 2]) -> Responses {
        let mut responses = Responses::new();

        // Same microsecond clock the zero-cross ISR stamps with.
        let now_us = now.as_micros() as u32;
        if let Err(e) = self.engine.process_zero_cross(now_us) {
            error!("Phase firing engine failed: {}", e);
            push(
                &mut responses,
                Response::ProfileError {
                    reason: ProfilerError::from(e).reason(),
                },
            );
            if self.executor.is_running() {
                let outputs = self.executor.stop(now);
                self.apply(outputs, now, &mut responses);
            }
        }

        if self.executor.is_running() {
            let outputs = self.executor.tick(now);
            self.apply(outputs, now, &mut responses);
        }

        let edges = self.interlock.sample(pressed, now);
        for switch in SwitchId::ALL {
            let Some(position) = edges[switch.index()] else {
                continue;
            };
            // Re-read per switch: a failed start leaves the executor idle.
            let Some(action) = self.interlock.action_for(switch, position, self.executor.is_running()) else {
                continue;
            };
            match action {
                InterlockAction::Start { switch, profile } => {
                    if let Err(e) = self.start_stored(profile.value(), now, StartSource::Switch, &mut responses) {
                        warn!("Switch {} could not start profile {}: {}", switch.button(), profile, e);
                        push(
                            &mut responses,
                            Response::SwitchFault {
                                button: switch.button(),
                                reason: e.reason(),
                            },
                        );
                    }
                }
                InterlockAction::Stop { .. } => {
                    let outputs = self.executor.stop(now);
                    self.apply(outputs, now, &mut responses);
                }
            }
        }

        if due(self.last_status, now, self.config.status_interval) {
            self.last_status = Some(now);
            push(&mut responses, Response::StatusUpdate(self.status(now)));
        }

        responses
    }

    pub fn status(&self, now: Instant) -> StatusReport {
        let dimmer = self.engine.state();
        StatusReport {
            is_running: self.executor.is_running(),
            current_segment: self.executor.current_segment(),
            total_segments: self.executor.total_segments(),
            elapsed_ms: self.executor.elapsed_ms(now),
            target_pressure: self.executor.last_target(),
            dim_level: dimmer.level,
            firing_delay_us: dimmer.firing_delay_us,
            zero_cross_count: self.engine.shared().zero_cross_count(),
            pulse_count: self.engine.shared().pulse_count(),
            skipped_half_cycles: self.engine.skipped_half_cycles(),
            is_calibrated: self.calibration.is_calibrated(),
            safety_locked: self.interlock.is_locked(),
            persistence_degraded: self.persistence_degraded,
            engine_fault: self.engine.is_faulted(),
            uptime: now.saturating_duration_since(self.boot_time).as_secs(),
        }
    }

    fn profile_status(&self) -> Response {
        Response::ProfileStatus {
            profile_count: self.store.profile_count(),
            default_profile1: self.settings.default_profiles[0],
            default_profile2: self.settings.default_profiles[1],
            profiles: self.store.summaries(),
            corrupt_profiles: self.store.corrupt_ids(),
        }
    }

    fn start_segments(
        &mut self,
        segments: &[Segment],
        now: Instant,
        source: StartSource,
        stored: Option<(u8, String)>,
        responses: &mut Responses,
    ) -> Result<(), ProfilerError> {
        let outputs = self.executor.start(segments, now)?;
        self.last_pressure_update = None;
        self.apply(outputs, now, responses);

        let (profile_id, profile_name) = stored.unzip();
        push(
            responses,
            Response::ProfileStarted {
                segments: segments.len(),
                source,
                profile_id,
                profile_name,
            },
        );
        Ok(())
    }

    fn start_stored(
        &mut self,
        id: u8,
        now: Instant,
        source: StartSource,
        responses: &mut Responses,
    ) -> Result<(), ProfilerError> {
        let profile = self.store.load(id)?;
        info!("▶️ Starting stored profile {} '{}'", profile.id, profile.name);
        self.start_segments(
            &profile.segments,
            now,
            source,
            Some((profile.id.value(), profile.name)),
            responses,
        )
    }

    fn store_profile(&mut self, id: i32, name: &str, segments: &[Segment]) -> Result<Response, ProfilerError> {
        let id = u8::try_from(id)
            .map_err(|_| ProfilerError::validation(format!("profile id {} out of range 0-9", id)))?;
        let summary = self.store.store(id, name, segments)?;
        Ok(Response::ProfileStored { profile: summary })
    }

    fn set_default_profile(&mut self, button: i32, profile_id: i32) -> Result<Response, ProfilerError> {
        let switch = u8::try_from(button)
            .ok()
            .and_then(SwitchId::from_button)
            .ok_or_else(|| ProfilerError::validation(format!("button {} must be 1 or 2", button)))?;

        let profile = match u8::try_from(profile_id) {
            Ok(NO_PROFILE) => None,
            Ok(id) => Some(ProfileId::new(id).ok_or_else(|| {
                ProfilerError::validation(format!("profile id {} out of range 0-9 or 255", id))
            })?),
            Err(_) => {
                return Err(ProfilerError::validation(format!(
                    "profile id {} out of range 0-9 or 255",
                    profile_id
                )))
            }
        };

        self.interlock.assign(switch, profile);
        let wire = profile_id_to_wire(profile);
        self.settings.default_profiles[switch.index()] = wire;
        self.persist_settings();
        info!("Default profile for switch {} set to {}", switch.button(), wire);

        Ok(Response::DefaultProfileSet {
            button: switch.button(),
            profile_id: wire,
        })
    }

    fn calibration_changed(&mut self) {
        self.executor.set_calibration(self.calibration.clone());
        self.settings.calibration = self.calibration.points();
        self.persist_settings();
    }

    fn persist_settings(&mut self) {
        if let Err(e) = save_settings(self.store.backend_mut(), &self.settings) {
            error!("Failed to save settings: {}", e);
            self.persistence_degraded = true;
        }
    }

    /// Carry executor outputs over to the engine and the response stream.
    fn apply(&mut self, outputs: ExecutorOutputs, now: Instant, responses: &mut Responses) {
        let mut abort = false;

        for output in outputs {
            match output {
                ExecutorOutput::SetLevel(level) => {
                    if let Err(e) = self.engine.set_level(level as i32) {
                        warn!("Dimmer rejected level {}%: {}", level, e);
                        abort = true;
                        push(
                            responses,
                            Response::ProfileError {
                                reason: ProfilerError::from(e).reason(),
                            },
                        );
                    }
                }
                ExecutorOutput::Started { .. } => {}
                ExecutorOutput::PressureUpdate {
                    target_pressure,
                    level,
                    elapsed_s,
                    segment,
                } => {
                    if due(self.last_pressure_update, now, self.config.pressure_update_interval) {
                        self.last_pressure_update = Some(now);
                        push(
                            responses,
                            Response::PressureUpdate {
                                target_pressure,
                                level,
                                current_time: elapsed_s,
                                segment,
                            },
                        );
                    }
                }
                ExecutorOutput::Stopped { elapsed_ms, reason } => push(
                    responses,
                    Response::ProfileStopped {
                        reason: reason.as_str(),
                        elapsed_ms: Some(elapsed_ms),
                    },
                ),
                ExecutorOutput::ArithmeticFault { segment } => {
                    warn!("Arithmetic fault in segment {}", segment);
                    push(
                        responses,
                        Response::ProfileError {
                            reason: ProfilerError::Arithmetic.reason(),
                        },
                    );
                }
            }
        }

        // Never keep running a profile the dimmer cannot follow.
        if abort && self.executor.is_running() {
            let outputs = self.executor.stop(now);
            self.apply(outputs, now, responses);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimmer::tests::{MockAlarm, MockGate};
    use crate::dimmer::{DimmerMode, DimmerShared};
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    type TestController = ProfilerController<MockGate, MockAlarm, MemoryStore>;

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    fn build(backend: MemoryStore, alarm: MockAlarm) -> TestController {
        let config = FirmwareConfig::default();
        let timing = config.dimmer_timing();
        let shared = Arc::new(DimmerShared::new(&timing));
        let engine = PhaseFiringEngine::new(shared, Arc::new(MockGate::default()), alarm, timing);
        ProfilerController::new(config, engine, backend, at(0))
    }

    fn controller() -> TestController {
        build(MemoryStore::new(), MockAlarm::default())
    }

    fn line(controller: &mut TestController, json: &str, now: u64) -> Responses {
        controller.handle_line(json, at(now))
    }

    const CLASSIC: &str = r#"[{"st":0,"et":10,"sp":0,"ep":9},{"st":10,"et":30,"sp":9,"ep":9}]"#;

    fn store_classic(controller: &mut TestController, id: u8) {
        let json = format!(r#"{{"command":"store_profile","id":{},"name":"Classic","segments":{}}}"#, id, CLASSIC);
        let responses = line(controller, &json, 0);
        assert!(matches!(responses[0], Response::ProfileStored { .. }), "{:?}", responses);
    }

    #[test]
    fn test_publish_queues_without_blocking() {
        let channel = ResponseChannel::new();
        let mut controller = controller();

        assert_eq!(publish(controller.tick(at(0), [false, false]), &channel), 0);
        assert!(matches!(channel.try_receive(), Ok(Response::StatusUpdate(_))));
        assert!(channel.try_receive().is_err());

        // A full queue drops the overflow instead of waiting for the reader.
        let mut burst = Responses::new();
        for _ in 0..MAX_RESPONSES {
            push(&mut burst, Response::CommandError { reason: "busy".to_string() });
        }
        assert_eq!(publish(burst.clone(), &channel), 0);
        assert_eq!(publish(burst.clone(), &channel), 0);
        assert_eq!(channel.len(), RESPONSE_QUEUE_LEN);
        assert_eq!(publish(burst, &channel), MAX_RESPONSES);
        assert_eq!(channel.len(), RESPONSE_QUEUE_LEN);
    }

    #[test]
    fn test_store_rejects_id_eleven() {
        let mut controller = controller();
        store_classic(&mut controller, 0);

        let json = format!(r#"{{"command":"store_profile","id":11,"name":"X","segments":{}}}"#, CLASSIC);
        let responses = line(&mut controller, &json, 0);
        match &responses[0] {
            Response::ProfileError { reason } => assert!(reason.starts_with("validation_error")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(controller.store().profile_count(), 1);
    }

    #[test]
    fn test_stored_profile_runs_to_completion() {
        let mut controller = controller();
        store_classic(&mut controller, 2);

        let responses = line(&mut controller, r#"{"command":"start_profile_by_id","pid":2}"#, 1_000);
        assert!(responses.iter().any(|r| matches!(
            r,
            Response::ProfileStarted { segments: 2, source: StartSource::StoredProfile, profile_id: Some(2), .. }
        )));
        assert!(controller.is_running());

        controller.tick(at(6_000), [false, false]);
        assert_eq!(controller.engine().state().level, 37);
        assert_eq!(controller.engine().state().mode, DimmerMode::On);

        // One tick leaves each finished segment, a third finds the list exhausted.
        controller.tick(at(32_000), [false, false]);
        controller.tick(at(32_002), [false, false]);
        assert!(controller.is_running());
        let responses = controller.tick(at(32_004), [false, false]);
        assert!(!controller.is_running());
        assert_eq!(controller.engine().state().level, 0);
        assert_eq!(controller.engine().state().mode, DimmerMode::Off);
        assert!(responses
            .iter()
            .any(|r| matches!(r, Response::ProfileStopped { reason: "completed", .. })));
    }

    #[test]
    fn test_stop_command_cuts_output() {
        let mut controller = controller();
        line(&mut controller, &format!(r#"{{"command":"start_profile","seg":{}}}"#, CLASSIC), 0);
        controller.tick(at(5_000), [false, false]);
        assert!(controller.engine().state().level > 0);

        let responses = line(&mut controller, r#"{"command":"stop_profile"}"#, 5_010);
        assert_eq!(controller.engine().state().level, 0);
        assert!(responses
            .iter()
            .any(|r| matches!(r, Response::ProfileStopped { reason: "requested", elapsed_ms: Some(5_010) })));

        // Stopping again is harmless.
        let responses = line(&mut controller, r#"{"command":"stop_profile"}"#, 5_020);
        assert!(matches!(responses[0], Response::ProfileStopped { reason: "not_running", .. }));
    }

    #[test]
    fn test_empty_adhoc_profile_is_rejected() {
        let mut controller = controller();
        let responses = line(&mut controller, r#"{"command":"start_profile","segments":[]}"#, 0);
        assert!(matches!(responses[0], Response::ProfileError { .. }));
        assert!(!controller.is_running());
    }

    #[test]
    fn test_dim_level_override_arms_and_cancels_alarm() {
        let alarm = MockAlarm::default();
        let mut controller = build(MemoryStore::new(), alarm.clone());

        let responses = line(&mut controller, r#"{"command":"set_dim_level","level":50}"#, 0);
        assert!(matches!(responses[0], Response::DimLevelSet { level: 50, .. }));

        let shared = Arc::clone(controller.engine().shared());
        shared.on_zero_cross(1_000_000);
        controller.tick(Instant::from_micros(1_000_200), [false, false]);
        let delay = controller.engine().state().firing_delay_us;
        assert_eq!(alarm.log.lock().unwrap().armed, vec![delay - 200]);

        line(&mut controller, r#"{"command":"set_dim_level","lvl":0}"#, 1_001);
        assert!(alarm.log.lock().unwrap().pending.is_none());

        shared.on_zero_cross(1_010_000);
        controller.tick(Instant::from_micros(1_010_100), [false, false]);
        assert_eq!(alarm.log.lock().unwrap().armed.len(), 1);
    }

    #[test]
    fn test_engine_fault_stops_profile() {
        let alarm = MockAlarm {
            fail_arm: true,
            ..MockAlarm::default()
        };
        let mut controller = build(MemoryStore::new(), alarm);
        line(&mut controller, &format!(r#"{{"command":"start_profile","seg":{}}}"#, CLASSIC), 0);
        controller.tick(at(5_000), [false, false]);

        let shared = Arc::clone(controller.engine().shared());
        shared.on_zero_cross(5_010_000);
        let responses = controller.tick(Instant::from_micros(5_010_100), [false, false]);

        assert!(controller.engine().is_faulted());
        assert!(!controller.is_running());
        assert!(responses.iter().any(|r| matches!(r, Response::ProfileError { .. })));
        assert!(controller.status(at(5_011)).engine_fault);
    }

    #[test]
    fn test_switch_starts_default_profile() {
        let mut controller = controller();
        store_classic(&mut controller, 4);
        let responses = line(&mut controller, r#"{"command":"set_default_profile","button":1,"profileId":4}"#, 0);
        assert!(matches!(responses[0], Response::DefaultProfileSet { button: 1, profile_id: 4 }));

        controller.tick(at(10), [false, false]);
        let mut started = false;
        for t in (20..=120).step_by(10) {
            let responses = controller.tick(at(t), [true, false]);
            started |= responses
                .iter()
                .any(|r| matches!(r, Response::ProfileStarted { source: StartSource::Switch, profile_id: Some(4), .. }));
        }
        assert!(started);
        assert!(controller.is_running());

        // Flipping it back off aborts.
        for t in (130..=230).step_by(10) {
            controller.tick(at(t), [false, false]);
        }
        assert!(!controller.is_running());
        assert_eq!(controller.engine().state().level, 0);
    }

    #[test]
    fn test_switch_with_missing_profile_reports_fault() {
        let mut controller = controller();
        line(&mut controller, r#"{"command":"set_default_profile","btn":2,"pid":6}"#, 0);

        controller.tick(at(10), [false, false]);
        let mut fault = false;
        for t in (20..=120).step_by(10) {
            let responses = controller.tick(at(t), [false, true]);
            fault |= responses
                .iter()
                .any(|r| matches!(r, Response::SwitchFault { button: 2, .. }));
        }
        assert!(fault);
        assert!(!controller.is_running());
    }

    #[test]
    fn test_failed_switch_start_does_not_abort_other_switch() {
        let mut controller = controller();
        store_classic(&mut controller, 4);
        line(&mut controller, r#"{"command":"set_default_profile","button":1,"profileId":6}"#, 0);
        line(&mut controller, r#"{"command":"set_default_profile","button":2,"profileId":4}"#, 0);

        controller.tick(at(10), [false, false]);
        let mut all = Vec::new();
        for t in (20..=120).step_by(10) {
            all.extend(controller.tick(at(t), [true, true]));
        }

        assert!(all.iter().any(|r| matches!(r, Response::SwitchFault { button: 1, .. })));
        assert!(all
            .iter()
            .any(|r| matches!(r, Response::ProfileStarted { source: StartSource::Switch, profile_id: Some(4), .. })));
        assert!(!all.iter().any(|r| matches!(r, Response::ProfileStopped { .. })));
        assert!(controller.is_running());
    }

    #[test]
    fn test_switch_on_at_boot_does_not_start() {
        let mut controller = controller();
        store_classic(&mut controller, 1);
        line(&mut controller, r#"{"command":"set_default_profile","button":1,"profile_id":1}"#, 0);

        for t in (0..=2_000).step_by(10) {
            controller.tick(at(t), [true, false]);
        }
        assert!(!controller.is_running());
        assert!(controller.status(at(2_000)).safety_locked);
    }

    #[test]
    fn test_set_default_profile_validation() {
        let mut controller = controller();
        let responses = line(&mut controller, r#"{"command":"set_default_profile","button":3,"profileId":1}"#, 0);
        assert!(matches!(responses[0], Response::CommandError { .. }));
        let responses = line(&mut controller, r#"{"command":"set_default_profile","button":1,"profileId":12}"#, 0);
        assert!(matches!(responses[0], Response::CommandError { .. }));
        let responses = line(&mut controller, r#"{"command":"set_default_profile","button":1,"profileId":255}"#, 0);
        assert!(matches!(responses[0], Response::DefaultProfileSet { button: 1, profile_id: 255 }));
    }

    #[test]
    fn test_settings_survive_restart() {
        let mut controller = controller();
        line(
            &mut controller,
            r#"{"command":"set_calibration_data","calibration":{"0":0,"50":6.0,"100":11.5}}"#,
            0,
        );
        line(&mut controller, r#"{"command":"set_default_profile","button":2,"profileId":3}"#, 0);
        store_classic(&mut controller, 3);

        let backend = controller.store().backend().clone();
        let restarted = build(backend, MockAlarm::default());
        assert!(restarted.calibration().is_calibrated());
        assert_eq!(restarted.calibration().level_for_pressure(6.1), 50);
        assert_eq!(restarted.store().profile_count(), 1);
        match restarted.profile_status() {
            Response::ProfileStatus { default_profile2, .. } => assert_eq!(default_profile2, 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_calibration_commands() {
        let mut controller = controller();
        let responses = line(&mut controller, r#"{"command":"set_calibration_data","cal":{"150":3.0}}"#, 0);
        assert!(matches!(responses[0], Response::CalibrationError { .. }));

        let responses = line(&mut controller, r#"{"command":"set_calibration_point","step":11,"pressure":3.0}"#, 0);
        assert!(matches!(responses[0], Response::CalibrationError { .. }));

        let responses = line(&mut controller, r#"{"command":"set_calibration_point","step":4,"pr":4.0}"#, 0);
        assert!(matches!(responses[0], Response::CalibrationPointSet { step: 4, .. }));

        let responses = line(&mut controller, r#"{"command":"get_calibration_status"}"#, 0);
        match &responses[0] {
            Response::CalibrationStatus { is_calibrated, points } => {
                assert!(is_calibrated);
                assert_eq!(points[4], 4.0);
            }
            other => panic!("unexpected {:?}", other),
        }

        let responses = line(&mut controller, r#"{"command":"start_calibration"}"#, 0);
        assert_eq!(responses[0], Response::CalibrationStarted { steps: 10 });
    }

    #[test]
    fn test_corrupt_profile_is_refused() {
        let mut controller = controller();
        store_classic(&mut controller, 5);
        controller.store.corrupt_in_memory(5);

        let responses = line(&mut controller, r#"{"command":"start_profile_by_id","profile_id":5}"#, 0);
        match &responses[0] {
            Response::ProfileError { reason } => assert!(reason.starts_with("integrity_error")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!controller.is_running());

        match controller.profile_status() {
            Response::ProfileStatus { corrupt_profiles, profile_count, .. } => {
                assert_eq!(corrupt_profiles, vec![5]);
                assert_eq!(profile_count, 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_clear_all_profiles() {
        let mut controller = controller();
        store_classic(&mut controller, 0);
        store_classic(&mut controller, 1);
        let responses = line(&mut controller, r#"{"command":"clear_all_profiles"}"#, 0);
        assert_eq!(responses[0], Response::ProfilesCleared);
        assert_eq!(controller.store().profile_count(), 0);
    }

    #[test]
    fn test_invalid_json_is_reported() {
        let mut controller = controller();
        let responses = line(&mut controller, "{nope", 0);
        assert_eq!(
            responses[0],
            Response::CommandError {
                reason: "invalid_json".to_string()
            }
        );
    }

    #[test]
    fn test_periodic_status() {
        let mut controller = controller();
        let count = |r: &Responses| r.iter().filter(|r| matches!(r, Response::StatusUpdate(_))).count();

        assert_eq!(count(&controller.tick(at(0), [false, false])), 1);
        assert_eq!(count(&controller.tick(at(500), [false, false])), 0);
        assert_eq!(count(&controller.tick(at(1_000), [false, false])), 1);

        let status = controller.status(at(3_500));
        assert_eq!(status.uptime, 3);
        assert!(!status.is_running);
        assert!(status.persistence_degraded);
    }

    #[test]
    fn test_pressure_updates_are_throttled() {
        let mut controller = controller();
        line(&mut controller, &format!(r#"{{"command":"start_profile","seg":{}}}"#, CLASSIC), 0);
        let mut updates = 0;
        for t in (0..1_000).step_by(2) {
            updates += controller
                .tick(at(t), [false, false])
                .iter()
                .filter(|r| matches!(r, Response::PressureUpdate { .. }))
                .count();
        }
        assert_eq!(updates, 5);
    }
}
