//! Debounced two-switch start/abort interlock with a power-up safety lock.

use crate::types::{ProfileId, SwitchId};
use embassy_time::{Duration, Instant};
use log::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchPosition {
    Released,
    Pressed,
}

impl SwitchPosition {
    pub fn from_pressed(pressed: bool) -> Self {
        if pressed {
            SwitchPosition::Pressed
        } else {
            SwitchPosition::Released
        }
    }
}

/// What the controller should do after a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterlockAction {
    Start { switch: SwitchId, profile: ProfileId },
    Stop { switch: SwitchId },
}

#[derive(Debug, Clone)]
pub struct SwitchChannel {
    id: SwitchId,
    debounced: SwitchPosition,
    last_raw: SwitchPosition,
    last_change: Instant,
    armed: bool,
    seen_released: bool,
}

impl SwitchChannel {
    fn new(id: SwitchId) -> Self {
        Self {
            id,
            debounced: SwitchPosition::Released,
            last_raw: SwitchPosition::Released,
            last_change: Instant::from_ticks(0),
            armed: false,
            seen_released: false,
        }
    }

    fn init(&mut self, raw: SwitchPosition, now: Instant) {
        self.debounced = raw;
        self.last_raw = raw;
        self.last_change = now;
        self.seen_released = raw == SwitchPosition::Released;
    }

    /// Feed one raw sample. Returns the new debounced position once it has
    /// been stable for `debounce`.
    fn sample(&mut self, raw: SwitchPosition, now: Instant, debounce: Duration) -> Option<SwitchPosition> {
        if raw != self.last_raw {
            self.last_raw = raw;
            self.last_change = now;
            return None;
        }
        if raw == self.debounced || now.saturating_duration_since(self.last_change) < debounce {
            return None;
        }
        self.debounced = raw;
        if raw == SwitchPosition::Released {
            self.seen_released = true;
        }
        Some(raw)
    }

    pub fn id(&self) -> SwitchId {
        self.id
    }

    pub fn position(&self) -> SwitchPosition {
        self.debounced
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

pub struct SwitchInterlock {
    channels: [SwitchChannel; 2],
    assignments: [Option<ProfileId>; 2],
    debounce: Duration,
    initialized: bool,
}

impl SwitchInterlock {
    pub fn new(debounce: Duration) -> Self {
        Self {
            channels: SwitchId::ALL.map(SwitchChannel::new),
            assignments: [None; 2],
            debounce,
            initialized: false,
        }
    }

    pub fn assign(&mut self, switch: SwitchId, profile: Option<ProfileId>) {
        self.assignments[switch.index()] = profile;
    }

    pub fn assignment(&self, switch: SwitchId) -> Option<ProfileId> {
        self.assignments[switch.index()]
    }

    pub fn channels(&self) -> &[SwitchChannel; 2] {
        &self.channels
    }

    /// True while the power-up safety lock holds.
    pub fn is_locked(&self) -> bool {
        self.channels.iter().any(|c| !c.armed)
    }

    fn boot(&mut self, raw: [SwitchPosition; 2], now: Instant) {
        for (channel, position) in self.channels.iter_mut().zip(raw) {
            channel.init(position, now);
        }
        let armed = self.channels.iter().all(|c| c.seen_released);
        for channel in self.channels.iter_mut() {
            channel.armed = armed;
        }
        if !armed {
            warn!("⚠️ Switch pressed at power-up, switch control locked until both are released");
        }
        self.initialized = true;
    }

    fn try_unlock(&mut self) {
        if self.channels.iter().all(|c| c.seen_released) {
            for channel in self.channels.iter_mut() {
                channel.armed = true;
            }
            info!("🔓 Both switches released, switch control unlocked");
        }
    }

    /// Sample both channels once. `pressed` holds the raw level of each switch.
    /// Returns the debounced transitions of armed channels, indexed like
    /// [`SwitchId::index`]. Transitions seen while locked only release the lock.
    pub fn sample(&mut self, pressed: [bool; 2], now: Instant) -> [Option<SwitchPosition>; 2] {
        let raw = pressed.map(SwitchPosition::from_pressed);
        let mut edges = [None; 2];

        if !self.initialized {
            self.boot(raw, now);
            return edges;
        }

        for (i, edge) in edges.iter_mut().enumerate() {
            let channel = &mut self.channels[i];
            let Some(position) = channel.sample(raw[i], now, self.debounce) else {
                continue;
            };
            if !channel.armed {
                if position == SwitchPosition::Released {
                    self.try_unlock();
                }
                continue;
            }
            *edge = Some(position);
        }
        edges
    }

    /// Decide what a debounced transition means. `running` must reflect the
    /// executor as it is now, after any action taken for the other switch.
    pub fn action_for(&self, switch: SwitchId, position: SwitchPosition, running: bool) -> Option<InterlockAction> {
        match position {
            SwitchPosition::Pressed if running => {
                warn!("Switch {} pressed during a brew, aborting", switch.button());
                Some(InterlockAction::Stop { switch })
            }
            SwitchPosition::Pressed => match self.assignments[switch.index()] {
                Some(profile) => {
                    info!("Switch {} pressed, starting default profile {}", switch.button(), profile);
                    Some(InterlockAction::Start { switch, profile })
                }
                None => {
                    info!("No default profile set for switch {}", switch.button());
                    None
                }
            },
            SwitchPosition::Released if running => {
                info!("Switch {} released, stopping brew", switch.button());
                Some(InterlockAction::Stop { switch })
            }
            SwitchPosition::Released => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEBOUNCE: Duration = Duration::from_millis(50);

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    /// One poll as the controller runs it: every action succeeds, so a start
    /// leaves the executor running and a stop leaves it idle.
    fn poll(interlock: &mut SwitchInterlock, pressed: [bool; 2], running: &mut bool, now: Instant) -> Vec<InterlockAction> {
        let edges = interlock.sample(pressed, now);
        let mut actions = Vec::new();
        for switch in SwitchId::ALL {
            let Some(position) = edges[switch.index()] else {
                continue;
            };
            if let Some(action) = interlock.action_for(switch, position, *running) {
                *running = matches!(action, InterlockAction::Start { .. });
                actions.push(action);
            }
        }
        actions
    }

    fn armed_interlock() -> SwitchInterlock {
        let mut interlock = SwitchInterlock::new(DEBOUNCE);
        interlock.assign(SwitchId::One, ProfileId::new(3));
        interlock.assign(SwitchId::Two, ProfileId::new(7));
        assert_eq!(interlock.sample([false, false], at(0)), [None, None]);
        assert!(!interlock.is_locked());
        interlock
    }

    /// Hold `pressed` from `from` until `to`, polling every 10 ms.
    fn hold(
        interlock: &mut SwitchInterlock,
        pressed: [bool; 2],
        running: bool,
        from: u64,
        to: u64,
    ) -> Vec<InterlockAction> {
        let mut running = running;
        let mut all = Vec::new();
        let mut t = from;
        while t <= to {
            all.extend(poll(interlock, pressed, &mut running, at(t)));
            t += 10;
        }
        all
    }

    #[test]
    fn test_short_press_is_ignored() {
        let mut interlock = armed_interlock();
        let mut actions = hold(&mut interlock, [true, false], false, 100, 130);
        actions.extend(hold(&mut interlock, [false, false], false, 140, 300));
        assert!(actions.is_empty());
    }

    #[test]
    fn test_press_starts_assigned_profile_when_idle() {
        let mut interlock = armed_interlock();
        let actions = hold(&mut interlock, [false, true], false, 100, 200);
        assert_eq!(
            actions,
            vec![InterlockAction::Start {
                switch: SwitchId::Two,
                profile: ProfileId::new(7).unwrap(),
            }]
        );
    }

    #[test]
    fn test_press_without_assignment_does_nothing() {
        let mut interlock = armed_interlock();
        interlock.assign(SwitchId::One, None);
        assert!(hold(&mut interlock, [true, false], false, 100, 200).is_empty());
    }

    #[test]
    fn test_any_press_while_running_stops() {
        let mut interlock = armed_interlock();
        let actions = hold(&mut interlock, [true, false], true, 100, 200);
        assert_eq!(actions, vec![InterlockAction::Stop { switch: SwitchId::One }]);
    }

    #[test]
    fn test_release_while_running_stops() {
        let mut interlock = armed_interlock();
        hold(&mut interlock, [true, false], false, 100, 200);
        let actions = hold(&mut interlock, [false, false], true, 210, 300);
        assert_eq!(actions, vec![InterlockAction::Stop { switch: SwitchId::One }]);
    }

    #[test]
    fn test_release_while_idle_does_nothing() {
        let mut interlock = armed_interlock();
        hold(&mut interlock, [true, false], false, 100, 200);
        assert!(hold(&mut interlock, [false, false], false, 210, 300).is_empty());
    }

    #[test]
    fn test_switch_on_at_boot_locks_until_released() {
        let mut interlock = SwitchInterlock::new(DEBOUNCE);
        interlock.assign(SwitchId::One, ProfileId::new(1));
        interlock.sample([true, false], at(0));
        assert!(interlock.is_locked());

        // Held on for a long time: never starts.
        assert!(hold(&mut interlock, [true, false], false, 10, 2_000).is_empty());
        assert!(interlock.is_locked());

        // Released: unlocks, without any action.
        assert!(hold(&mut interlock, [false, false], false, 2_010, 2_200).is_empty());
        assert!(!interlock.is_locked());

        // Now a fresh press starts the profile.
        let actions = hold(&mut interlock, [true, false], false, 2_210, 2_400);
        assert_eq!(
            actions,
            vec![InterlockAction::Start {
                switch: SwitchId::One,
                profile: ProfileId::new(1).unwrap(),
            }]
        );
    }

    #[test]
    fn test_lock_needs_both_switches_released() {
        let mut interlock = SwitchInterlock::new(DEBOUNCE);
        interlock.assign(SwitchId::Two, ProfileId::new(2));
        interlock.sample([true, true], at(0));

        hold(&mut interlock, [false, true], false, 10, 200);
        assert!(interlock.is_locked());

        // Switch two toggling while locked is not a start.
        assert!(hold(&mut interlock, [false, false], false, 210, 400).is_empty());
        assert!(!interlock.is_locked());
        assert!(interlock.channels().iter().all(SwitchChannel::is_armed));
    }

    #[test]
    fn test_start_then_other_switch_in_same_poll_stops() {
        let mut interlock = armed_interlock();
        // Both switches flip on together: the first starts, the second aborts it.
        let actions = hold(&mut interlock, [true, true], false, 100, 200);
        assert_eq!(actions.len(), 2);
        assert!(matches!(actions[0], InterlockAction::Start { switch: SwitchId::One, .. }));
        assert_eq!(actions[1], InterlockAction::Stop { switch: SwitchId::Two });
    }

    #[test]
    fn test_failed_start_leaves_other_switch_starting() {
        let mut interlock = armed_interlock();
        // Both switches settle pressed in the same sample.
        hold(&mut interlock, [true, true], false, 100, 130);
        let edges = interlock.sample([true, true], at(150));
        assert_eq!(edges, [Some(SwitchPosition::Pressed), Some(SwitchPosition::Pressed)]);

        // Switch one's start did not take, so switch two sees an idle executor.
        let first = interlock.action_for(SwitchId::One, SwitchPosition::Pressed, false);
        assert!(matches!(first, Some(InterlockAction::Start { switch: SwitchId::One, .. })));
        let second = interlock.action_for(SwitchId::Two, SwitchPosition::Pressed, false);
        assert_eq!(
            second,
            Some(InterlockAction::Start {
                switch: SwitchId::Two,
                profile: ProfileId::new(7).unwrap(),
            })
        );
    }
}
