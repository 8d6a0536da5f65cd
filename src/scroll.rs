use log::{debug, info};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

use crate::actions::ScrollSurface;
use crate::gestures::{GestureLabel, GestureSignal};

pub const SPEED_MIN: f32 = 0.1;
pub const SPEED_MAX: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Neutral,
    Down,
}

impl Direction {
    pub fn sign(self) -> f32 {
        match self {
            Direction::Up => -1.0,
            Direction::Neutral => 0.0,
            Direction::Down => 1.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Neutral => "neutral",
            Direction::Down => "down",
        }
    }
}

impl From<GestureSignal> for Direction {
    fn from(signal: GestureSignal) -> Self {
        match signal {
            GestureSignal::Hand(GestureLabel::Open) => Direction::Down,
            GestureSignal::Hand(GestureLabel::Closed) => Direction::Up,
            GestureSignal::Hand(GestureLabel::Unknown) | GestureSignal::Neutral => {
                Direction::Neutral
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollState {
    pub direction: Direction,
    pub speed: f32,
    pub autoplaying: bool,
}

impl Default for ScrollState {
    fn default() -> Self {
        Self {
            direction: Direction::Neutral,
            speed: 1.0,
            autoplaying: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    ScrollingUp,
    ScrollingDown,
    Autoplaying,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Idle => "idle",
            Mode::ScrollingUp => "scrolling-up",
            Mode::ScrollingDown => "scrolling-down",
            Mode::Autoplaying => "autoplaying",
        }
    }
}

impl ScrollState {
    pub fn mode(&self) -> Mode {
        if self.autoplaying {
            return Mode::Autoplaying;
        }
        match self.direction {
            Direction::Up => Mode::ScrollingUp,
            Direction::Down => Mode::ScrollingDown,
            Direction::Neutral => Mode::Idle,
        }
    }

    pub fn tick_delta(&self, gesture_gain: f32) -> Option<f32> {
        if self.autoplaying {
            Some(self.speed)
        } else if self.direction != Direction::Neutral {
            Some(self.direction.sign() * self.speed * gesture_gain)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionToken(u64);

#[derive(Debug, Clone, Copy)]
pub struct GestureEvent {
    pub session: SessionToken,
    pub signal: GestureSignal,
}

#[derive(Debug, Error, PartialEq)]
pub enum ControlError {
    #[error("speed multiplier {0} outside [0.1, 5.0]")]
    SpeedOutOfRange(f32),
}

#[derive(Debug)]
struct Inner {
    state: ScrollState,
    gesture_gain: f32,
    live_session: Option<SessionToken>,
    next_session: u64,
}

#[derive(Debug, Clone)]
pub struct ScrollController {
    inner: Arc<Mutex<Inner>>,
}

impl Default for ScrollController {
    fn default() -> Self {
        Self::new(1.0, 5.0)
    }
}

impl ScrollController {
    pub fn new(speed: f32, gesture_gain: f32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: ScrollState {
                    speed: speed.clamp(SPEED_MIN, SPEED_MAX),
                    ..ScrollState::default()
                },
                gesture_gain,
                live_session: None,
                next_session: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> ScrollState {
        self.lock().state
    }

    pub fn on_tick<S: ScrollSurface + ?Sized>(&self, surface: &mut S) -> Option<f32> {
        let delta = {
            let inner = self.lock();
            inner.state.tick_delta(inner.gesture_gain)
        }?;
        debug!("tick: offset {delta:+.2}");
        surface.apply_offset(delta);
        Some(delta)
    }

    pub fn on_gesture_event(&self, signal: GestureSignal) {
        let direction = Direction::from(signal);
        let mut inner = self.lock();
        if inner.state.direction != direction {
            debug!("direction {:?} -> {:?}", inner.state.direction, direction);
        }
        inner.state.direction = direction;
    }

    /// Applies an event from the detection pipeline if its session is still
    /// live. Returns whether the state was touched.
    pub fn deliver(&self, event: GestureEvent) -> bool {
        let mut inner = self.lock();
        if inner.live_session != Some(event.session) {
            debug!("dropping {} from ended session", event.signal.as_str());
            return false;
        }
        inner.state.direction = Direction::from(event.signal);
        true
    }

    pub fn set_autoplaying(&self, on: bool) {
        let mut inner = self.lock();
        if inner.state.autoplaying != on {
            info!("autoplay {}", if on { "on" } else { "off" });
        }
        inner.state.autoplaying = on;
    }

    pub fn toggle_autoplaying(&self) -> bool {
        let mut inner = self.lock();
        let on = !inner.state.autoplaying;
        info!("autoplay {}", if on { "on" } else { "off" });
        inner.state.autoplaying = on;
        on
    }

    pub fn set_speed_multiplier(&self, speed: f32) -> Result<(), ControlError> {
        if !(SPEED_MIN..=SPEED_MAX).contains(&speed) {
            return Err(ControlError::SpeedOutOfRange(speed));
        }
        self.lock().state.speed = speed;
        Ok(())
    }

    pub fn set_gesture_gain(&self, gain: f32) {
        self.lock().gesture_gain = gain;
    }

    pub(crate) fn begin_session(&self) -> SessionToken {
        let mut inner = self.lock();
        inner.next_session += 1;
        let token = SessionToken(inner.next_session);
        inner.live_session = Some(token);
        inner.state.direction = Direction::Neutral;
        token
    }

    /// Once this returns, events carrying `token` are refused.
    pub(crate) fn end_session(&self, token: SessionToken) {
        let mut inner = self.lock();
        if inner.live_session == Some(token) {
            inner.live_session = None;
            inner.state.direction = Direction::Neutral;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Default)]
    struct Recorder(Vec<f32>);

    impl ScrollSurface for Recorder {
        fn apply_offset(&mut self, delta_y: f32) {
            self.0.push(delta_y);
        }
    }

    const OPEN: GestureSignal = GestureSignal::Hand(GestureLabel::Open);
    const CLOSED: GestureSignal = GestureSignal::Hand(GestureLabel::Closed);

    #[test]
    fn starts_idle_and_emits_nothing() {
        let c = ScrollController::default();
        let mut s = Recorder::default();
        assert_eq!(c.snapshot().mode(), Mode::Idle);
        assert_eq!(c.on_tick(&mut s), None);
        assert!(s.0.is_empty());
    }

    #[test]
    fn open_scrolls_down_five_units() {
        let c = ScrollController::default();
        let mut s = Recorder::default();
        c.on_gesture_event(OPEN);
        assert_eq!(c.on_tick(&mut s), Some(5.0));
        assert_eq!(s.0, vec![5.0]);
        assert_eq!(c.snapshot().mode(), Mode::ScrollingDown);
    }

    #[test]
    fn closed_scrolls_up_five_units() {
        let c = ScrollController::default();
        let mut s = Recorder::default();
        c.on_gesture_event(CLOSED);
        assert_eq!(c.on_tick(&mut s), Some(-5.0));
        assert_eq!(c.snapshot().mode(), Mode::ScrollingUp);
    }

    #[test]
    fn unknown_and_neutral_stop_scrolling() {
        let c = ScrollController::default();
        let mut s = Recorder::default();
        c.on_gesture_event(OPEN);
        c.on_gesture_event(GestureSignal::Hand(GestureLabel::Unknown));
        assert_eq!(c.on_tick(&mut s), None);
        c.on_gesture_event(CLOSED);
        c.on_gesture_event(GestureSignal::Neutral);
        assert_eq!(c.on_tick(&mut s), None);
    }

    #[test]
    fn gesture_delta_scales_with_speed() {
        let c = ScrollController::default();
        let mut s = Recorder::default();
        c.set_speed_multiplier(2.0).unwrap();
        c.on_gesture_event(CLOSED);
        assert_eq!(c.on_tick(&mut s), Some(-10.0));
    }

    #[test]
    fn autoplay_ignores_held_gesture() {
        let c = ScrollController::default();
        let mut s = Recorder::default();
        c.set_speed_multiplier(1.5).unwrap();
        c.on_gesture_event(CLOSED);
        c.set_autoplaying(true);
        assert_eq!(c.snapshot().mode(), Mode::Autoplaying);
        assert_eq!(c.on_tick(&mut s), Some(1.5));
        c.on_gesture_event(OPEN);
        assert_eq!(c.on_tick(&mut s), Some(1.5));
        c.set_autoplaying(false);
        assert_eq!(c.on_tick(&mut s), Some(7.5));
    }

    #[test]
    fn tick_does_not_change_state() {
        let c = ScrollController::default();
        let mut s = Recorder::default();
        c.on_gesture_event(OPEN);
        let before = c.snapshot();
        c.on_tick(&mut s);
        c.on_tick(&mut s);
        assert_eq!(c.snapshot(), before);
    }

    #[test]
    fn speed_outside_range_is_rejected() {
        let c = ScrollController::default();
        assert_eq!(
            c.set_speed_multiplier(0.0),
            Err(ControlError::SpeedOutOfRange(0.0))
        );
        assert!(c.set_speed_multiplier(5.5).is_err());
        assert!(c.set_speed_multiplier(SPEED_MIN).is_ok());
        assert!(c.set_speed_multiplier(SPEED_MAX).is_ok());
        assert_eq!(c.snapshot().speed, SPEED_MAX);
    }

    #[test]
    fn events_from_ended_session_are_refused() {
        let c = ScrollController::default();
        let token = c.begin_session();
        assert!(c.deliver(GestureEvent {
            session: token,
            signal: OPEN
        }));
        assert_eq!(c.snapshot().direction, Direction::Down);

        c.end_session(token);
        assert_eq!(c.snapshot().direction, Direction::Neutral);
        assert!(!c.deliver(GestureEvent {
            session: token,
            signal: CLOSED
        }));
        assert_eq!(c.snapshot().direction, Direction::Neutral);
    }

    #[test]
    fn new_session_does_not_accept_old_tokens() {
        let c = ScrollController::default();
        let first = c.begin_session();
        c.end_session(first);
        let second = c.begin_session();
        assert_ne!(first, second);
        assert!(!c.deliver(GestureEvent {
            session: first,
            signal: OPEN
        }));
        // ending a stale token leaves the live one alone
        c.end_session(first);
        assert!(c.deliver(GestureEvent {
            session: second,
            signal: OPEN
        }));
    }

    #[test]
    fn concurrent_toggles_are_not_lost() {
        let c = ScrollController::default();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = c.clone();
                thread::spawn(move || {
                    for _ in 0..251 {
                        c.toggle_autoplaying();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        // 1004 flips in total
        assert!(!c.snapshot().autoplaying);
        assert!(c.toggle_autoplaying());
    }

    #[test]
    fn concurrent_writers_leave_a_whole_state() {
        let c = ScrollController::default();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let c = c.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        c.on_gesture_event(if i % 2 == 0 { OPEN } else { CLOSED });
                    }
                })
            })
            .collect();
        let mut s = Recorder::default();
        for _ in 0..200 {
            c.on_tick(&mut s);
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(s.0.iter().all(|d| *d == 5.0 || *d == -5.0), "{:?}", s.0);
        assert_ne!(c.snapshot().direction, Direction::Neutral);
    }
}
