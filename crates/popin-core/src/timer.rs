//! One-shot countdown timers
//!
//! Timers hold a deadline against the node's clock and are polled at the top
//! of each scheduler tick. An expired timer raises its signal exactly once
//! and disarms itself. Periodic work is driven by the scheduler's tick
//! counter instead.

use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::event::{EventRegister, Signal};
use crate::types::Timestamp;

/// Whether a timer is counting down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerStatus {
    Armed,
    Idle,
}

/// Deadline-based one-shot timer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OneShotTimer {
    deadline: Option<Timestamp>,
}

impl OneShotTimer {
    pub const fn new() -> Self {
        Self { deadline: None }
    }

    /// Arm (or re-arm) the timer to expire `duration` after `now`
    pub fn start(&mut self, duration: Duration, now: Timestamp) {
        self.deadline = Some(now + duration);
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn status(&self) -> TimerStatus {
        if self.deadline.is_some() {
            TimerStatus::Armed
        } else {
            TimerStatus::Idle
        }
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Timestamp> {
        self.deadline
    }

    /// Returns `true` exactly once, on the first poll at or after the deadline
    pub fn poll(&mut self, now: Timestamp) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Timers owned by a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    /// Guards connect and registration responses
    Retry,
    /// Closes the scan window
    BoothSelection,
}

impl TimerKind {
    /// Signal raised when this timer expires
    pub fn signal(self) -> Signal {
        match self {
            TimerKind::Retry => Signal::RetryTimeout,
            TimerKind::BoothSelection => Signal::SelectionTimeout,
        }
    }
}

/// The two independent timers of a node
#[derive(Debug, Clone, Default)]
pub struct TimerBank {
    retry: OneShotTimer,
    selection: OneShotTimer,
}

impl TimerBank {
    pub fn new() -> Self {
        Self::default()
    }

    fn timer_mut(&mut self, kind: TimerKind) -> &mut OneShotTimer {
        match kind {
            TimerKind::Retry => &mut self.retry,
            TimerKind::BoothSelection => &mut self.selection,
        }
    }

    pub fn start(&mut self, kind: TimerKind, duration: Duration, now: Timestamp) {
        self.timer_mut(kind).start(duration, now);
    }

    pub fn stop(&mut self, kind: TimerKind) {
        self.timer_mut(kind).stop();
    }

    pub fn stop_all(&mut self) {
        self.retry.stop();
        self.selection.stop();
    }

    pub fn status(&self, kind: TimerKind) -> TimerStatus {
        match kind {
            TimerKind::Retry => self.retry.status(),
            TimerKind::BoothSelection => self.selection.status(),
        }
    }

    /// Raise the signal of every timer that expired by `now`
    pub fn poll(&mut self, now: Timestamp, events: &EventRegister) {
        for kind in [TimerKind::Retry, TimerKind::BoothSelection] {
            if self.timer_mut(kind).poll(now) {
                events.raise(kind.signal());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_fires_once() {
        let mut timer = OneShotTimer::new();
        assert_eq!(timer.status(), TimerStatus::Idle);

        timer.start(Duration::from_millis(100), Timestamp::new(0));
        assert_eq!(timer.status(), TimerStatus::Armed);
        assert!(!timer.poll(Timestamp::new(99)));
        assert!(timer.poll(Timestamp::new(100)));
        assert!(!timer.poll(Timestamp::new(200)));
        assert_eq!(timer.status(), TimerStatus::Idle);
    }

    #[test]
    fn test_stopped_timer_never_fires() {
        let mut timer = OneShotTimer::new();
        timer.start(Duration::from_millis(10), Timestamp::new(0));
        timer.stop();
        assert!(!timer.poll(Timestamp::new(1_000)));
    }

    #[test]
    fn test_restart_moves_deadline() {
        let mut timer = OneShotTimer::new();
        timer.start(Duration::from_millis(10), Timestamp::new(0));
        timer.start(Duration::from_millis(10), Timestamp::new(5));
        assert!(!timer.poll(Timestamp::new(10)));
        assert!(timer.poll(Timestamp::new(15)));
    }

    #[test]
    fn test_bank_raises_distinct_signals() {
        let events = EventRegister::new();
        let mut timers = TimerBank::new();
        timers.start(TimerKind::Retry, Duration::from_millis(10), Timestamp::ZERO);
        timers.start(
            TimerKind::BoothSelection,
            Duration::from_millis(20),
            Timestamp::ZERO,
        );

        timers.poll(Timestamp::new(10), &events);
        assert!(events.is_set(Signal::RetryTimeout));
        assert!(!events.is_set(Signal::SelectionTimeout));
        assert_eq!(timers.status(TimerKind::BoothSelection), TimerStatus::Armed);

        timers.poll(Timestamp::new(25), &events);
        assert!(events.is_set(Signal::SelectionTimeout));

        timers.start(TimerKind::Retry, Duration::from_millis(10), Timestamp::ZERO);
        timers.stop_all();
        assert_eq!(timers.status(TimerKind::Retry), TimerStatus::Idle);
    }
}
