//! Edge-triggered countdown timer
//!
//! Driven by a caller-supplied monotonic millisecond count, so it never reads
//! a clock itself and never blocks. `just_finished` reports the expiry edge
//! exactly once regardless of how irregularly it is polled.

/// Timer lifecycle: `Idle -> Armed -> Fired`, restartable from any state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerState {
    /// Never started or stopped
    Idle,
    /// Counting down
    Armed { started_ms: u64, duration_ms: u64 },
    /// Expiry has been observed
    Fired,
}

/// Restartable countdown
#[derive(Debug, Clone, Copy)]
pub struct ElapsedTimer {
    state: TimerState,
}

impl ElapsedTimer {
    pub const fn new() -> Self {
        Self {
            state: TimerState::Idle,
        }
    }

    /// Arm the timer, discarding any previous expiry
    pub fn start(&mut self, now_ms: u64, duration_ms: u64) {
        self.state = TimerState::Armed {
            started_ms: now_ms,
            duration_ms,
        };
    }

    /// Disarm without firing
    pub fn stop(&mut self) {
        self.state = TimerState::Idle;
    }

    /// True from `start` until the expiry edge has been observed
    pub fn is_running(&self) -> bool {
        matches!(self.state, TimerState::Armed { .. })
    }

    /// True once the duration has elapsed, whether or not the edge was observed
    pub fn has_expired(&self, now_ms: u64) -> bool {
        match self.state {
            TimerState::Idle => false,
            TimerState::Armed {
                started_ms,
                duration_ms,
            } => now_ms.saturating_sub(started_ms) >= duration_ms,
            TimerState::Fired => true,
        }
    }

    /// True exactly once, on the first poll at or after expiry
    pub fn just_finished(&mut self, now_ms: u64) -> bool {
        if self.is_running() && self.has_expired(now_ms) {
            self.state = TimerState::Fired;
            return true;
        }
        false
    }

    /// Milliseconds left while armed
    pub fn remaining_ms(&self, now_ms: u64) -> Option<u64> {
        match self.state {
            TimerState::Armed {
                started_ms,
                duration_ms,
            } => Some(duration_ms.saturating_sub(now_ms.saturating_sub(started_ms))),
            _ => None,
        }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }
}

impl Default for ElapsedTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_timer_is_idle() {
        let mut timer = ElapsedTimer::new();
        assert!(!timer.is_running());
        assert!(!timer.has_expired(u64::MAX));
        assert!(!timer.just_finished(u64::MAX));
    }

    #[test]
    fn test_fires_exactly_once() {
        let mut timer = ElapsedTimer::new();
        timer.start(1_000, 500);
        assert!(timer.is_running());
        assert!(!timer.just_finished(1_499));
        assert!(timer.just_finished(1_500));
        assert!(!timer.is_running());
        assert!(!timer.just_finished(1_501));
        assert!(!timer.just_finished(10_000));
        assert_eq!(timer.state(), TimerState::Fired);
    }

    #[test]
    fn test_late_poll_still_fires_once() {
        let mut timer = ElapsedTimer::new();
        timer.start(0, 10);
        assert!(timer.just_finished(5_000));
        assert!(!timer.just_finished(5_001));
    }

    #[test]
    fn test_restart_clears_fired_state() {
        let mut timer = ElapsedTimer::new();
        timer.start(0, 10);
        assert!(timer.just_finished(10));
        timer.start(20, 10);
        assert!(timer.is_running());
        assert!(!timer.has_expired(25));
        assert!(timer.just_finished(30));
    }

    #[test]
    fn test_zero_duration_fires_on_next_poll() {
        let mut timer = ElapsedTimer::new();
        timer.start(42, 0);
        assert!(timer.just_finished(42));
    }

    #[test]
    fn test_clock_going_backwards_does_not_fire() {
        let mut timer = ElapsedTimer::new();
        timer.start(1_000, 10);
        assert!(!timer.just_finished(900));
        assert_eq!(timer.remaining_ms(900), Some(10));
    }

    #[test]
    fn test_stop_disarms() {
        let mut timer = ElapsedTimer::new();
        timer.start(0, 10);
        timer.stop();
        assert!(!timer.is_running());
        assert!(!timer.just_finished(100));
        assert_eq!(timer.remaining_ms(100), None);
    }
}
