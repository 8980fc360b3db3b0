//! Cooperative tick scheduler.

use std::time::Duration;

use crate::error::{SessionError, SessionResult};

/// Converts a fast polling loop into a slower periodic trigger.
///
/// With an action period `A` and a tick period `T` the counter starts at
/// `floor(A / T) - 1`. Each tick either decrements it or, once it is spent,
/// resets it and reports the action as due, so the action runs once every
/// `floor(A / T)` ticks. The reset happens before the caller runs its action,
/// so a failing action never delays the next trigger.
#[derive(Debug, Clone)]
pub struct TickScheduler {
    interval: u64,
    remaining: u64,
}

impl TickScheduler {
    /// Build a scheduler for the given action and tick periods.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidSchedule`] when the action period does
    /// not cover at least two tick periods.
    pub fn new(action_period: Duration, tick_period: Duration) -> SessionResult<Self> {
        let invalid = || SessionError::InvalidSchedule {
            action_ms: action_period.as_millis(),
            tick_ms: tick_period.as_millis(),
        };
        let tick_nanos = tick_period.as_nanos();
        if tick_nanos == 0 {
            return Err(invalid());
        }
        let ratio = action_period.as_nanos() / tick_nanos;
        let interval = u64::try_from(ratio)
            .ok()
            .and_then(|ratio| ratio.checked_sub(1))
            .filter(|interval| *interval >= 1)
            .ok_or_else(invalid)?;
        Ok(Self {
            interval,
            remaining: interval,
        })
    }

    /// Advance by one tick; returns `true` when the action is due.
    pub const fn tick(&mut self) -> bool {
        if self.remaining == 0 {
            self.remaining = self.interval;
            return true;
        }
        self.remaining -= 1;
        false
    }

    /// Advance by one tick and run `action` when due.
    ///
    /// # Errors
    ///
    /// Propagates the action's error. The schedule is already reset.
    pub fn tick_with<E>(&mut self, action: impl FnOnce() -> Result<(), E>) -> Result<bool, E> {
        if self.tick() {
            action()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Counter value after each reset.
    #[must_use]
    pub const fn interval(&self) -> u64 {
        self.interval
    }

    /// Current counter value; zero means the next tick triggers.
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_seconds_at_half_second_ticks_fires_every_tenth_call() -> SessionResult<()> {
        let mut scheduler =
            TickScheduler::new(Duration::from_secs(5), Duration::from_millis(500))?;
        assert_eq!(scheduler.interval(), 9);
        let fired: Vec<usize> = (1..=30).filter(|_| scheduler.tick()).collect();
        assert_eq!(fired, vec![10, 20, 30]);
        Ok(())
    }

    #[test]
    fn failing_action_still_resets_the_counter() -> SessionResult<()> {
        let mut scheduler =
            TickScheduler::new(Duration::from_secs(5), Duration::from_millis(500))?;
        let mut calls = 0;
        for tick in 1..=20 {
            let outcome = scheduler.tick_with(|| {
                calls += 1;
                Err::<(), _>("boom")
            });
            if tick % 10 == 0 {
                assert_eq!(outcome, Err("boom"));
                assert_eq!(scheduler.remaining(), 9);
            } else {
                assert_eq!(outcome, Ok(false));
            }
        }
        assert_eq!(calls, 2);
        Ok(())
    }

    #[test]
    fn schedules_shorter_than_two_ticks_are_rejected() {
        for (action, tick) in [(1_000, 500), (500, 500), (100, 500), (1_000, 0)] {
            let result =
                TickScheduler::new(Duration::from_millis(action), Duration::from_millis(tick));
            assert!(matches!(result, Err(SessionError::InvalidSchedule { .. })));
        }
        let minimal = TickScheduler::new(Duration::from_millis(1_500), Duration::from_millis(500));
        assert!(matches!(minimal, Ok(ref s) if s.interval() == 2));
    }
}
