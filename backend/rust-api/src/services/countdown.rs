use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::utils::time::format_clock_with_hours;

/// Share of the budget (in percent) at or below which the timer warns.
const WARNING_PERCENT: u64 = 25;
/// Share of the budget (in percent) at or below which the timer is critical.
const CRITICAL_PERCENT: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerPhase {
    Normal,
    Warning,
    Critical,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Running { remaining: u32 },
    /// Emitted exactly once, on the tick that exhausts the budget.
    Expired,
    /// The countdown already expired; nothing changes.
    Stopped,
}

/// Tick-driven countdown over a fixed budget. No pause or resume.
///
/// The owner drives it from a monotonic interval; each call to [`advance`]
/// accounts for one period of that interval, whatever its length.
///
/// [`advance`]: Countdown::advance
#[derive(Debug, Clone)]
pub struct Countdown {
    total: u32,
    elapsed: Duration,
    expiry_fired: bool,
}

impl Countdown {
    pub fn new(total_seconds: u32) -> Self {
        Self {
            total: total_seconds,
            elapsed: Duration::ZERO,
            expiry_fired: false,
        }
    }

    /// Called once when the session starts. A zero budget expires here,
    /// before any tick elapses.
    pub fn begin(&mut self) -> Option<TickOutcome> {
        if self.total == 0 && !self.expiry_fired {
            self.expiry_fired = true;
            return Some(TickOutcome::Expired);
        }
        None
    }

    /// One-second tick.
    pub fn tick(&mut self) -> TickOutcome {
        self.advance(Duration::from_secs(1))
    }

    /// Accounts for `period` of wall time.
    pub fn advance(&mut self, period: Duration) -> TickOutcome {
        if self.expiry_fired {
            return TickOutcome::Stopped;
        }

        let budget = Duration::from_secs(u64::from(self.total));
        self.elapsed = self.elapsed.saturating_add(period).min(budget);
        if self.elapsed >= budget {
            self.expiry_fired = true;
            return TickOutcome::Expired;
        }

        TickOutcome::Running {
            remaining: self.remaining_seconds(),
        }
    }

    pub fn total_seconds(&self) -> u32 {
        self.total
    }

    /// Whole seconds elapsed, rounded down.
    pub fn elapsed_seconds(&self) -> u32 {
        (self.elapsed.as_secs() as u32).min(self.total)
    }

    /// Remaining seconds, rounded up, so the display only reads `0:00` once
    /// the budget is spent.
    pub fn remaining_seconds(&self) -> u32 {
        self.total.saturating_sub(self.elapsed_seconds())
    }

    pub fn is_expired(&self) -> bool {
        self.expiry_fired
    }

    pub fn phase(&self) -> TimerPhase {
        if self.expiry_fired {
            return TimerPhase::Expired;
        }
        let remaining = u64::from(self.remaining_seconds()) * 100;
        let total = u64::from(self.total);
        if remaining <= total * CRITICAL_PERCENT {
            TimerPhase::Critical
        } else if remaining <= total * WARNING_PERCENT {
            TimerPhase::Warning
        } else {
            TimerPhase::Normal
        }
    }

    /// Remaining time as `H:MM:SS` for budgets of an hour or more, else `M:SS`.
    pub fn display(&self) -> String {
        format_clock_with_hours(self.remaining_seconds(), self.total >= 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_second_periods_add_up_to_the_budget() {
        let mut countdown = Countdown::new(10);
        let period = Duration::from_millis(250);

        for _ in 0..39 {
            assert!(matches!(
                countdown.advance(period),
                TickOutcome::Running { .. }
            ));
        }
        assert_eq!(countdown.elapsed_seconds(), 9);
        assert_eq!(countdown.remaining_seconds(), 1);
        assert_eq!(countdown.advance(period), TickOutcome::Expired);
        assert_eq!(countdown.remaining_seconds(), 0);
        assert_eq!(countdown.advance(period), TickOutcome::Stopped);
    }

    #[test]
    fn fires_expiry_exactly_once_at_budget() {
        for total in [1u32, 2, 7, 60] {
            let mut countdown = Countdown::new(total);
            assert_eq!(countdown.begin(), None);

            let mut expiries = 0;
            let mut expired_at = None;
            for tick in 1..=total + 5 {
                if countdown.tick() == TickOutcome::Expired {
                    expiries += 1;
                    expired_at = Some(tick);
                }
            }
            assert_eq!(expiries, 1, "total={}", total);
            assert_eq!(expired_at, Some(total));
            assert_eq!(countdown.tick(), TickOutcome::Stopped);
        }
    }

    #[test]
    fn zero_budget_expires_immediately() {
        let mut countdown = Countdown::new(0);
        assert_eq!(countdown.begin(), Some(TickOutcome::Expired));
        assert_eq!(countdown.elapsed_seconds(), 0);
        assert_eq!(countdown.begin(), None);
        assert_eq!(countdown.tick(), TickOutcome::Stopped);
        assert_eq!(countdown.phase(), TimerPhase::Expired);
    }

    #[test]
    fn remaining_never_increases() {
        let mut countdown = Countdown::new(30);
        let mut last = countdown.remaining_seconds();
        for _ in 0..40 {
            countdown.tick();
            assert!(countdown.remaining_seconds() <= last);
            last = countdown.remaining_seconds();
        }
        assert_eq!(last, 0);
    }

    #[test]
    fn phase_thresholds() {
        let mut countdown = Countdown::new(100);
        assert_eq!(countdown.phase(), TimerPhase::Normal);

        for _ in 0..74 {
            countdown.tick();
        }
        // 26 remaining
        assert_eq!(countdown.phase(), TimerPhase::Normal);
        countdown.tick();
        // 25 remaining
        assert_eq!(countdown.phase(), TimerPhase::Warning);

        for _ in 0..15 {
            countdown.tick();
        }
        // 10 remaining
        assert_eq!(countdown.phase(), TimerPhase::Critical);
    }

    #[test]
    fn display_shape_follows_budget() {
        let short = Countdown::new(125);
        assert_eq!(short.display(), "2:05");

        let mut long = Countdown::new(3725);
        assert_eq!(long.display(), "1:02:05");
        for _ in 0..3600 {
            long.tick();
        }
        assert_eq!(long.display(), "0:02:05");
    }
}
