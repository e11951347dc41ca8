const MINUTE_MS: u64 = 60_000;

pub const SLEEP_TIMER_PRESETS: [u32; 6] = [15, 30, 45, 60, 90, 120];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepStatus {
    Idle,
    Running { minutes_left: u32 },
    Expired,
}

/// Absolute-deadline timer measured in epoch milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SleepTimer {
    deadline_ms: Option<u64>,
    minutes_left: u32,
}

impl SleepTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the timer `minutes` from `now_ms`. Zero disarms it.
    pub fn arm(&mut self, minutes: u32, now_ms: u64) {
        if minutes == 0 {
            self.cancel();
            return;
        }
        self.deadline_ms = Some(now_ms.saturating_add(u64::from(minutes) * MINUTE_MS));
        self.minutes_left = minutes;
    }

    pub fn cancel(&mut self) {
        self.deadline_ms = None;
        self.minutes_left = 0;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline_ms.is_some()
    }

    pub fn deadline_ms(&self) -> Option<u64> {
        self.deadline_ms
    }

    pub fn minutes_left(&self) -> u32 {
        self.minutes_left
    }

    /// Refreshes the remaining-minutes counter. An expired timer disarms itself.
    pub fn check(&mut self, now_ms: u64) -> SleepStatus {
        let Some(deadline) = self.deadline_ms else {
            return SleepStatus::Idle;
        };
        if now_ms >= deadline {
            self.cancel();
            return SleepStatus::Expired;
        }
        let remaining = deadline - now_ms;
        self.minutes_left = u32::try_from(remaining / MINUTE_MS + 1).unwrap_or(u32::MAX);
        SleepStatus::Running {
            minutes_left: self.minutes_left,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_minutes_disarms() {
        let mut timer = SleepTimer::new();
        timer.arm(15, 0);
        assert!(timer.is_armed());
        timer.arm(0, 0);
        assert!(!timer.is_armed());
        assert_eq!(timer.check(1), SleepStatus::Idle);
    }

    #[test]
    fn minutes_left_rounds_up() {
        let mut timer = SleepTimer::new();
        timer.arm(2, 1_000);
        assert_eq!(
            timer.check(1_000 + 30_000),
            SleepStatus::Running { minutes_left: 2 }
        );
        assert_eq!(
            timer.check(1_000 + 60_000),
            SleepStatus::Running { minutes_left: 1 }
        );
        assert_eq!(timer.minutes_left(), 1);
    }

    #[test]
    fn expiry_fires_once() {
        let mut timer = SleepTimer::new();
        timer.arm(1, 0);
        assert_eq!(timer.check(MINUTE_MS), SleepStatus::Expired);
        assert!(!timer.is_armed());
        assert_eq!(timer.check(MINUTE_MS + 1), SleepStatus::Idle);
    }

    #[test]
    fn cancel_clears_deadline() {
        let mut timer = SleepTimer::new();
        timer.arm(30, 0);
        timer.cancel();
        assert_eq!(timer.deadline_ms(), None);
        assert_eq!(timer.minutes_left(), 0);
    }
}
