use crate::types::RelayAction;

/// Single-slot delayed relay action. All instants are milliseconds elapsed
/// since boot; a `u64` of milliseconds outlives any supported delay.
#[derive(Debug, Clone, Default)]
pub struct RelayTimer {
    pending: Option<PendingTimer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingTimer {
    action: RelayAction,
    deadline_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerStatus {
    Idle,
    Pending {
        action: RelayAction,
        remaining_ms: u64,
    },
}

impl TimerStatus {
    pub fn describe(self) -> String {
        match self {
            Self::Idle => "No timer is active.".to_string(),
            Self::Pending {
                action,
                remaining_ms,
            } => format!(
                "Timer active: relay turns {} in {}.",
                action.as_str(),
                format_remaining(remaining_ms)
            ),
        }
    }
}

impl RelayTimer {
    /// Arms the timer, replacing whatever was pending.
    pub fn set(&mut self, action: RelayAction, delay_secs: u64, now_ms: u64) {
        let delay_ms = delay_secs.saturating_mul(1_000);
        self.pending = Some(PendingTimer {
            action,
            deadline_ms: now_ms.saturating_add(delay_ms),
        });
    }

    /// Returns whether a timer was pending.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_action(&self) -> Option<RelayAction> {
        self.pending.map(|pending| pending.action)
    }

    pub fn deadline_ms(&self) -> Option<u64> {
        self.pending.map(|pending| pending.deadline_ms)
    }

    pub fn status(&self, now_ms: u64) -> TimerStatus {
        match self.pending {
            Some(pending) => TimerStatus::Pending {
                action: pending.action,
                remaining_ms: pending.deadline_ms.saturating_sub(now_ms),
            },
            None => TimerStatus::Idle,
        }
    }

    /// Yields the pending action once the deadline is reached. The slot is
    /// cleared in the same step, so a timer can only fire once.
    pub fn tick(&mut self, now_ms: u64) -> Option<RelayAction> {
        let pending = self.pending?;
        if now_ms < pending.deadline_ms {
            return None;
        }
        self.pending = None;
        Some(pending.action)
    }
}

pub fn format_remaining(remaining_ms: u64) -> String {
    let total_secs = remaining_ms.div_ceil(1_000);
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;

    if days > 0 {
        format!("{days}d {hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_TIMER_DELAY_SECS;

    #[test]
    fn fires_exactly_at_deadline() {
        let mut timer = RelayTimer::default();
        timer.set(RelayAction::On, 30, 0);

        assert_eq!(timer.tick(29_999), None);
        assert!(timer.is_enabled());

        assert_eq!(timer.tick(30_000), Some(RelayAction::On));
        assert!(!timer.is_enabled());
        assert_eq!(timer.tick(30_001), None);
    }

    #[test]
    fn deadline_is_relative_to_arming_time() {
        let mut timer = RelayTimer::default();
        timer.set(RelayAction::Off, 10, 5_000);

        assert_eq!(timer.deadline_ms(), Some(15_000));
        assert_eq!(timer.tick(14_999), None);
        assert_eq!(timer.tick(15_000), Some(RelayAction::Off));
    }

    #[test]
    fn second_set_replaces_first() {
        let mut timer = RelayTimer::default();
        timer.set(RelayAction::On, 10, 0);
        timer.set(RelayAction::Off, 60, 1_000);

        assert_eq!(timer.pending_action(), Some(RelayAction::Off));
        assert_eq!(timer.tick(10_000), None);
        assert_eq!(timer.tick(61_000), Some(RelayAction::Off));
        assert_eq!(timer.tick(120_000), None);
    }

    #[test]
    fn cancel_clears_slot() {
        let mut timer = RelayTimer::default();
        assert!(!timer.cancel());

        timer.set(RelayAction::On, 5, 0);
        assert!(timer.cancel());
        assert_eq!(timer.status(0), TimerStatus::Idle);
        assert_eq!(timer.tick(10_000), None);
    }

    #[test]
    fn long_delays_do_not_overflow() {
        let mut timer = RelayTimer::default();
        let late_boot = u64::MAX - 1_000;
        timer.set(RelayAction::On, MAX_TIMER_DELAY_SECS, late_boot);
        assert_eq!(timer.deadline_ms(), Some(u64::MAX));

        timer.set(RelayAction::On, MAX_TIMER_DELAY_SECS, 0);
        assert_eq!(timer.deadline_ms(), Some(604_800_000));
    }

    #[test]
    fn status_reports_remaining_time() {
        let mut timer = RelayTimer::default();
        timer.set(RelayAction::Off, 3_725, 0);

        assert_eq!(
            timer.status(1_000),
            TimerStatus::Pending {
                action: RelayAction::Off,
                remaining_ms: 3_724_000,
            }
        );
        assert_eq!(
            timer.status(1_000).describe(),
            "Timer active: relay turns OFF in 01:02:04."
        );
    }

    #[test]
    fn remaining_time_rounds_up_and_shows_days() {
        assert_eq!(format_remaining(1), "00:00:01");
        assert_eq!(format_remaining(0), "00:00:00");
        assert_eq!(format_remaining(90_061_000), "1d 01:01:01");
    }
}
