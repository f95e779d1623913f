/// Counts loop iterations and reports a rollover every `period` ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    count: u32,
    period: u32,
}

impl Cadence {
    pub fn new(period: u32) -> Self {
        Self {
            count: 0,
            period: period.max(1),
        }
    }

    /// Advances one tick; returns `true` and restarts from zero on rollover.
    pub fn advance(&mut self) -> bool {
        self.count = self.count.saturating_add(1);
        if self.count >= self.period {
            self.count = 0;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Outcome of one automatic-mode tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AutoTick {
    /// Relay level demanded by a checkpoint evaluation.
    pub relay: Option<bool>,
    /// The reminder cadence rolled over.
    pub reminder: bool,
}

#[derive(Debug, Clone)]
pub struct AutoModeController {
    enabled: bool,
    target_c: i32,
    checkpoint: Cadence,
    reminder: Cadence,
}

impl AutoModeController {
    pub fn new(checkpoint_ticks: u32, reminder_ticks: u32) -> Self {
        Self {
            enabled: false,
            target_c: 0,
            checkpoint: Cadence::new(checkpoint_ticks),
            reminder: Cadence::new(reminder_ticks),
        }
    }

    pub fn enable(&mut self, target_c: i32) {
        self.enabled = true;
        self.target_c = target_c;
        self.checkpoint.reset();
        self.reminder.reset();
    }

    /// Returns whether automatic mode was running.
    pub fn disable(&mut self) -> bool {
        std::mem::replace(&mut self.enabled, false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn target_c(&self) -> Option<i32> {
        self.enabled.then_some(self.target_c)
    }

    pub fn checkpoint_count(&self) -> u32 {
        self.checkpoint.count()
    }

    pub fn reminder_count(&self) -> u32 {
        self.reminder.count()
    }

    /// Both cadences advance on every tick while enabled; each restarts only
    /// on its own rollover. The reading is acted on as-is.
    pub fn tick(&mut self, temp_c: f64) -> AutoTick {
        if !self.enabled {
            return AutoTick::default();
        }

        let relay = self
            .checkpoint
            .advance()
            .then(|| temp_c < f64::from(self.target_c));
        let reminder = self.reminder.advance();

        AutoTick { relay, reminder }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadence_rolls_over_on_period() {
        let mut cadence = Cadence::new(3);
        assert!(!cadence.advance());
        assert!(!cadence.advance());
        assert!(cadence.advance());
        assert_eq!(cadence.count(), 0);
        assert!(!cadence.advance());
    }

    #[test]
    fn zero_period_fires_every_tick() {
        let mut cadence = Cadence::new(0);
        assert!(cadence.advance());
        assert!(cadence.advance());
    }

    #[test]
    fn disabled_controller_does_nothing() {
        let mut auto = AutoModeController::new(1, 1);
        assert_eq!(auto.tick(10.0), AutoTick::default());
        assert_eq!(auto.checkpoint_count(), 0);
    }

    #[test]
    fn no_decision_before_checkpoint() {
        let mut auto = AutoModeController::new(20, 2_400);
        auto.enable(20);

        for _ in 0..19 {
            assert_eq!(auto.tick(18.0).relay, None);
        }
        assert_eq!(auto.tick(18.0).relay, Some(true));
    }

    #[test]
    fn demands_off_at_or_above_target() {
        let mut auto = AutoModeController::new(1, 100);
        auto.enable(20);

        assert_eq!(auto.tick(20.0).relay, Some(false));
        assert_eq!(auto.tick(22.0).relay, Some(false));
        assert_eq!(auto.tick(19.9).relay, Some(true));
    }

    #[test]
    fn reminder_is_independent_of_checkpoint() {
        let mut auto = AutoModeController::new(3, 10);
        auto.enable(20);

        let ticks: Vec<AutoTick> = (0..30).map(|_| auto.tick(18.0)).collect();
        let checkpoints = ticks.iter().filter(|tick| tick.relay.is_some()).count();
        let reminders: Vec<usize> = ticks
            .iter()
            .enumerate()
            .filter(|(_, tick)| tick.reminder)
            .map(|(index, _)| index + 1)
            .collect();

        assert_eq!(checkpoints, 10);
        assert_eq!(reminders, vec![10, 20, 30]);
    }

    #[test]
    fn enable_restarts_both_cadences() {
        let mut auto = AutoModeController::new(5, 7);
        auto.enable(20);
        for _ in 0..4 {
            auto.tick(18.0);
        }
        assert_eq!(auto.checkpoint_count(), 4);

        auto.enable(22);
        assert_eq!(auto.checkpoint_count(), 0);
        assert_eq!(auto.reminder_count(), 0);
        assert_eq!(auto.target_c(), Some(22));
    }

    #[test]
    fn disable_reports_previous_state() {
        let mut auto = AutoModeController::new(5, 7);
        assert!(!auto.disable());
        auto.enable(20);
        assert!(auto.disable());
        assert_eq!(auto.target_c(), None);
    }
}
