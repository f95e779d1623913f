use serde::{Deserialize, Serialize};

/// At or above this temperature the hot indicator is lit.
pub const HOT_THRESHOLD_C: f64 = 25.0;
/// At or below this temperature the cold indicator is lit.
pub const COLD_THRESHOLD_C: f64 = 17.0;

/// Interval between two inbound message scans, and the nominal period of one
/// control-loop iteration.
pub const LOOP_PERIOD_MS: u64 = 1_500;

/// Loop iterations between two automatic-mode evaluations (30 s).
pub const CHECKPOINT_TICKS: u32 = (30_000 / LOOP_PERIOD_MS) as u32;
/// Loop iterations between two "automatic mode still active" reminders (60 min).
pub const REMINDER_TICKS: u32 = (3_600_000 / LOOP_PERIOD_MS) as u32;

/// Longest delay accepted by the timer.
pub const MAX_TIMER_DELAY_SECS: u64 = 7 * 24 * 3_600;

/// Arguments accepted after the action token.
pub const MAX_COMMAND_ARGS: usize = 2;

pub const MIN_TARGET_C: i32 = 5;
pub const MAX_TARGET_C: i32 = 35;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureLimits {
    pub min_target_c: i32,
    pub max_target_c: i32,
}

impl Default for TemperatureLimits {
    fn default() -> Self {
        Self {
            min_target_c: MIN_TARGET_C,
            max_target_c: MAX_TARGET_C,
        }
    }
}

impl TemperatureLimits {
    pub fn contains(&self, target_c: i32) -> bool {
        (self.min_target_c..=self.max_target_c).contains(&target_c)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub hot_threshold_c: f64,
    pub cold_threshold_c: f64,
    pub scan_interval_ms: u64,
    pub checkpoint_ticks: u32,
    pub reminder_ticks: u32,
    pub max_timer_delay_secs: u64,
    pub limits: TemperatureLimits,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            hot_threshold_c: HOT_THRESHOLD_C,
            cold_threshold_c: COLD_THRESHOLD_C,
            scan_interval_ms: LOOP_PERIOD_MS,
            checkpoint_ticks: CHECKPOINT_TICKS,
            reminder_ticks: REMINDER_TICKS,
            max_timer_delay_secs: MAX_TIMER_DELAY_SECS,
            limits: TemperatureLimits::default(),
        }
    }
}

impl ControllerConfig {
    pub fn sanitize(&mut self) {
        if !self.hot_threshold_c.is_finite() {
            self.hot_threshold_c = HOT_THRESHOLD_C;
        }
        if !self.cold_threshold_c.is_finite() {
            self.cold_threshold_c = COLD_THRESHOLD_C;
        }
        if self.cold_threshold_c >= self.hot_threshold_c {
            self.cold_threshold_c = self.hot_threshold_c - 1.0;
        }

        self.checkpoint_ticks = self.checkpoint_ticks.max(1);
        self.reminder_ticks = self.reminder_ticks.max(1);
        self.max_timer_delay_secs = self.max_timer_delay_secs.clamp(1, MAX_TIMER_DELAY_SECS);

        if self.limits.min_target_c > self.limits.max_target_c {
            self.limits = TemperatureLimits::default();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cadences_follow_loop_period() {
        assert_eq!(CHECKPOINT_TICKS, 20);
        assert_eq!(REMINDER_TICKS, 2_400);
        assert!(REMINDER_TICKS > CHECKPOINT_TICKS);
    }

    #[test]
    fn sanitize_repairs_zero_cadences_and_inverted_limits() {
        let mut config = ControllerConfig {
            checkpoint_ticks: 0,
            reminder_ticks: 0,
            max_timer_delay_secs: u64::MAX,
            limits: TemperatureLimits {
                min_target_c: 30,
                max_target_c: 10,
            },
            ..ControllerConfig::default()
        };
        config.sanitize();

        assert_eq!(config.checkpoint_ticks, 1);
        assert_eq!(config.reminder_ticks, 1);
        assert_eq!(config.max_timer_delay_secs, MAX_TIMER_DELAY_SECS);
        assert_eq!(config.limits, TemperatureLimits::default());
    }

    #[test]
    fn sanitize_keeps_cold_below_hot() {
        let mut config = ControllerConfig {
            hot_threshold_c: 20.0,
            cold_threshold_c: 22.0,
            ..ControllerConfig::default()
        };
        config.sanitize();

        assert!(config.cold_threshold_c < config.hot_threshold_c);
        assert_eq!(config.cold_threshold_c, 19.0);
    }
}
