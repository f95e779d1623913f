use crate::{
    auto_mode::AutoModeController,
    command::{menu_keyboard, Command, CommandError, MENU_TEXT},
    config::ControllerConfig,
    indicators::classify,
    ports::Reply,
    timer::{format_remaining, RelayTimer, TimerStatus},
    types::{ControllerStatus, RelayAction},
};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    SetRelay(bool),
    Notify(String),
}

/// The whole controller state. Timer and automatic mode never look at each
/// other; [`ControllerEngine::handle`] keeps at most one of them active.
#[derive(Debug, Clone)]
pub struct ControllerEngine {
    pub config: ControllerConfig,

    relay_on: bool,
    current_temp_c: f64,
    last_scan_ms: Option<u64>,
    owner_chat: Option<String>,

    timer: RelayTimer,
    auto: AutoModeController,
}

impl ControllerEngine {
    pub fn new(mut config: ControllerConfig) -> Self {
        config.sanitize();
        let auto = AutoModeController::new(config.checkpoint_ticks, config.reminder_ticks);
        Self {
            config,
            relay_on: false,
            current_temp_c: 0.0,
            last_scan_ms: None,
            owner_chat: None,
            timer: RelayTimer::default(),
            auto,
        }
    }

    pub fn is_relay_on(&self) -> bool {
        self.relay_on
    }

    /// Adopts the level the actuator reports, e.g. at boot.
    pub fn sync_relay(&mut self, on: bool) {
        self.relay_on = on;
    }

    pub fn current_temp_c(&self) -> f64 {
        self.current_temp_c
    }

    pub fn update_temperature(&mut self, temp_c: f64) {
        self.current_temp_c = temp_c;
    }

    pub fn timer(&self) -> &RelayTimer {
        &self.timer
    }

    pub fn auto_mode(&self) -> &AutoModeController {
        &self.auto
    }

    /// Chat that issued the last accepted command; notifications go there.
    pub fn owner_chat(&self) -> Option<&str> {
        self.owner_chat.as_deref()
    }

    pub fn last_scan_ms(&self) -> Option<u64> {
        self.last_scan_ms
    }

    /// True at most once per scan interval; records the scan when it is due.
    pub fn scan_due(&mut self, now_ms: u64) -> bool {
        let due = self
            .last_scan_ms
            .map(|last| now_ms.saturating_sub(last) >= self.config.scan_interval_ms)
            .unwrap_or(true);
        if due {
            self.last_scan_ms = Some(self.last_scan_ms.map_or(now_ms, |last| last.max(now_ms)));
        }
        due
    }

    /// Parses and executes one chat message. Malformed commands produce a
    /// usage reply and leave the state untouched. An accepted command makes
    /// `chat_id` the notification chat.
    pub fn dispatch(
        &mut self,
        chat_id: &str,
        text: &str,
        now_ms: u64,
    ) -> (Reply, Vec<EngineAction>) {
        self.dispatch_from(Some(chat_id), text, now_ms)
    }

    /// Like [`dispatch`](Self::dispatch), for senders that only read the
    /// reply; the notification chat stays as it was.
    pub fn dispatch_reply_only(&mut self, text: &str, now_ms: u64) -> (Reply, Vec<EngineAction>) {
        self.dispatch_from(None, text, now_ms)
    }

    fn dispatch_from(
        &mut self,
        owner: Option<&str>,
        text: &str,
        now_ms: u64,
    ) -> (Reply, Vec<EngineAction>) {
        match Command::parse(text, &self.config) {
            Ok(command) => {
                if let Some(chat_id) = owner {
                    self.owner_chat = Some(chat_id.to_string());
                }
                self.handle(command, now_ms)
            }
            Err(err) => (error_reply(&err), Vec::new()),
        }
    }

    pub fn handle(&mut self, command: Command, now_ms: u64) -> (Reply, Vec<EngineAction>) {
        let mut actions = Vec::new();
        let reply = match command {
            Command::Menu => Reply::with_keyboard(MENU_TEXT, menu_keyboard()),
            Command::Relay(action) => {
                let changed = self.apply_relay(action.relay_on(), &mut actions);
                if changed {
                    Reply::text(format!("Relay switched {}.", action.as_str()))
                } else {
                    Reply::text(format!("Relay is already {}.", action.as_str()))
                }
            }
            Command::RelayStatus => Reply::text(format!(
                "Relay is {}.",
                RelayAction::from_relay(self.relay_on).as_str()
            )),
            Command::SetTimer { action, delay_secs } => {
                let replaced = self.timer.is_enabled();
                self.timer.set(action, delay_secs, now_ms);

                let mut reply = Reply::text(format!(
                    "Timer set: relay turns {} in {}.",
                    action.as_str(),
                    format_remaining(delay_secs.saturating_mul(1_000))
                ));
                if replaced {
                    reply.push_line("Previous timer replaced.");
                }
                if self.auto.disable() {
                    reply.push_line("Automatic mode disabled.");
                }
                reply
            }
            Command::CancelTimer => {
                if self.timer.cancel() {
                    Reply::text("Timer cancelled.")
                } else {
                    Reply::text("No timer to cancel.")
                }
            }
            Command::TimerStatus => Reply::text(self.timer.status(now_ms).describe()),
            Command::EnableAuto { target_c } => {
                self.auto.enable(target_c);
                let mut reply = Reply::text(self.auto_summary("Automatic mode on"));
                if self.timer.cancel() {
                    reply.push_line("Pending timer cancelled.");
                }
                reply
            }
            Command::DisableAuto => {
                if self.auto.disable() {
                    Reply::text("Automatic mode off.")
                } else {
                    Reply::text("Automatic mode was not active.")
                }
            }
            Command::AutoStatus => {
                if self.auto.is_enabled() {
                    Reply::text(self.auto_summary("Automatic mode on"))
                } else {
                    Reply::text("Automatic mode is off.")
                }
            }
            Command::Temperature => Reply::text(format!(
                "Temperature: {:.1} °C ({}).",
                self.current_temp_c,
                classify(self.current_temp_c, &self.config).as_str()
            )),
        };

        (reply, actions)
    }

    /// One control-loop iteration of the timer and automatic mode.
    pub fn tick(&mut self, now_ms: u64) -> Vec<EngineAction> {
        let mut actions = Vec::new();

        self.fire_timer_if_due(now_ms, &mut actions);
        self.run_auto_mode(&mut actions);

        actions
    }

    pub fn status(&self, now_ms: u64) -> ControllerStatus {
        let (timer_action, timer_remaining_ms) = match self.timer.status(now_ms) {
            TimerStatus::Idle => (None, 0),
            TimerStatus::Pending {
                action,
                remaining_ms,
            } => (Some(action.as_str()), remaining_ms),
        };

        ControllerStatus {
            current_temp: self.current_temp_c,
            indicator: classify(self.current_temp_c, &self.config).as_str(),
            relay_on: self.relay_on,
            timer_active: self.timer.is_enabled(),
            timer_action,
            timer_remaining_sec: timer_remaining_ms.div_ceil(1_000),
            auto_mode: self.auto.is_enabled(),
            target_temp: self.auto.target_c(),
            uptime_ms: now_ms,
        }
    }

    fn fire_timer_if_due(&mut self, now_ms: u64, actions: &mut Vec<EngineAction>) {
        let Some(action) = self.timer.tick(now_ms) else {
            return;
        };

        self.apply_relay(action.relay_on(), actions);
        actions.push(EngineAction::Notify(format!(
            "Timer fired: relay switched {}.",
            action.as_str()
        )));
    }

    fn run_auto_mode(&mut self, actions: &mut Vec<EngineAction>) {
        let outcome = self.auto.tick(self.current_temp_c);

        if let Some(on) = outcome.relay {
            if self.apply_relay(on, actions) {
                let target = self.auto.target_c().unwrap_or_default();
                let comparison = if on { "<" } else { ">=" };
                actions.push(EngineAction::Notify(format!(
                    "Automatic mode: relay switched {} ({:.1} °C {comparison} target {target} °C).",
                    RelayAction::from_relay(on).as_str(),
                    self.current_temp_c,
                )));
            }
        }

        if outcome.reminder {
            actions.push(EngineAction::Notify(
                self.auto_summary("Automatic mode still active"),
            ));
        }
    }

    fn auto_summary(&self, prefix: &str) -> String {
        format!(
            "{prefix}: target {} °C, now {:.1} °C.",
            self.auto.target_c().unwrap_or_default(),
            self.current_temp_c
        )
    }

    /// Returns whether the relay level changed.
    fn apply_relay(&mut self, on: bool, actions: &mut Vec<EngineAction>) -> bool {
        if self.relay_on == on {
            return false;
        }
        self.relay_on = on;
        actions.push(EngineAction::SetRelay(on));
        true
    }
}

fn error_reply(err: &CommandError) -> Reply {
    Reply::text(format!("{err}.\n{}", err.usage()))
}
