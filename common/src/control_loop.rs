use crate::{
    engine::{ControllerEngine, EngineAction},
    indicators::{classify, indicator_levels},
    ports::{BotTransport, IndicatorPanel, PortError, Reply, RelayDriver, TemperatureInput},
    sensor::temperature_c,
    types::{Indicator, RelayAction},
};

/// What happened during one iteration. Port failures are collected rather than
/// propagated so the next iteration simply tries again.
#[derive(Debug, Default)]
pub struct LoopReport {
    pub temperature_c: Option<f64>,
    pub indicator: Option<Indicator>,
    pub scanned: bool,
    pub handled: Vec<HandledMessage>,
    pub relay_changes: Vec<bool>,
    /// Notifications that had no owner chat to go to.
    pub undelivered: Vec<String>,
    pub errors: Vec<PortError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandledMessage {
    pub chat_id: String,
    pub text: String,
    pub reply: Reply,
}

pub struct ControlLoop<R, I, S, B> {
    engine: ControllerEngine,
    relay: R,
    indicators: I,
    sensor: S,
    transport: B,
}

impl<R, I, S, B> ControlLoop<R, I, S, B>
where
    R: RelayDriver,
    I: IndicatorPanel,
    S: TemperatureInput,
    B: BotTransport,
{
    pub fn new(
        mut engine: ControllerEngine,
        relay: R,
        indicators: I,
        sensor: S,
        transport: B,
    ) -> Self {
        engine.sync_relay(relay.relay());
        Self {
            engine,
            relay,
            indicators,
            sensor,
            transport,
        }
    }

    pub fn engine(&self) -> &ControllerEngine {
        &self.engine
    }

    pub fn relay(&self) -> &R {
        &self.relay
    }

    pub fn indicators(&self) -> &I {
        &self.indicators
    }

    pub fn sensor_mut(&mut self) -> &mut S {
        &mut self.sensor
    }

    pub fn transport_mut(&mut self) -> &mut B {
        &mut self.transport
    }

    /// Reads the sensor, handles inbound messages when a scan is due, then
    /// runs the timer, automatic mode and indicators, in that order.
    pub fn iterate(&mut self, now_ms: u64) -> LoopReport {
        let mut report = LoopReport::default();

        match self.sensor.read_raw() {
            Ok(raw) => {
                let temp = temperature_c(raw);
                self.engine.update_temperature(temp);
                report.temperature_c = Some(temp);
            }
            Err(err) => report.errors.push(err),
        }

        if self.engine.scan_due(now_ms) {
            report.scanned = true;
            self.scan_messages(now_ms, &mut report);
        }

        let actions = self.engine.tick(now_ms);
        self.execute(actions, &mut report);

        let active = classify(self.engine.current_temp_c(), &self.engine.config);
        for (kind, on) in indicator_levels(active) {
            if let Err(err) = self.indicators.set_indicator(kind, on) {
                report.errors.push(err);
            }
        }
        report.indicator = Some(active);

        report
    }

    fn scan_messages(&mut self, now_ms: u64, report: &mut LoopReport) {
        let messages = match self.transport.poll_messages() {
            Ok(messages) => messages,
            Err(err) => {
                report.errors.push(err);
                return;
            }
        };

        for message in messages {
            let (mut reply, actions) = if message.reply_only {
                self.engine.dispatch_reply_only(&message.text, now_ms)
            } else {
                self.engine.dispatch(&message.chat_id, &message.text, now_ms)
            };
            if let Some(actual) = self.execute(actions, report) {
                reply.push_line(&relay_fault_note(actual));
            }

            if let Err(err) = self.transport.send_reply(&message.chat_id, &reply) {
                report.errors.push(err);
            }
            report.handled.push(HandledMessage {
                chat_id: message.chat_id,
                text: message.text,
                reply,
            });
        }
    }

    /// Runs `actions` in order. Returns the level the relay actually holds
    /// if any relay write failed.
    fn execute(&mut self, actions: Vec<EngineAction>, report: &mut LoopReport) -> Option<bool> {
        let mut batch_fault = None;
        // A notification describes the relay write right before it.
        let mut pending_fault = None;

        for action in actions {
            match action {
                EngineAction::SetRelay(on) => {
                    if let Err(err) = self.relay.set_relay(on) {
                        report.errors.push(err);
                        let actual = self.relay.relay();
                        self.engine.sync_relay(actual);
                        batch_fault = Some(actual);
                        pending_fault = Some(actual);
                        continue;
                    }
                    pending_fault = None;
                    report.relay_changes.push(on);
                }
                EngineAction::Notify(text) => {
                    let mut notice = Reply::text(text);
                    if let Some(actual) = pending_fault.take() {
                        notice.push_line(&relay_fault_note(actual));
                    }
                    let Some(chat_id) = self.engine.owner_chat().map(str::to_string) else {
                        report.undelivered.push(notice.text);
                        continue;
                    };
                    if let Err(err) = self.transport.send_reply(&chat_id, &notice) {
                        report.errors.push(err);
                    }
                }
            }
        }

        batch_fault
    }
}

fn relay_fault_note(actual: bool) -> String {
    format!(
        "Relay write failed: relay is {}.",
        RelayAction::from_relay(actual).as_str()
    )
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::collections::VecDeque;

    use crate::{
        ports::{
            BotTransport, IndicatorPanel, InboundMessage, PortError, RelayDriver, Reply,
            TemperatureInput,
        },
        types::Indicator,
    };

    #[derive(Debug, Default)]
    pub struct FakeRelay {
        pub on: bool,
        pub writes: usize,
        pub fail: bool,
    }

    impl RelayDriver for FakeRelay {
        fn set_relay(&mut self, on: bool) -> Result<(), PortError> {
            if self.fail {
                return Err(PortError::Gpio("relay pin".to_string()));
            }
            self.on = on;
            self.writes += 1;
            Ok(())
        }

        fn relay(&self) -> bool {
            self.on
        }
    }

    #[derive(Debug, Default)]
    pub struct FakePanel {
        pub normal: bool,
        pub hot: bool,
        pub cold: bool,
    }

    impl FakePanel {
        pub fn lit(&self) -> Vec<Indicator> {
            [
                (Indicator::Normal, self.normal),
                (Indicator::Hot, self.hot),
                (Indicator::Cold, self.cold),
            ]
            .into_iter()
            .filter_map(|(kind, on)| on.then_some(kind))
            .collect()
        }
    }

    impl IndicatorPanel for FakePanel {
        fn set_indicator(&mut self, kind: Indicator, on: bool) -> Result<(), PortError> {
            match kind {
                Indicator::Normal => self.normal = on,
                Indicator::Hot => self.hot = on,
                Indicator::Cold => self.cold = on,
            }
            Ok(())
        }
    }

    /// Holds a fixed raw reading; `None` simulates a failed read.
    #[derive(Debug)]
    pub struct FakeSensor {
        pub raw: Option<f64>,
    }

    impl FakeSensor {
        /// Raw ADC value for a temperature, inverting the thermistor curve
        /// by bisection.
        pub fn for_temperature(temp_c: f64) -> Self {
            let (mut low, mut high) = (1.0_f64, 1023.0_f64);
            for _ in 0..60 {
                let mid = (low + high) / 2.0;
                if crate::sensor::temperature_c(mid) < temp_c {
                    low = mid;
                } else {
                    high = mid;
                }
            }
            Self {
                raw: Some((low + high) / 2.0),
            }
        }
    }

    impl TemperatureInput for FakeSensor {
        fn read_raw(&mut self) -> Result<f64, PortError> {
            self.raw
                .ok_or_else(|| PortError::Sensor("adc timeout".to_string()))
        }
    }

    #[derive(Debug, Default)]
    pub struct FakeTransport {
        pub inbox: VecDeque<InboundMessage>,
        pub sent: Vec<(String, Reply)>,
        pub polls: usize,
    }

    impl FakeTransport {
        pub fn push(&mut self, chat_id: &str, text: &str) {
            self.inbox.push_back(InboundMessage::chat(chat_id, text));
        }

        pub fn push_reply_only(&mut self, chat_id: &str, text: &str) {
            self.inbox.push_back(InboundMessage::reply_only(chat_id, text));
        }

        pub fn sent_texts(&self) -> Vec<&str> {
            self.sent.iter().map(|(_, reply)| reply.text.as_str()).collect()
        }
    }

    impl BotTransport for FakeTransport {
        fn poll_messages(&mut self) -> Result<Vec<InboundMessage>, PortError> {
            self.polls += 1;
            Ok(self.inbox.drain(..).collect())
        }

        fn send_reply(&mut self, chat_id: &str, reply: &Reply) -> Result<(), PortError> {
            self.sent.push((chat_id.to_string(), reply.clone()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::*;
    use crate::config::{ControllerConfig, LOOP_PERIOD_MS};
    use pretty_assertions::assert_eq;

    type TestLoop = ControlLoop<FakeRelay, FakePanel, FakeSensor, FakeTransport>;

    fn control_loop(temp_c: f64) -> TestLoop {
        ControlLoop::new(
            ControllerEngine::new(ControllerConfig::default()),
            FakeRelay::default(),
            FakePanel::default(),
            FakeSensor::for_temperature(temp_c),
            FakeTransport::default(),
        )
    }

    fn run_until(control: &mut TestLoop, from_iteration: u64, to_iteration: u64) {
        for iteration in from_iteration..=to_iteration {
            control.iterate(iteration * LOOP_PERIOD_MS);
        }
    }

    #[test]
    fn fake_sensor_inverts_curve() {
        let raw = FakeSensor::for_temperature(18.0).raw.unwrap();
        assert!((crate::sensor::temperature_c(raw) - 18.0).abs() < 1e-6);
    }

    #[test]
    fn command_reply_goes_back_to_sender() {
        let mut control = control_loop(21.0);
        control.transport_mut().push("alice", "/relay on");

        let report = control.iterate(0);

        assert!(report.scanned);
        assert_eq!(report.relay_changes, vec![true]);
        assert!(control.relay().on);
        assert_eq!(
            control.transport_mut().sent,
            vec![("alice".to_string(), Reply::text("Relay switched ON."))]
        );
    }

    #[test]
    fn polling_is_throttled_to_scan_interval() {
        let mut control = control_loop(21.0);
        control.iterate(0);
        control.iterate(500);
        control.iterate(1_000);
        control.iterate(1_500);

        assert_eq!(control.transport_mut().polls, 2);
    }

    #[test]
    fn timer_scenario_fires_at_thirty_seconds() {
        let mut control = control_loop(21.0);
        control.transport_mut().push("alice", "/timer on 30");
        control.iterate(0);

        control.iterate(29_000);
        assert!(!control.relay().on);

        let report = control.iterate(30_000);
        assert_eq!(report.relay_changes, vec![true]);
        assert!(control.relay().on);
        assert!(!control.engine().timer().is_enabled());
        assert_eq!(
            control.transport_mut().sent_texts().last().copied(),
            Some("Timer fired: relay switched ON.")
        );
    }

    #[test]
    fn auto_mode_scenario_tracks_target() {
        let mut control = control_loop(18.0);
        control.transport_mut().push("alice", "/auto on 20");
        // The enabling iteration already counts as the first tick.
        control.iterate(0);

        run_until(&mut control, 1, 18);
        assert!(!control.relay().on);
        run_until(&mut control, 19, 19);
        assert!(control.relay().on);

        *control.sensor_mut() = FakeSensor::for_temperature(22.0);
        run_until(&mut control, 20, 38);
        assert!(control.relay().on);
        run_until(&mut control, 39, 39);
        assert!(!control.relay().on);
    }

    #[test]
    fn indicators_follow_temperature_every_iteration() {
        let mut control = control_loop(26.0);
        let report = control.iterate(0);
        assert_eq!(report.indicator, Some(Indicator::Hot));
        assert_eq!(control.indicators().lit(), vec![Indicator::Hot]);

        *control.sensor_mut() = FakeSensor::for_temperature(16.0);
        control.iterate(100);
        assert_eq!(control.indicators().lit(), vec![Indicator::Cold]);

        *control.sensor_mut() = FakeSensor::for_temperature(20.0);
        control.iterate(200);
        assert_eq!(control.indicators().lit(), vec![Indicator::Normal]);
    }

    #[test]
    fn sensor_failure_keeps_last_reading() {
        let mut control = control_loop(26.0);
        control.iterate(0);

        control.sensor_mut().raw = None;
        let report = control.iterate(100);

        assert_eq!(report.temperature_c, None);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.indicator, Some(Indicator::Hot));
    }

    #[test]
    fn notifications_without_owner_are_reported() {
        let mut engine = ControllerEngine::new(ControllerConfig::default());
        engine.handle(
            crate::command::Command::SetTimer {
                action: crate::types::RelayAction::On,
                delay_secs: 1,
            },
            0,
        );
        let mut control = ControlLoop::new(
            engine,
            FakeRelay::default(),
            FakePanel::default(),
            FakeSensor::for_temperature(20.0),
            FakeTransport::default(),
        );

        let report = control.iterate(1_000);
        assert_eq!(
            report.undelivered,
            vec!["Timer fired: relay switched ON.".to_string()]
        );
        assert!(control.transport_mut().sent.is_empty());
    }

    #[test]
    fn relay_failure_resyncs_engine() {
        let mut control = ControlLoop::new(
            ControllerEngine::new(ControllerConfig::default()),
            FakeRelay {
                fail: true,
                ..FakeRelay::default()
            },
            FakePanel::default(),
            FakeSensor::for_temperature(20.0),
            FakeTransport::default(),
        );
        control.transport_mut().push("alice", "/relay on");

        let report = control.iterate(0);
        assert_eq!(report.errors, vec![PortError::Gpio("relay pin".to_string())]);
        assert!(report.relay_changes.is_empty());
        assert!(!control.engine().is_relay_on());
        assert_eq!(
            control.transport_mut().sent_texts(),
            vec!["Relay switched ON.\nRelay write failed: relay is OFF."]
        );
    }

    #[test]
    fn failed_timer_write_is_reported_in_notification() {
        let mut control = control_loop(21.0);
        control.transport_mut().push("alice", "/timer on 1");
        control.iterate(0);

        control.relay.fail = true;
        let report = control.iterate(1_000);

        assert_eq!(report.errors.len(), 1);
        assert!(!control.relay().on);
        assert!(!control.engine().is_relay_on());
        assert_eq!(
            control.transport_mut().sent_texts().last().copied(),
            Some("Timer fired: relay switched ON.\nRelay write failed: relay is OFF.")
        );
    }

    #[test]
    fn reply_only_commands_do_not_steal_notifications() {
        let mut control = control_loop(21.0);
        control.transport_mut().push("alice", "/timer on 2");
        control.iterate(0);

        control.transport_mut().push_reply_only("http-1", "/timer status");
        control.iterate(LOOP_PERIOD_MS);
        control.iterate(2 * LOOP_PERIOD_MS);

        assert_eq!(control.engine().owner_chat(), Some("alice"));
        let sent = &control.transport_mut().sent;
        assert_eq!(sent[1].0, "http-1");
        assert_eq!(
            sent.last(),
            Some(&(
                "alice".to_string(),
                Reply::text("Timer fired: relay switched ON.")
            ))
        );
    }
}
