use core::convert::TryInto;
use std::{
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc, Mutex, OnceLock,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use embedded_svc::{
    mqtt::client::{Details, EventPayload, QoS},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    adc::{
        attenuation::DB_11,
        oneshot::{config::AdcChannelConfig, AdcChannelDriver, AdcDriver},
        ADC1,
    },
    gpio::{AnyOutputPin, Gpio34, Output, OutputPin, PinDriver},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    log::EspLogger,
    mqtt::client::{EspMqttClient, EspMqttConnection, MqttClientConfiguration},
    nvs::EspDefaultNvsPartition,
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};

use domotica_common::{
    chat_id_from_topic, config::LOOP_PERIOD_MS, reply_topic, BotTransport, ControlLoop,
    ControllerConfig, ControllerEngine, InboundMessage, Indicator, IndicatorPanel, LoopReport,
    NetworkConfig, PortError, RelayDriver, Reply, TemperatureInput, TOPIC_BOT_IN_FILTER,
    TOPIC_CONTROLLER_STATE, TOPIC_CONTROLLER_STATUS,
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const WATCHDOG_TIMEOUT_SEC: u32 = 30;
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const STATE_PUBLISH_INTERVAL_MS: u64 = 10_000;
/// The thermistor curve expects 10-bit readings; the ESP32 ADC delivers 12.
const ADC_TO_10_BIT: f64 = 4.0;

type SharedMqtt = Arc<Mutex<EspMqttClient<'static>>>;

struct GpioRelay {
    pin: PinDriver<'static, AnyOutputPin, Output>,
    on: bool,
}

impl RelayDriver for GpioRelay {
    fn set_relay(&mut self, on: bool) -> Result<(), PortError> {
        let result = if on {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        result.map_err(|err| PortError::Gpio(format!("relay: {err}")))?;
        self.on = on;
        info!("relay -> {}", if on { "ON" } else { "OFF" });
        Ok(())
    }

    fn relay(&self) -> bool {
        self.on
    }
}

struct LedPanel {
    normal: PinDriver<'static, AnyOutputPin, Output>,
    hot: PinDriver<'static, AnyOutputPin, Output>,
    cold: PinDriver<'static, AnyOutputPin, Output>,
}

impl IndicatorPanel for LedPanel {
    fn set_indicator(&mut self, kind: Indicator, on: bool) -> Result<(), PortError> {
        let pin = match kind {
            Indicator::Normal => &mut self.normal,
            Indicator::Hot => &mut self.hot,
            Indicator::Cold => &mut self.cold,
        };
        let result = if on { pin.set_high() } else { pin.set_low() };
        result.map_err(|err| PortError::Gpio(format!("{} led: {err}", kind.as_str())))
    }
}

struct ThermistorAdc {
    channel: AdcChannelDriver<'static, Gpio34, AdcDriver<'static, ADC1>>,
}

impl TemperatureInput for ThermistorAdc {
    fn read_raw(&mut self) -> Result<f64, PortError> {
        let raw = self
            .channel
            .read_raw()
            .map_err(|err| PortError::Sensor(err.to_string()))?;
        Ok(f64::from(raw) / ADC_TO_10_BIT)
    }
}

struct MqttTransport {
    inbound: Receiver<InboundMessage>,
    mqtt: SharedMqtt,
}

impl BotTransport for MqttTransport {
    fn poll_messages(&mut self) -> Result<Vec<InboundMessage>, PortError> {
        Ok(self.inbound.try_iter().collect())
    }

    fn send_reply(&mut self, chat_id: &str, reply: &Reply) -> Result<(), PortError> {
        let payload =
            serde_json::to_vec(reply).map_err(|err| PortError::Transport(err.to_string()))?;
        let mut mqtt = self
            .mqtt
            .lock()
            .map_err(|_| PortError::Transport("mqtt client poisoned".to_string()))?;
        mqtt.publish(&reply_topic(chat_id), QoS::AtLeastOnce, false, &payload)
            .map(|_| ())
            .map_err(|err| PortError::Transport(format!("{err:?}")))
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let network = network_from_build_env();

    let Peripherals {
        modem, pins, adc1, ..
    } = Peripherals::take()?;

    let relay = GpioRelay {
        pin: output_pin(pins.gpio26)?,
        on: false,
    };
    let mut leds = LedPanel {
        normal: output_pin(pins.gpio25)?,
        hot: output_pin(pins.gpio33)?,
        cold: output_pin(pins.gpio32)?,
    };
    for kind in Indicator::ALL {
        leds.set_indicator(kind, false)?;
    }

    let adc = AdcDriver::new(adc1).context("failed to initialize ADC1")?;
    let adc_config = AdcChannelConfig {
        attenuation: DB_11,
        ..Default::default()
    };
    let thermistor = ThermistorAdc {
        channel: AdcChannelDriver::new(adc, pins.gpio34, &adc_config)
            .context("failed to initialize thermistor channel")?,
    };

    let _wifi = connect_wifi(modem, sys_loop, nvs_partition, &network)
        .context("wifi startup failed")?;

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    let (client, conn) = create_mqtt_client(&network)?;
    let mqtt: SharedMqtt = Arc::new(Mutex::new(client));
    subscribe_topics(&mqtt)?;

    let (inbound_tx, inbound_rx) = mpsc::channel();
    spawn_mqtt_receiver(conn, mqtt.clone(), inbound_tx);

    let transport = MqttTransport {
        inbound: inbound_rx,
        mqtt: mqtt.clone(),
    };
    let engine = ControllerEngine::new(ControllerConfig::default());
    let mut control = ControlLoop::new(engine, relay, leds, thermistor, transport);

    info!("control loop started");
    let mut last_state_publish_ms = 0_u64;

    loop {
        feed_watchdog();
        let now_ms = monotonic_ms();

        let report = control.iterate(now_ms);
        log_report(&report);

        if now_ms.saturating_sub(last_state_publish_ms) >= STATE_PUBLISH_INTERVAL_MS {
            last_state_publish_ms = now_ms;
            publish_state(&mqtt, &control.engine().status(now_ms).to_json());
        }

        thread::sleep(Duration::from_millis(LOOP_PERIOD_MS));
    }
}

fn output_pin(
    pin: impl OutputPin + 'static,
) -> anyhow::Result<PinDriver<'static, AnyOutputPin, Output>> {
    let mut driver = PinDriver::output(pin.downgrade_output())?;
    driver.set_low()?;
    Ok(driver)
}

fn network_from_build_env() -> NetworkConfig {
    let mut network = NetworkConfig::default();
    if let Some(ssid) = option_env!("DOMOTICA_WIFI_SSID") {
        network.wifi_ssid = ssid.to_string();
    }
    if let Some(pass) = option_env!("DOMOTICA_WIFI_PASS") {
        network.wifi_pass = pass.to_string();
    }
    if let Some(host) = option_env!("DOMOTICA_MQTT_HOST") {
        network.mqtt_host = host.to_string();
    }
    if let Some(port) = option_env!("DOMOTICA_MQTT_PORT").and_then(|port| port.parse().ok()) {
        network.mqtt_port = port;
    }
    if let Some(user) = option_env!("DOMOTICA_MQTT_USER") {
        network.mqtt_user = user.to_string();
    }
    if let Some(pass) = option_env!("DOMOTICA_MQTT_PASS") {
        network.mqtt_pass = pass.to_string();
    }
    network
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    if network.wifi_ssid.is_empty() {
        return Err(anyhow!("wifi ssid not configured; set DOMOTICA_WIFI_SSID at build time"));
    }

    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    let mut last_err = None;
    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        info!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS}");
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                info!("wifi connected and netif up on attempt {attempt}");
                last_err = None;
                break;
            }
            Err(err) => {
                warn!("wifi connect failed on attempt {attempt}: {err:#}");
                last_err = Some(err);
            }
        }

        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    if let Some(err) = last_err {
        return Err(anyhow!(
            "all {WIFI_CONNECT_ATTEMPTS} wifi connect attempts failed: {err:#}"
        ));
    }
    drop(wifi);
    Ok(esp_wifi)
}

fn create_mqtt_client(
    network: &NetworkConfig,
) -> anyhow::Result<(EspMqttClient<'static>, EspMqttConnection)> {
    let url = format!("mqtt://{}:{}", network.mqtt_host, network.mqtt_port);

    let conf = MqttClientConfiguration {
        client_id: Some("domotica-controller"),
        username: if network.mqtt_user.is_empty() {
            None
        } else {
            Some(network.mqtt_user.as_str())
        },
        password: if network.mqtt_pass.is_empty() {
            None
        } else {
            Some(network.mqtt_pass.as_str())
        },
        ..Default::default()
    };

    Ok(EspMqttClient::new(url.as_str(), &conf)?)
}

fn subscribe_topics(mqtt: &SharedMqtt) -> anyhow::Result<()> {
    let mut mqtt = mqtt
        .lock()
        .map_err(|_| anyhow!("mqtt client mutex poisoned"))?;
    mqtt.subscribe(TOPIC_BOT_IN_FILTER, QoS::AtMostOnce)?;
    mqtt.publish(TOPIC_CONTROLLER_STATUS, QoS::AtLeastOnce, true, b"online")?;
    Ok(())
}

fn spawn_mqtt_receiver(
    mut conn: EspMqttConnection,
    mqtt: SharedMqtt,
    inbound: Sender<InboundMessage>,
) {
    let spawned = thread::Builder::new()
        .name("mqtt-rx".into())
        .stack_size(8 * 1024)
        .spawn(move || loop {
            match conn.next() {
                Ok(event) => {
                    let EventPayload::Received {
                        topic: Some(topic),
                        data,
                        details,
                        ..
                    } = event.payload()
                    else {
                        continue;
                    };
                    // Only complete payloads carry a whole command.
                    if !matches!(details, Details::Complete) {
                        continue;
                    }
                    let Some(chat_id) = chat_id_from_topic(topic) else {
                        continue;
                    };
                    if data.len() > MAX_MQTT_PAYLOAD_BYTES {
                        warn!(
                            "dropping oversized chat message from {} ({} bytes)",
                            chat_id,
                            data.len()
                        );
                        continue;
                    }
                    let Ok(text) = core::str::from_utf8(data) else {
                        warn!("dropping non utf8 chat message from {chat_id}");
                        continue;
                    };
                    if inbound.send(InboundMessage::chat(chat_id, text)).is_err() {
                        warn!("control loop stopped; mqtt receiver exiting");
                        return;
                    }
                }
                Err(err) => {
                    warn!("mqtt receive loop error: {err:?}");
                    thread::sleep(Duration::from_secs(2));
                    if let Err(sub_err) = subscribe_topics(&mqtt) {
                        warn!("mqtt re-subscribe failed: {sub_err:#}");
                    }
                }
            }
        });

    if let Err(err) = spawned {
        warn!("failed to spawn mqtt receiver thread: {err}");
    }
}

fn publish_state(mqtt: &SharedMqtt, payload: &serde_json::Result<Vec<u8>>) {
    let body = match payload {
        Ok(body) => body,
        Err(err) => {
            warn!("controller state serialization failed: {err}");
            return;
        }
    };
    match mqtt.lock() {
        Ok(mut mqtt) => {
            if let Err(err) =
                mqtt.publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
            {
                warn!("controller state publish failed: {err:?}");
            }
        }
        Err(_) => warn!("mqtt client mutex poisoned; skipping state publish"),
    }
}

fn log_report(report: &LoopReport) {
    for handled in &report.handled {
        info!("command from {}: {:?}", handled.chat_id, handled.text);
    }
    for text in &report.undelivered {
        info!("notification (no chat yet): {text}");
    }
    for err in &report.errors {
        warn!("control loop: {err}");
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
