use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, OnceLock,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot, watch},
    time::{Interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use domotica_common::{
    chat_id_from_topic, config::LOOP_PERIOD_MS, reply_topic, BotTransport, ControlLoop,
    ControllerConfig, ControllerEngine, ControllerStatus, InboundMessage, Indicator,
    IndicatorPanel, LoopReport, NetworkConfig, PortError, RelayDriver, Reply, TemperatureInput,
    TOPIC_BOT_IN_FILTER, TOPIC_CONTROLLER_STATE, TOPIC_CONTROLLER_STATUS,
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const INBOUND_QUEUE_DEPTH: usize = 32;
const HTTP_REPLY_TIMEOUT: Duration = Duration::from_secs(5);
const HTTP_CHAT_PREFIX: &str = "http-";
const SCAN_JITTER_MS: u64 = 100;

type HttpWaiters = Arc<Mutex<HashMap<String, oneshot::Sender<Reply>>>>;

#[derive(Clone)]
struct AppState {
    inbound: mpsc::Sender<InboundMessage>,
    waiters: HttpWaiters,
    status: watch::Receiver<ControllerStatus>,
    next_http_chat: Arc<AtomicU64>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct CommandRequest {
    text: String,
}

/// Relay output on a desktop: remembers the level and logs every change.
#[derive(Debug, Default)]
struct SimRelay {
    on: bool,
}

impl RelayDriver for SimRelay {
    fn set_relay(&mut self, on: bool) -> Result<(), PortError> {
        self.on = on;
        info!("relay -> {}", if on { "ON" } else { "OFF" });
        Ok(())
    }

    fn relay(&self) -> bool {
        self.on
    }
}

#[derive(Debug, Default)]
struct SimIndicators {
    lit: Option<Indicator>,
}

impl IndicatorPanel for SimIndicators {
    fn set_indicator(&mut self, kind: Indicator, on: bool) -> Result<(), PortError> {
        if on && self.lit != Some(kind) {
            debug!("indicator -> {}", kind.as_str());
            self.lit = Some(kind);
        }
        Ok(())
    }
}

/// Raw ADC readings: a fixed value from `DOMOTICA_SIM_RAW`, otherwise a slow
/// sweep across the cold, normal and hot bands.
#[derive(Debug)]
struct SimSensor {
    fixed_raw: Option<f64>,
    reads: u64,
}

impl TemperatureInput for SimSensor {
    fn read_raw(&mut self) -> Result<f64, PortError> {
        self.reads = self.reads.saturating_add(1);
        if let Some(raw) = self.fixed_raw {
            return Ok(raw);
        }
        // Hardware integration point: the ESP build reads the thermistor ADC here.
        let step = (self.reads / 40) % 24;
        Ok(400.0 + step as f64 * 7.5)
    }
}

struct HostTransport {
    inbound: mpsc::Receiver<InboundMessage>,
    mqtt: AsyncClient,
    waiters: HttpWaiters,
}

impl BotTransport for HostTransport {
    fn poll_messages(&mut self) -> Result<Vec<InboundMessage>, PortError> {
        let mut messages = Vec::new();
        while let Ok(message) = self.inbound.try_recv() {
            messages.push(message);
        }
        Ok(messages)
    }

    fn send_reply(&mut self, chat_id: &str, reply: &Reply) -> Result<(), PortError> {
        if chat_id.starts_with(HTTP_CHAT_PREFIX) {
            let waiter = self
                .waiters
                .lock()
                .map_err(|_| PortError::Transport("http waiter table poisoned".to_string()))?
                .remove(chat_id);
            match waiter {
                Some(waiter) => {
                    let _ = waiter.send(reply.clone());
                }
                None => info!("notification for {chat_id}: {}", reply.text),
            }
            return Ok(());
        }

        let payload =
            serde_json::to_vec(reply).map_err(|err| PortError::Transport(err.to_string()))?;
        self.mqtt
            .try_publish(reply_topic(chat_id), QoS::AtLeastOnce, false, payload)
            .map_err(|err| PortError::Transport(err.to_string()))
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let network = NetworkConfig::default();
    let mqtt_host = std::env::var("MQTT_HOST").unwrap_or(network.mqtt_host);
    let mqtt_port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(network.mqtt_port);

    let mut mqtt_options = MqttOptions::new("domotica-controller-rust", mqtt_host, mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_last_will(LastWill::new(
        TOPIC_CONTROLLER_STATUS,
        "offline",
        QoS::AtLeastOnce,
        true,
    ));
    let mqtt_user = std::env::var("MQTT_USER").unwrap_or(network.mqtt_user);
    let mqtt_pass = std::env::var("MQTT_PASS").unwrap_or(network.mqtt_pass);
    if !mqtt_user.is_empty() {
        mqtt_options.set_credentials(mqtt_user, mqtt_pass);
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);
    mqtt.subscribe(TOPIC_BOT_IN_FILTER, QoS::AtMostOnce)
        .await
        .context("failed to subscribe to chat topic")?;
    mqtt.publish(TOPIC_CONTROLLER_STATUS, QoS::AtLeastOnce, true, "online")
        .await
        .context("failed to publish controller online status")?;

    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
    let waiters: HttpWaiters = Arc::new(Mutex::new(HashMap::new()));

    let engine = ControllerEngine::new(controller_config());
    let (status_tx, status_rx) = watch::channel(engine.status(monotonic_ms()));

    let sensor = SimSensor {
        fixed_raw: std::env::var("DOMOTICA_SIM_RAW")
            .ok()
            .and_then(|value| value.parse::<f64>().ok()),
        reads: 0,
    };
    let transport = HostTransport {
        inbound: inbound_rx,
        mqtt: mqtt.clone(),
        waiters: waiters.clone(),
    };
    let control = ControlLoop::new(
        engine,
        SimRelay::default(),
        SimIndicators::default(),
        sensor,
        transport,
    );

    spawn_mqtt_loop(eventloop, inbound_tx.clone());
    spawn_control_loop(control, status_tx);
    spawn_state_publish_loop(mqtt.clone(), status_rx.clone());

    let app_state = AppState {
        inbound: inbound_tx,
        waiters,
        status: status_rx,
        next_http_chat: Arc::new(AtomicU64::new(1)),
    };

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/command", post(handle_post_command))
        .with_state(app_state);

    let port = std::env::var("DOMOTICA_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(err) = mqtt
        .publish(TOPIC_CONTROLLER_STATUS, QoS::AtLeastOnce, true, "offline")
        .await
    {
        warn!("failed to publish offline status: {err}");
    }
    Ok(())
}

fn spawn_mqtt_loop(mut eventloop: rumqttc::EventLoop, inbound: mpsc::Sender<InboundMessage>) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    let Some(chat_id) = chat_id_from_topic(&message.topic) else {
                        continue;
                    };
                    if message.payload.len() > MAX_MQTT_PAYLOAD_BYTES {
                        warn!(
                            "dropping oversized chat message from {} ({} bytes)",
                            chat_id,
                            message.payload.len()
                        );
                        continue;
                    }
                    let Ok(text) = String::from_utf8(message.payload.to_vec()) else {
                        warn!("dropping non utf8 chat message from {chat_id}");
                        continue;
                    };
                    if inbound
                        .send(InboundMessage::chat(chat_id, text))
                        .await
                        .is_err()
                    {
                        warn!("control loop stopped; mqtt bridge exiting");
                        return;
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_control_loop(
    mut control: ControlLoop<SimRelay, SimIndicators, SimSensor, HostTransport>,
    status: watch::Sender<ControllerStatus>,
) {
    tokio::spawn(async move {
        let mut interval = control_interval();

        loop {
            interval.tick().await;
            let now_ms = monotonic_ms();

            let report = control.iterate(now_ms);
            log_report(&report);
            status.send_replace(control.engine().status(now_ms));
        }
    });
}

/// Loop ticks are only nominally `LOOP_PERIOD_MS` apart, so the scan gate
/// allows some jitter before it would skip a scan.
fn controller_config() -> ControllerConfig {
    ControllerConfig {
        scan_interval_ms: LOOP_PERIOD_MS.saturating_sub(SCAN_JITTER_MS),
        ..ControllerConfig::default()
    }
}

fn control_interval() -> Interval {
    let mut interval = tokio::time::interval(Duration::from_millis(LOOP_PERIOD_MS));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn spawn_state_publish_loop(mqtt: AsyncClient, status: watch::Receiver<ControllerStatus>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        loop {
            interval.tick().await;

            let payload = status.borrow().to_json();
            match payload {
                Ok(body) => {
                    if let Err(err) = mqtt
                        .publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("controller state publish failed: {err}");
                    }
                }
                Err(err) => warn!("controller state serialization failed: {err}"),
            }
        }
    });
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

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.status.borrow().clone();
    Json(status)
}

async fn handle_post_command(
    State(state): State<AppState>,
    Json(request): Json<CommandRequest>,
) -> impl IntoResponse {
    if request.text.len() > MAX_MQTT_PAYLOAD_BYTES {
        return error_response(StatusCode::PAYLOAD_TOO_LARGE, "Command text too long");
    }

    let id = state.next_http_chat.fetch_add(1, Ordering::Relaxed);
    let chat_id = format!("{HTTP_CHAT_PREFIX}{id}");
    let (tx, rx) = oneshot::channel();

    match state.waiters.lock() {
        Ok(mut waiters) => {
            waiters.insert(chat_id.clone(), tx);
        }
        Err(_) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Reply table unavailable")
        }
    }

    let message = InboundMessage::reply_only(chat_id.clone(), request.text);
    if state.inbound.send(message).await.is_err() {
        forget_waiter(&state.waiters, &chat_id);
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "Control loop is not running");
    }

    match tokio::time::timeout(HTTP_REPLY_TIMEOUT, rx).await {
        Ok(Ok(reply)) => Json(reply).into_response(),
        _ => {
            forget_waiter(&state.waiters, &chat_id);
            error_response(StatusCode::GATEWAY_TIMEOUT, "No reply from control loop")
        }
    }
}

fn forget_waiter(waiters: &HttpWaiters, chat_id: &str) {
    if let Ok(mut waiters) = waiters.lock() {
        waiters.remove(chat_id);
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
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
