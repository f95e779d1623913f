//! Boundaries between the control core and the outside world. The core never
//! touches pins or sockets; the controller binary supplies these.

use serde::Serialize;
use thiserror::Error;

use crate::types::Indicator;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    #[error("gpio write failed: {0}")]
    Gpio(String),
    #[error("sensor read failed: {0}")]
    Sensor(String),
    #[error("transport failed: {0}")]
    Transport(String),
}

pub trait RelayDriver {
    fn set_relay(&mut self, on: bool) -> Result<(), PortError>;
    fn relay(&self) -> bool;
}

pub trait IndicatorPanel {
    fn set_indicator(&mut self, kind: Indicator, on: bool) -> Result<(), PortError>;
}

pub trait TemperatureInput {
    /// Raw ADC units, before conversion to degrees.
    fn read_raw(&mut self) -> Result<f64, PortError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub chat_id: String,
    pub text: String,
    /// Request/response sessions get their reply but never receive
    /// notifications, so they do not take over the notification chat.
    pub reply_only: bool,
}

impl InboundMessage {
    pub fn chat(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            text: text.into(),
            reply_only: false,
        }
    }

    pub fn reply_only(chat_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            reply_only: true,
            ..Self::chat(chat_id, text)
        }
    }
}

pub type Keyboard = Vec<Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyboard: Option<Keyboard>,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: None,
        }
    }

    pub fn with_keyboard(text: impl Into<String>, keyboard: Keyboard) -> Self {
        Self {
            text: text.into(),
            keyboard: Some(keyboard),
        }
    }

    /// Appends a note on its own line.
    pub fn push_line(&mut self, line: &str) {
        self.text.push('\n');
        self.text.push_str(line);
    }
}

pub trait BotTransport {
    /// Returns whatever arrived since the last poll without blocking.
    fn poll_messages(&mut self) -> Result<Vec<InboundMessage>, PortError>;
    fn send_reply(&mut self, chat_id: &str, reply: &Reply) -> Result<(), PortError>;
}
