use serde::{Deserialize, Serialize};

/// What a pending timer does to the relay when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RelayAction {
    On,
    Off,
}

impl RelayAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }

    pub fn relay_on(self) -> bool {
        matches!(self, Self::On)
    }

    pub fn from_relay(on: bool) -> Self {
        if on {
            Self::On
        } else {
            Self::Off
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Indicator {
    Normal,
    Hot,
    Cold,
}

impl Indicator {
    pub const ALL: [Indicator; 3] = [Self::Normal, Self::Hot, Self::Cold];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Hot => "HOT",
            Self::Cold => "COLD",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    #[serde(rename = "currentTemp")]
    pub current_temp: f64,
    pub indicator: &'static str,
    #[serde(rename = "relayOn")]
    pub relay_on: bool,
    #[serde(rename = "timerActive")]
    pub timer_active: bool,
    #[serde(rename = "timerAction")]
    pub timer_action: Option<&'static str>,
    #[serde(rename = "timerRemainingSec")]
    pub timer_remaining_sec: u64,
    #[serde(rename = "autoMode")]
    pub auto_mode: bool,
    #[serde(rename = "targetTemp")]
    pub target_temp: Option<i32>,
    #[serde(rename = "uptimeMs")]
    pub uptime_ms: u64,
}

impl ControllerStatus {
    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
