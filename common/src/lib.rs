pub mod auto_mode;
pub mod command;
pub mod config;
pub mod control_loop;
pub mod engine;
pub mod indicators;
pub mod ports;
pub mod sensor;
pub mod timer;
pub mod topics;
pub mod types;

pub use auto_mode::{AutoModeController, AutoTick, Cadence};
pub use command::{Command, CommandError};
pub use config::{ControllerConfig, NetworkConfig, TemperatureLimits};
pub use control_loop::{ControlLoop, HandledMessage, LoopReport};
pub use engine::{ControllerEngine, EngineAction};
pub use ports::{
    BotTransport, InboundMessage, IndicatorPanel, PortError, RelayDriver, Reply, TemperatureInput,
};
pub use timer::{RelayTimer, TimerStatus};
pub use topics::*;
pub use types::{ControllerStatus, Indicator, RelayAction};
