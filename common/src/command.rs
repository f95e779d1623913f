//! Chat command grammar.
//!
//! The first token names the action; up to [`MAX_COMMAND_ARGS`] more tokens
//! are its arguments. A leading `/` and a `@botname` suffix on the action are
//! ignored and matching is case-insensitive. Text that does not name a known
//! action is a menu request.

use thiserror::Error;

use crate::{
    config::{ControllerConfig, MAX_COMMAND_ARGS},
    types::RelayAction,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Menu,
    Relay(RelayAction),
    RelayStatus,
    SetTimer { action: RelayAction, delay_secs: u64 },
    CancelTimer,
    TimerStatus,
    EnableAuto { target_c: i32 },
    DisableAuto,
    AutoStatus,
    Temperature,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("`{action}` takes at most {max} arguments")]
    TooManyArguments { action: String, max: usize },
    #[error("`{action}` is missing its {what}")]
    MissingArgument {
        action: &'static str,
        what: &'static str,
    },
    #[error("`{action}` does not understand `{value}`")]
    UnknownArgument { action: &'static str, value: String },
    #[error("`{action}` takes no further arguments, got `{value}`")]
    UnexpectedArgument { action: &'static str, value: String },
    #[error("`{value}` is not a whole number")]
    InvalidNumber { value: String },
    #[error("delay must be between 1 and {max} seconds")]
    DelayOutOfRange { max: u64 },
    #[error("target must be between {min} and {max} degrees")]
    TargetOutOfRange { min: i32, max: i32 },
}

impl CommandError {
    /// Usage line for the action the error belongs to.
    pub fn usage(&self) -> &'static str {
        match self {
            Self::MissingArgument { action, .. }
            | Self::UnknownArgument { action, .. }
            | Self::UnexpectedArgument { action, .. } => usage_for(action),
            Self::DelayOutOfRange { .. } => usage_for("timer"),
            Self::TargetOutOfRange { .. } => usage_for("auto"),
            Self::TooManyArguments { .. } | Self::InvalidNumber { .. } => MENU_TEXT,
        }
    }
}

/// Splits a message into its action token and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tokens<'a> {
    pub action: String,
    pub args: Vec<&'a str>,
}

pub fn tokenize(text: &str) -> Tokens<'_> {
    let mut parts = text.split_whitespace();
    let action = parts
        .next()
        .map(|first| {
            let first = first.strip_prefix('/').unwrap_or(first);
            let first = first.split('@').next().unwrap_or(first);
            first.to_ascii_lowercase()
        })
        .unwrap_or_default();

    Tokens {
        action,
        args: parts.collect(),
    }
}

impl Command {
    pub fn parse(text: &str, config: &ControllerConfig) -> Result<Self, CommandError> {
        let tokens = tokenize(text);
        if tokens.args.len() > MAX_COMMAND_ARGS {
            return Err(CommandError::TooManyArguments {
                action: tokens.action,
                max: MAX_COMMAND_ARGS,
            });
        }

        let raw_first = tokens.args.first().copied();
        let first = raw_first.map(str::to_ascii_lowercase);
        let second = tokens.args.get(1).copied();

        match tokens.action.as_str() {
            "on" => bare("relay", raw_first, Self::Relay(RelayAction::On)),
            "off" => bare("relay", raw_first, Self::Relay(RelayAction::Off)),
            "status" => bare("relay", raw_first, Self::RelayStatus),
            "relay" => match first.as_deref() {
                Some("on") => bare("relay", second, Self::Relay(RelayAction::On)),
                Some("off") => bare("relay", second, Self::Relay(RelayAction::Off)),
                Some("status") => bare("relay", second, Self::RelayStatus),
                Some(other) => Err(unknown("relay", other)),
                None => Err(missing("relay", "state (on/off/status)")),
            },
            "timer" => match first.as_deref() {
                Some("on") => parse_timer(RelayAction::On, second, config),
                Some("off") => parse_timer(RelayAction::Off, second, config),
                Some("cancel") => bare("timer", second, Self::CancelTimer),
                Some("status") => bare("timer", second, Self::TimerStatus),
                None => Ok(Self::TimerStatus),
                Some(other) => Err(unknown("timer", other)),
            },
            "auto" => match first.as_deref() {
                Some("on") => parse_auto(second, config),
                Some("off") => bare("auto", second, Self::DisableAuto),
                Some("status") => bare("auto", second, Self::AutoStatus),
                None => Ok(Self::AutoStatus),
                Some(other) => Err(unknown("auto", other)),
            },
            "temp" | "temperature" => bare("temp", raw_first, Self::Temperature),
            _ => Ok(Self::Menu),
        }
    }
}

fn parse_timer(
    action: RelayAction,
    delay: Option<&str>,
    config: &ControllerConfig,
) -> Result<Command, CommandError> {
    let delay = delay.ok_or(CommandError::MissingArgument {
        action: "timer",
        what: "delay in seconds",
    })?;
    let delay_secs = parse_number::<u64>(delay)?;
    if delay_secs == 0 || delay_secs > config.max_timer_delay_secs {
        return Err(CommandError::DelayOutOfRange {
            max: config.max_timer_delay_secs,
        });
    }
    Ok(Command::SetTimer { action, delay_secs })
}

fn parse_auto(target: Option<&str>, config: &ControllerConfig) -> Result<Command, CommandError> {
    let target = target.ok_or(CommandError::MissingArgument {
        action: "auto",
        what: "target temperature",
    })?;
    let target_c = parse_number::<i32>(target)?;
    if !config.limits.contains(target_c) {
        return Err(CommandError::TargetOutOfRange {
            min: config.limits.min_target_c,
            max: config.limits.max_target_c,
        });
    }
    Ok(Command::EnableAuto { target_c })
}

fn parse_number<T: std::str::FromStr>(value: &str) -> Result<T, CommandError> {
    value.parse::<T>().map_err(|_| CommandError::InvalidNumber {
        value: value.to_string(),
    })
}

/// Accepts `command` only when nothing follows its last expected token.
fn bare(
    action: &'static str,
    extra: Option<&str>,
    command: Command,
) -> Result<Command, CommandError> {
    match extra {
        Some(value) => Err(CommandError::UnexpectedArgument {
            action,
            value: value.to_string(),
        }),
        None => Ok(command),
    }
}

fn unknown(action: &'static str, value: &str) -> CommandError {
    CommandError::UnknownArgument {
        action,
        value: value.to_string(),
    }
}

fn missing(action: &'static str, what: &'static str) -> CommandError {
    CommandError::MissingArgument { action, what }
}

fn usage_for(action: &str) -> &'static str {
    match action {
        "relay" => "Usage: /relay on | /relay off | /relay status",
        "timer" => "Usage: /timer on <seconds> | /timer off <seconds> | /timer cancel | /timer status",
        "auto" => "Usage: /auto on <target °C> | /auto off | /auto status",
        "temp" => "Usage: /temp",
        _ => MENU_TEXT,
    }
}

pub const MENU_TEXT: &str = "Available commands:\n\
/relay on - switch the relay on\n\
/relay off - switch the relay off\n\
/relay status - show the relay state\n\
/timer on <seconds> - switch on after a delay\n\
/timer off <seconds> - switch off after a delay\n\
/timer cancel - drop the pending timer\n\
/timer status - show the pending timer\n\
/auto on <target> - keep the room at <target> °C\n\
/auto off - leave automatic mode\n\
/auto status - show automatic mode\n\
/temp - show the current temperature";

/// Reply keyboard shown alongside the menu: one row per subsystem.
pub fn menu_keyboard() -> Vec<Vec<String>> {
    [
        &["/relay on", "/relay off", "/relay status"][..],
        &["/timer status", "/timer cancel"][..],
        &["/auto status", "/auto off", "/temp"][..],
    ]
    .iter()
    .map(|row| row.iter().map(|label| label.to_string()).collect())
    .collect()
}
