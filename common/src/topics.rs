/// Inbound chat messages: `domotica/bot/in/<chat id>`, payload is the text.
pub const TOPIC_BOT_IN_FILTER: &str = "domotica/bot/in/+";
pub const TOPIC_BOT_IN_PREFIX: &str = "domotica/bot/in/";
/// Replies and notifications: `domotica/bot/out/<chat id>`, JSON payload.
pub const TOPIC_BOT_OUT_PREFIX: &str = "domotica/bot/out/";

pub const TOPIC_CONTROLLER_STATE: &str = "domotica/controller/state";
pub const TOPIC_CONTROLLER_STATUS: &str = "domotica/controller/status";

pub fn reply_topic(chat_id: &str) -> String {
    format!("{TOPIC_BOT_OUT_PREFIX}{chat_id}")
}

pub fn chat_id_from_topic(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(TOPIC_BOT_IN_PREFIX)
        .filter(|chat_id| !chat_id.is_empty() && !chat_id.contains('/'))
}
