use std::fmt::Display;

use chrono::TimeZone;

use crate::common::{Message, MessageKind};
use crate::network::ConnectionState;

/// Một dòng chat: `[HH:MM] name: text`.
pub fn format_message<Tz>(message: &Message, own_user_id: &str, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let time = message
        .sent_at
        .map(|sent_at| sent_at.with_timezone(tz).format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string());

    if message.kind == MessageKind::System {
        return format!("[{time}] * {}", message.content);
    }

    let name = if message.sender_id == own_user_id {
        "you"
    } else if message.sender_name.is_empty() {
        message.sender_id.as_str()
    } else {
        message.sender_name.as_str()
    };
    match message.kind {
        MessageKind::Location => format!("[{time}] {name}: [location] {}", message.content),
        _ => format!("[{time}] {name}: {}", message.content),
    }
}

pub fn format_state(state: &ConnectionState) -> String {
    match state {
        ConnectionState::GaveUp { .. } => {
            format!("!! {state}. Type /quit and open the chat again to retry.")
        }
        ConnectionState::ConnectFailed(_) => format!("!! {state}"),
        other => format!("-- {other} --"),
    }
}
