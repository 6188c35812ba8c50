//! Server gửi hai thế hệ tên trường: `userId`/`userName`/`sentAt` (mới) và
//! `senderId`/`senderName`/`timestamp` (cũ). Tên mới được ưu tiên.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::common::types::flexible_id;
use crate::common::{Message, MessageKind};
use crate::error::{ChatError, Result};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(default, deserialize_with = "flexible_id::deserialize_option")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "flexible_id::deserialize_option")]
    pub group_id: Option<String>,
    #[serde(default, deserialize_with = "flexible_id::deserialize_option")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub sent_at: Option<WireTimestamp>,
    #[serde(default, deserialize_with = "flexible_id::deserialize_option")]
    pub sender_id: Option<String>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub timestamp: Option<WireTimestamp>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireTimestamp {
    Text(String),
    Millis(i64),
}

impl WireTimestamp {
    pub fn parse(&self) -> Option<DateTime<Utc>> {
        match self {
            WireTimestamp::Millis(millis) => Utc.timestamp_millis_opt(*millis).single(),
            WireTimestamp::Text(text) => parse_timestamp(text),
        }
    }

    fn is_blank(&self) -> bool {
        matches!(self, WireTimestamp::Text(text) if text.trim().is_empty())
    }
}

// Không có offset thì coi là UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn prefer(current: Option<String>, legacy: Option<String>) -> Option<String> {
    current
        .filter(|value| !value.trim().is_empty())
        .or(legacy)
}

impl WireMessage {
    pub fn into_message(self, group_hint: &str) -> Result<Message> {
        let id = self
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ChatError::Decode("message without id".into()))?;
        let content = self
            .content
            .ok_or_else(|| ChatError::Decode(format!("message {id} without content")))?;

        let kind = match self.kind.as_deref() {
            None => MessageKind::Text,
            Some(raw) => MessageKind::from_wire(raw).unwrap_or_else(|| {
                log::debug!("Unknown message type `{raw}` on {id}; treating as TEXT");
                MessageKind::Text
            }),
        };

        let sent_at = self
            .sent_at
            .filter(|ts| !ts.is_blank())
            .or(self.timestamp)
            .and_then(|ts| {
                let parsed = ts.parse();
                if parsed.is_none() {
                    log::debug!("Unparseable timestamp {ts:?} on message {id}");
                }
                parsed
            });

        Ok(Message {
            group_id: self
                .group_id
                .filter(|group| !group.is_empty())
                .unwrap_or_else(|| group_hint.to_string()),
            sender_id: prefer(self.user_id, self.sender_id).unwrap_or_default(),
            sender_name: prefer(self.user_name, self.sender_name).unwrap_or_default(),
            id,
            content,
            kind,
            sent_at,
        })
    }
}

pub fn decode_message(body: &[u8], group_hint: &str) -> Result<Message> {
    let wire: WireMessage = serde_json::from_slice(body)
        .map_err(|err| ChatError::Decode(format!("message body: {err}")))?;
    wire.into_message(group_hint)
}

/// Dòng lỗi bị bỏ qua kèm cảnh báo.
pub fn decode_history(wire: Vec<WireMessage>, group_id: &str) -> Vec<Message> {
    wire.into_iter()
        .filter_map(|entry| match entry.into_message(group_id) {
            Ok(message) => Some(message),
            Err(err) => {
                log::warn!("Skipping history entry in group {group_id}: {err}");
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage<'a> {
    pub content: &'a str,
    #[serde(rename = "type")]
    pub kind: MessageKind,
}

#[cfg(test)]
mod tests {
    use chrono::Timelike;

    use super::*;

    #[test]
    fn current_field_names_win_over_legacy() {
        let body = br#"{"id":1,"userId":5,"senderId":9,"userName":"Ana","senderName":"Old",
            "content":"hi","type":"TEXT","sentAt":"2025-03-01T10:15:00Z","timestamp":"2020-01-01T00:00:00Z"}"#;
        let message = decode_message(body, "42").unwrap();
        assert_eq!(message.id, "1");
        assert_eq!(message.sender_id, "5");
        assert_eq!(message.sender_name, "Ana");
        assert_eq!(message.sent_at.unwrap().to_rfc3339(), "2025-03-01T10:15:00+00:00");
        assert_eq!(message.group_id, "42");
    }

    #[test]
    fn legacy_names_fill_missing_or_empty_current_names() {
        let body = br#"{"id":"m1","userName":"","senderId":"u1","senderName":"Bo",
            "content":"hi","timestamp":"2025-03-01T10:15:30.250"}"#;
        let message = decode_message(body, "g42").unwrap();
        assert_eq!(message.sender_id, "u1");
        assert_eq!(message.sender_name, "Bo");
        assert_eq!(message.kind, MessageKind::Text);
        let sent_at = message.sent_at.unwrap();
        assert_eq!((sent_at.hour(), sent_at.minute(), sent_at.second()), (10, 15, 30));
    }

    #[test]
    fn envelope_group_id_beats_topic_hint() {
        let message = decode_message(br#"{"id":3,"groupId":7,"content":"x"}"#, "8").unwrap();
        assert_eq!(message.group_id, "7");
    }

    #[test]
    fn epoch_millis_and_garbage_timestamps() {
        let message =
            decode_message(br#"{"id":3,"content":"x","sentAt":1700000000000}"#, "1").unwrap();
        assert_eq!(message.sent_at.unwrap().timestamp(), 1_700_000_000);

        let message =
            decode_message(br#"{"id":4,"content":"x","sentAt":"yesterday"}"#, "1").unwrap();
        assert!(message.sent_at.is_none());
    }

    #[test]
    fn malformed_bodies_are_decode_errors() {
        assert!(matches!(decode_message(b"not json", "1"), Err(ChatError::Decode(_))));
        assert!(matches!(decode_message(br#"{"content":"x"}"#, "1"), Err(ChatError::Decode(_))));
        assert!(matches!(decode_message(br#"{"id":1}"#, "1"), Err(ChatError::Decode(_))));
    }

    #[test]
    fn history_skips_bad_rows() {
        let wire: Vec<WireMessage> =
            serde_json::from_str(r#"[{"id":1,"content":"a"},{"content":"orphan"},{"id":2,"content":"b"}]"#)
                .unwrap();
        let ids: Vec<_> = decode_history(wire, "9").into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn outbound_body_shape() {
        let body = serde_json::to_value(OutboundMessage {
            content: "hello",
            kind: MessageKind::Location,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"content": "hello", "type": "LOCATION"}));
    }
}
