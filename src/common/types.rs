use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type GroupId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    #[default]
    Text,
    Location,
    System,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "TEXT",
            MessageKind::Location => "LOCATION",
            MessageKind::System => "SYSTEM",
        }
    }

    pub fn from_wire(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "TEXT" => Some(MessageKind::Text),
            "LOCATION" => Some(MessageKind::Location),
            "SYSTEM" => Some(MessageKind::System),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain model đại diện một tin nhắn chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub group_id: GroupId,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub kind: MessageKind,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(deserialize_with = "flexible_id::deserialize")]
    pub id: GroupId,
    #[serde(default, deserialize_with = "flexible_id::deserialize_option")]
    pub activity_id: Option<String>,
    #[serde(default, alias = "displayName")]
    pub name: Option<String>,
    #[serde(default)]
    pub activity_title: Option<String>,
    #[serde(default, alias = "members")]
    pub member_count: Option<u32>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl Group {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.activity_title.as_deref())
            .unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(deserialize_with = "flexible_id::deserialize")]
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub profile_image_url: Option<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub is_online: Option<bool>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub user: User,
    pub token: String,
    pub refresh_token: Option<String>,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn display_name(&self) -> &str {
        if self.user.name.is_empty() {
            self.user.email.as_deref().unwrap_or(&self.user.id)
        } else {
            &self.user.name
        }
    }
}

// Id dạng số hoặc chuỗi đều đổi thành `String`.
pub(crate) mod flexible_id {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Signed(i64),
        Unsigned(u64),
    }

    impl From<RawId> for String {
        fn from(raw: RawId) -> Self {
            match raw {
                RawId::Text(text) => text,
                RawId::Signed(value) => value.to_string(),
                RawId::Unsigned(value) => value.to_string(),
            }
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        RawId::deserialize(deserializer).map(String::from)
    }

    pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_accepts_numeric_ids_and_falls_back_for_display_name() {
        let group: Group =
            serde_json::from_str(r#"{"id":7,"activityId":12,"activityTitle":"Morning run"}"#)
                .expect("group");
        assert_eq!(group.id, "7");
        assert_eq!(group.activity_id.as_deref(), Some("12"));
        assert_eq!(group.display_name(), "Morning run");
    }

    #[test]
    fn message_kind_parses_case_insensitively() {
        assert_eq!(MessageKind::from_wire("location"), Some(MessageKind::Location));
        assert_eq!(MessageKind::from_wire(" SYSTEM "), Some(MessageKind::System));
        assert_eq!(MessageKind::from_wire("sticker"), None);
    }

    #[test]
    fn session_display_name_prefers_profile_name() {
        let mut user: User = serde_json::from_str(r#"{"id":"u1","email":"a@b.c"}"#).unwrap();
        let session = Session {
            user: user.clone(),
            token: "t".into(),
            refresh_token: None,
        };
        assert_eq!(session.display_name(), "a@b.c");

        user.name = "Ana".into();
        let session = Session { user, ..session };
        assert_eq!(session.display_name(), "Ana");
    }
}
