use std::collections::{HashMap, HashSet};

use crate::common::{ChatEvent, GroupId, Message};
use crate::network::ConnectionState;

/// Tin nhắn của một nhóm, khử trùng theo id và sắp theo `sent_at`.
#[derive(Debug, Default, Clone)]
pub struct Timeline {
    messages: Vec<Message>,
    seen: HashSet<String>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trả về số tin mới.
    pub fn load_history<I>(&mut self, history: I) -> usize
    where
        I: IntoIterator<Item = Message>,
    {
        history
            .into_iter()
            .map(|message| self.insert(message))
            .filter(|added| *added)
            .count()
    }

    pub fn push_live(&mut self, message: Message) -> bool {
        self.insert(message)
    }

    fn insert(&mut self, message: Message) -> bool {
        if !self.seen.insert(message.id.clone()) {
            return false;
        }
        let Some(sent_at) = message.sent_at else {
            self.messages.push(message);
            return true;
        };

        let mut index = self.messages.len();
        while index > 0 {
            match self.messages[index - 1].sent_at {
                Some(previous) if previous > sent_at => index -= 1,
                _ => break,
            }
        }
        self.messages.insert(index, message);
        true
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

pub fn merge(history: Vec<Message>, live: Vec<Message>) -> Vec<Message> {
    let mut timeline = Timeline::new();
    timeline.load_history(history);
    for message in live {
        timeline.push_live(message);
    }
    timeline.into_messages()
}

/// Trạng thái cục bộ của màn hình chat.
#[derive(Debug)]
pub struct ChatState {
    timelines: HashMap<GroupId, Timeline>,
    active: Option<GroupId>,
    connection: ConnectionState,
}

impl Default for ChatState {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatState {
    pub fn new() -> Self {
        Self {
            timelines: HashMap::new(),
            active: None,
            connection: ConnectionState::Idle,
        }
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn set_active(&mut self, group_id: Option<GroupId>) {
        self.active = group_id;
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn timeline(&self, group_id: &str) -> Option<&Timeline> {
        self.timelines.get(group_id)
    }

    pub fn active_timeline(&self) -> Option<&Timeline> {
        self.active.as_deref().and_then(|group| self.timeline(group))
    }

    pub fn load_history(&mut self, group_id: &str, history: Vec<Message>) -> usize {
        self.timelines
            .entry(group_id.to_string())
            .or_default()
            .load_history(history)
    }

    // Chỉ trả về tin mới của nhóm đang mở.
    pub fn apply(&mut self, event: ChatEvent) -> Option<&Message> {
        match event {
            ChatEvent::StateChanged(state) => {
                self.connection = state;
                None
            }
            ChatEvent::MessageReceived { group_id, message } => {
                let id = message.id.clone();
                let timeline = self.timelines.entry(group_id.clone()).or_default();
                if !timeline.push_live(message) {
                    log::debug!("Duplicate message {id} in group {group_id}");
                    return None;
                }
                if self.active.as_deref() != Some(group_id.as_str()) {
                    return None;
                }
                self.timelines
                    .get(&group_id)?
                    .messages()
                    .iter()
                    .find(|message| message.id == id)
            }
        }
    }
}
