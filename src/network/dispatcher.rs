use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::codec::decode_message;
use super::frame::{Command, Frame};
use super::registry::SubscriptionRegistry;
use crate::common::GroupId;
use crate::error::{ChatError, Result};

static TOPIC_GROUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/topic/chat/(?P<group>[^/]+)$").expect("static topic pattern")
});

pub fn group_from_destination(destination: &str) -> Option<&str> {
    TOPIC_GROUP
        .captures(destination)
        .and_then(|caps| caps.name("group"))
        .map(|group| group.as_str())
}

pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    /// `None` khi không có nhóm nào đang nghe topic này.
    pub fn dispatch(&self, frame: &Frame) -> Result<Option<GroupId>> {
        if frame.command != Command::Message {
            return Err(ChatError::Decode(format!(
                "expected MESSAGE, got {}",
                frame.command
            )));
        }

        let destination = frame.get("destination");
        let Some((group_id, callback)) = self.registry.route(frame.get("subscription"), destination)
        else {
            log::debug!(
                "No subscriber for {}; dropping frame",
                destination.unwrap_or("<no destination>")
            );
            return Ok(None);
        };

        let hint = destination
            .and_then(group_from_destination)
            .unwrap_or(&group_id);
        let message = decode_message(&frame.body, hint)?;
        log::debug!("Message {} for group {group_id}", message.id);
        callback(message);
        Ok(Some(group_id))
    }
}
