use std::sync::{Arc, PoisonError, RwLock};

use super::codec::OutboundMessage;
use super::frame::{Command, Frame};
use super::transport::FrameSink;
use crate::common::MessageKind;
use crate::error::{ChatError, Result};

pub fn destination_for(group_id: &str) -> String {
    format!("/app/chat/{group_id}")
}

pub type Credentials = Arc<RwLock<Option<String>>>;

/// Gửi tin không chờ phản hồi; tin của mình quay về qua broker.
pub struct Publisher {
    sink: Arc<dyn FrameSink>,
    credentials: Credentials,
}

impl Publisher {
    pub fn new(sink: Arc<dyn FrameSink>, credentials: Credentials) -> Self {
        Self { sink, credentials }
    }

    pub fn send(&self, group_id: &str, content: &str, kind: MessageKind) -> Result<()> {
        if !self.sink.is_connected() {
            log::warn!("Cannot send to group {group_id}: transport not connected");
            return Err(ChatError::NotConnected);
        }

        let body = serde_json::to_vec(&OutboundMessage { content, kind })?;
        let mut frame = Frame::new(Command::Send)
            .header("destination", destination_for(group_id))
            .header("content-type", "application/json");
        // Server kiểm tra token ở mọi SEND.
        if let Some(token) = self
            .credentials
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref()
        {
            frame = frame.header("Authorization", format!("Bearer {token}"));
        }

        self.sink.send_frame(frame.with_body(body))?;
        log::debug!("Queued {kind} message for group {group_id}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::registry::testing::RecordingSink;

    #[test]
    fn send_while_disconnected_fails_loudly() {
        let sink = std::sync::Arc::new(RecordingSink::default());
        let publisher = Publisher::new(sink.clone(), Credentials::default());
        assert!(matches!(
            publisher.send("g1", "hello", MessageKind::Text),
            Err(ChatError::NotConnected)
        ));
        assert!(sink.sent().is_empty());
    }

    #[test]
    fn send_builds_an_authenticated_json_frame() {
        let sink = RecordingSink::connected();
        let credentials: Credentials = Arc::new(RwLock::new(Some("tok".into())));
        let publisher = Publisher::new(sink.clone(), credentials);

        publisher.send("g42", "hello", MessageKind::Text).unwrap();

        let frame = sink.sent().pop().unwrap();
        assert_eq!(frame.command, Command::Send);
        assert_eq!(frame.get("destination"), Some("/app/chat/g42"));
        assert_eq!(frame.get("Authorization"), Some("Bearer tok"));
        let body: serde_json::Value = serde_json::from_slice(&frame.body).unwrap();
        assert_eq!(body, serde_json::json!({"content": "hello", "type": "TEXT"}));
    }

    #[test]
    fn publishing_does_not_require_a_subscription() {
        let sink = RecordingSink::connected();
        let publisher = Publisher::new(sink.clone(), Credentials::default());
        publisher.send("never-joined", "ping", MessageKind::System).unwrap();
        assert_eq!(sink.count(Command::Subscribe), 0);
        assert_eq!(sink.count(Command::Send), 1);
        assert_eq!(sink.sent()[0].get("Authorization"), None);
    }
}
