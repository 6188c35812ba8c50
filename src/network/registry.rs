use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::frame::{Command, Frame};
use super::transport::FrameSink;
use crate::common::{GroupId, Message};
use crate::error::{ChatError, Result};

pub type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;

pub fn topic_for(group_id: &str) -> String {
    format!("/topic/chat/{group_id}")
}

struct Subscription {
    id: String,
    destination: String,
    callback: MessageCallback,
}

/// Group id -> subscription, tối đa một entry mỗi nhóm.
pub struct SubscriptionRegistry {
    sink: Arc<dyn FrameSink>,
    entries: Mutex<HashMap<GroupId, Subscription>>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new(sink: Arc<dyn FrameSink>) -> Self {
        Self {
            sink,
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<GroupId, Subscription>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join lại nhóm đã join thì không làm gì, callback cũ được giữ.
    pub fn join<F>(&self, group_id: &str, on_message: F) -> Result<()>
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        let mut entries = self.entries();
        if entries.contains_key(group_id) {
            log::debug!("Already joined group {group_id}");
            return Ok(());
        }
        if !self.sink.is_connected() {
            return Err(ChatError::NotConnected);
        }

        let id = format!("sub-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let destination = topic_for(group_id);
        self.sink.send_frame(subscribe_frame(&id, &destination))?;

        log::info!("Joined group {group_id} ({id})");
        entries.insert(
            group_id.to_string(),
            Subscription {
                id,
                destination,
                callback: Arc::new(on_message),
            },
        );
        Ok(())
    }

    pub fn leave(&self, group_id: &str) -> bool {
        let Some(subscription) = self.entries().remove(group_id) else {
            return false;
        };
        if self.sink.is_connected() {
            if let Err(err) = self.sink.send_frame(unsubscribe_frame(&subscription.id)) {
                log::warn!("UNSUBSCRIBE for group {group_id} not sent: {err}");
            }
        }
        log::info!("Left group {group_id}");
        true
    }

    pub fn is_joined(&self, group_id: &str) -> bool {
        self.entries().contains_key(group_id)
    }

    pub fn joined_groups(&self) -> Vec<GroupId> {
        let mut groups: Vec<_> = self.entries().keys().cloned().collect();
        groups.sort();
        groups
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Gửi lại SUBSCRIBE sau khi kết nối lại, giữ nguyên id.
    pub(crate) fn resubscribe_all(&self) -> Result<()> {
        let entries = self.entries();
        for (group_id, subscription) in entries.iter() {
            self.sink
                .send_frame(subscribe_frame(&subscription.id, &subscription.destination))?;
            log::debug!("Resubscribed group {group_id} ({})", subscription.id);
        }
        Ok(())
    }

    pub(crate) fn clear(&self) {
        let drained: Vec<_> = self.entries().drain().collect();
        let connected = self.sink.is_connected();
        for (group_id, subscription) in drained {
            if connected {
                if let Err(err) = self.sink.send_frame(unsubscribe_frame(&subscription.id)) {
                    log::warn!("UNSUBSCRIBE for group {group_id} not sent: {err}");
                }
            }
        }
    }

    // Khớp cả subscription id lẫn destination.
    pub(crate) fn route(
        &self,
        subscription_id: Option<&str>,
        destination: Option<&str>,
    ) -> Option<(GroupId, MessageCallback)> {
        let entries = self.entries();
        let found = match subscription_id {
            Some(sub_id) => entries.iter().find(|(_, entry)| entry.id == sub_id),
            None => {
                let destination = destination?;
                entries
                    .iter()
                    .find(|(_, entry)| entry.destination == destination)
            }
        };
        let (group_id, entry) = found?;
        if destination.is_some_and(|dest| dest != entry.destination) {
            return None;
        }
        Some((group_id.clone(), Arc::clone(&entry.callback)))
    }
}

fn subscribe_frame(id: &str, destination: &str) -> Frame {
    Frame::new(Command::Subscribe)
        .header("id", id)
        .header("destination", destination)
        .header("ack", "auto")
}

fn unsubscribe_frame(id: &str) -> Frame {
    Frame::new(Command::Unsubscribe).header("id", id)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::AtomicBool;

    use super::*;

    #[derive(Default)]
    pub struct RecordingSink {
        pub connected: AtomicBool,
        pub frames: Mutex<Vec<Frame>>,
    }

    impl RecordingSink {
        pub fn connected() -> Arc<Self> {
            let sink = Self::default();
            sink.connected.store(true, Ordering::SeqCst);
            Arc::new(sink)
        }

        pub fn set_connected(&self, connected: bool) {
            self.connected.store(connected, Ordering::SeqCst);
        }

        pub fn sent(&self) -> Vec<Frame> {
            self.frames.lock().unwrap().clone()
        }

        pub fn count(&self, command: Command) -> usize {
            self.sent().iter().filter(|f| f.command == command).count()
        }
    }

    impl FrameSink for RecordingSink {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn send_frame(&self, frame: Frame) -> Result<()> {
            if !self.is_connected() {
                return Err(ChatError::NotConnected);
            }
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }
}
