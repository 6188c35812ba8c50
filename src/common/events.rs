use super::types::{GroupId, Message};
use crate::network::ConnectionState;

/// Sự kiện từ tầng mạng gửi lên màn hình chat.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    MessageReceived { group_id: GroupId, message: Message },
    StateChanged(ConnectionState),
}
