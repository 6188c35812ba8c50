use serde::Serialize;

use super::client::ApiClient;
use crate::common::{Group, Message};
use crate::error::Result;
use crate::network::codec::{self, WireMessage};

#[derive(Serialize)]
struct HistoryQuery {
    page: u32,
    size: u32,
    limit: u32,
}

impl ApiClient {
    pub async fn group_for_activity(&self, activity_id: &str) -> Result<Group> {
        self.get(&format!("/chat/groups/activity/{activity_id}"))
            .await
    }
}

/// Chỉ đọc lịch sử; việc merge với tin realtime nằm ở [`crate::ui::state::Timeline`].
#[derive(Clone)]
pub struct HistoryLoader {
    api: ApiClient,
}

impl HistoryLoader {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn load(&self, group_id: &str, page: u32, page_size: u32) -> Result<Vec<Message>> {
        let query = HistoryQuery {
            page,
            size: page_size,
            limit: page_size,
        };
        let wire: Vec<WireMessage> = self
            .api
            .get_query(&format!("/chat/groups/{group_id}/messages"), &query)
            .await?;
        let messages = codec::decode_history(wire, group_id);
        log::debug!("Loaded {} messages of history for {group_id}", messages.len());
        Ok(messages)
    }
}
