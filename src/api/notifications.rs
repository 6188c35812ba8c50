use super::client::ApiClient;
use super::models::{Notification, Page};
use crate::error::Result;

impl ApiClient {
    pub async fn notifications(&self) -> Result<Vec<Notification>> {
        let page: Page<Notification> = self.get("/notifications").await?;
        Ok(page.content)
    }

    pub async fn unread_notifications(&self) -> Result<Vec<Notification>> {
        self.get("/notifications/unread").await
    }

    pub async fn unread_count(&self) -> Result<u64> {
        self.get("/notifications/unread/count").await
    }

    pub async fn mark_read(&self, id: &str) -> Result<()> {
        self.put_unit(&format!("/notifications/{id}/read")).await
    }

    pub async fn mark_all_read(&self) -> Result<()> {
        self.put_unit("/notifications/read-all").await
    }
}
