use super::client::ApiClient;
use super::models::{
    Activity, CreateActivityRequest, CreateJoinRequest, JoinRequest, NearbyQuery, ReviewRequest,
};
use crate::error::Result;

impl ApiClient {
    pub async fn nearby(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
        kind: Option<&str>,
    ) -> Result<Vec<Activity>> {
        let query = NearbyQuery {
            latitude,
            longitude,
            radius_km,
            kind,
        };
        self.get_query("/activities/nearby", &query).await
    }

    pub async fn create_activity(&self, request: &CreateActivityRequest) -> Result<Activity> {
        self.post("/activities", request).await
    }

    pub async fn activity(&self, id: &str) -> Result<Activity> {
        self.get(&format!("/activities/{id}")).await
    }

    pub async fn my_activities(&self) -> Result<Vec<Activity>> {
        self.get("/activities/my").await
    }

    // Server chỉ trả chuỗi xác nhận nên phải đọc lại activity.
    pub async fn close_activity(&self, id: &str) -> Result<Activity> {
        self.post_unit::<()>(&format!("/activities/{id}/close"), None)
            .await?;
        self.activity(id).await
    }

    pub async fn cancel_activity(&self, id: &str) -> Result<Activity> {
        self.post_unit::<()>(&format!("/activities/{id}/cancel"), None)
            .await?;
        self.activity(id).await
    }

    pub async fn request_to_join(
        &self,
        activity_id: &str,
        message: Option<&str>,
    ) -> Result<JoinRequest> {
        self.post(
            "/join-requests",
            &CreateJoinRequest {
                activity_id,
                message,
            },
        )
        .await
    }

    pub async fn accept_request(&self, id: &str, review: Option<&str>) -> Result<JoinRequest> {
        self.post(
            &format!("/join-requests/{id}/accept"),
            &ReviewRequest {
                review_message: review,
            },
        )
        .await
    }

    pub async fn reject_request(&self, id: &str, review: Option<&str>) -> Result<JoinRequest> {
        self.post(
            &format!("/join-requests/{id}/reject"),
            &ReviewRequest {
                review_message: review,
            },
        )
        .await
    }

    pub async fn requests_for_activity(&self, activity_id: &str) -> Result<Vec<JoinRequest>> {
        self.get(&format!("/join-requests/activity/{activity_id}"))
            .await
    }

    pub async fn my_requests(&self) -> Result<Vec<JoinRequest>> {
        self.get("/join-requests/my").await
    }

    pub async fn members(&self, activity_id: &str) -> Result<Vec<JoinRequest>> {
        self.get(&format!("/join-requests/activity/{activity_id}/members"))
            .await
    }
}
