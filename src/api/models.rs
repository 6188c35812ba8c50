use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::common::types::flexible_id;
use crate::common::{Session, User};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    pub user: User,
}

impl AuthResponse {
    pub fn into_session(self) -> Session {
        Session {
            user: self.user,
            token: self.access_token,
            refresh_token: self.refresh_token,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interests: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(deserialize_with = "flexible_id::deserialize")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "flexible_id::deserialize_option")]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default)]
    pub current_members: Option<u32>,
    #[serde(default)]
    pub max_members: Option<u32>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Chỉ có khi gọi `nearby`.
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub scheduled_date: Option<NaiveDateTime>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateActivityRequest {
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub latitude: f64,
    pub longitude: f64,
    pub scheduled_date: NaiveDateTime,
    pub max_members: u32,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct NearbyQuery<'a> {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "radiusKm")]
    pub radius_km: f64,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    #[serde(deserialize_with = "flexible_id::deserialize")]
    pub id: String,
    #[serde(deserialize_with = "flexible_id::deserialize")]
    pub activity_id: String,
    #[serde(default)]
    pub activity_title: Option<String>,
    #[serde(default, deserialize_with = "flexible_id::deserialize_option")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub review_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateJoinRequest<'a> {
    pub activity_id: &'a str,
    pub message: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReviewRequest<'a> {
    pub review_message: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(deserialize_with = "flexible_id::deserialize")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default, deserialize_with = "flexible_id::deserialize_option")]
    pub reference_id: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    #[serde(default)]
    pub total_elements: Option<u64>,
    #[serde(default)]
    pub number: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_decodes_backend_shape() {
        let activity: Activity = serde_json::from_str(
            r#"{"id":7,"title":"Sunday run","type":"SPORTS","ownerId":3,"currentMembers":2,
                "maxMembers":6,"distance":1.25,"scheduledDate":"2026-10-20T08:30:00",
                "status":"OPEN"}"#,
        )
        .unwrap();
        assert_eq!(activity.id, "7");
        assert_eq!(activity.kind.as_deref(), Some("SPORTS"));
        assert_eq!(activity.owner_id.as_deref(), Some("3"));
        assert_eq!(activity.distance, Some(1.25));
        assert!(activity.scheduled_date.is_some());
    }

    #[test]
    fn auth_response_becomes_session() {
        let response: AuthResponse = serde_json::from_str(
            r#"{"accessToken":"a","refreshToken":"r","tokenType":"Bearer","expiresIn":86400,
                "user":{"id":1,"name":"Demo User","email":"demo@circlo.com"}}"#,
        )
        .unwrap();
        let session = response.into_session();
        assert_eq!(session.token, "a");
        assert_eq!(session.refresh_token.as_deref(), Some("r"));
        assert_eq!(session.user_id(), "1");
    }

    #[test]
    fn nearby_query_omits_missing_type() {
        let query = NearbyQuery {
            latitude: 10.0,
            longitude: 106.5,
            radius_km: 5.0,
            kind: None,
        };
        let json = serde_json::to_value(&query).unwrap();
        assert_eq!(json["radiusKm"], 5.0);
        assert!(json.get("type").is_none());
    }

    #[test]
    fn notification_page_reads_content() {
        let page: Page<Notification> = serde_json::from_str(
            r#"{"content":[{"id":9,"title":"Join request","type":"JOIN_REQUEST",
                "referenceId":4,"isRead":false}],"totalElements":1,"number":0}"#,
        )
        .unwrap();
        assert_eq!(page.content.len(), 1);
        assert_eq!(page.content[0].reference_id.as_deref(), Some("4"));
        assert!(!page.content[0].is_read);
    }
}
