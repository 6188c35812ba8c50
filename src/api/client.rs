use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{ChatError, Result};
use crate::storage::SessionStore;

/// REST client cho backend Circlo. Gặp 401 thì xoá session đã lưu.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    store: Arc<SessionStore>,
}

impl ApiClient {
    pub fn new(base_url: &str, timeout: Duration, store: Arc<SessionStore>) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            store,
        })
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub(crate) async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.json(self.http.get(self.url(path))).await
    }

    pub(crate) async fn get_query<T, Q>(&self, path: &str, query: &Q) -> Result<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        self.json(self.http.get(self.url(path)).query(query)).await
    }

    pub(crate) async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.json(self.http.post(self.url(path)).json(body)).await
    }

    pub(crate) async fn post_unit<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<()> {
        let mut request = self.http.post(self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        self.execute(request).await.map(|_| ())
    }

    pub(crate) async fn put_unit(&self, path: &str) -> Result<()> {
        self.execute(self.http.put(self.url(path))).await.map(|_| ())
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.execute(request).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| ChatError::Decode(err.to_string()))
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response> {
        let request = match self.store.token()? {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            log::warn!("Server rejected the stored credentials; clearing session");
            self.store.clear()?;
            return Err(ChatError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(&body)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").into());
            log::debug!("{} -> {status}: {message}", self.base_url);
            return Err(ChatError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }
}

fn error_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => value
            .get("message")
            .or_else(|| value.get("error"))
            .and_then(|field| field.as_str())
            .map(String::from),
        Err(_) => Some(body.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_json_message_field() {
        assert_eq!(
            error_message(r#"{"status":400,"message":"Activity is full"}"#).as_deref(),
            Some("Activity is full")
        );
        assert_eq!(
            error_message(r#"{"error":"Bad Request"}"#).as_deref(),
            Some("Bad Request")
        );
        assert_eq!(error_message("Activity not found").as_deref(), Some("Activity not found"));
        assert_eq!(error_message("  "), None);
        assert_eq!(error_message(r#"{"status":500}"#), None);
    }

    #[test]
    fn url_joins_without_double_slashes() {
        let store = Arc::new(SessionStore::in_memory().unwrap());
        let api = ApiClient::new("http://localhost:8082/api/v1/", Duration::from_secs(1), store)
            .unwrap();
        assert_eq!(api.url("/activities/my"), "http://localhost:8082/api/v1/activities/my");
        assert_eq!(api.url("auth/login"), "http://localhost:8082/api/v1/auth/login");
    }
}
