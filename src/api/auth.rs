use super::client::ApiClient;
use super::models::{AuthResponse, LoginRequest, RefreshRequest, SignupRequest};
use crate::common::Session;
use crate::error::{ChatError, Result};

impl ApiClient {
    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        let response: AuthResponse = self
            .post("/auth/login", &LoginRequest { email, password })
            .await?;
        self.persist(response)
    }

    pub async fn signup(&self, request: &SignupRequest) -> Result<Session> {
        let response: AuthResponse = self.post("/auth/signup", request).await?;
        self.persist(response)
    }

    pub async fn refresh(&self) -> Result<Session> {
        let refresh_token = self
            .store()
            .get(crate::storage::session_store::REFRESH_TOKEN_KEY)?
            .ok_or(ChatError::MissingToken)?;
        let response: AuthResponse = self
            .post(
                "/auth/refresh",
                &RefreshRequest {
                    refresh_token: &refresh_token,
                },
            )
            .await?;
        self.persist(response)
    }

    // Xoá session cục bộ dù server trả lỗi.
    pub async fn logout(&self) -> Result<()> {
        if self.store().token()?.is_some() {
            if let Err(err) = self.post_unit::<()>("/auth/logout", None).await {
                log::warn!("Server-side logout failed: {err}");
            }
        }
        self.store().clear()
    }

    pub fn current_session(&self) -> Result<Option<Session>> {
        self.store().load_session()
    }

    fn persist(&self, response: AuthResponse) -> Result<Session> {
        let session = response.into_session();
        self.store().save_session(&session)?;
        log::info!("Signed in as {}", session.display_name());
        Ok(session)
    }
}
