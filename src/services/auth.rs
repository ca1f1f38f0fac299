use crate::config::UploaderConfig;
use crate::error::{SessionError, TransportError};
use crate::services::session::SessionContext;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

pub const OBTAIN_PATH: &str = "/auth/tokens/obtain/";
pub const REFRESH_PATH: &str = "/auth/tokens/refresh/";

#[derive(Debug, Deserialize, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

/// Refresh answers with a new access token, and a new refresh token when
/// the server rotates them.
#[derive(Debug, Deserialize, Serialize)]
pub struct RefreshedToken {
    pub access: String,
    pub refresh: Option<String>,
}

/// Client for the JWT token endpoints of the BrosFiles API.
pub struct AuthClient {
    client: Client,
    obtain_url: String,
    refresh_url: String,
}

impl AuthClient {
    pub fn new(client: Client, config: &UploaderConfig) -> Self {
        Self {
            client,
            obtain_url: config.api_url(OBTAIN_PATH),
            refresh_url: config.api_url(REFRESH_PATH),
        }
    }

    pub async fn obtain_tokens(&self, username: &str, password: &str) -> Result<TokenPair, SessionError> {
        self.post(
            &self.obtain_url,
            json!({ "username": username, "password": password }),
        )
        .await
    }

    pub async fn refresh_token(&self, refresh: &str) -> Result<RefreshedToken, SessionError> {
        self.post(&self.refresh_url, json!({ "refresh": refresh })).await
    }

    /// Signs in and stores both tokens in the session.
    pub async fn sign_in(
        &self,
        session: &mut SessionContext,
        username: &str,
        password: &str,
    ) -> Result<(), SessionError> {
        let tokens = self.obtain_tokens(username, password).await?;
        session.set_tokens(tokens.access, tokens.refresh)?;
        info!("✅ Signed in as {}", username);
        Ok(())
    }

    /// Exchanges the stored refresh token for a new access token.
    pub async fn refresh_session(&self, session: &mut SessionContext) -> Result<(), SessionError> {
        let refresh = session
            .refresh_token()
            .ok_or(SessionError::NotAuthenticated)?
            .to_string();

        let refreshed = self.refresh_token(&refresh).await?;
        session.set_access_token(refreshed.access)?;
        if let Some(rotated) = refreshed.refresh {
            session.set_refresh_token(rotated)?;
        }
        info!("🔄 Access token refreshed");
        Ok(())
    }

    async fn post<T: DeserializeOwned>(
        &self,
        url: &str,
        body: serde_json::Value,
    ) -> Result<T, SessionError> {
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(TransportError::from)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(SessionError::InvalidCredentials);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SessionError::Transport(TransportError::Decode(e.to_string())))
    }
}
