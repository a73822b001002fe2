// crates/core/src/auth/api.rs
//! Backend auth endpoints.

use async_trait::async_trait;
use fedwatch_types::{LoginRequest, NewUser, RefreshRequest, TokenPair, UserProfile};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

use crate::config::ClientConfig;
use crate::error::AuthError;

// ── Endpoints ───────────────────────────────────────────────────────────

pub const REGISTER_PATH: &str = "/auth/register";
pub const LOGIN_PATH: &str = "/auth/login";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const PROFILE_PATH: &str = "/auth/me";

/// Calls the token manager makes. Implemented over HTTP in production and by
/// scripted fakes in tests.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn register(&self, user: &NewUser) -> Result<UserProfile, AuthError>;

    /// Invalid credentials map to [`AuthError::InvalidCredentials`].
    async fn login(&self, username: &str, password: &str) -> Result<TokenPair, AuthError>;

    /// A rejected refresh credential maps to [`AuthError::RefreshRejected`].
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError>;

    /// A rejected access credential maps to [`AuthError::Unauthorized`].
    async fn profile(&self, access_token: &str) -> Result<UserProfile, AuthError>;
}

/// [`AuthApi`] over the backend's JSON endpoints.
///
/// Talks to the endpoints directly, never through the gateway, so an auth
/// failure here cannot recurse into another refresh.
#[derive(Clone)]
pub struct HttpAuthApi {
    http: reqwest::Client,
    config: ClientConfig,
}

impl HttpAuthApi {
    pub fn new(http: reqwest::Client, config: &ClientConfig) -> Self {
        Self {
            http,
            config: config.clone(),
        }
    }

    async fn read<T: DeserializeOwned>(
        response: reqwest::Response,
        on_reject: impl FnOnce(String) -> AuthError,
        reject: &[StatusCode],
    ) -> Result<T, AuthError> {
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(AuthError::from);
        }
        let body = response.text().await.unwrap_or_default();
        let message = detail(&body);
        if reject.contains(&status) {
            return Err(on_reject(message));
        }
        Err(AuthError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl AuthApi for HttpAuthApi {
    async fn register(&self, user: &NewUser) -> Result<UserProfile, AuthError> {
        let response = self
            .http
            .post(self.config.endpoint(REGISTER_PATH))
            .json(user)
            .send()
            .await?;
        Self::read(response, |m| AuthError::Api { status: 409, message: m }, &[StatusCode::CONFLICT]).await
    }

    async fn login(&self, username: &str, password: &str) -> Result<TokenPair, AuthError> {
        let body = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let response = self
            .http
            .post(self.config.endpoint(LOGIN_PATH))
            .json(&body)
            .send()
            .await?;
        // The backend answers bad credentials with 404 ("Invalid username or password").
        Self::read(
            response,
            |_| AuthError::InvalidCredentials,
            &[StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN, StatusCode::NOT_FOUND],
        )
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let body = RefreshRequest {
            refresh_token: refresh_token.to_string(),
        };
        let response = self
            .http
            .post(self.config.endpoint(REFRESH_PATH))
            .json(&body)
            .send()
            .await?;
        Self::read(
            response,
            AuthError::RefreshRejected,
            &[StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN, StatusCode::NOT_FOUND],
        )
        .await
    }

    async fn profile(&self, access_token: &str) -> Result<UserProfile, AuthError> {
        let response = self
            .http
            .get(self.config.endpoint(PROFILE_PATH))
            .bearer_auth(access_token)
            .send()
            .await?;
        Self::read(
            response,
            |_| AuthError::Unauthorized,
            &[StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN],
        )
        .await
    }
}

/// FastAPI puts the human-readable reason in `{"detail": ...}`.
fn detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| match v.get("detail") {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}
