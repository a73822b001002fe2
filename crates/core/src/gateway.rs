// crates/core/src/gateway.rs
//! Request gateway: every authenticated REST call goes through here.
//!
//! Attaches the bearer credential, and on a 401 joins the token manager's
//! refresh and replays the request exactly once.

use bytes::Bytes;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::api::{LOGIN_PATH, REFRESH_PATH};
use crate::auth::TokenManager;
use crate::config::ClientConfig;
use crate::error::RequestError;

/// A replayable description of one API call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path below the API base, e.g. `/fl/rounds`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Login and refresh are never retried; a 401 there means the
    /// credentials themselves are bad.
    fn is_auth_exchange(&self) -> bool {
        let path = self.path.split('?').next().unwrap_or_default().trim_matches('/');
        [LOGIN_PATH, REFRESH_PATH]
            .iter()
            .any(|exchange| path == exchange.trim_matches('/'))
    }
}

/// A successful (2xx) response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RequestError> {
        serde_json::from_slice(&self.body).map_err(RequestError::Decode)
    }
}

#[derive(Clone)]
pub struct Gateway {
    http: reqwest::Client,
    config: ClientConfig,
    tokens: TokenManager,
}

impl Gateway {
    pub fn new(http: reqwest::Client, config: &ClientConfig, tokens: TokenManager) -> Self {
        Self {
            http,
            config: config.clone(),
            tokens,
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Send `request`, recovering from one expired access credential.
    ///
    /// A 401 on a login/refresh call, a second 401 after the replay, or a
    /// failed refresh all end the session and return
    /// [`RequestError::Unauthorized`]. Any other non-2xx status comes back as
    /// [`RequestError::Status`] without a retry.
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, RequestError> {
        let mut token = self.tokens.access_token();
        let mut retried = false;

        loop {
            let response = self.dispatch(request, token.as_deref()).await?;
            let status = response.status();

            if status != StatusCode::UNAUTHORIZED {
                let body = response.bytes().await?;
                if status.is_success() {
                    return Ok(ApiResponse { status, body });
                }
                debug!(method = %request.method, path = %request.path, %status, "request failed");
                return Err(RequestError::Status {
                    status,
                    body: String::from_utf8_lossy(&body).into_owned(),
                });
            }

            if request.is_auth_exchange() {
                warn!(path = %request.path, "credential exchange rejected");
                self.tokens.force_logout("credential exchange rejected");
                return Err(RequestError::Unauthorized);
            }
            if retried {
                warn!(path = %request.path, "still unauthorized after refresh");
                self.tokens.force_logout("unauthorized after refresh");
                return Err(RequestError::Unauthorized);
            }
            retried = true;

            debug!(path = %request.path, "access credential rejected, refreshing");
            match self.tokens.refresh_after_rejection(token.as_deref()).await {
                Ok(fresh) => token = Some(fresh),
                Err(e) => {
                    // The token manager has already logged the session out.
                    warn!(path = %request.path, error = %e, "refresh failed, giving up");
                    return Err(RequestError::Unauthorized);
                }
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RequestError> {
        self.send(&ApiRequest::get(path)).await?.json()
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, RequestError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = serde_json::to_value(body).map_err(RequestError::Encode)?;
        self.send(&ApiRequest::post(path, body)).await?.json()
    }

    pub async fn delete(&self, path: &str) -> Result<(), RequestError> {
        self.send(&ApiRequest::delete(path)).await.map(|_| ())
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
    ) -> Result<reqwest::Response, RequestError> {
        let url = reqwest::Url::parse(&self.config.endpoint(&request.path))
            .map_err(|e| RequestError::Url(format!("{}: {e}", request.path)))?;

        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .header("Accept", "application/json");
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        Ok(builder.send().await?)
    }
}
