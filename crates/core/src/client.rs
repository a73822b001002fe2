// crates/core/src/client.rs
//! Wiring of the four components around one configuration.

use std::sync::Arc;

use tracing::{info, warn};

use crate::auth::{AuthApi, CredentialStore, FileCredentialStore, HttpAuthApi, MemoryCredentialStore, TokenManager};
use crate::config::ClientConfig;
use crate::error::RequestError;
use crate::gateway::Gateway;
use crate::live::{LiveChannel, LiveState};

/// Token manager, gateway and live channel sharing one session.
#[derive(Clone)]
pub struct FedwatchClient {
    config: ClientConfig,
    tokens: TokenManager,
    gateway: Gateway,
    channel: LiveChannel,
}

impl FedwatchClient {
    /// HTTP client, file-backed credential store, and the backend auth API.
    pub fn new(config: ClientConfig) -> Result<Self, RequestError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("fedwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let store: Arc<dyn CredentialStore> = match config
            .credentials_path
            .clone()
            .or_else(FileCredentialStore::default_path)
        {
            Some(path) => {
                info!(path = %path.display(), "using credential file");
                Arc::new(FileCredentialStore::new(path))
            }
            None => {
                warn!("no data directory; credentials will not survive a restart");
                Arc::new(MemoryCredentialStore::new())
            }
        };
        let api: Arc<dyn AuthApi> = Arc::new(HttpAuthApi::new(http.clone(), &config));
        Ok(Self::with_parts(config, http, api, store))
    }

    /// Assemble from explicit parts.
    pub fn with_parts(
        config: ClientConfig,
        http: reqwest::Client,
        api: Arc<dyn AuthApi>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        let tokens = TokenManager::new(api, store);
        let gateway = Gateway::new(http, &config, tokens.clone());
        let channel = LiveChannel::new(&config, tokens.clone());
        Self {
            config,
            tokens,
            gateway,
            channel,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn channel(&self) -> &LiveChannel {
        &self.channel
    }

    /// A [`LiveState`] subscribed to this client's channel.
    pub fn attach_state(&self) -> LiveState {
        LiveState::attach(&self.channel)
    }

    /// Logout: ends the session, which also stops the live channel.
    pub fn logout(&self) {
        self.tokens.logout();
        self.channel.disconnect();
    }
}
