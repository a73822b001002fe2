// crates/core/src/lib.rs
//! Client core of the fedwatch dashboard.
//!
//! - [`auth::TokenManager`] owns the session credentials and refreshes them
//!   single-flight.
//! - [`gateway::Gateway`] sends REST calls and recovers from one expired
//!   access credential per request.
//! - [`live::LiveChannel`] keeps the WebSocket stream open and dispatches
//!   messages by tag.
//! - [`live::LiveState`] folds the stream into the dashboard view.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod live;

pub use auth::{Session, TokenManager};
pub use client::FedwatchClient;
pub use config::{ClientConfig, ReconnectPolicy};
pub use error::{AuthError, ChannelError, ConfigError, RequestError};
pub use gateway::{ApiRequest, ApiResponse, Gateway};
pub use live::{LiveChannel, LiveState, Subscription, Topic};
