// crates/core/src/auth/mod.rs
//! Session credentials: storage, backend calls, and the token manager.

pub mod api;
pub mod manager;
pub mod session;
pub mod store;

pub use api::{AuthApi, HttpAuthApi};
pub use manager::TokenManager;
pub use session::Session;
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
