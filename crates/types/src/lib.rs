// crates/types/src/lib.rs
//! Wire types shared between the fedwatch client core and the dashboard UI.
//!
//! Everything the UI renders (snapshots, connection status, user profile) is
//! exported to TypeScript with ts-rs when the `codegen` feature is enabled.

pub mod auth;
pub mod envelope;
pub mod events;
pub mod snapshot;
pub mod timestamp;

pub use auth::{AuthState, LoginRequest, NewUser, RefreshRequest, StoredCredentials, TokenPair, UserProfile};
pub use envelope::{kinds, LiveMessage, MalformedMessage};
pub use events::{
    ClientProgress, DeviceStatus, GlobalProgress, LiveEvent, PredictionEvent, RoundResult,
    SimulationStatus, TrainingStatus,
};
pub use snapshot::{ConnectionStatus, LiveSnapshot};
