// crates/core/src/live/mod.rs
//! Live stream: connector, handler registry, and the aggregated view.

pub mod backoff;
pub mod channel;
pub mod registry;
pub mod state;

pub use backoff::Backoff;
pub use channel::{LiveChannel, CLOSE_UNAUTHORIZED};
pub use registry::{Handler, Subscription, Topic};
pub use state::{LiveState, AGGREGATED_KINDS, PREDICTION_CAPACITY};
