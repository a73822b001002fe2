// crates/monitor/src/fl.rs
//! Federated training REST endpoints used by the monitor.

use fedwatch_core::{Gateway, RequestError};
use fedwatch_types::RoundResult;
use serde::{Deserialize, Serialize};

pub const STATUS_PATH: &str = "/fl/status";
pub const ROUNDS_PATH: &str = "/fl/rounds";

/// GET /fl/status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlStatus {
    #[serde(default)]
    pub is_training: bool,
    #[serde(default)]
    pub current_round: Option<u32>,
    #[serde(default)]
    pub total_rounds: Option<u32>,
    #[serde(default)]
    pub active_clients: u32,
    #[serde(default)]
    pub total_rounds_completed: u32,
}

pub async fn fetch_status(gateway: &Gateway) -> Result<FlStatus, RequestError> {
    gateway.get_json(STATUS_PATH).await
}

/// Completed rounds, for seeding the round log before the stream connects.
pub async fn fetch_rounds(gateway: &Gateway) -> Result<Vec<RoundResult>, RequestError> {
    gateway.get_json(ROUNDS_PATH).await
}
