// crates/types/src/snapshot.rs
//! Read-only views handed to the UI layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::events::{
    ClientProgress, DeviceStatus, GlobalProgress, PredictionEvent, RoundResult, SimulationStatus,
    TrainingStatus,
};

/// Live/offline indicator state of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/src/types/generated/"))]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// `connect()` never called.
    Idle,
    Connecting,
    Live,
    /// Waiting `delay_ms` before the `attempt`-th consecutive reconnect.
    Reconnecting {
        attempt: u32,
        #[serde(rename = "delayMs")]
        delay_ms: u64,
    },
    /// Server rejected the credential. Terminal until the user logs in again.
    Unauthorized,
    /// Deliberately disconnected (logout, shutdown).
    Closed,
}

impl ConnectionStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionStatus::Live)
    }
}

/// Point-in-time copy of everything the aggregator holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/src/types/generated/"))]
#[serde(rename_all = "camelCase")]
pub struct LiveSnapshot {
    /// Newest first, at most 50.
    pub predictions: Vec<PredictionEvent>,
    pub client_progress: BTreeMap<String, ClientProgress>,
    /// Arrival order, one entry per round number.
    pub rounds: Vec<RoundResult>,
    pub global_progress: Option<GlobalProgress>,
    pub training: Option<TrainingStatus>,
    pub devices: BTreeMap<String, DeviceStatus>,
    pub simulation: Option<SimulationStatus>,
    /// Bumped on every applied change.
    #[ts(type = "number")]
    pub revision: u64,
}

impl LiveSnapshot {
    /// Fraction of the buffered predictions labelled as attacks, 0.0–1.0.
    pub fn attack_rate(&self) -> f64 {
        if self.predictions.is_empty() {
            return 0.0;
        }
        let attacks = self.predictions.iter().filter(|p| p.is_attack()).count();
        attacks as f64 / self.predictions.len() as f64
    }

    pub fn latest_round(&self) -> Option<&RoundResult> {
        self.rounds.iter().max_by_key(|r| r.round_number)
    }
}
