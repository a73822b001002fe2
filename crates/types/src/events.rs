// crates/types/src/events.rs
//! Domain payloads carried by the live stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::envelope::{kinds, LiveMessage, MalformedMessage};

// =============================================================================
// Payloads
// =============================================================================

/// One inference result for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/src/types/generated/"))]
#[serde(rename_all = "camelCase")]
pub struct PredictionEvent {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(alias = "device_id")]
    pub device_id: String,
    #[serde(default, alias = "client_id")]
    pub client_id: Option<i64>,
    pub score: f64,
    /// "benign" | "attack"
    pub label: String,
    pub confidence: f64,
    #[serde(default, alias = "attack_type")]
    pub attack_type: Option<String>,
    #[serde(default, alias = "model_version")]
    pub model_version: Option<String>,
    #[serde(default, alias = "inference_latency_ms")]
    pub inference_latency_ms: Option<f64>,
    #[serde(default, deserialize_with = "crate::timestamp::lenient")]
    #[ts(type = "string | null")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl PredictionEvent {
    pub fn is_attack(&self) -> bool {
        self.label.eq_ignore_ascii_case("attack")
    }
}

/// Latest training snapshot for one FL client. Always complete, never a delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/src/types/generated/"))]
#[serde(rename_all = "camelCase")]
pub struct ClientProgress {
    #[serde(alias = "client_id")]
    pub client_id: String,
    /// Phase tag: "training", "sending_weights", "evaluating", ...
    #[serde(default, alias = "phase")]
    pub status: String,
    #[serde(default)]
    pub round: Option<u32>,
    #[serde(default, alias = "total_rounds")]
    pub total_rounds: Option<u32>,
    #[serde(default)]
    pub epoch: Option<u32>,
    #[serde(default, alias = "total_epochs")]
    pub total_epochs: Option<u32>,
    #[serde(default, alias = "epoch_loss")]
    pub loss: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default, alias = "num_samples")]
    pub num_samples: Option<u32>,
    #[serde(default, alias = "progress_pct", alias = "percent_complete")]
    pub progress_pct: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Aggregated result of one FL round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/src/types/generated/"))]
#[serde(rename_all = "camelCase")]
pub struct RoundResult {
    #[serde(alias = "round_number")]
    pub round_number: u32,
    #[serde(default, alias = "global_loss")]
    pub loss: Option<f64>,
    #[serde(default, alias = "global_accuracy")]
    pub accuracy: Option<f64>,
    #[serde(default, alias = "num_clients")]
    pub num_clients: Option<u32>,
    #[serde(default, alias = "aggregation_method")]
    pub aggregation_method: Option<String>,
    #[serde(default, alias = "total_rounds")]
    pub total_rounds: Option<u32>,
}

/// Run-wide progress of the FL server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/src/types/generated/"))]
#[serde(rename_all = "camelCase")]
pub struct GlobalProgress {
    #[serde(default, alias = "current_round")]
    pub current_round: u32,
    #[serde(default, alias = "total_rounds")]
    pub total_rounds: u32,
    #[serde(default, alias = "aggregation_method")]
    pub aggregation_method: Option<String>,
    /// Homomorphic encryption enabled for aggregation.
    #[serde(default, alias = "use_he", alias = "encrypted")]
    pub use_he: bool,
}

impl GlobalProgress {
    /// 0.0–100.0
    pub fn percent(&self) -> f64 {
        if self.total_rounds == 0 {
            return 0.0;
        }
        (f64::from(self.current_round) / f64::from(self.total_rounds) * 100.0).min(100.0)
    }
}

/// Training lifecycle notifications (`training_start`, `training_complete`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/src/types/generated/"))]
#[serde(rename_all = "camelCase")]
pub struct TrainingStatus {
    #[serde(default)]
    pub status: String,
    #[serde(default, alias = "total_rounds")]
    pub total_rounds: Option<u32>,
    #[serde(default, alias = "num_clients")]
    pub num_clients: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/src/types/generated/"))]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    #[serde(alias = "device_id")]
    pub device_id: String,
    /// "online" | "offline" | "under_attack" | ...
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "codegen", ts(export, export_to = "../../../web/src/types/generated/"))]
#[serde(rename_all = "camelCase")]
pub struct SimulationStatus {
    /// "starting" | "running" | "stopping" | "stopped" | "error"
    pub state: String,
    #[serde(default)]
    pub scenario: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

// =============================================================================
// Closed event set
// =============================================================================

/// Every message kind the dashboard understands, decoded from a [`LiveMessage`].
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    Prediction(PredictionEvent),
    ClientProgress(ClientProgress),
    RoundResult(RoundResult),
    GlobalProgress(GlobalProgress),
    Training(TrainingStatus),
    DeviceStatus(DeviceStatus),
    Simulation(SimulationStatus),
    Connected,
    /// Valid envelope with a tag this build does not know.
    Unknown(String),
}

impl LiveEvent {
    /// Decode a message by its tag. Unknown tags are not an error.
    pub fn from_message(msg: &LiveMessage) -> Result<Self, MalformedMessage> {
        let event = match msg.kind.as_str() {
            kinds::PREDICTION => {
                let mut prediction: PredictionEvent = msg.payload()?;
                if prediction.timestamp.is_none() {
                    prediction.timestamp = msg.timestamp;
                }
                LiveEvent::Prediction(prediction)
            }
            kinds::FL_PROGRESS => LiveEvent::ClientProgress(msg.payload()?),
            kinds::FL_ROUND => LiveEvent::RoundResult(msg.payload()?),
            kinds::FL_STATUS => LiveEvent::GlobalProgress(msg.payload()?),
            kinds::TRAINING_START | kinds::TRAINING_COMPLETE | kinds::TRAINING_STATUS => {
                let mut status: TrainingStatus = if msg.data.is_null() {
                    TrainingStatus {
                        status: String::new(),
                        total_rounds: None,
                        num_clients: None,
                    }
                } else {
                    msg.payload()?
                };
                if status.status.is_empty() {
                    status.status = match msg.kind.as_str() {
                        kinds::TRAINING_START => "started",
                        kinds::TRAINING_COMPLETE => "completed",
                        _ => "unknown",
                    }
                    .into();
                }
                LiveEvent::Training(status)
            }
            kinds::DEVICE_STATUS => LiveEvent::DeviceStatus(msg.payload()?),
            kinds::SIMULATION_STATUS => LiveEvent::Simulation(msg.payload()?),
            kinds::CONNECTED => LiveEvent::Connected,
            other => LiveEvent::Unknown(other.to_string()),
        };
        Ok(event)
    }
}

// =============================================================================
// Tests
// =============================================================================
