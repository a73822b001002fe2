// crates/core/src/live/state.rs
//! Live state aggregator: folds stream messages into the dashboard view.
//!
//! Nothing here ages out on its own. The prediction buffer is bounded; every
//! other collection only shrinks through an explicit clear.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use fedwatch_types::envelope::kinds;
use fedwatch_types::{
    ClientProgress, DeviceStatus, GlobalProgress, LiveEvent, LiveMessage, LiveSnapshot,
    PredictionEvent, RoundResult, SimulationStatus, TrainingStatus,
};
use tokio::sync::watch;
use tracing::{debug, trace};

use super::channel::LiveChannel;
use super::registry::Subscription;

/// Size of the recent-predictions ring buffer.
pub const PREDICTION_CAPACITY: usize = 50;

/// Tags the aggregator subscribes to.
pub const AGGREGATED_KINDS: &[&str] = &[
    kinds::PREDICTION,
    kinds::FL_PROGRESS,
    kinds::FL_ROUND,
    kinds::FL_STATUS,
    kinds::TRAINING_START,
    kinds::TRAINING_COMPLETE,
    kinds::TRAINING_STATUS,
    kinds::DEVICE_STATUS,
    kinds::SIMULATION_STATUS,
];

#[derive(Debug, Default)]
struct Aggregate {
    /// Newest first.
    predictions: VecDeque<PredictionEvent>,
    client_progress: BTreeMap<String, ClientProgress>,
    /// Arrival order, unique by round number.
    rounds: Vec<RoundResult>,
    global_progress: Option<GlobalProgress>,
    training: Option<TrainingStatus>,
    devices: BTreeMap<String, DeviceStatus>,
    simulation: Option<SimulationStatus>,
    revision: u64,
}

impl Aggregate {
    /// Fold one event. Returns whether anything changed.
    fn apply(&mut self, event: LiveEvent) -> bool {
        match event {
            LiveEvent::Prediction(p) => {
                self.predictions.push_front(p);
                self.predictions.truncate(PREDICTION_CAPACITY);
                true
            }
            LiveEvent::ClientProgress(p) => {
                // Each update is a complete snapshot of that client.
                self.client_progress.insert(p.client_id.clone(), p);
                true
            }
            LiveEvent::RoundResult(r) => self.push_round(r),
            LiveEvent::GlobalProgress(g) => {
                self.global_progress = Some(g);
                true
            }
            LiveEvent::Training(t) => {
                self.training = Some(t);
                true
            }
            LiveEvent::DeviceStatus(d) => {
                self.devices.insert(d.device_id.clone(), d);
                true
            }
            LiveEvent::Simulation(s) => {
                self.simulation = Some(s);
                true
            }
            LiveEvent::Connected | LiveEvent::Unknown(_) => false,
        }
    }

    fn push_round(&mut self, round: RoundResult) -> bool {
        if self
            .rounds
            .iter()
            .any(|r| r.round_number == round.round_number)
        {
            trace!(round = round.round_number, "duplicate round ignored");
            return false;
        }
        self.rounds.push(round);
        true
    }

    fn snapshot(&self) -> LiveSnapshot {
        LiveSnapshot {
            predictions: self.predictions.iter().cloned().collect(),
            client_progress: self.client_progress.clone(),
            rounds: self.rounds.clone(),
            global_progress: self.global_progress.clone(),
            training: self.training.clone(),
            devices: self.devices.clone(),
            simulation: self.simulation.clone(),
            revision: self.revision,
        }
    }
}

struct StateInner {
    data: RwLock<Aggregate>,
    revision: watch::Sender<u64>,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// Shared aggregated view of the live stream. Cheap to clone.
#[derive(Clone)]
pub struct LiveState {
    inner: Arc<StateInner>,
}

impl Default for LiveState {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveState {
    /// Detached state; feed it with [`ingest`](Self::ingest) or [`apply`](Self::apply).
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(StateInner {
                data: RwLock::new(Aggregate::default()),
                revision,
                subscriptions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// New state fed by `channel`'s dashboard tags.
    pub fn attach(channel: &LiveChannel) -> Self {
        let state = Self::new();
        let subscriptions: Vec<Subscription> = AGGREGATED_KINDS
            .iter()
            .map(|kind| {
                let state = state.clone();
                channel.subscribe(*kind, move |msg: &LiveMessage| state.ingest(msg))
            })
            .collect();
        debug!(handlers = subscriptions.len(), "live state attached");
        *state.lock_subscriptions() = subscriptions;
        state
    }

    /// Start a fresh run view on every `training_start` from `channel`.
    /// Removed by [`detach`](Self::detach) along with the other handlers.
    pub fn reset_on_run_start(&self, channel: &LiveChannel) {
        let state = self.clone();
        let subscription = channel.subscribe(kinds::TRAINING_START, move |msg: &LiveMessage| {
            state.start_run(msg)
        });
        self.lock_subscriptions().push(subscription);
    }

    /// Stop receiving stream messages. The collected state is kept.
    pub fn detach(&self) {
        let subscriptions = std::mem::take(&mut *self.lock_subscriptions());
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Aggregate> {
        self.inner.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Aggregate> {
        self.inner.data.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_subscriptions(&self) -> std::sync::MutexGuard<'_, Vec<Subscription>> {
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Run `change` under the write lock and publish a new revision if it
    /// reports a change.
    fn mutate(&self, change: impl FnOnce(&mut Aggregate) -> bool) -> bool {
        let revision = {
            let mut data = self.write();
            if !change(&mut data) {
                return false;
            }
            data.revision += 1;
            data.revision
        };
        self.inner.revision.send_replace(revision);
        true
    }

    // ── Input ───────────────────────────────────────────────────────────

    /// Decode and fold one message. A malformed payload is returned as an
    /// error and leaves the state untouched.
    pub fn ingest(&self, msg: &LiveMessage) -> anyhow::Result<()> {
        let event = LiveEvent::from_message(msg)?;
        self.apply(event);
        Ok(())
    }

    /// Fold one decoded event. Returns whether the state changed.
    pub fn apply(&self, event: LiveEvent) -> bool {
        self.mutate(|data| data.apply(event))
    }

    /// Fold rounds fetched over REST through the same de-duplication as
    /// streamed rounds. Returns how many were new.
    pub fn seed_rounds(&self, rounds: impl IntoIterator<Item = RoundResult>) -> usize {
        let mut added = 0;
        self.mutate(|data| {
            for round in rounds {
                if data.push_round(round) {
                    added += 1;
                }
            }
            added > 0
        });
        added
    }

    // ── Explicit clears ─────────────────────────────────────────────────

    pub fn clear_predictions(&self) {
        self.mutate(|data| {
            data.predictions.clear();
            true
        });
    }

    pub fn clear_progress(&self) {
        self.mutate(|data| {
            data.client_progress.clear();
            data.global_progress = None;
            true
        });
    }

    pub fn clear_rounds(&self) {
        self.mutate(|data| {
            data.rounds.clear();
            true
        });
    }

    pub fn clear_devices(&self) {
        self.mutate(|data| {
            data.devices.clear();
            true
        });
    }

    /// Reset run-scoped state before a new training run. Predictions and
    /// device status carry over.
    pub fn begin_run(&self) {
        self.mutate(|data| {
            data.rounds.clear();
            data.client_progress.clear();
            data.global_progress = None;
            data.training = None;
            true
        });
    }

    /// [`begin_run`](Self::begin_run), then fold the message that started
    /// the run. The aggregator's own `training_start` handler may already
    /// have folded it; folding twice leaves the same status.
    pub fn start_run(&self, msg: &LiveMessage) -> anyhow::Result<()> {
        self.begin_run();
        self.ingest(msg)
    }

    // ── Output ──────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> LiveSnapshot {
        self.read().snapshot()
    }

    /// Newest first.
    pub fn predictions(&self) -> Vec<PredictionEvent> {
        self.read().predictions.iter().cloned().collect()
    }

    pub fn client_progress(&self) -> BTreeMap<String, ClientProgress> {
        self.read().client_progress.clone()
    }

    pub fn rounds(&self) -> Vec<RoundResult> {
        self.read().rounds.clone()
    }

    pub fn revision(&self) -> u64 {
        self.read().revision
    }

    /// Revision counter for re-rendering; changes on every applied update.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn prediction(i: usize) -> LiveMessage {
        LiveMessage::new(
            kinds::PREDICTION,
            json!({
                "device_id": format!("dev-{i}"),
                "score": 0.5,
                "label": if i % 2 == 0 { "attack" } else { "benign" },
                "confidence": 0.9,
            }),
        )
    }

    fn progress(client: &str, status: &str, epoch: u32) -> LiveMessage {
        LiveMessage::new(
            kinds::FL_PROGRESS,
            json!({"client_id": client, "status": status, "epoch": epoch, "loss": 0.4}),
        )
    }

    fn round(n: u32, loss: f64) -> LiveMessage {
        LiveMessage::new(kinds::FL_ROUND, json!({"round_number": n, "global_loss": loss}))
    }

    #[test]
    fn test_prediction_ring_keeps_newest_fifty() {
        let state = LiveState::new();
        for i in 0..60 {
            state.ingest(&prediction(i)).unwrap();
        }
        let preds = state.predictions();
        assert_eq!(preds.len(), PREDICTION_CAPACITY);
        assert_eq!(preds[0].device_id, "dev-59");
        assert_eq!(preds[49].device_id, "dev-10");
    }

    #[test]
    fn test_progress_is_last_write_wins_without_merge() {
        let state = LiveState::new();
        state.ingest(&progress("c1", "training", 1)).unwrap();
        state.ingest(&progress("c2", "training", 1)).unwrap();
        state
            .ingest(&LiveMessage::new(
                kinds::FL_PROGRESS,
                json!({"client_id": "c1", "status": "completed"}),
            ))
            .unwrap();

        let map = state.client_progress();
        assert_eq!(map.len(), 2);
        assert_eq!(map["c1"].status, "completed");
        // The older epoch/loss fields are not merged into the new snapshot.
        assert_eq!(map["c1"].epoch, None);
        assert_eq!(map["c1"].loss, None);
        assert_eq!(map["c2"].epoch, Some(1));
    }

    #[test]
    fn test_duplicate_round_is_ignored() {
        let state = LiveState::new();
        state.ingest(&round(1, 0.9)).unwrap();
        state.ingest(&round(2, 0.7)).unwrap();
        let before = state.revision();
        state.ingest(&round(2, 0.1)).unwrap();

        let rounds = state.rounds();
        assert_eq!(rounds.len(), 2);
        assert_eq!(rounds[1].loss, Some(0.7));
        assert_eq!(state.revision(), before);
    }

    #[test]
    fn test_seed_rounds_shares_dedup() {
        let state = LiveState::new();
        state.ingest(&round(1, 0.9)).unwrap();
        let seeded = |n: u32| RoundResult {
            round_number: n,
            loss: Some(1.0),
            accuracy: None,
            num_clients: Some(3),
            aggregation_method: Some("fedavg".into()),
            total_rounds: Some(5),
        };
        assert_eq!(state.seed_rounds(vec![seeded(1), seeded(2), seeded(3)]), 2);
        assert_eq!(
            state.rounds().iter().map(|r| r.round_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_malformed_payload_leaves_state_alone() {
        let state = LiveState::new();
        let bad = LiveMessage::new(kinds::FL_ROUND, json!({"round_number": "three"}));
        assert!(state.ingest(&bad).is_err());
        assert_eq!(state.snapshot(), LiveSnapshot::default());
    }

    #[test]
    fn test_clears_are_scoped() {
        let state = LiveState::new();
        state.ingest(&prediction(0)).unwrap();
        state.ingest(&progress("c1", "training", 1)).unwrap();
        state.ingest(&round(1, 0.5)).unwrap();
        state
            .ingest(&LiveMessage::new(
                kinds::DEVICE_STATUS,
                json!({"device_id": "d1", "status": "online"}),
            ))
            .unwrap();

        state.clear_rounds();
        let snap = state.snapshot();
        assert!(snap.rounds.is_empty());
        assert_eq!(snap.predictions.len(), 1);
        assert_eq!(snap.client_progress.len(), 1);

        state.clear_predictions();
        state.clear_devices();
        let snap = state.snapshot();
        assert!(snap.predictions.is_empty());
        assert!(snap.devices.is_empty());
        assert_eq!(snap.client_progress.len(), 1);

        state.clear_progress();
        assert!(state.client_progress().is_empty());
    }

    #[test]
    fn test_begin_run_keeps_predictions_and_devices() {
        let state = LiveState::new();
        state.ingest(&prediction(0)).unwrap();
        state
            .ingest(&LiveMessage::new(
                kinds::DEVICE_STATUS,
                json!({"device_id": "d1", "status": "online"}),
            ))
            .unwrap();
        state.ingest(&progress("c1", "training", 1)).unwrap();
        state.ingest(&round(1, 0.5)).unwrap();
        state
            .ingest(&LiveMessage::new(
                kinds::FL_STATUS,
                json!({"current_round": 1, "total_rounds": 5, "aggregation_method": "fedavg", "use_he": false}),
            ))
            .unwrap();
        state
            .ingest(&LiveMessage::new(
                kinds::TRAINING_START,
                json!({"status": "started", "total_rounds": 5, "num_clients": 3}),
            ))
            .unwrap();

        state.begin_run();
        let snap = state.snapshot();
        assert_eq!(snap.predictions.len(), 1);
        assert_eq!(snap.devices.len(), 1);
        assert!(snap.rounds.is_empty());
        assert!(snap.client_progress.is_empty());
        assert!(snap.global_progress.is_none());
        assert!(snap.training.is_none());
    }

    #[test]
    fn test_start_run_keeps_the_new_run_status() {
        let state = LiveState::new();
        state.ingest(&round(1, 0.5)).unwrap();
        state.ingest(&progress("c1", "training", 3)).unwrap();
        let start = LiveMessage::new(
            kinds::TRAINING_START,
            json!({"status": "started", "total_rounds": 10, "num_clients": 2}),
        );

        // Aggregator folds the start first, then the reset runs.
        state.ingest(&start).unwrap();
        state.start_run(&start).unwrap();

        let snap = state.snapshot();
        assert!(snap.rounds.is_empty());
        assert!(snap.client_progress.is_empty());
        let training = snap.training.expect("run status kept");
        assert_eq!(training.status, "started");
        assert_eq!(training.total_rounds, Some(10));
    }

    #[test]
    fn test_unknown_and_connected_do_not_bump_revision() {
        let state = LiveState::new();
        state.ingest(&LiveMessage::new("connected", json!({}))).unwrap();
        state.ingest(&LiveMessage::new("something_new", json!({}))).unwrap();
        assert_eq!(state.revision(), 0);
    }

    #[tokio::test]
    async fn test_changes_notifies_on_update() {
        let state = LiveState::new();
        let mut rx = state.changes();
        state.ingest(&prediction(1)).unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
        assert_eq!(state.snapshot().revision, 1);
    }
}
