//! Acquisition coordinator.
//!
//! Owns which mechanism feeds each vehicle: the subscription channel
//! (push) or the request-response poller. At most one mechanism is live
//! per vehicle at any time. When push abandons a vehicle (circuit breaker
//! or credential rejection) the coordinator falls back to polling so
//! ingestion never silently stops; restoring push is an explicit call,
//! never automatic. Snapshots from both paths funnel through one
//! per-vehicle monotonic-timestamp filter before fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use uuid::Uuid;

use crate::backoff::ReconnectPolicy;
use crate::error::Result;
use crate::protocol::{ClientEvent, ProtocolClient};
use ev_domain::TelemetrySnapshot;

// ===== ACQUISITION MODE =====

/// Which mechanism currently feeds a vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    /// Persistent subscription channel
    Push,
    /// Timer-driven request-response polling
    Poll,
}

impl std::fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Poll => write!(f, "poll"),
        }
    }
}

// ===== ACQUIRER TRAIT =====

/// One acquisition mechanism; the coordinator starts and stops vehicles
/// on it but never reaches into its internals.
#[async_trait]
pub trait Acquirer: Send + Sync {
    async fn start(&self, vehicle_id: Uuid) -> Result<()>;
    async fn stop(&self, vehicle_id: Uuid) -> Result<()>;
}

/// Out-of-band notification from an acquirer to the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquirerEvent {
    /// The mechanism gave up on this vehicle; fall back to the other one
    Abandoned { vehicle_id: Uuid },
}

// ===== PUSH ACQUIRER =====

/// Control messages from the `PushAcquirer` handle to its worker
#[derive(Debug, Clone, Copy)]
pub enum PushCommand {
    Start(Uuid),
    Stop(Uuid),
}

/// Handle side of the push mechanism; the worker owns the connection.
pub struct PushAcquirer {
    command_tx: mpsc::UnboundedSender<PushCommand>,
}

impl PushAcquirer {
    #[must_use]
    pub fn new(command_tx: mpsc::UnboundedSender<PushCommand>) -> Self {
        Self { command_tx }
    }
}

#[async_trait]
impl Acquirer for PushAcquirer {
    async fn start(&self, vehicle_id: Uuid) -> Result<()> {
        // Worker gone means shutdown is in progress; nothing to do
        let _ = self.command_tx.send(PushCommand::Start(vehicle_id));
        Ok(())
    }

    async fn stop(&self, vehicle_id: Uuid) -> Result<()> {
        let _ = self.command_tx.send(PushCommand::Stop(vehicle_id));
        Ok(())
    }
}

/// Single-connection push worker: one subscription channel multiplexing
/// every push-mode vehicle, reconnecting with backoff between drops.
pub struct PushWorker {
    client: ProtocolClient,
    policy: ReconnectPolicy,
    properties: Vec<String>,
    subscription_ids: HashMap<Uuid, String>,
    command_rx: mpsc::UnboundedReceiver<PushCommand>,
    snapshot_tx: mpsc::Sender<TelemetrySnapshot>,
    event_tx: mpsc::Sender<AcquirerEvent>,
    shutdown: watch::Receiver<bool>,
    pending_delay: Option<Duration>,
}

impl PushWorker {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: ProtocolClient,
        policy: ReconnectPolicy,
        properties: Vec<String>,
        command_rx: mpsc::UnboundedReceiver<PushCommand>,
        snapshot_tx: mpsc::Sender<TelemetrySnapshot>,
        event_tx: mpsc::Sender<AcquirerEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            policy,
            properties,
            subscription_ids: HashMap::new(),
            command_rx,
            snapshot_tx,
            event_tx,
            shutdown,
            pending_delay: None,
        }
    }

    pub async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                self.client.unsubscribe_all().await;
                return;
            }

            if let Some(delay) = self.pending_delay.take() {
                tracing::info!(delay_ms = delay.as_millis() as u64, "Reconnect backoff");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.shutdown.changed() => continue,
                }
            }

            if !self.subscription_ids.is_empty() && !self.client.is_ready() {
                self.try_connect().await;
                continue;
            }

            if self.client.is_ready() {
                tokio::select! {
                    _ = self.shutdown.changed() => {}
                    command = self.command_rx.recv() => match command {
                        Some(command) => self.handle_command(command).await,
                        None => return,
                    },
                    event = self.client.next_event() => self.handle_event(event).await,
                }
            } else {
                // No vehicles: idle until told to start one
                tokio::select! {
                    _ = self.shutdown.changed() => {}
                    command = self.command_rx.recv() => match command {
                        Some(command) => self.handle_command(command).await,
                        None => return,
                    },
                }
            }
        }
    }

    async fn try_connect(&mut self) {
        match self.client.connect().await {
            Ok(()) => match self.client.resubscribe_all().await {
                Ok(()) => {
                    self.policy.record_success();
                    tracing::info!(
                        vehicles = self.subscription_ids.len(),
                        "Subscriptions re-established"
                    );
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Resubscription failed after connect");
                    self.on_connection_failure().await;
                }
            },
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    consecutive = self.policy.consecutive_errors(),
                    "Connection attempt failed"
                );
                self.on_connection_failure().await;
            }
        }
    }

    async fn on_connection_failure(&mut self) {
        match self.policy.record_failure() {
            Some(delay) => self.pending_delay = Some(delay),
            None => {
                tracing::error!(
                    consecutive = self.policy.consecutive_errors(),
                    "Consecutive failure limit reached, abandoning push"
                );
                self.abandon_all().await;
            }
        }
    }

    /// Hand every push vehicle back to the coordinator and reset the
    /// breaker so a later explicit restore starts clean.
    ///
    /// The client's subscription registry is drained too; a record left
    /// behind would be re-requested by the next reconnect and revive push
    /// for a vehicle that has moved to polling.
    async fn abandon_all(&mut self) {
        for (vehicle_id, id) in std::mem::take(&mut self.subscription_ids) {
            self.client.unsubscribe(&id).await;
            let _ = self.event_tx.try_send(AcquirerEvent::Abandoned { vehicle_id });
        }
        self.policy.record_success();
    }

    async fn handle_command(&mut self, command: PushCommand) {
        match command {
            PushCommand::Start(vehicle_id) => {
                if self.subscription_ids.contains_key(&vehicle_id) {
                    return;
                }
                match self
                    .client
                    .subscribe(vehicle_id, self.properties.clone())
                    .await
                {
                    Ok(id) => {
                        tracing::info!(%vehicle_id, subscription = %id, "Push subscription requested");
                        self.subscription_ids.insert(vehicle_id, id);
                    }
                    Err(err) => {
                        tracing::warn!(%vehicle_id, error = %err, "Subscribe failed");
                        let _ = self.event_tx.try_send(AcquirerEvent::Abandoned { vehicle_id });
                    }
                }
            }
            PushCommand::Stop(vehicle_id) => {
                if let Some(id) = self.subscription_ids.remove(&vehicle_id) {
                    self.client.unsubscribe(&id).await;
                    tracing::info!(%vehicle_id, "Push subscription stopped");
                }
            }
        }
    }

    async fn handle_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Snapshot(snapshot) => {
                if self.snapshot_tx.send(snapshot).await.is_err() {
                    tracing::warn!("Snapshot channel closed, dropping");
                }
            }
            ClientEvent::Disconnected(reason) => {
                tracing::warn!(?reason, "Connection dropped");
                self.on_connection_failure().await;
            }
            ClientEvent::AuthRejected { message } => {
                // Credential problem; retrying with the same token is futile
                tracing::error!(%message, "Credential rejected, abandoning push");
                self.abandon_all().await;
            }
            ClientEvent::SubscriptionError { id, message } => {
                let vehicle_id = self
                    .subscription_ids
                    .iter()
                    .find(|(_, sub)| **sub == id)
                    .map(|(v, _)| *v);
                if let Some(vehicle_id) = vehicle_id {
                    tracing::warn!(%vehicle_id, %message, "Subscription errored, abandoning vehicle");
                    self.subscription_ids.remove(&vehicle_id);
                    let _ = self.event_tx.try_send(AcquirerEvent::Abandoned { vehicle_id });
                }
            }
        }
    }
}

// ===== COORDINATOR =====

struct CoordinatorInner {
    push: Arc<dyn Acquirer>,
    poll: Arc<dyn Acquirer>,
    modes: Mutex<HashMap<Uuid, AcquisitionMode>>,
    fanout_tx: broadcast::Sender<Arc<TelemetrySnapshot>>,
}

/// Cheap-to-clone handle over the acquisition mechanisms.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

impl Coordinator {
    #[must_use]
    pub fn new(push: Arc<dyn Acquirer>, poll: Arc<dyn Acquirer>, fanout_capacity: usize) -> Self {
        let (fanout_tx, _) = broadcast::channel(fanout_capacity);
        Self {
            inner: Arc::new(CoordinatorInner {
                push,
                poll,
                modes: Mutex::new(HashMap::new()),
                fanout_tx,
            }),
        }
    }

    /// Deduplicated snapshot stream shared by every downstream consumer
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<TelemetrySnapshot>> {
        self.inner.fanout_tx.subscribe()
    }

    #[must_use]
    pub fn mode_of(&self, vehicle_id: Uuid) -> Option<AcquisitionMode> {
        self.inner.modes.lock().get(&vehicle_id).copied()
    }

    /// Begin acquisition for a vehicle under the given mode. Switching an
    /// already-tracked vehicle stops the old mechanism first.
    pub async fn track(&self, vehicle_id: Uuid, mode: AcquisitionMode) -> Result<()> {
        let previous = self.inner.modes.lock().insert(vehicle_id, mode);
        match previous {
            Some(old) if old == mode => return Ok(()),
            Some(old) => self.acquirer(old).stop(vehicle_id).await?,
            None => {}
        }
        self.acquirer(mode).start(vehicle_id).await
    }

    /// Stop acquisition for a vehicle entirely.
    pub async fn untrack(&self, vehicle_id: Uuid) -> Result<()> {
        if let Some(mode) = self.inner.modes.lock().remove(&vehicle_id) {
            self.acquirer(mode).stop(vehicle_id).await?;
        }
        Ok(())
    }

    /// Switch a vehicle from push to polling after push gave up on it.
    pub async fn fallback_to_poll(&self, vehicle_id: Uuid) -> Result<()> {
        tracing::warn!(%vehicle_id, "Falling back to polling acquisition");
        self.track(vehicle_id, AcquisitionMode::Poll).await
    }

    /// Explicitly restore push for a vehicle that previously fell back.
    pub async fn restore_push(&self, vehicle_id: Uuid) -> Result<()> {
        tracing::info!(%vehicle_id, "Restoring push acquisition");
        self.track(vehicle_id, AcquisitionMode::Push).await
    }

    fn acquirer(&self, mode: AcquisitionMode) -> &dyn Acquirer {
        match mode {
            AcquisitionMode::Push => self.inner.push.as_ref(),
            AcquisitionMode::Poll => self.inner.poll.as_ref(),
        }
    }
}

// ===== COORDINATOR TASK =====

/// Event loop half of the coordinator: funnels snapshots from both
/// mechanisms through per-vehicle timestamp dedup and fans them out.
pub struct CoordinatorTask {
    coordinator: Coordinator,
    snapshot_rx: mpsc::Receiver<TelemetrySnapshot>,
    event_rx: mpsc::Receiver<AcquirerEvent>,
    shutdown: watch::Receiver<bool>,
    last_seen: HashMap<Uuid, DateTime<Utc>>,
}

impl CoordinatorTask {
    #[must_use]
    pub fn new(
        coordinator: Coordinator,
        snapshot_rx: mpsc::Receiver<TelemetrySnapshot>,
        event_rx: mpsc::Receiver<AcquirerEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            coordinator,
            snapshot_rx,
            event_rx,
            shutdown,
            last_seen: HashMap::new(),
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        return;
                    }
                }
                snapshot = self.snapshot_rx.recv() => match snapshot {
                    Some(snapshot) => self.handle_snapshot(snapshot),
                    None => return,
                },
                event = self.event_rx.recv() => match event {
                    Some(AcquirerEvent::Abandoned { vehicle_id }) => {
                        if let Err(err) = self.coordinator.fallback_to_poll(vehicle_id).await {
                            tracing::error!(%vehicle_id, error = %err, "Poll fallback failed");
                        }
                    }
                    None => return,
                },
            }
        }
    }

    /// Drop any snapshot not strictly newer than the last one seen for its
    /// vehicle. Covers both duplicate delivery and the poll/push overlap
    /// during a mechanism switch.
    fn handle_snapshot(&mut self, snapshot: TelemetrySnapshot) {
        let last = self.last_seen.get(&snapshot.vehicle_id);
        if last.is_some_and(|seen| snapshot.recorded_at <= *seen) {
            tracing::debug!(
                vehicle_id = %snapshot.vehicle_id,
                recorded_at = %snapshot.recorded_at,
                "Duplicate or stale snapshot dropped"
            );
            return;
        }
        self.last_seen
            .insert(snapshot.vehicle_id, snapshot.recorded_at);
        // Fan-out failure just means no subscribers yet
        let _ = self.coordinator.inner.fanout_tx.send(Arc::new(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ev_domain::{
        BatteryState, CellChemistry, ChargerState, ClimateState, ClosureState, GearState,
        GeoPoint, OtaState, PowerState, TirePressures,
    };

    #[derive(Default)]
    struct RecordingAcquirer {
        started: Mutex<Vec<Uuid>>,
        stopped: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl Acquirer for RecordingAcquirer {
        async fn start(&self, vehicle_id: Uuid) -> Result<()> {
            self.started.lock().push(vehicle_id);
            Ok(())
        }

        async fn stop(&self, vehicle_id: Uuid) -> Result<()> {
            self.stopped.lock().push(vehicle_id);
            Ok(())
        }
    }

    fn harness() -> (Coordinator, Arc<RecordingAcquirer>, Arc<RecordingAcquirer>) {
        let push = Arc::new(RecordingAcquirer::default());
        let poll = Arc::new(RecordingAcquirer::default());
        let coordinator = Coordinator::new(push.clone(), poll.clone(), 64);
        (coordinator, push, poll)
    }

    fn snapshot(vehicle_id: Uuid, recorded_at: DateTime<Utc>) -> TelemetrySnapshot {
        TelemetrySnapshot {
            vehicle_id,
            recorded_at,
            location: GeoPoint::new(47.6, -122.3, 50.0),
            odometer_mi: 1000.0,
            battery: BatteryState {
                level_pct: 60.0,
                charge_limit_pct: 80.0,
                usable_capacity_kwh: None,
                chemistry: CellChemistry::Nmc,
            },
            range_estimate_mi: 180.0,
            power_state: PowerState::Ready,
            gear_state: GearState::Park,
            drive_mode: None,
            charger_state: ChargerState::Disconnected,
            charge_port_open: false,
            charge_power_kw: None,
            climate: ClimateState {
                inside_temp_c: None,
                outside_temp_c: None,
                hvac_on: false,
            },
            closures: ClosureState::default(),
            tires: TirePressures::default(),
            ota: OtaState::default(),
            raw: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn fallback_stops_push_and_starts_poll() {
        let (coordinator, push, poll) = harness();
        let vehicle = Uuid::new_v4();

        coordinator.track(vehicle, AcquisitionMode::Push).await.unwrap();
        assert_eq!(coordinator.mode_of(vehicle), Some(AcquisitionMode::Push));

        coordinator.fallback_to_poll(vehicle).await.unwrap();
        assert_eq!(coordinator.mode_of(vehicle), Some(AcquisitionMode::Poll));
        assert_eq!(push.stopped.lock().as_slice(), &[vehicle]);
        assert_eq!(poll.started.lock().as_slice(), &[vehicle]);
    }

    #[tokio::test]
    async fn restore_push_is_explicit_and_symmetric() {
        let (coordinator, push, poll) = harness();
        let vehicle = Uuid::new_v4();

        coordinator.track(vehicle, AcquisitionMode::Poll).await.unwrap();
        coordinator.restore_push(vehicle).await.unwrap();

        assert_eq!(coordinator.mode_of(vehicle), Some(AcquisitionMode::Push));
        assert_eq!(poll.stopped.lock().as_slice(), &[vehicle]);
        assert_eq!(push.started.lock().len(), 1);
    }

    #[tokio::test]
    async fn tracking_same_mode_twice_is_idempotent() {
        let (coordinator, push, _poll) = harness();
        let vehicle = Uuid::new_v4();

        coordinator.track(vehicle, AcquisitionMode::Push).await.unwrap();
        coordinator.track(vehicle, AcquisitionMode::Push).await.unwrap();
        assert_eq!(push.started.lock().len(), 1);
        assert!(push.stopped.lock().is_empty());
    }

    #[tokio::test]
    async fn stale_snapshots_are_dropped_before_fanout() {
        let (coordinator, _push, _poll) = harness();
        let mut rx = coordinator.subscribe();
        let (snapshot_tx, snapshot_rx) = mpsc::channel(8);
        let (_event_tx, event_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = CoordinatorTask::new(coordinator, snapshot_rx, event_rx, shutdown_rx);
        tokio::spawn(task.run());

        let vehicle = Uuid::new_v4();
        let now = Utc::now();
        snapshot_tx.send(snapshot(vehicle, now)).await.unwrap();
        // Same timestamp and an older one: both stale
        snapshot_tx.send(snapshot(vehicle, now)).await.unwrap();
        snapshot_tx
            .send(snapshot(vehicle, now - chrono::Duration::seconds(10)))
            .await
            .unwrap();
        snapshot_tx
            .send(snapshot(vehicle, now + chrono::Duration::seconds(10)))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.recorded_at, now);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.recorded_at, now + chrono::Duration::seconds(10));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn abandonment_triggers_poll_fallback() {
        let (coordinator, _push, poll) = harness();
        let vehicle = Uuid::new_v4();
        coordinator.track(vehicle, AcquisitionMode::Push).await.unwrap();

        let (_snapshot_tx, snapshot_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = CoordinatorTask::new(coordinator.clone(), snapshot_rx, event_rx, shutdown_rx);
        tokio::spawn(task.run());

        event_tx
            .send(AcquirerEvent::Abandoned { vehicle_id: vehicle })
            .await
            .unwrap();

        // Give the task a chance to process
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(coordinator.mode_of(vehicle), Some(AcquisitionMode::Poll));
        assert_eq!(poll.started.lock().as_slice(), &[vehicle]);
    }
}
