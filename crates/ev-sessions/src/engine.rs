//! Session derivation engine.
//!
//! Drives the per-vehicle state machines over the unified snapshot stream
//! and owns every session write. The engine is the single consumer of a
//! vehicle's snapshots (the acquisition coordinator guarantees at most one
//! mechanism per vehicle), so session persistence is serialized per vehicle
//! by construction.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::charge::{ChargeMachine, ChargeOutcome};
use crate::config::SessionConfig;
use crate::drive::{DriveMachine, DriveOutcome};
use crate::error::Result;
use ev_domain::{ChargingSession, Drive, TelemetrySnapshot};
use ev_persistence::{ChargeStore, DriveStore};

/// Per-tick result handed to the pipeline.
///
/// Closed charge sessions carry the calibration fields the battery-health
/// analyzer consumes.
#[derive(Debug, Default)]
pub struct TickOutput {
    /// Snapshot arrived out of order and was dropped
    pub dropped: bool,
    pub closed_drive: Option<Drive>,
    pub closed_charge: Option<ChargingSession>,
}

struct VehicleMachines {
    drive: DriveMachine,
    charge: ChargeMachine,
    last_ts: Option<DateTime<Utc>>,
}

/// Stateful engine owning both machines per vehicle plus their persistence.
pub struct SessionEngine {
    drives: Arc<dyn DriveStore>,
    charges: Arc<dyn ChargeStore>,
    config: SessionConfig,
    vehicles: HashMap<Uuid, VehicleMachines>,
}

impl SessionEngine {
    #[must_use]
    pub fn new(
        drives: Arc<dyn DriveStore>,
        charges: Arc<dyn ChargeStore>,
        config: SessionConfig,
    ) -> Self {
        Self {
            drives,
            charges,
            config,
            vehicles: HashMap::new(),
        }
    }

    /// Consume one snapshot in arrival order.
    ///
    /// Out-of-order snapshots are dropped, not reordered; every session
    /// mutation the machines report is persisted before this returns.
    pub async fn handle_snapshot(&mut self, snap: &TelemetrySnapshot) -> Result<TickOutput> {
        let config = &self.config;
        let vm = self
            .vehicles
            .entry(snap.vehicle_id)
            .or_insert_with(|| Self::machines_for(snap.vehicle_id, config));

        if let Some(last) = vm.last_ts {
            if snap.recorded_at < last {
                tracing::warn!(
                    vehicle_id = %snap.vehicle_id,
                    recorded_at = %snap.recorded_at,
                    last_seen = %last,
                    "Dropping out-of-order snapshot"
                );
                return Ok(TickOutput {
                    dropped: true,
                    ..TickOutput::default()
                });
            }
        }
        vm.last_ts = Some(snap.recorded_at);

        // Keep the capacity estimate current when the API reports one
        if let Some(kwh) = snap.battery.usable_capacity_kwh {
            vm.drive.set_pack_capacity(kwh);
            vm.charge.set_pack_capacity(kwh);
        }

        let mut output = TickOutput::default();

        match vm.drive.observe(snap) {
            DriveOutcome::None => {}
            DriveOutcome::Started | DriveOutcome::Updated => {
                if let Some(drive) = vm.drive.active() {
                    self.drives.upsert(drive).await?;
                }
            }
            DriveOutcome::Closed(drive) => {
                self.drives.upsert(&drive).await?;
                output.closed_drive = Some(drive);
            }
            DriveOutcome::ClosedAndStarted(closed) => {
                tracing::warn!(
                    vehicle_id = %snap.vehicle_id,
                    drive_id = %closed.id,
                    "Force-closed stale drive before opening a new one"
                );
                self.drives.upsert(&closed).await?;
                if let Some(drive) = vm.drive.active() {
                    self.drives.upsert(drive).await?;
                }
                output.closed_drive = Some(closed);
            }
        }

        match vm.charge.observe(snap) {
            ChargeOutcome::None => {}
            ChargeOutcome::Started | ChargeOutcome::Updated => {
                if let Some(session) = vm.charge.active() {
                    self.charges.upsert(session).await?;
                }
            }
            ChargeOutcome::Closed(session) => {
                self.charges.upsert(&session).await?;
                output.closed_charge = Some(session);
            }
        }

        Ok(output)
    }

    /// Periodic sweep closing drives whose idle timeout elapsed without a
    /// snapshot. The close uses the last known sample, not the sweep tick.
    pub async fn check_timeouts(&mut self, now: DateTime<Utc>) -> Result<Vec<Drive>> {
        let mut closed = Vec::new();
        for vm in self.vehicles.values_mut() {
            if let Some(drive) = vm.drive.check_timeout(now) {
                self.drives.upsert(&drive).await?;
                closed.push(drive);
            }
        }
        Ok(closed)
    }

    /// Startup reconciliation: sessions left `is_active` by a prior run are
    /// resumed when recent enough to be continued by the next snapshot, or
    /// force-closed at their last known sample once the grace window has
    /// elapsed.
    pub async fn reconcile(&mut self, vehicle_ids: &[Uuid], now: DateTime<Utc>) -> Result<()> {
        for &vehicle_id in vehicle_ids {
            let config = &self.config;
            let vm = self
                .vehicles
                .entry(vehicle_id)
                .or_insert_with(|| Self::machines_for(vehicle_id, config));

            if let Some(drive) = self.drives.get_active(vehicle_id).await? {
                let last_seen = drive
                    .positions
                    .last()
                    .map_or(drive.started_at, |p| p.recorded_at);
                vm.drive.resume(drive);
                if now - last_seen > self.config.reconcile_grace {
                    if let Some(closed) = vm.drive.force_close() {
                        tracing::warn!(
                            %vehicle_id,
                            drive_id = %closed.id,
                            "Reconciliation force-closed stale drive"
                        );
                        self.drives.upsert(&closed).await?;
                    }
                }
            }

            if let Some(session) = self.charges.get_active(vehicle_id).await? {
                let last_seen = session.last_updated_at;
                vm.charge.resume(session);
                if now - last_seen > self.config.reconcile_grace {
                    if let Some(closed) = vm.charge.force_close() {
                        tracing::warn!(
                            %vehicle_id,
                            session_id = %closed.id,
                            "Reconciliation force-closed stale charging session"
                        );
                        self.charges.upsert(&closed).await?;
                    }
                }
            }
        }
        Ok(())
    }

    fn machines_for(vehicle_id: Uuid, config: &SessionConfig) -> VehicleMachines {
        VehicleMachines {
            drive: DriveMachine::new(
                vehicle_id,
                config.default_pack_capacity_kwh,
                config.idle_drive_timeout,
            ),
            charge: ChargeMachine::new(
                vehicle_id,
                config.default_pack_capacity_kwh,
                config.min_calibration_soc_delta_pct,
                config.min_calibration_duration,
            ),
            last_ts: None,
        }
    }
}
