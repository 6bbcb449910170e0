//! Climate entity: one controllable heating zone per room.
//!
//! Reads go through the coordinator snapshot like every other entity; the
//! write path talks to the vendor API directly and then forces a coordinator
//! refresh so all entities reconcile with the controller's authoritative
//! state instead of optimistically trusting the requested value.

use crate::client::{ContromeApi, ContromeClientError, TargetDuration};
use crate::coordinator::UpdateCoordinator;
use crate::models::controme::{HouseId, RoomId};
use crate::normalize::{OperationMode, RoomReadings};
use log::debug;
use std::sync::Arc;

// Supported setpoint range of the room thermostats.
pub const MIN_TARGET_TEMP: f64 = 5.0;
pub const MAX_TARGET_TEMP: f64 = 30.0;
pub const TARGET_TEMP_STEP: f64 = 0.5;

#[derive(Debug)]
pub enum SetpointError {
    OutOfRange { requested: f64, min: f64, max: f64 },
    Write(ContromeClientError),
}

impl core::fmt::Display for SetpointError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SetpointError::OutOfRange { requested, min, max } => {
                write!(f, "target {} outside supported range {}..={}", requested, min, max)
            }
            SetpointError::Write(e) => write!(f, "setpoint write failed: {}", e),
        }
    }
}

impl std::error::Error for SetpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SetpointError::Write(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HvacMode {
    Heat,
    Off,
}

pub struct ClimateEntity {
    coordinator: Arc<UpdateCoordinator>,
    api: Arc<dyn ContromeApi>,
    house: HouseId,
    room: RoomId,
    name: String,
    unique_id: String,
}

impl ClimateEntity {
    pub fn room_id(&self) -> RoomId {
        self.room
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    fn readings(&self) -> Option<RoomReadings> {
        self.coordinator.room(self.room)
    }

    pub fn current_temperature(&self) -> Option<f64> {
        self.readings().and_then(|r| r.current_temperature.as_f64())
    }

    pub fn target_temperature(&self) -> Option<f64> {
        self.readings().and_then(|r| r.target_temperature.as_f64())
    }

    pub fn current_humidity(&self) -> Option<f64> {
        self.readings().and_then(|r| r.humidity.as_f64())
    }

    pub fn hvac_mode(&self) -> HvacMode {
        match self.readings().and_then(|r| r.operation_mode.as_mode()) {
            Some(OperationMode::Heating) => HvacMode::Heat,
            _ => HvacMode::Off,
        }
    }

    pub fn available(&self) -> bool {
        !self.coordinator.is_stale() && self.readings().is_some()
    }

    /// Issue a temporary setpoint override and reconcile.
    ///
    /// Strictly ordered: validate, write, then one forced refresh. The
    /// override duration is left to the controller's configured default. On
    /// a failed write nothing is refreshed and the snapshot keeps the last
    /// confirmed target.
    pub fn set_target_temperature(&self, target: f64) -> Result<(), SetpointError> {
        if !target.is_finite() || !(MIN_TARGET_TEMP..=MAX_TARGET_TEMP).contains(&target) {
            return Err(SetpointError::OutOfRange {
                requested: target,
                min: MIN_TARGET_TEMP,
                max: MAX_TARGET_TEMP,
            });
        }

        debug!(
            "Setting target {}°C for room {} (house {})",
            target, self.room.0, self.house.0
        );
        self.api
            .set_temporary_target(self.house, self.room, target, TargetDuration::DeviceDefault)
            .map_err(SetpointError::Write)?;

        self.coordinator.request_refresh();
        Ok(())
    }
}

/// One climate entity per room in the current snapshot.
pub fn build_climate_entities(
    coordinator: &Arc<UpdateCoordinator>,
    api: &Arc<dyn ContromeApi>,
    house: HouseId,
) -> Vec<ClimateEntity> {
    let mut entities = Vec::new();
    let Some(snapshot) = coordinator.snapshot() else {
        return entities;
    };

    for room in snapshot.rooms.values() {
        entities.push(ClimateEntity {
            coordinator: Arc::clone(coordinator),
            api: Arc::clone(api),
            house,
            room: room.room_id,
            name: room.name.clone(),
            unique_id: format!("{}_{}_{}_climate", house.0, room.floor_id.0, room.room_id.0),
        });
    }
    entities
}
