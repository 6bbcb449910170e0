//! Read-only sensor entities: stateless projections over the coordinator's
//! published snapshot.

use crate::coordinator::UpdateCoordinator;
use crate::models::controme::{HouseId, RoomId};
use crate::normalize::Reading;
use std::sync::Arc;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SensorKind {
    CurrentTemperature,
    TargetTemperature,
    Humidity,
    ReturnTemperature,
    TotalOffset,
    OperationMode,
}

impl SensorKind {
    /// Stable key used in unique ids, independent of display language.
    pub fn key(&self) -> &'static str {
        match self {
            SensorKind::CurrentTemperature => "current",
            SensorKind::TargetTemperature => "target",
            SensorKind::Humidity => "humidity",
            SensorKind::ReturnTemperature => "return",
            SensorKind::TotalOffset => "total_offset",
            SensorKind::OperationMode => "operation_mode",
        }
    }

    pub fn unit(&self) -> Option<&'static str> {
        match self {
            SensorKind::CurrentTemperature
            | SensorKind::TargetTemperature
            | SensorKind::ReturnTemperature
            | SensorKind::TotalOffset => Some("°C"),
            SensorKind::Humidity => Some("%"),
            SensorKind::OperationMode => None,
        }
    }

    /// Display label, matching the vendor's own terminology.
    pub fn label(&self) -> &'static str {
        match self {
            SensorKind::CurrentTemperature => "Temperatur",
            SensorKind::TargetTemperature => "Zieltemperatur",
            SensorKind::Humidity => "Luftfeuchtigkeit",
            SensorKind::ReturnTemperature => "Rücklauftemperatur",
            SensorKind::TotalOffset => "Temperaturanpassung",
            SensorKind::OperationMode => "Betriebsart",
        }
    }
}

pub struct RoomSensor {
    coordinator: Arc<UpdateCoordinator>,
    room: RoomId,
    kind: SensorKind,
    /// Return-flow circuit this sensor reads, `None` for the base kinds.
    circuit: Option<String>,
    name: String,
    unique_id: String,
}

impl RoomSensor {
    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn room_id(&self) -> RoomId {
        self.room
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Current reading for this sensor, `Absent` when the room disappeared
    /// from the snapshot or no snapshot exists yet.
    pub fn reading(&self) -> Reading {
        let Some(room) = self.coordinator.room(self.room) else {
            return Reading::Absent;
        };
        match self.kind {
            SensorKind::CurrentTemperature => room.current_temperature,
            SensorKind::TargetTemperature => room.target_temperature,
            SensorKind::Humidity => room.humidity,
            SensorKind::ReturnTemperature => self
                .circuit
                .as_ref()
                .and_then(|c| room.return_temperatures.get(c).copied())
                .unwrap_or(Reading::Absent),
            SensorKind::TotalOffset => room.total_offset,
            SensorKind::OperationMode => room.operation_mode,
        }
    }

    /// Unavailable instead of erroring: an absent reading or a snapshot aged
    /// past the staleness threshold both just flip this to false.
    pub fn available(&self) -> bool {
        !self.coordinator.is_stale() && !self.reading().is_absent()
    }

    /// Rendered state for the host platform, `None` when absent.
    pub fn state(&self) -> Option<String> {
        match self.reading() {
            Reading::Numeric(v) => Some(v.to_string()),
            Reading::Mode(m) => Some(m.as_str().to_string()),
            Reading::Absent => None,
        }
    }
}

const BASE_SENSOR_KINDS: [SensorKind; 5] = [
    SensorKind::CurrentTemperature,
    SensorKind::TargetTemperature,
    SensorKind::Humidity,
    SensorKind::TotalOffset,
    SensorKind::OperationMode,
];

/// Build the sensor set for every room in the current snapshot.
///
/// Return-temperature sensors are created one per return-flow circuit the
/// room's payload declared via its capability flag, with the circuit name
/// scoping the unique id; no label text is ever consulted.
pub fn build_room_sensors(coordinator: &Arc<UpdateCoordinator>, house: HouseId) -> Vec<RoomSensor> {
    let mut sensors = Vec::new();
    let Some(snapshot) = coordinator.snapshot() else {
        return sensors;
    };

    for room in snapshot.rooms.values() {
        for kind in BASE_SENSOR_KINDS {
            sensors.push(RoomSensor {
                coordinator: Arc::clone(coordinator),
                room: room.room_id,
                kind,
                circuit: None,
                name: format!("{} {}", room.name, kind.label()),
                unique_id: format!(
                    "{}_{}_{}_{}",
                    house.0,
                    room.floor_id.0,
                    room.room_id.0,
                    kind.key()
                ),
            });
        }
        for circuit in room.return_temperatures.keys() {
            let kind = SensorKind::ReturnTemperature;
            sensors.push(RoomSensor {
                coordinator: Arc::clone(coordinator),
                room: room.room_id,
                kind,
                circuit: Some(circuit.clone()),
                name: format!("{} {} {}", room.name, kind.label(), circuit),
                unique_id: format!(
                    "{}_{}_{}_{}_{}",
                    house.0,
                    room.floor_id.0,
                    room.room_id.0,
                    kind.key(),
                    circuit
                ),
            });
        }
    }
    sensors
}
