//! Wire models for the Controme mini-server JSON API.
//!
//! Scope: types only — no client code.
//!
//! Notes
//! - Measurement fields stay `serde_json::Value` at this layer: the vendor
//!   mixes plain numbers with placeholder strings such as
//!   `"kein Sensor vorhanden"` in the same field. Typing happens in
//!   `crate::normalize`.
//! - Field names follow the vendor payload (German) verbatim.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =====================
// Scalar ID newtype wrappers
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HouseId(pub i64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FloorId(pub i64);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub i64);

// =====================
// Payload objects
// =====================

/// One entry of the house-list endpoint, used for setup-time discovery.
#[derive(Debug, Clone, Deserialize)]
pub struct RawHouse {
    pub id: HouseId,
    #[serde(default)]
    pub name: Option<String>,
}

/// One floor from the `temps` endpoint, with its rooms nested.
///
/// Small installations report measurements directly on the floor object with
/// an empty `raeume` list; `as_single_room` covers that shape.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFloor {
    pub id: FloorId,
    #[serde(default)]
    pub etagenname: Option<String>,
    #[serde(default)]
    pub raeume: Vec<RawRoom>,
    #[serde(default)]
    pub temperatur: Option<Value>,
    #[serde(default)]
    pub solltemperatur: Option<Value>,
    #[serde(default)]
    pub luftfeuchte: Option<Value>,
    #[serde(default)]
    pub total_offset: Option<Value>,
    #[serde(default)]
    pub betriebsart: Option<Value>,
    #[serde(default)]
    pub sensoren: Vec<RawRoomSensor>,
}

impl RawFloor {
    /// Reinterpret a room-less floor that carries its own measurement fields
    /// as a single room. Returns `None` when the floor has real rooms or no
    /// measurements at all.
    pub fn as_single_room(&self) -> Option<RawRoom> {
        if !self.raeume.is_empty() {
            return None;
        }
        if self.temperatur.is_none() && self.solltemperatur.is_none() {
            return None;
        }
        Some(RawRoom {
            id: RoomId(self.id.0),
            name: self.etagenname.clone(),
            temperatur: self.temperatur.clone(),
            solltemperatur: self.solltemperatur.clone(),
            luftfeuchte: self.luftfeuchte.clone(),
            total_offset: self.total_offset.clone(),
            betriebsart: self.betriebsart.clone(),
            sensoren: self.sensoren.clone(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRoom {
    pub id: RoomId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub temperatur: Option<Value>,
    #[serde(default)]
    pub solltemperatur: Option<Value>,
    #[serde(default)]
    pub luftfeuchte: Option<Value>,
    #[serde(default)]
    pub total_offset: Option<Value>,
    #[serde(default)]
    pub betriebsart: Option<Value>,
    #[serde(default)]
    pub sensoren: Vec<RawRoomSensor>,
}

/// A physical sensor attached to a room.
///
/// `raumtemperatursensor == false` explicitly marks a return-flow sensor;
/// that flag is the only thing deciding whether a return-temperature reading
/// exists for the room. Sensor display names are locale-dependent and must
/// not be interpreted, they only label the individual circuit.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRoomSensor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub wert: Option<Value>,
    #[serde(default)]
    pub raumtemperatursensor: Option<bool>,
}

impl RawRoom {
    /// The room's return-flow sensor entries. Rooms with several heating
    /// circuits declare one entry per circuit.
    pub fn return_flow_sensors(&self) -> impl Iterator<Item = &RawRoomSensor> {
        self.sensoren
            .iter()
            .filter(|s| s.raumtemperatursensor == Some(false))
    }
}
