//! Typed decode step between raw vendor values and sensor readings.
//!
//! The Controme payload reports a missing physical sensor as a placeholder
//! string in an otherwise numeric field. Everything downstream of this module
//! works on the closed `Reading` variant set and never pattern-matches on raw
//! strings; a value that fails to parse becomes `Reading::Absent`, never an
//! error.

use crate::models::controme::{FloorId, RawFloor, RawRoom, RoomId};
use serde_json::Value;
use std::collections::BTreeMap;

/// Room operation mode, mapped from vendor codes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OperationMode {
    Heating,
    Cooling,
    /// Code not in the known set. Kept explicit so an unrecognized vendor
    /// code renders as such instead of failing the cycle.
    Unknown,
}

impl OperationMode {
    fn from_code(code: &str) -> OperationMode {
        match code.trim() {
            "1" | "Heizen" | "Heating" => OperationMode::Heating,
            "2" | "Kühlen" | "Cooling" => OperationMode::Cooling,
            _ => OperationMode::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationMode::Heating => "heating",
            OperationMode::Cooling => "cooling",
            OperationMode::Unknown => "unknown",
        }
    }
}

/// One typed value produced for a (room, field) pair during a poll cycle.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Reading {
    Numeric(f64),
    Mode(OperationMode),
    Absent,
}

impl Reading {
    pub fn is_absent(&self) -> bool {
        matches!(self, Reading::Absent)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Reading::Numeric(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_mode(&self) -> Option<OperationMode> {
        match self {
            Reading::Mode(m) => Some(*m),
            _ => None,
        }
    }
}

/// Parse a raw field as a float reading.
///
/// Accepts JSON numbers and numeric strings (decimal comma tolerated);
/// placeholder strings, nulls and missing fields all collapse to `Absent`.
pub fn numeric_reading(raw: Option<&Value>) -> Reading {
    match raw {
        Some(Value::Number(n)) => match n.as_f64() {
            Some(v) => Reading::Numeric(v),
            None => Reading::Absent,
        },
        Some(Value::String(s)) => match s.trim().replace(',', ".").parse::<f64>() {
            Ok(v) => Reading::Numeric(v),
            Err(_) => Reading::Absent,
        },
        _ => Reading::Absent,
    }
}

/// Parse a raw operation-mode field. Codes arrive as strings or numbers.
pub fn mode_reading(raw: Option<&Value>) -> Reading {
    match raw {
        Some(Value::String(s)) => Reading::Mode(OperationMode::from_code(s)),
        Some(Value::Number(n)) => Reading::Mode(OperationMode::from_code(&n.to_string())),
        _ => Reading::Absent,
    }
}

/// All normalized readings of one room for one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomReadings {
    pub room_id: RoomId,
    pub floor_id: FloorId,
    pub name: String,
    pub current_temperature: Reading,
    pub target_temperature: Reading,
    pub humidity: Reading,
    pub total_offset: Reading,
    pub operation_mode: Reading,
    /// One reading per return-flow sensor the room declares via the explicit
    /// capability flag, keyed by the sensor's name. Empty when the room has
    /// no return-flow circuit.
    pub return_temperatures: BTreeMap<String, Reading>,
}

pub fn normalize_room(floor_id: FloorId, room: &RawRoom) -> RoomReadings {
    let mut return_temperatures = BTreeMap::new();
    for (index, sensor) in room.return_flow_sensors().enumerate() {
        let name = sensor
            .name
            .clone()
            .unwrap_or_else(|| format!("Rücklauf {}", index + 1));
        return_temperatures.insert(name, numeric_reading(sensor.wert.as_ref()));
    }

    RoomReadings {
        room_id: room.id,
        floor_id,
        name: room
            .name
            .clone()
            .unwrap_or_else(|| format!("Raum {}", room.id.0)),
        current_temperature: numeric_reading(room.temperatur.as_ref()),
        target_temperature: numeric_reading(room.solltemperatur.as_ref()),
        humidity: numeric_reading(room.luftfeuchte.as_ref()),
        total_offset: numeric_reading(room.total_offset.as_ref()),
        operation_mode: mode_reading(room.betriebsart.as_ref()),
        return_temperatures,
    }
}

/// Normalize a whole house payload into per-room readings.
pub fn normalize_house(floors: &[RawFloor]) -> BTreeMap<RoomId, RoomReadings> {
    let mut rooms = BTreeMap::new();
    for floor in floors {
        if let Some(single) = floor.as_single_room() {
            rooms.insert(single.id, normalize_room(floor.id, &single));
            continue;
        }
        for room in &floor.raeume {
            rooms.insert(room.id, normalize_room(floor.id, room));
        }
    }
    rooms
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn load_house_fixture() -> Vec<RawFloor> {
        let json = std::fs::read_to_string("tests/data/house-temps.json").expect("fixture present");
        serde_json::from_str(&json).expect("parse house payload")
    }

    #[test]
    fn numeric_values_parse() {
        assert_eq!(numeric_reading(Some(&json!(21.5))), Reading::Numeric(21.5));
        assert_eq!(numeric_reading(Some(&json!(45))), Reading::Numeric(45.0));
        assert_eq!(numeric_reading(Some(&json!("19.8"))), Reading::Numeric(19.8));
        assert_eq!(numeric_reading(Some(&json!("19,8"))), Reading::Numeric(19.8));
    }

    #[test]
    fn placeholder_string_is_absent_not_an_error() {
        assert_eq!(
            numeric_reading(Some(&json!("kein Sensor vorhanden"))),
            Reading::Absent
        );
        assert_eq!(numeric_reading(Some(&Value::Null)), Reading::Absent);
        assert_eq!(numeric_reading(None), Reading::Absent);
    }

    #[test]
    fn mode_codes_map_to_closed_enum() {
        assert_eq!(
            mode_reading(Some(&json!("1"))),
            Reading::Mode(OperationMode::Heating)
        );
        assert_eq!(
            mode_reading(Some(&json!("2"))),
            Reading::Mode(OperationMode::Cooling)
        );
        assert_eq!(
            mode_reading(Some(&json!("Heizen"))),
            Reading::Mode(OperationMode::Heating)
        );
        assert_eq!(mode_reading(Some(&json!(1))), Reading::Mode(OperationMode::Heating));
        // unrecognized code stays a value, not an error
        assert_eq!(
            mode_reading(Some(&json!("9"))),
            Reading::Mode(OperationMode::Unknown)
        );
        assert_eq!(mode_reading(None), Reading::Absent);
    }

    #[test]
    fn return_temperatures_follow_capability_flag_only() {
        let fixture = load_house_fixture();
        let rooms = normalize_house(&fixture);

        // Wohnzimmer declares return-flow sensors (raumtemperatursensor=false)
        let wohnzimmer = &rooms[&RoomId(1)];
        assert_eq!(
            wohnzimmer.return_temperatures.get("Rücklauf HK1"),
            Some(&Reading::Numeric(28.3))
        );

        // Küche has no sensor entries at all
        let kueche = &rooms[&RoomId(3)];
        assert!(kueche.return_temperatures.is_empty());
    }

    #[test]
    fn every_return_flow_circuit_keeps_its_own_reading() {
        let floors: Vec<RawFloor> = serde_json::from_value(json!([
            {
                "id": 1,
                "etagenname": "EG",
                "raeume": [
                    {
                        "id": 1, "name": "Wohnzimmer", "temperatur": 21.5,
                        "sensoren": [
                            {"name": "Raumsensor", "wert": 21.5, "raumtemperatursensor": true},
                            {"name": "Rücklauf HK1", "wert": 28.3, "raumtemperatursensor": false},
                            {"name": "HK2", "wert": 31.7, "raumtemperatursensor": false}
                        ]
                    }
                ]
            }
        ]))
        .unwrap();

        let rooms = normalize_house(&floors);
        let returns = &rooms[&RoomId(1)].return_temperatures;
        assert_eq!(returns.len(), 2);
        assert_eq!(returns["Rücklauf HK1"], Reading::Numeric(28.3));
        assert_eq!(returns["HK2"], Reading::Numeric(31.7));
    }

    #[test]
    fn two_room_synthetic_payload() {
        let floors: Vec<RawFloor> = serde_json::from_value(json!([
            {
                "id": 1,
                "etagenname": "EG",
                "raeume": [
                    {"id": 10, "name": "A", "temperatur": 21.5, "luftfeuchte": 45, "betriebsart": "1"},
                    {"id": 11, "name": "B", "temperatur": "kein Sensor vorhanden", "luftfeuchte": 50, "betriebsart": "2"}
                ]
            }
        ]))
        .unwrap();

        let rooms = normalize_house(&floors);
        let a = &rooms[&RoomId(10)];
        let b = &rooms[&RoomId(11)];

        assert_eq!(a.current_temperature, Reading::Numeric(21.5));
        assert_eq!(a.humidity, Reading::Numeric(45.0));
        assert_eq!(a.operation_mode, Reading::Mode(OperationMode::Heating));

        assert_eq!(b.current_temperature, Reading::Absent);
        assert_eq!(b.humidity, Reading::Numeric(50.0));
        assert_eq!(b.operation_mode, Reading::Mode(OperationMode::Cooling));
    }

    #[test]
    fn room_less_floor_becomes_single_room() {
        let fixture = load_house_fixture();
        let rooms = normalize_house(&fixture);

        // Obergeschoss carries measurements directly on the floor object and
        // inherits the floor id as its room id
        let og = &rooms[&RoomId(2)];
        assert_eq!(og.floor_id, FloorId(2));
        assert_eq!(og.name, "Obergeschoss");
        assert_eq!(og.current_temperature, Reading::Numeric(19.8));
    }
}
