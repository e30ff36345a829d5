//! Core data model: sensor specifications, readings, log entries and the
//! derived status classification.
//!
//! All serde shapes use camelCase field names so the JSON records on disk
//! stay compatible with what the configuration layer writes.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Sensor identity
// ---------------------------------------------------------------------------

/// Physical quantity a sensor measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorType {
    Temperature,
    Humidity,
    Water,
    Pressure,
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temperature => write!(f, "temperature"),
            Self::Humidity => write!(f, "humidity"),
            Self::Water => write!(f, "water"),
            Self::Pressure => write!(f, "pressure"),
        }
    }
}

/// Configuration describing one physical sensor: identity, type, limits and
/// hardware binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorSpec {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SensorType,
    pub unit: String,
    /// Absent means active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware: Option<Hardware>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<Limits>,
}

impl SensorSpec {
    /// Only an explicit `active: false` disables a sensor.
    pub fn is_active(&self) -> bool {
        self.active != Some(false)
    }
}

/// On-disk record wrapping the sensor list (`{"sensors": [...]}`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SensorList {
    #[serde(default)]
    pub sensors: Vec<SensorSpec>,
}

// ---------------------------------------------------------------------------
// Hardware binding
// ---------------------------------------------------------------------------

/// DHT sensor model selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DhtModel {
    #[serde(rename = "11")]
    Dht11,
    #[serde(rename = "22")]
    Dht22,
}

/// Hardware-specific settings for a sensor. Which fields are present decides
/// the reader variant (see `reader::Reader::for_spec`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hardware {
    /// Force the mock reader regardless of other fields.
    #[serde(default)]
    pub mock: bool,
    /// BCM GPIO pin number (DHT11/DHT22).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<DhtModel>,
    /// I²C device address (BME280).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i2c_address: Option<u16>,
    /// I²C bus number, defaults to 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub i2c_bus_no: Option<u8>,
}

// ---------------------------------------------------------------------------
// Acceptable ranges
// ---------------------------------------------------------------------------

/// A min/max pair; an absent side means unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Range {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// Day/night range pair for time-based limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DayNight {
    pub day: Range,
    pub night: Range,
}

/// Acceptable-range descriptor: either one flat range or a day/night pair.
/// Adjacently tagged, so the on-disk shape is
/// `"limits": {"limitsType": "...", "readingLimits": {...}}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "limitsType", content = "readingLimits", rename_all = "camelCase")]
pub enum Limits {
    General(Range),
    TimeBased(DayNight),
}

// ---------------------------------------------------------------------------
// Readings & history
// ---------------------------------------------------------------------------

/// One timestamped measurement. `value` is `None` when the hardware read
/// failed; the reading is still produced so the sensor never disappears.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SensorType,
    pub unit: String,
    pub value: Option<f64>,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

/// Latest reading per sensor id. Written only by the polling service.
pub type LiveSnapshot = HashMap<String, Reading>;

/// One snapshot of the live store, appended to the bounded history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: i64,
    pub readings: LiveSnapshot,
}

// ---------------------------------------------------------------------------
// Derived status
// ---------------------------------------------------------------------------

/// Health classification of a sensor. Derived on every evaluation, never
/// stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Warning,
    Unknown,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Warning => write!(f, "warning"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
