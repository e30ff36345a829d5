//! Sensor reader variants and selection.
//!
//! A `Reader` is contractually total: `read` always produces a `Reading`,
//! substituting a null value (plus a diagnostic log) when the hardware is
//! absent, fails to initialise, or errors mid-read. Hardware handles are
//! probed lazily on first read and the outcome — including failure — is
//! cached for the reader's lifetime, so a missing driver is reported once
//! instead of every poll cycle.

use chrono::Utc;
use tracing::{error, warn};

use crate::bme280::Bme280;
use crate::dht::Dht;
use crate::types::{DhtModel, Reading, SensorSpec, SensorType};

/// Default I²C bus on the Raspberry Pi.
const DEFAULT_I2C_BUS: u8 = 1;

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn null_reading(spec: &SensorSpec) -> Reading {
    Reading {
        name: spec.name.clone(),
        kind: spec.kind,
        unit: spec.unit.clone(),
        value: None,
        timestamp: now_millis(),
    }
}

fn reading_with(spec: &SensorSpec, value: Option<f64>) -> Reading {
    Reading {
        name: spec.name.clone(),
        kind: spec.kind,
        unit: spec.unit.clone(),
        value,
        timestamp: now_millis(),
    }
}

// ---------------------------------------------------------------------------
// Lazy hardware port
// ---------------------------------------------------------------------------

/// Explicit three-state lifecycle for a hardware handle. `Failed` is a
/// first-class terminal state: once a probe fails, the reader keeps
/// producing null readings without re-probing.
enum Port<T> {
    Unprobed,
    Ready(T),
    Failed,
}

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

/// The compile-time table of reader capabilities.
pub enum Reader {
    Mock(MockReader),
    Dht(DhtReader),
    Bme280(Bme280Reader),
}

impl Reader {
    /// Pick the variant for a sensor spec. Priority: explicit mock (or no
    /// hardware block) → GPIO pin → I²C address → mock fallback with a
    /// warning.
    pub fn for_spec(spec: &SensorSpec) -> Reader {
        let hw = match &spec.hardware {
            None => return Reader::Mock(MockReader),
            Some(hw) if hw.mock => return Reader::Mock(MockReader),
            Some(hw) => hw,
        };

        if let Some(pin) = hw.pin {
            let model = hw.model.unwrap_or(DhtModel::Dht22);
            return Reader::Dht(DhtReader::new(pin, model));
        }

        if let Some(address) = hw.i2c_address {
            let bus = hw.i2c_bus_no.unwrap_or(DEFAULT_I2C_BUS);
            return Reader::Bme280(Bme280Reader::new(address, bus));
        }

        warn!(
            sensor = %spec.id,
            "unrecognised hardware configuration, falling back to mock reader"
        );
        Reader::Mock(MockReader)
    }

    /// Read one measurement. Never fails.
    pub fn read(&mut self, spec: &SensorSpec) -> Reading {
        match self {
            Reader::Mock(r) => r.read(spec),
            Reader::Dht(r) => r.read(spec),
            Reader::Bme280(r) => r.read(spec),
        }
    }
}

// ---------------------------------------------------------------------------
// Mock
// ---------------------------------------------------------------------------

/// Synthesizes plausible values per sensor type so the full pipeline can be
/// exercised without hardware attached.
pub struct MockReader;

impl MockReader {
    pub fn read(&mut self, spec: &SensorSpec) -> Reading {
        let value = match spec.kind {
            SensorType::Temperature => round1(uniform(22.0, 34.0)),
            SensorType::Humidity => round1(uniform(30.0, 70.0)),
            SensorType::Water => {
                if fastrand::bool() {
                    1.0
                } else {
                    0.0
                }
            }
            SensorType::Pressure => round1(uniform(980.0, 1040.0)),
        };
        reading_with(spec, Some(value))
    }
}

fn uniform(min: f64, max: f64) -> f64 {
    min + fastrand::f64() * (max - min)
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// DHT (GPIO)
// ---------------------------------------------------------------------------

/// DHT11/DHT22 on a GPIO pin. Serves temperature or humidity depending on
/// the sensor type; other types read as null.
pub struct DhtReader {
    pin: u8,
    model: DhtModel,
    port: Port<Dht>,
}

impl DhtReader {
    pub fn new(pin: u8, model: DhtModel) -> Self {
        Self {
            pin,
            model,
            port: Port::Unprobed,
        }
    }

    pub fn read(&mut self, spec: &SensorSpec) -> Reading {
        if let Port::Unprobed = self.port {
            self.port = match Dht::open(self.pin, self.model) {
                Ok(dht) => Port::Ready(dht),
                Err(e) => {
                    warn!(sensor = %spec.id, pin = self.pin, "dht unavailable: {e}");
                    Port::Failed
                }
            };
        }

        let dht = match &mut self.port {
            Port::Ready(dht) => dht,
            _ => return null_reading(spec),
        };

        match dht.read() {
            Ok(m) => {
                let value = match spec.kind {
                    SensorType::Temperature => Some(m.temperature_c),
                    SensorType::Humidity => Some(m.humidity),
                    _ => {
                        warn!(sensor = %spec.id, kind = %spec.kind, "dht cannot serve this type");
                        None
                    }
                };
                reading_with(spec, value)
            }
            Err(e) => {
                // Transient: DHT timing glitches are normal, keep the port.
                error!(sensor = %spec.id, pin = self.pin, "dht read failed: {e}");
                null_reading(spec)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// BME280 (I²C)
// ---------------------------------------------------------------------------

/// BME280 on an I²C bus. Serves temperature, humidity or pressure; other
/// types read as null.
pub struct Bme280Reader {
    address: u16,
    bus: u8,
    port: Port<Bme280>,
}

impl Bme280Reader {
    pub fn new(address: u16, bus: u8) -> Self {
        Self {
            address,
            bus,
            port: Port::Unprobed,
        }
    }

    pub fn read(&mut self, spec: &SensorSpec) -> Reading {
        if let Port::Unprobed = self.port {
            self.port = match Bme280::open(self.address, self.bus) {
                Ok(dev) => Port::Ready(dev),
                Err(e) => {
                    warn!(
                        sensor = %spec.id,
                        addr = format_args!("0x{:02x}", self.address),
                        "bme280 unavailable: {e}"
                    );
                    Port::Failed
                }
            };
        }

        let dev = match &mut self.port {
            Port::Ready(dev) => dev,
            _ => return null_reading(spec),
        };

        match dev.read() {
            Ok(m) => {
                let value = match spec.kind {
                    SensorType::Temperature => Some(m.temperature_c),
                    SensorType::Humidity => Some(m.humidity),
                    SensorType::Pressure => Some(m.pressure_hpa),
                    SensorType::Water => {
                        warn!(sensor = %spec.id, "bme280 cannot serve water sensors");
                        None
                    }
                };
                reading_with(spec, value)
            }
            Err(e) => {
                error!(
                    sensor = %spec.id,
                    addr = format_args!("0x{:02x}", self.address),
                    "bme280 read failed: {e}"
                );
                null_reading(spec)
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Hardware;

    fn spec(kind: SensorType, unit: &str, hardware: Option<Hardware>) -> SensorSpec {
        SensorSpec {
            id: "s1".into(),
            name: "Sensor".into(),
            kind,
            unit: unit.into(),
            active: None,
            hardware,
            limits: None,
        }
    }

    // -- Selection priority ------------------------------------------------

    #[test]
    fn no_hardware_selects_mock() {
        let s = spec(SensorType::Temperature, "°C", None);
        assert!(matches!(Reader::for_spec(&s), Reader::Mock(_)));
    }

    #[test]
    fn mock_flag_beats_pin_and_i2c() {
        let s = spec(
            SensorType::Temperature,
            "°C",
            Some(Hardware {
                mock: true,
                pin: Some(4),
                i2c_address: Some(0x76),
                ..Default::default()
            }),
        );
        assert!(matches!(Reader::for_spec(&s), Reader::Mock(_)));
    }

    #[test]
    fn pin_beats_i2c_address() {
        let s = spec(
            SensorType::Temperature,
            "°C",
            Some(Hardware {
                pin: Some(4),
                i2c_address: Some(0x76),
                ..Default::default()
            }),
        );
        assert!(matches!(Reader::for_spec(&s), Reader::Dht(_)));
    }

    #[test]
    fn i2c_address_selects_bme280() {
        let s = spec(
            SensorType::Pressure,
            "hPa",
            Some(Hardware {
                i2c_address: Some(0x76),
                ..Default::default()
            }),
        );
        assert!(matches!(Reader::for_spec(&s), Reader::Bme280(_)));
    }

    #[test]
    fn empty_hardware_block_falls_back_to_mock() {
        let s = spec(SensorType::Temperature, "°C", Some(Hardware::default()));
        assert!(matches!(Reader::for_spec(&s), Reader::Mock(_)));
    }

    // -- Mock synthesis ----------------------------------------------------

    #[test]
    fn mock_temperature_in_plausible_range() {
        let s = spec(SensorType::Temperature, "°C", None);
        let mut r = MockReader;
        for _ in 0..50 {
            let reading = r.read(&s);
            let v = reading.value.unwrap();
            assert!((22.0..=34.0).contains(&v), "out of range: {v}");
        }
    }

    #[test]
    fn mock_water_is_zero_or_one() {
        let s = spec(SensorType::Water, "present", None);
        let mut r = MockReader;
        for _ in 0..50 {
            let v = r.read(&s).value.unwrap();
            assert!(v == 0.0 || v == 1.0, "unexpected water value: {v}");
        }
    }

    #[test]
    fn mock_reading_carries_spec_identity() {
        let s = spec(SensorType::Humidity, "%", None);
        let reading = MockReader.read(&s);
        assert_eq!(reading.name, "Sensor");
        assert_eq!(reading.kind, SensorType::Humidity);
        assert_eq!(reading.unit, "%");
        assert!(reading.timestamp > 1_700_000_000_000);
    }

    // -- Hardware readers are total ----------------------------------------

    #[test]
    fn dht_reader_never_panics_without_hardware() {
        // On a host without the `hardware` feature (or without the pin
        // wired), the probe fails, gets cached, and reads stay null.
        let s = spec(
            SensorType::Temperature,
            "°C",
            Some(Hardware {
                pin: Some(4),
                ..Default::default()
            }),
        );
        let mut r = Reader::for_spec(&s);
        for _ in 0..3 {
            let reading = r.read(&s);
            assert_eq!(reading.kind, SensorType::Temperature);
            // value may be Some on a real Pi; absent hardware yields None.
        }
    }

    #[test]
    fn bme280_reader_never_panics_without_hardware() {
        let s = spec(
            SensorType::Pressure,
            "hPa",
            Some(Hardware {
                i2c_address: Some(0x76),
                ..Default::default()
            }),
        );
        let mut r = Reader::for_spec(&s);
        for _ in 0..3 {
            let _ = r.read(&s);
        }
    }
}
