//! DHT11/DHT22 single-wire protocol driver over GPIO.
//!
//! The DHT family has no bus: the host pulls the data line low to request a
//! measurement, then the sensor answers with an 80 µs ack and 40 data bits
//! encoded in pulse width (a ~27 µs high is a 0, a ~70 µs high is a 1).
//! Payload is 5 bytes: humidity hi/lo, temperature hi/lo, checksum.
//!
//! Timing is tight enough that reads occasionally fail on a busy kernel;
//! callers treat a failed read as a null-valued reading, not an error.

use anyhow::Result;

use crate::types::DhtModel;

/// One decoded DHT measurement.
#[derive(Debug, Clone, Copy)]
pub struct DhtReading {
    pub temperature_c: f64,
    pub humidity: f64,
}

#[cfg(feature = "hardware")]
pub use hw::Dht;

#[cfg(feature = "hardware")]
mod hw {
    use super::*;
    use anyhow::{bail, Context};
    use rppal::gpio::{Gpio, IoPin, Level, Mode};
    use std::thread;
    use std::time::{Duration, Instant};

    /// Host start pulse: hold the line low this long to wake the sensor.
    /// DHT11 needs >= 18 ms; DHT22 is fine with ~2 ms but tolerates more.
    const START_LOW: Duration = Duration::from_millis(18);

    /// Upper bound for any single level phase during the transfer.
    const PHASE_TIMEOUT_US: u64 = 200;

    /// High pulses longer than this are decoded as a 1 bit.
    /// (0 bit ≈ 27 µs, 1 bit ≈ 70 µs; midpoint with margin.)
    const BIT_THRESHOLD_US: u64 = 48;

    /// DHT11/DHT22 driver holding the GPIO pin for its lifetime.
    pub struct Dht {
        io: IoPin,
        model: DhtModel,
    }

    impl Dht {
        /// Claim the BCM pin and park the line idle-high.
        pub fn open(pin: u8, model: DhtModel) -> Result<Self> {
            let gpio = Gpio::new().context("opening GPIO")?;
            let mut io = gpio
                .get(pin)
                .with_context(|| format!("claiming GPIO pin {pin}"))?
                .into_io(Mode::Output);
            io.set_high();

            tracing::info!(pin, model = ?model, "dht initialised");
            Ok(Self { io, model })
        }

        /// Run one full transfer and decode it.
        pub fn read(&mut self) -> Result<DhtReading> {
            let bytes = self.transfer()?;

            let sum = bytes[0]
                .wrapping_add(bytes[1])
                .wrapping_add(bytes[2])
                .wrapping_add(bytes[3]);
            if sum != bytes[4] {
                bail!("dht checksum mismatch: {bytes:02x?}");
            }

            Ok(decode(self.model, &bytes))
        }

        /// Issue the start pulse and sample the 40 data bits.
        fn transfer(&mut self) -> Result<[u8; 5]> {
            // Host start: low, then release.
            self.io.set_mode(Mode::Output);
            self.io.set_low();
            thread::sleep(START_LOW);
            self.io.set_high();
            self.io.set_mode(Mode::Input);

            // Sensor ack: ~80 µs low, ~80 µs high.
            self.wait_for(Level::Low)?;
            self.wait_for(Level::High)?;
            self.wait_for(Level::Low)?;

            // 40 bits: 50 µs low separator, then a high whose width is the bit.
            let mut bytes = [0u8; 5];
            for i in 0..40 {
                self.wait_for(Level::High)?;
                let high_us = self.wait_for(Level::Low)?;
                if high_us > BIT_THRESHOLD_US {
                    bytes[i / 8] |= 1 << (7 - (i % 8));
                }
            }

            Ok(bytes)
        }

        /// Busy-wait until the line reaches `level`; returns the time spent
        /// at the previous level in microseconds.
        fn wait_for(&self, level: Level) -> Result<u64> {
            let start = Instant::now();
            while self.io.read() != level {
                let waited = start.elapsed().as_micros() as u64;
                if waited > PHASE_TIMEOUT_US {
                    bail!("dht timeout waiting for {level:?} ({waited} µs)");
                }
            }
            Ok(start.elapsed().as_micros() as u64)
        }
    }

    /// Decode the 5-byte payload per model. DHT11 sends integer degrees and
    /// percent; DHT22 sends tenths with a sign bit on the temperature.
    fn decode(model: DhtModel, bytes: &[u8; 5]) -> DhtReading {
        match model {
            DhtModel::Dht11 => DhtReading {
                humidity: bytes[0] as f64,
                temperature_c: bytes[2] as f64,
            },
            DhtModel::Dht22 => {
                let humidity = u16::from_be_bytes([bytes[0], bytes[1]]) as f64 / 10.0;
                let raw_t = u16::from_be_bytes([bytes[2] & 0x7f, bytes[3]]) as f64 / 10.0;
                let temperature_c = if bytes[2] & 0x80 != 0 { -raw_t } else { raw_t };
                DhtReading {
                    humidity,
                    temperature_c,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Stub (no `hardware` feature)
// ---------------------------------------------------------------------------

/// Stub used on hosts built without GPIO support: opening always fails, so
/// the reader caches the failure and keeps producing null readings.
#[cfg(not(feature = "hardware"))]
pub struct Dht {
    _private: (),
}

#[cfg(not(feature = "hardware"))]
impl Dht {
    pub fn open(pin: u8, model: DhtModel) -> Result<Self> {
        anyhow::bail!("dht on pin {pin} ({model:?}): built without the `hardware` feature")
    }

    pub fn read(&mut self) -> Result<DhtReading> {
        anyhow::bail!("dht stub cannot read")
    }
}
