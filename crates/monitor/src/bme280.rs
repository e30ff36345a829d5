//! BME280 temperature/humidity/pressure driver over I²C.
//!
//! Forced-mode, oversampling ×1 on all channels: each read triggers one
//! conversion, waits for it, then applies the datasheet integer
//! compensation (section 4.2.3 of the Bosch datasheet) using the
//! factory calibration read once at open time.

use anyhow::Result;

/// One compensated BME280 measurement.
#[derive(Debug, Clone, Copy)]
pub struct Bme280Reading {
    pub temperature_c: f64,
    pub humidity: f64,
    pub pressure_hpa: f64,
}

#[cfg(feature = "hardware")]
pub use hw::Bme280;

#[cfg(feature = "hardware")]
mod hw {
    use super::*;
    use anyhow::{bail, Context};
    use rppal::i2c::I2c;
    use std::thread;
    use std::time::Duration;

    // ── Registers ───────────────────────────────────────────────────────

    const REG_ID: u8 = 0xD0;
    const REG_CALIB_TP: u8 = 0x88; // 26 bytes: T1..T3, P1..P9, H1
    const REG_CALIB_H: u8 = 0xE1; // 7 bytes: H2..H6
    const REG_CTRL_HUM: u8 = 0xF2;
    const REG_CTRL_MEAS: u8 = 0xF4;
    const REG_DATA: u8 = 0xF7; // 8 bytes: press, temp, hum

    /// Expected chip id for the BME280.
    const CHIP_ID: u8 = 0x60;

    /// osrs_h = ×1.
    const CTRL_HUM_X1: u8 = 0x01;
    /// osrs_t = ×1, osrs_p = ×1, mode = forced.
    const CTRL_MEAS_FORCED_X1: u8 = 0b001_001_01;

    /// Max conversion time at ×1 oversampling is ~9.3 ms.
    const CONVERSION_WAIT: Duration = Duration::from_millis(10);

    // ── Calibration ─────────────────────────────────────────────────────

    #[derive(Debug, Clone, Copy)]
    struct Calibration {
        t1: u16,
        t2: i16,
        t3: i16,
        p1: u16,
        p2: i16,
        p3: i16,
        p4: i16,
        p5: i16,
        p6: i16,
        p7: i16,
        p8: i16,
        p9: i16,
        h1: u8,
        h2: i16,
        h3: u8,
        h4: i16,
        h5: i16,
        h6: i8,
    }

    fn le16(buf: &[u8], i: usize) -> u16 {
        u16::from_le_bytes([buf[i], buf[i + 1]])
    }

    impl Calibration {
        fn parse(tp: &[u8; 26], h: &[u8; 7]) -> Self {
            Self {
                t1: le16(tp, 0),
                t2: le16(tp, 2) as i16,
                t3: le16(tp, 4) as i16,
                p1: le16(tp, 6),
                p2: le16(tp, 8) as i16,
                p3: le16(tp, 10) as i16,
                p4: le16(tp, 12) as i16,
                p5: le16(tp, 14) as i16,
                p6: le16(tp, 16) as i16,
                p7: le16(tp, 18) as i16,
                p8: le16(tp, 20) as i16,
                p9: le16(tp, 22) as i16,
                h1: tp[25],
                h2: le16(h, 0) as i16,
                h3: h[2],
                // H4/H5 share a nibble register (0xE5).
                h4: ((h[3] as i16) << 4) | (h[4] & 0x0F) as i16,
                h5: ((h[5] as i16) << 4) | ((h[4] >> 4) & 0x0F) as i16,
                h6: h[6] as i8,
            }
        }
    }

    // ── Driver ──────────────────────────────────────────────────────────

    /// BME280 driver backed by `rppal::i2c`.
    pub struct Bme280 {
        i2c: I2c,
        calib: Calibration,
    }

    impl Bme280 {
        /// Open the given I²C bus, verify the chip id and read calibration.
        pub fn open(address: u16, bus: u8) -> Result<Self> {
            let mut i2c = I2c::with_bus(bus).with_context(|| format!("opening I2C bus {bus}"))?;
            i2c.set_slave_address(address)
                .with_context(|| format!("addressing 0x{address:02x}"))?;

            let mut id = [0u8; 1];
            i2c.block_read(REG_ID, &mut id)?;
            if id[0] != CHIP_ID {
                bail!(
                    "unexpected chip id 0x{:02x} at 0x{address:02x} (want 0x{CHIP_ID:02x})",
                    id[0]
                );
            }

            let mut tp = [0u8; 26];
            i2c.block_read(REG_CALIB_TP, &mut tp)?;
            let mut h = [0u8; 7];
            i2c.block_read(REG_CALIB_H, &mut h)?;

            tracing::info!(
                addr = format_args!("0x{address:02x}"),
                bus,
                "bme280 initialised"
            );

            Ok(Self {
                i2c,
                calib: Calibration::parse(&tp, &h),
            })
        }

        /// Trigger one forced conversion and return the compensated values.
        pub fn read(&mut self) -> Result<Bme280Reading> {
            // ctrl_hum must be written before ctrl_meas to take effect.
            self.i2c.block_write(REG_CTRL_HUM, &[CTRL_HUM_X1])?;
            self.i2c.block_write(REG_CTRL_MEAS, &[CTRL_MEAS_FORCED_X1])?;
            thread::sleep(CONVERSION_WAIT);

            let mut buf = [0u8; 8];
            self.i2c.block_read(REG_DATA, &mut buf)?;

            let adc_p = ((buf[0] as i32) << 12) | ((buf[1] as i32) << 4) | ((buf[2] as i32) >> 4);
            let adc_t = ((buf[3] as i32) << 12) | ((buf[4] as i32) << 4) | ((buf[5] as i32) >> 4);
            let adc_h = ((buf[6] as i32) << 8) | buf[7] as i32;

            let (t_centi, t_fine) = compensate_temperature(adc_t, &self.calib);
            let p_q24_8 = compensate_pressure(adc_p, t_fine, &self.calib);
            let h_q22_10 = compensate_humidity(adc_h, t_fine, &self.calib);

            Ok(Bme280Reading {
                temperature_c: t_centi as f64 / 100.0,
                pressure_hpa: p_q24_8 as f64 / 256.0 / 100.0,
                humidity: h_q22_10 as f64 / 1024.0,
            })
        }
    }

    // ── Datasheet integer compensation ──────────────────────────────────

    /// Returns (temperature in 0.01 °C, t_fine carry for the other channels).
    fn compensate_temperature(adc_t: i32, c: &Calibration) -> (i32, i32) {
        let var1 = (((adc_t >> 3) - ((c.t1 as i32) << 1)) * c.t2 as i32) >> 11;
        let var2 = (((((adc_t >> 4) - c.t1 as i32) * ((adc_t >> 4) - c.t1 as i32)) >> 12)
            * c.t3 as i32)
            >> 14;
        let t_fine = var1 + var2;
        ((t_fine * 5 + 128) >> 8, t_fine)
    }

    /// Returns pressure in Pa as Q24.8, or 0 when the divisor degenerates.
    fn compensate_pressure(adc_p: i32, t_fine: i32, c: &Calibration) -> i64 {
        let mut var1 = t_fine as i64 - 128_000;
        let mut var2 = var1 * var1 * c.p6 as i64;
        var2 += (var1 * c.p5 as i64) << 17;
        var2 += (c.p4 as i64) << 35;
        var1 = ((var1 * var1 * c.p3 as i64) >> 8) + ((var1 * c.p2 as i64) << 12);
        var1 = (((1i64 << 47) + var1) * c.p1 as i64) >> 33;
        if var1 == 0 {
            return 0;
        }
        let mut p = 1_048_576 - adc_p as i64;
        p = (((p << 31) - var2) * 3125) / var1;
        let var1 = ((c.p9 as i64) * (p >> 13) * (p >> 13)) >> 25;
        let var2 = ((c.p8 as i64) * p) >> 19;
        ((p + var1 + var2) >> 8) + ((c.p7 as i64) << 4)
    }

    /// Returns relative humidity in % as Q22.10.
    fn compensate_humidity(adc_h: i32, t_fine: i32, c: &Calibration) -> u32 {
        let x = t_fine - 76_800;
        let a = ((adc_h << 14) - ((c.h4 as i32) << 20) - c.h5 as i32 * x + 16_384) >> 15;
        let b = (((((x * c.h6 as i32) >> 10) * (((x * c.h3 as i32) >> 11) + 32_768)) >> 10)
            + 2_097_152)
            * c.h2 as i32
            + 8_192;
        let mut v = a * (b >> 14);
        v -= ((((v >> 15) * (v >> 15)) >> 7) * c.h1 as i32) >> 4;
        (v.clamp(0, 419_430_400) >> 12) as u32
    }
}

// ---------------------------------------------------------------------------
// Stub (no `hardware` feature)
// ---------------------------------------------------------------------------

/// Stub used on hosts built without I²C support: opening always fails, so
/// the reader caches the failure and keeps producing null readings.
#[cfg(not(feature = "hardware"))]
pub struct Bme280 {
    _private: (),
}

#[cfg(not(feature = "hardware"))]
impl Bme280 {
    pub fn open(address: u16, bus: u8) -> Result<Self> {
        anyhow::bail!(
            "bme280 at 0x{address:02x} on bus {bus}: built without the `hardware` feature"
        )
    }

    pub fn read(&mut self) -> Result<Bme280Reading> {
        anyhow::bail!("bme280 stub cannot read")
    }
}
