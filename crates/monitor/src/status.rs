//! Pure status evaluation: maps a sensor spec + latest reading (+ time of
//! day) to `ok` / `warning` / `unknown`.
//!
//! Called fresh on every check; nothing here is cached. The day/night
//! window supports schedules that wrap past midnight (e.g. day starts at
//! 20, night at 6 for a nocturnal setup).

use chrono::{TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::config::GeneralConfig;
use crate::types::{Limits, Range, Reading, SensorSpec, SensorType, Status};

/// Sentinel value meaning "water detected" for presence-unit water sensors.
const WATER_PRESENT: f64 = 1.0;

/// Evaluate `spec` against `reading` using the current hour in the
/// configured timezone.
pub fn evaluate(spec: &SensorSpec, reading: Option<&Reading>, general: &GeneralConfig) -> Status {
    evaluate_at(spec, reading, general, local_hour(&general.timezone))
}

/// Evaluate at an explicit local hour (0-23). Split out so day/night window
/// selection is testable without the wall clock.
pub fn evaluate_at(
    spec: &SensorSpec,
    reading: Option<&Reading>,
    general: &GeneralConfig,
    hour: u32,
) -> Status {
    let value = match reading.and_then(|r| r.value) {
        Some(v) => v,
        None => return Status::Unknown,
    };

    // Presence sensors bypass numeric limits entirely.
    if spec.kind == SensorType::Water && spec.unit == "present" {
        return if value == WATER_PRESENT {
            Status::Ok
        } else {
            Status::Warning
        };
    }

    let range = match spec.limits {
        Some(Limits::General(range)) => range,
        Some(Limits::TimeBased(dn)) => {
            if is_day_hour(hour, general.day_start_hour, general.night_start_hour) {
                dn.day
            } else {
                dn.night
            }
        }
        None => return Status::Unknown,
    };

    check_range(value, range)
}

/// Is `hour` inside the day window? Handles both the plain split
/// (`day_start < night_start`) and the wrapping one (`night_start <=
/// day_start`), where the day window crosses midnight.
pub fn is_day_hour(hour: u32, day_start: u32, night_start: u32) -> bool {
    if day_start < night_start {
        hour >= day_start && hour < night_start
    } else {
        hour >= day_start || hour < night_start
    }
}

/// Compare against a range where an absent side is unbounded. Both sides
/// absent carries no information, hence `unknown`.
fn check_range(value: f64, range: Range) -> Status {
    if range.min.is_none() && range.max.is_none() {
        return Status::Unknown;
    }
    let below = range.min.is_some_and(|min| value < min);
    let above = range.max.is_some_and(|max| value > max);
    if below || above {
        Status::Warning
    } else {
        Status::Ok
    }
}

/// Current hour (0-23) in the given IANA timezone; unparseable names fall
/// back to UTC.
pub(crate) fn local_hour(timezone: &str) -> u32 {
    let tz: Tz = match timezone.parse() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(timezone, "unknown timezone, falling back to UTC");
            Tz::UTC
        }
    };
    tz.from_utc_datetime(&Utc::now().naive_utc()).hour()
}

// ===========================================================================
// Tests
// ===========================================================================
